pub mod health;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::chat::handlers as chat;
use crate::resumes::handlers as resumes;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Resume read model
        .route("/api/v1/resumes", get(resumes::handle_list_resumes))
        .route(
            "/api/v1/personas/:identifier",
            get(resumes::handle_get_persona),
        )
        // Conversation API
        .route(
            "/api/v1/conversations/:resume_id",
            get(chat::handle_get_conversation),
        )
        .route(
            "/api/v1/conversations/:resume_id/init",
            post(chat::handle_initialize),
        )
        .route(
            "/api/v1/conversations/:resume_id/messages",
            post(chat::handle_send_message).delete(chat::handle_reset),
        )
        .route(
            "/api/v1/conversations/:resume_id/messages/:id/feedback",
            patch(chat::handle_set_feedback),
        )
        .route(
            "/api/v1/conversations/:resume_id/stream",
            delete(chat::handle_detach),
        )
        .route(
            "/api/v1/conversations/:resume_id/events",
            get(chat::handle_events),
        )
        .with_state(state)
}
