//! Axum route handlers for the Conversation API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;
use tracing::warn;
use uuid::Uuid;

use crate::chat::controller::{ChatEvent, Conversation, ConversationSnapshot, SendReceipt};
use crate::errors::AppError;
use crate::models::chat::Feedback;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub feedback: Feedback,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub message_id: Uuid,
    pub feedback: Option<Feedback>,
}

#[derive(Debug, Deserialize)]
pub struct ResetQuery {
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize)]
pub struct DetachResponse {
    pub detached: bool,
}

/// Live conversation for `resume_id`, bound to the resume's persona on first access.
async fn open_conversation(
    state: &AppState,
    resume_id: Uuid,
) -> Result<Arc<Conversation>, AppError> {
    match state.registry.get(resume_id) {
        Some(conversation) => Ok(conversation),
        None => load_conversation(state, resume_id).await,
    }
}

/// Re-reads the persona so edits made since the conversation opened take effect.
async fn load_conversation(
    state: &AppState,
    resume_id: Uuid,
) -> Result<Arc<Conversation>, AppError> {
    let row = state
        .resumes
        .find_by_id(resume_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resume {resume_id} not found")))?;
    let profile = row.profile().map_err(|e| {
        AppError::UnprocessableEntity(format!("Resume {resume_id} has unreadable persona data: {e}"))
    })?;

    Ok(state.registry.get_or_create(resume_id, profile))
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/conversations/:resume_id/init
pub async fn handle_initialize(
    State(state): State<AppState>,
    Path(resume_id): Path<Uuid>,
) -> Result<Json<ConversationSnapshot>, AppError> {
    let conversation = load_conversation(&state, resume_id).await?;
    Ok(Json(conversation.initialize().await))
}

/// GET /api/v1/conversations/:resume_id
///
/// First access initializes the conversation.
pub async fn handle_get_conversation(
    State(state): State<AppState>,
    Path(resume_id): Path<Uuid>,
) -> Result<Json<ConversationSnapshot>, AppError> {
    let conversation = load_conversation(&state, resume_id).await?;
    Ok(Json(conversation.initialize().await))
}

/// POST /api/v1/conversations/:resume_id/messages
///
/// Returns as soon as the placeholder exists; the reply arrives over the event stream.
pub async fn handle_send_message(
    State(state): State<AppState>,
    Path(resume_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendReceipt>), AppError> {
    let conversation = open_conversation(&state, resume_id).await?;
    let receipt = conversation.send(&request.text)?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// PATCH /api/v1/conversations/:resume_id/messages/:id/feedback
pub async fn handle_set_feedback(
    State(state): State<AppState>,
    Path((resume_id, message_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, AppError> {
    let conversation = open_conversation(&state, resume_id).await?;
    let feedback = conversation.set_feedback(message_id, request.feedback)?;
    Ok(Json(FeedbackResponse {
        message_id,
        feedback,
    }))
}

/// DELETE /api/v1/conversations/:resume_id/messages?confirm=true
pub async fn handle_reset(
    State(state): State<AppState>,
    Path(resume_id): Path<Uuid>,
    Query(params): Query<ResetQuery>,
) -> Result<Json<ConversationSnapshot>, AppError> {
    if !params.confirm {
        return Err(AppError::Validation(
            "Reset deletes the whole conversation; repeat with confirm=true".to_string(),
        ));
    }
    let conversation = open_conversation(&state, resume_id).await?;
    Ok(Json(conversation.reset()))
}

/// DELETE /api/v1/conversations/:resume_id/stream
pub async fn handle_detach(
    State(state): State<AppState>,
    Path(resume_id): Path<Uuid>,
) -> Result<Json<DetachResponse>, AppError> {
    let detached = match state.registry.get(resume_id) {
        Some(conversation) => conversation.detach(),
        None => false,
    };
    Ok(Json(DetachResponse { detached }))
}

/// GET /api/v1/conversations/:resume_id/events
///
/// Server-sent events, one JSON `ChatEvent` per message. A lagging client skips the
/// events it missed and should re-fetch the snapshot.
pub async fn handle_events(
    State(state): State<AppState>,
    Path(resume_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let conversation = open_conversation(&state, resume_id).await?;
    let events = BroadcastStream::new(conversation.subscribe()).filter_map(move |item| {
        match item {
            Ok(event) => to_sse_event(&event).map(Ok),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Event subscriber for {resume_id} lagged by {skipped} events");
                None
            }
        }
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &ChatEvent) -> Option<Event> {
    Event::default()
        .json_data(event)
        .map_err(|e| warn!("Failed to encode chat event: {e}"))
        .ok()
}
