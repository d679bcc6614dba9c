use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service version and whether chat replies can reach the generation service.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "persona-api",
        "model": state.config.llm_model,
        "credential_configured": state.config.llm_api_key.is_some(),
        "persistent_history": state.config.database_url.is_some()
    }))
}
