use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::persona::{PersonaContext, ResumeData};
use crate::models::resume::ResumeRow;
use crate::resumes::ResumeSummary;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PersonaResponse {
    pub resume_id: Uuid,
    pub persona: PersonaContext,
    pub resume: ResumeData,
}

impl TryFrom<ResumeRow> for PersonaResponse {
    type Error = AppError;

    fn try_from(row: ResumeRow) -> Result<Self, Self::Error> {
        let profile = row.profile().map_err(|e| {
            AppError::UnprocessableEntity(format!("Resume {} has unreadable persona data: {e}", row.id))
        })?;
        Ok(Self {
            resume_id: row.id,
            persona: profile.persona,
            resume: profile.resume,
        })
    }
}

/// GET /api/v1/resumes?user_id=
pub async fn handle_list_resumes(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<ResumeSummary>>, AppError> {
    let rows = state.resumes.list_for_user(params.user_id).await?;
    Ok(Json(rows.iter().map(ResumeSummary::from).collect()))
}

/// GET /api/v1/personas/:identifier
pub async fn handle_get_persona(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<PersonaResponse>, AppError> {
    let row = state
        .resumes
        .find_by_identifier(&identifier)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Persona '{identifier}' not found")))?;
    Ok(Json(PersonaResponse::try_from(row)?))
}
