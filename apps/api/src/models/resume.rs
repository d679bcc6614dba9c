use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::persona::{PersonaContext, PersonaProfile, ResumeData};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResumeRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resume_data: Value,
    pub persona_data: Value,
    pub identifier: String,
    pub created_at: DateTime<Utc>,
}

impl ResumeRow {
    /// Decodes the stored JSON columns into the typed profile the chat core reads.
    pub fn profile(&self) -> Result<PersonaProfile, serde_json::Error> {
        let resume: ResumeData = serde_json::from_value(self.resume_data.clone())?;
        let persona: PersonaContext = serde_json::from_value(self.persona_data.clone())?;
        Ok(PersonaProfile { persona, resume })
    }
}
