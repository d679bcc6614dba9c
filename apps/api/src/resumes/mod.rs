//! Read model over extracted resumes. The chat core only ever reads from here.

pub mod handlers;

use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::resume::ResumeRow;

/// Lightweight listing entry for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumeSummary {
    pub id: Uuid,
    pub identifier: String,
    pub name: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ResumeRow> for ResumeSummary {
    fn from(row: &ResumeRow) -> Self {
        let field = |key: &str| {
            row.resume_data
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            id: row.id,
            identifier: row.identifier.clone(),
            name: field("name"),
            title: field("title"),
            created_at: row.created_at,
        }
    }
}

#[async_trait]
pub trait ResumeDirectory: Send + Sync {
    /// A user's resumes, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ResumeRow>, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ResumeRow>, sqlx::Error>;

    /// Resolves a public persona slug.
    async fn find_by_identifier(&self, identifier: &str)
        -> Result<Option<ResumeRow>, sqlx::Error>;
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL backend
// ────────────────────────────────────────────────────────────────────────────

pub struct PgResumeDirectory {
    pool: PgPool,
}

impl PgResumeDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResumeDirectory for PgResumeDirectory {
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ResumeRow>, sqlx::Error> {
        sqlx::query_as::<_, ResumeRow>(
            "SELECT * FROM resumes WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ResumeRow>, sqlx::Error> {
        sqlx::query_as::<_, ResumeRow>("SELECT * FROM resumes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<ResumeRow>, sqlx::Error> {
        sqlx::query_as::<_, ResumeRow>(
            "SELECT * FROM resumes WHERE identifier = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory backend (no DATABASE_URL, tests)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryResumeDirectory {
    rows: Mutex<Vec<ResumeRow>>,
}

impl InMemoryResumeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON array of resume rows, e.g. an export of the `resumes` table.
    /// Every row's persona must decode, so a bad file fails at startup rather than on chat.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read resumes file {}", path.display()))?;
        let rows: Vec<ResumeRow> = serde_json::from_str(&raw)
            .with_context(|| format!("Resumes file {} is not a JSON array of resumes", path.display()))?;

        for row in &rows {
            row.profile()
                .with_context(|| format!("Resume {} has unreadable persona data", row.id))?;
        }
        if rows.is_empty() {
            bail!("Resumes file {} contains no resumes", path.display());
        }

        info!("Loaded {} resumes from {}", rows.len(), path.display());
        Ok(Self {
            rows: Mutex::new(rows),
        })
    }

    pub fn insert(&self, row: ResumeRow) {
        self.lock().push(row);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ResumeRow>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ResumeDirectory for InMemoryResumeDirectory {
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ResumeRow>, sqlx::Error> {
        let mut rows: Vec<_> = self
            .lock()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ResumeRow>, sqlx::Error> {
        Ok(self.lock().iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<ResumeRow>, sqlx::Error> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.identifier == identifier)
            .max_by_key(|r| r.created_at)
            .cloned())
    }
}
