use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::warn;

use crate::chat::controller::ConversationOptions;
use crate::chat::normalizer::MergePolicy;
use crate::chat::registry::ConversationRegistry;
use crate::chat::store::{InMemoryMessageStore, MessageStore, PgMessageStore};
use crate::chat::streaming::StreamingClient;
use crate::chat::typewriter::RevealPolicy;
use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::GenerationApi;
use crate::resumes::{InMemoryResumeDirectory, PgResumeDirectory, ResumeDirectory};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Live conversations, one per resume id.
    pub registry: Arc<ConversationRegistry>,
    /// Postgres-backed when DATABASE_URL is set, seeded from RESUMES_FILE otherwise.
    pub resumes: Arc<dyn ResumeDirectory>,
    pub config: Config,
}

impl AppState {
    /// Wires persistence and the conversation registry from `config`.
    ///
    /// Without a database, resumes come from `RESUMES_FILE`; with neither there would be
    /// nothing to chat with, so startup fails.
    pub async fn from_config(config: &Config, generation: Arc<dyn GenerationApi>) -> Result<Self> {
        let (store, resumes): (Arc<dyn MessageStore>, Arc<dyn ResumeDirectory>) =
            match (&config.database_url, &config.resumes_file) {
                (Some(url), _) => {
                    let db = create_pool(url).await?;
                    (
                        Arc::new(PgMessageStore::new(db.clone())),
                        Arc::new(PgResumeDirectory::new(db)),
                    )
                }
                (None, Some(path)) => {
                    warn!("DATABASE_URL not set; chat history is kept in memory and lost on restart");
                    (
                        Arc::new(InMemoryMessageStore::new()),
                        Arc::new(InMemoryResumeDirectory::from_file(path)?),
                    )
                }
                (None, None) => bail!("Set DATABASE_URL, or RESUMES_FILE to run without a database"),
            };

        let options = ConversationOptions {
            reveal: RevealPolicy::with_tick(config.reveal_tick()),
            merge: MergePolicy::default(),
        };
        let registry = ConversationRegistry::new(store, StreamingClient::new(generation), options);

        Ok(AppState {
            registry: Arc::new(registry),
            resumes,
            config: config.clone(),
        })
    }
}
