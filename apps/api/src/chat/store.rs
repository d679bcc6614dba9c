//! Message Store: append-only persisted log of chat turns per conversation key.
//!
//! The store is write-behind from the conversation's point of view: in-memory state is
//! authoritative for the live session, the store only exists for rehydration on reload.
//! Callers go through `load_or_empty` / `persist*`, which log failures and never
//! surface them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::chat::{ChatMessage, ChatMessageRow, ConversationKey, Feedback};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence backend for chat messages. Swap backends without touching the controller.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages for `key` in creation order.
    async fn load_history(&self, key: ConversationKey) -> Result<Vec<ChatMessage>, StoreError>;

    /// Durably appends `message`. Appending an id that already exists is a no-op.
    async fn append_message(
        &self,
        key: ConversationKey,
        message: &ChatMessage,
    ) -> Result<(), StoreError>;

    async fn update_feedback(
        &self,
        message_id: Uuid,
        feedback: Option<Feedback>,
    ) -> Result<(), StoreError>;

    /// Deletes every message for `key`.
    async fn clear_history(&self, key: ConversationKey) -> Result<(), StoreError>;
}

/// Loads history, degrading to an empty list when the store is unavailable.
pub async fn load_or_empty(store: &dyn MessageStore, key: ConversationKey) -> Vec<ChatMessage> {
    match store.load_history(key).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!("Failed to load chat history for {key}, starting empty: {e}");
            Vec::new()
        }
    }
}

/// Appends a message; failure is logged and the conversation carries on.
pub async fn persist(store: &dyn MessageStore, key: ConversationKey, message: &ChatMessage) {
    if let Err(e) = store.append_message(key, message).await {
        error!("Failed to persist message {} for {key}: {e}", message.id);
    }
}

pub async fn persist_feedback(store: &dyn MessageStore, message_id: Uuid, feedback: Option<Feedback>) {
    if let Err(e) = store.update_feedback(message_id, feedback).await {
        error!("Failed to persist feedback for message {message_id}: {e}");
    }
}

pub async fn persist_clear(store: &dyn MessageStore, key: ConversationKey) {
    if let Err(e) = store.clear_history(key).await {
        error!("Failed to clear chat history for {key}: {e}");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ordered write-behind queue
// ────────────────────────────────────────────────────────────────────────────

enum StoreOp {
    Append(ChatMessage),
    Feedback {
        message_id: Uuid,
        feedback: Option<Feedback>,
    },
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Per-conversation writer. Operations are applied strictly in the order they were
/// queued, so a clear can never overtake an earlier append (or the reverse).
/// Queuing never blocks, which lets the controller enqueue while holding its state lock.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreOp>,
}

impl StoreWriter {
    /// Spawns the writer task. It exits once every handle has been dropped.
    pub fn spawn(store: Arc<dyn MessageStore>, key: ConversationKey) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store, key, rx));
        Self { tx }
    }

    pub fn append(&self, message: ChatMessage) {
        self.enqueue(StoreOp::Append(message));
    }

    pub fn feedback(&self, message_id: Uuid, feedback: Option<Feedback>) {
        self.enqueue(StoreOp::Feedback {
            message_id,
            feedback,
        });
    }

    pub fn clear(&self) {
        self.enqueue(StoreOp::Clear);
    }

    /// Resolves once every previously queued operation has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.enqueue(StoreOp::Flush(done));
        let _ = wait.await;
    }

    fn enqueue(&self, op: StoreOp) {
        if self.tx.send(op).is_err() {
            error!("Chat store writer has stopped; dropping write");
        }
    }
}

async fn run_writer(
    store: Arc<dyn MessageStore>,
    key: ConversationKey,
    mut rx: mpsc::UnboundedReceiver<StoreOp>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            StoreOp::Append(message) => persist(store.as_ref(), key, &message).await,
            StoreOp::Feedback {
                message_id,
                feedback,
            } => persist_feedback(store.as_ref(), message_id, feedback).await,
            StoreOp::Clear => persist_clear(store.as_ref(), key).await,
            StoreOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Chat store writer for {key} stopped");
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL backend
// ────────────────────────────────────────────────────────────────────────────

/// Stores messages in the `chat_messages` table, keyed by `resume_id`.
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn load_history(&self, key: ConversationKey) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query_as::<_, ChatMessageRow>(
            "SELECT * FROM chat_messages WHERE resume_id = $1 ORDER BY created_at ASC",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                ChatMessage::try_from(row)
                    .map_err(|reason| warn!("Skipping unreadable chat message {id}: {reason}"))
                    .ok()
            })
            .collect())
    }

    async fn append_message(
        &self,
        key: ConversationKey,
        message: &ChatMessage,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, resume_id, role, content, feedback, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(message.id)
        .bind(key)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.feedback.map(|f| f.as_str()))
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_feedback(
        &self,
        message_id: Uuid,
        feedback: Option<Feedback>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE chat_messages SET feedback = $1 WHERE id = $2")
            .bind(feedback.map(|f| f.as_str()))
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_history(&self, key: ConversationKey) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM chat_messages WHERE resume_id = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ────────────────────────────────────────────────────────────────────────────

/// Process-local store. Used when no database is configured, and in tests.
#[derive(Default)]
pub struct InMemoryMessageStore {
    conversations: Mutex<HashMap<ConversationKey, Vec<ChatMessage>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ConversationKey, Vec<ChatMessage>>>, StoreError>
    {
        self.conversations
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store poisoned".to_string()))
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn load_history(&self, key: ConversationKey) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self.lock()?.get(&key).cloned().unwrap_or_default())
    }

    async fn append_message(
        &self,
        key: ConversationKey,
        message: &ChatMessage,
    ) -> Result<(), StoreError> {
        let mut conversations = self.lock()?;
        let messages = conversations.entry(key).or_default();
        if !messages.iter().any(|m| m.id == message.id) {
            messages.push(message.clone());
        }
        Ok(())
    }

    async fn update_feedback(
        &self,
        message_id: Uuid,
        feedback: Option<Feedback>,
    ) -> Result<(), StoreError> {
        let mut conversations = self.lock()?;
        if let Some(message) = conversations
            .values_mut()
            .flat_map(|messages| messages.iter_mut())
            .find(|m| m.id == message_id)
        {
            message.feedback = feedback;
        }
        Ok(())
    }

    async fn clear_history(&self, key: ConversationKey) -> Result<(), StoreError> {
        if let Some(messages) = self.lock()?.get_mut(&key) {
            messages.clear();
        }
        Ok(())
    }
}
