//! One live `Conversation` per key. Conversations never share mutable state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use crate::chat::controller::{Conversation, ConversationOptions};
use crate::chat::store::MessageStore;
use crate::chat::streaming::StreamingClient;
use crate::models::chat::ConversationKey;
use crate::models::persona::PersonaProfile;

pub struct ConversationRegistry {
    store: Arc<dyn MessageStore>,
    client: StreamingClient,
    options: ConversationOptions,
    conversations: Mutex<HashMap<ConversationKey, Arc<Conversation>>>,
}

impl ConversationRegistry {
    pub fn new(
        store: Arc<dyn MessageStore>,
        client: StreamingClient,
        options: ConversationOptions,
    ) -> Self {
        Self {
            store,
            client,
            options,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the live conversation for `key` with `profile` as its persona.
    /// An existing conversation picks the profile up from its next reply on.
    pub fn get_or_create(&self, key: ConversationKey, profile: PersonaProfile) -> Arc<Conversation> {
        let mut conversations = self.lock();
        if let Some(conversation) = conversations.get(&key) {
            conversation.refresh_profile(profile);
            return conversation.clone();
        }

        debug!("Opening conversation {key}");
        let conversation = Arc::new(Conversation::new(
            key,
            profile,
            self.store.clone(),
            self.client.clone(),
            self.options,
        ));
        conversations.insert(key, conversation.clone());
        conversation
    }

    pub fn get(&self, key: ConversationKey) -> Option<Arc<Conversation>> {
        self.lock().get(&key).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    /// Drops conversations that have been idle, unobserved, for at least `max_idle`.
    /// History is already persisted, so an evicted key simply rehydrates on next access.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut conversations = self.lock();
        let before = conversations.len();
        conversations.retain(|_, conversation| {
            conversation
                .idle_for()
                .map_or(true, |idle| idle < max_idle)
        });
        let evicted = before - conversations.len();
        if evicted > 0 {
            info!("Evicted {evicted} idle conversations ({} live)", conversations.len());
        }
        evicted
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationKey, Arc<Conversation>>> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs `evict_idle` every `interval` for the life of the process.
pub fn spawn_eviction(registry: Arc<ConversationRegistry>, max_idle: Duration, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            registry.evict_idle(max_idle);
        }
    });
}
