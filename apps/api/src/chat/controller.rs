//! Conversation Controller: orchestration of one conversation.
//!
//! State lives behind a synchronous mutex that is never held across an `.await`, so every
//! check-then-act (busy check and placeholder creation, finalize guard and persist) is
//! atomic. The reply itself runs on a spawned task: open the stream, feed the typewriter,
//! finalize. Persistence goes through the conversation's ordered `StoreWriter`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::error::ChatError;
use crate::chat::normalizer::{normalize_history, MergePolicy, Turn};
use crate::chat::prompts::{
    failure_note, failure_notice, failure_text, reset_welcome_message, welcome_message,
    NOTICE_DETACHED, NOTICE_FEEDBACK, NOTICE_RESET,
};
use crate::chat::store::{load_or_empty, MessageStore, StoreWriter};
use crate::chat::streaming::StreamingClient;
use crate::chat::typewriter::{drive, Reveal, RevealPolicy};
use crate::models::chat::{ChatMessage, ConversationKey, Feedback};
use crate::models::persona::PersonaProfile;

const EVENT_CAPACITY: usize = 256;

/// Per-conversation state machine. Anything but `Idle` rejects `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    /// User turn appended, waiting for the first fragment.
    Sending,
    Streaming,
    /// Upstream finished, typewriter still draining.
    Revealing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Change notifications for subscribers (the SSE channel).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageAppended {
        message: ChatMessage,
    },
    PhaseChanged {
        phase: Phase,
    },
    Revealed {
        message_id: Uuid,
        chunk: String,
    },
    Finalized {
        message: ChatMessage,
        failure: Option<String>,
    },
    /// `discarded` is set when the placeholder had no text yet and was removed.
    Detached {
        message_id: Uuid,
        discarded: bool,
    },
    FeedbackChanged {
        message_id: Uuid,
        feedback: Option<Feedback>,
    },
    Reset {
        messages: Vec<ChatMessage>,
    },
    Notice {
        level: NoticeLevel,
        text: String,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConversationOptions {
    pub reveal: RevealPolicy,
    pub merge: MergePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSnapshot {
    pub key: ConversationKey,
    pub phase: Phase,
    pub messages: Vec<ChatMessage>,
    pub suggestions: Vec<String>,
}

/// Ids handed back by an accepted `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub user_message_id: Uuid,
    pub assistant_message_id: Uuid,
}

struct ActiveReply {
    message_id: Uuid,
    task: AbortHandle,
}

struct ConversationState {
    /// Read when a reply starts; a refresh applies from the next reply on.
    profile: PersonaProfile,
    messages: Vec<ChatMessage>,
    phase: Phase,
    initialized: bool,
    active: Option<ActiveReply>,
    last_active: Instant,
}

impl ConversationState {
    /// Appends `message`, stamped strictly after the current tail.
    fn push(&mut self, mut message: ChatMessage) -> ChatMessage {
        if let Some(last) = self.messages.last() {
            message.stamp_after(last.timestamp);
        }
        self.messages.push(message.clone());
        message
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

pub struct Conversation {
    key: ConversationKey,
    store: Arc<dyn MessageStore>,
    writer: StoreWriter,
    client: StreamingClient,
    options: ConversationOptions,
    state: Mutex<ConversationState>,
    events: broadcast::Sender<ChatEvent>,
}

impl Conversation {
    /// Must be called inside a Tokio runtime: the store writer is spawned here.
    pub fn new(
        key: ConversationKey,
        profile: PersonaProfile,
        store: Arc<dyn MessageStore>,
        client: StreamingClient,
        options: ConversationOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            key,
            writer: StoreWriter::spawn(store.clone(), key),
            store,
            client,
            options,
            state: Mutex::new(ConversationState {
                profile,
                messages: Vec::new(),
                phase: Phase::Idle,
                initialized: false,
                active: None,
                last_active: Instant::now(),
            }),
            events,
        }
    }

    pub fn key(&self) -> ConversationKey {
        self.key
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        let state = self.lock();
        ConversationSnapshot {
            key: self.key,
            phase: state.phase,
            messages: state.messages.clone(),
            suggestions: state.profile.persona.example_responses.clone(),
        }
    }

    /// Swaps in an updated persona. An in-flight reply finishes with the old one.
    pub fn refresh_profile(&self, profile: PersonaProfile) {
        let mut state = self.lock();
        if state.profile != profile {
            debug!("Refreshing persona for conversation {}", self.key);
            state.profile = profile;
        }
    }

    /// How long the conversation has been idle with nobody listening, if it is.
    pub fn idle_for(&self) -> Option<Duration> {
        let state = self.lock();
        let unobserved = self.events.receiver_count() == 0;
        (state.active.is_none() && unobserved).then(|| state.last_active.elapsed())
    }

    /// Loads history, seeding a welcome message when there is none. Idempotent.
    pub async fn initialize(&self) -> ConversationSnapshot {
        if self.lock().initialized {
            return self.snapshot();
        }

        let history = load_or_empty(self.store.as_ref(), self.key).await;

        {
            let mut state = self.lock();
            // Another caller may have finished initializing while we were loading.
            if !state.initialized {
                state.initialized = true;
                state.touch();
                if history.is_empty() {
                    let welcome = ChatMessage::assistant(welcome_message(&state.profile.persona));
                    info!("Seeding welcome message for conversation {}", self.key);
                    let welcome = state.push(welcome);
                    self.writer.append(welcome.clone());
                    self.emit(ChatEvent::MessageAppended { message: welcome });
                } else {
                    debug!(
                        "Rehydrated {} messages for conversation {}",
                        history.len(),
                        self.key
                    );
                    state.messages = history;
                }
            }
        }

        self.snapshot()
    }

    /// Accepts a user message and starts the reply in the background.
    ///
    /// Rejections (`EmptyInput`, `Unbound`, `Busy`) leave the conversation untouched.
    pub fn send(self: &Arc<Self>, text: &str) -> Result<SendReceipt, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let mut state = self.lock();
        if !state.initialized {
            return Err(ChatError::Unbound);
        }
        if state.phase != Phase::Idle {
            return Err(ChatError::Busy);
        }

        let history = normalize_history(&state.messages, self.options.merge);
        let user = state.push(ChatMessage::user(text));
        let placeholder = state.push(ChatMessage::assistant(String::new()));
        let receipt = SendReceipt {
            user_message_id: user.id,
            assistant_message_id: placeholder.id,
        };

        state.phase = Phase::Sending;
        state.touch();
        self.writer.append(user.clone());

        let task = tokio::spawn(Arc::clone(self).run_turn(
            placeholder.id,
            text.to_string(),
            history,
            state.profile.clone(),
        ));
        state.active = Some(ActiveReply {
            message_id: placeholder.id,
            task: task.abort_handle(),
        });

        self.emit(ChatEvent::MessageAppended { message: user });
        self.emit(ChatEvent::MessageAppended {
            message: placeholder,
        });
        self.emit(ChatEvent::PhaseChanged {
            phase: Phase::Sending,
        });

        Ok(receipt)
    }

    async fn run_turn(
        self: Arc<Self>,
        message_id: Uuid,
        user_text: String,
        history: Vec<Turn>,
        profile: PersonaProfile,
    ) {
        let outcome = match self.client.open(&user_text, &history, &profile).await {
            Ok(stream) => {
                drive(stream, self.options.reveal, |step| {
                    self.apply_reveal(message_id, step)
                })
                .await
            }
            Err(e) => Err(e),
        };
        self.finalize(message_id, outcome);
    }

    fn apply_reveal(&self, message_id: Uuid, step: Reveal) {
        let mut state = self.lock();
        if !is_active(&state, message_id) {
            return;
        }
        match step {
            Reveal::FirstFragment => self.set_phase(&mut state, Phase::Streaming),
            Reveal::UpstreamComplete => self.set_phase(&mut state, Phase::Revealing),
            Reveal::Chunk(chunk) => {
                if let Some(message) = state.messages.iter_mut().find(|m| m.id == message_id) {
                    message.content.push_str(&chunk);
                }
                self.emit(ChatEvent::Revealed { message_id, chunk });
            }
        }
    }

    /// Completes the active reply and persists it exactly once.
    ///
    /// Failures become the message content (or a note appended to the partial reply).
    /// Returns `false` when `message_id` is no longer the active reply.
    pub(crate) fn finalize(&self, message_id: Uuid, outcome: Result<(), ChatError>) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !is_active(state, message_id) {
            return false;
        }
        if let Some(active) = state.active.take() {
            active.task.abort();
        }

        let Some(index) = state.messages.iter().position(|m| m.id == message_id) else {
            state.phase = Phase::Idle;
            return false;
        };
        let message = &mut state.messages[index];

        let failure = match outcome {
            Err(e) => Some(e),
            Ok(()) if message.content.trim().is_empty() => Some(ChatError::EmptyReply),
            Ok(()) => None,
        };

        if let Some(err) = &failure {
            warn!("Reply {message_id} in conversation {} failed: {err}", self.key);
            if message.content.trim().is_empty() {
                message.content = failure_text(err).to_string();
            } else {
                message.content.push_str(failure_note(err));
            }
        }

        let message = message.clone();
        self.writer.append(message.clone());
        state.phase = Phase::Idle;
        state.touch();

        if let Some(err) = &failure {
            self.emit(ChatEvent::Notice {
                level: NoticeLevel::Error,
                text: failure_notice(err).to_string(),
            });
        }
        self.emit(ChatEvent::Finalized {
            message,
            failure: failure.as_ref().map(|e| e.to_string()),
        });
        self.emit(ChatEvent::PhaseChanged { phase: Phase::Idle });
        true
    }

    /// Toggles feedback on `message_id` and returns the new value.
    pub fn set_feedback(
        &self,
        message_id: Uuid,
        value: Feedback,
    ) -> Result<Option<Feedback>, ChatError> {
        let mut state = self.lock();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(ChatError::UnknownMessage(message_id))?;

        let next = if message.feedback == Some(value) {
            None
        } else {
            Some(value)
        };
        message.feedback = next;
        self.writer.feedback(message_id, next);
        state.touch();

        self.emit(ChatEvent::FeedbackChanged {
            message_id,
            feedback: next,
        });
        if next.is_some() {
            self.emit(ChatEvent::Notice {
                level: NoticeLevel::Info,
                text: NOTICE_FEEDBACK.to_string(),
            });
        }
        Ok(next)
    }

    /// Destructive: drops any in-flight reply, clears persisted history and reseeds it.
    /// Confirmation is the caller's job.
    pub fn reset(&self) -> ConversationSnapshot {
        {
            let mut state = self.lock();
            if let Some(active) = state.active.take() {
                active.task.abort();
            }

            let welcome = ChatMessage::assistant(reset_welcome_message(&state.profile.persona));
            state.messages = vec![welcome.clone()];
            state.phase = Phase::Idle;
            state.initialized = true;
            state.touch();

            self.writer.clear();
            self.writer.append(welcome.clone());
            info!("Conversation {} reset", self.key);

            self.emit(ChatEvent::Reset {
                messages: vec![welcome],
            });
            self.emit(ChatEvent::PhaseChanged { phase: Phase::Idle });
            self.emit(ChatEvent::Notice {
                level: NoticeLevel::Info,
                text: NOTICE_RESET.to_string(),
            });
        }
        self.snapshot()
    }

    /// Abandons the in-flight reply: delivery and reveal stop and nothing is persisted.
    /// A placeholder without text is removed; partial text stays in memory only.
    /// Returns `false` when nothing was in flight.
    pub fn detach(&self) -> bool {
        let mut state = self.lock();
        let Some(active) = state.active.take() else {
            return false;
        };
        active.task.abort();
        state.phase = Phase::Idle;
        state.touch();

        let before = state.messages.len();
        state
            .messages
            .retain(|m| m.id != active.message_id || !m.content.trim().is_empty());
        let discarded = state.messages.len() < before;
        debug!(
            "Detached reply {} in conversation {} (discarded: {discarded})",
            active.message_id, self.key
        );

        self.emit(ChatEvent::Detached {
            message_id: active.message_id,
            discarded,
        });
        self.emit(ChatEvent::PhaseChanged { phase: Phase::Idle });
        self.emit(ChatEvent::Notice {
            level: NoticeLevel::Info,
            text: NOTICE_DETACHED.to_string(),
        });
        true
    }

    /// Waits until every store write queued so far has been applied.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    fn set_phase(&self, state: &mut ConversationState, phase: Phase) {
        if state.phase != phase {
            state.phase = phase;
            self.emit(ChatEvent::PhaseChanged { phase });
        }
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_active(state: &ConversationState, message_id: Uuid) -> bool {
    state
        .active
        .as_ref()
        .is_some_and(|a| a.message_id == message_id)
}
