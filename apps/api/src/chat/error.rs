use thiserror::Error;
use uuid::Uuid;

use crate::llm_client::LlmError;

/// Failure kinds of the conversational core.
///
/// `EmptyInput`, `Busy` and `Unbound` are rejections: nothing was created.
/// The generation kinds are never propagated to the UI as errors; the controller turns
/// them into the content of the assistant turn (see `prompts::failure_text`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyInput,

    #[error("A reply is already in progress")]
    Busy,

    #[error("Conversation is not initialized")]
    Unbound,

    #[error("Message {0} not found")]
    UnknownMessage(Uuid),

    #[error("Generation credential is missing")]
    CredentialMissing,

    #[error("Generation credential was rejected")]
    CredentialInvalid,

    #[error("Reply blocked by content safety: {0}")]
    SafetyBlocked(String),

    #[error("Reply stream ended without any text")]
    EmptyReply,

    #[error("Reply stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingCredential => ChatError::CredentialMissing,
            LlmError::InvalidCredential { .. } => ChatError::CredentialInvalid,
            LlmError::SafetyBlocked(reason) => ChatError::SafetyBlocked(reason),
            other => ChatError::StreamInterrupted(other.to_string()),
        }
    }
}
