//! Streaming Client: one generation call, exposed as a lazy sequence of reply fragments.
//!
//! The system instruction is built once per call from the persona profile. Empty
//! fragments are filtered out, and a reply that ends without a single fragment is an
//! `EmptyReply` failure rather than a silent success. Nothing is persisted here.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::chat::error::ChatError;
use crate::chat::normalizer::Turn;
use crate::chat::prompts::build_system_instruction;
use crate::llm_client::{FragmentStream, GenerationApi};
use crate::models::persona::PersonaProfile;

pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[derive(Clone)]
pub struct StreamingClient {
    api: Arc<dyn GenerationApi>,
}

impl StreamingClient {
    pub fn new(api: Arc<dyn GenerationApi>) -> Self {
        Self { api }
    }

    /// Opens a reply to `user_message` given the normalized `history`.
    pub async fn open(
        &self,
        user_message: &str,
        history: &[Turn],
        profile: &PersonaProfile,
    ) -> Result<ReplyStream, ChatError> {
        let system_instruction = build_system_instruction(&profile.persona, &profile.resume);
        debug!(
            "Opening reply stream for persona '{}' with {} prior turns",
            profile.persona.name,
            history.len()
        );

        let upstream = self
            .api
            .stream_reply(&system_instruction, history, user_message)
            .await?;

        Ok(Box::pin(non_empty_reply(upstream)))
    }
}

fn non_empty_reply(mut upstream: FragmentStream) -> impl Stream<Item = Result<String, ChatError>> + Send {
    async_stream::try_stream! {
        let mut received = 0usize;
        while let Some(fragment) = upstream.next().await {
            let fragment = fragment.map_err(ChatError::from)?;
            if fragment.is_empty() {
                continue;
            }
            received += 1;
            yield fragment;
        }
        if received == 0 {
            Err::<(), _>(ChatError::EmptyReply)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::normalizer::TurnRole;
    use crate::chat::testing::{sample_profile, Script, ScriptedGeneration};
    use crate::llm_client::LlmError;

    async fn collect(stream: ReplyStream) -> Vec<Result<String, ChatError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_fragments_arrive_in_order_without_empties() {
        let api = Arc::new(ScriptedGeneration::new(vec![Script::Reply(vec!["Hel", "", "lo"])]));
        let client = StreamingClient::new(api.clone());
        let stream = client.open("hi", &[], &sample_profile()).await.unwrap();
        let items = collect(stream).await;
        assert_eq!(items, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);
    }

    #[tokio::test]
    async fn test_zero_fragments_is_empty_reply() {
        let api = Arc::new(ScriptedGeneration::new(vec![Script::Reply(vec![])]));
        let client = StreamingClient::new(api);
        let stream = client.open("hi", &[], &sample_profile()).await.unwrap();
        assert_eq!(collect(stream).await, vec![Err(ChatError::EmptyReply)]);
    }

    #[tokio::test]
    async fn test_only_empty_fragments_is_empty_reply() {
        let api = Arc::new(ScriptedGeneration::new(vec![Script::Reply(vec!["", ""])]));
        let client = StreamingClient::new(api);
        let stream = client.open("hi", &[], &sample_profile()).await.unwrap();
        assert_eq!(collect(stream).await, vec![Err(ChatError::EmptyReply)]);
    }

    #[tokio::test]
    async fn test_open_failure_keeps_credential_kind() {
        let api = Arc::new(ScriptedGeneration::new(vec![Script::RejectOpen(|| {
            LlmError::MissingCredential
        })]));
        let client = StreamingClient::new(api);
        let result = client.open("hi", &[], &sample_profile()).await;
        assert!(matches!(result, Err(ChatError::CredentialMissing)));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_interruption() {
        let api = Arc::new(ScriptedGeneration::new(vec![Script::BreakAfter(vec!["part"], "eof")]));
        let client = StreamingClient::new(api);
        let stream = client.open("hi", &[], &sample_profile()).await.unwrap();
        let items = collect(stream).await;
        assert_eq!(items[0], Ok("part".to_string()));
        assert!(matches!(items[1], Err(ChatError::StreamInterrupted(_))));
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_request_carries_persona_instruction_and_history() {
        let api = Arc::new(ScriptedGeneration::new(vec![Script::Reply(vec!["ok"])]));
        let client = StreamingClient::new(api.clone());
        let history = vec![
            Turn { role: TurnRole::User, text: "Q".to_string() },
            Turn { role: TurnRole::Model, text: "A".to_string() },
        ];
        let stream = client.open("next", &history, &sample_profile()).await.unwrap();
        collect(stream).await;

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].system_instruction.starts_with("You are Grace Hopper."));
        assert!(calls[0].system_instruction.contains("Remington Rand"));
        assert_eq!(calls[0].history, history);
        assert_eq!(calls[0].new_user_text, "next");
    }
}
