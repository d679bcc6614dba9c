//! Test doubles for the generation API and a sample persona.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use crate::chat::normalizer::Turn;
use crate::llm_client::{FragmentStream, GenerationApi, LlmError};
use crate::models::persona::{Experience, PersonaContext, PersonaProfile, ResumeData};

/// What the next `stream_reply` call does.
pub enum Script {
    Reply(Vec<&'static str>),
    RejectOpen(fn() -> LlmError),
    BreakAfter(Vec<&'static str>, &'static str),
    /// Opens, then never yields or completes.
    Hang,
    /// Yields the fragments, then stays open without completing.
    HangAfter(Vec<&'static str>),
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_instruction: String,
    pub history: Vec<Turn>,
    pub new_user_text: String,
}

#[derive(Default)]
pub struct ScriptedGeneration {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGeneration {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationApi for ScriptedGeneration {
    async fn stream_reply(
        &self,
        system_instruction: &str,
        history: &[Turn],
        new_user_text: &str,
    ) -> Result<FragmentStream, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            system_instruction: system_instruction.to_string(),
            history: history.to_vec(),
            new_user_text: new_user_text.to_string(),
        });

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Reply(vec!["ok"]));

        match script {
            Script::Reply(fragments) => Ok(Box::pin(futures::stream::iter(
                fragments.into_iter().map(|f| Ok::<_, LlmError>(f.to_string())),
            ))),
            Script::RejectOpen(make_error) => Err(make_error()),
            Script::BreakAfter(fragments, reason) => {
                let items = fragments
                    .into_iter()
                    .map(|f| Ok::<_, LlmError>(f.to_string()))
                    .chain(std::iter::once(Err(LlmError::Upstream(reason.to_string()))));
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Script::Hang => Ok(Box::pin(futures::stream::pending::<Result<String, LlmError>>())),
            Script::HangAfter(fragments) => {
                let items = fragments.into_iter().map(|f| Ok::<_, LlmError>(f.to_string()));
                Ok(Box::pin(
                    futures::stream::iter(items).chain(futures::stream::pending()),
                ))
            }
        }
    }
}

pub fn sample_profile() -> PersonaProfile {
    PersonaProfile {
        persona: PersonaContext {
            name: "Grace Hopper".to_string(),
            tone: "Direct, witty".to_string(),
            description: "I turned programming into something people could read.".to_string(),
            expertise: vec!["Compilers".to_string(), "COBOL".to_string()],
            strengths: vec!["Teaching".to_string()],
            identifier: "grace-hopper".to_string(),
            example_responses: vec!["What was the first compiler?".to_string()],
        },
        resume: ResumeData {
            name: "Grace Hopper".to_string(),
            title: "Rear Admiral".to_string(),
            experience: vec![Experience {
                role: "Senior Mathematician".to_string(),
                company: "Remington Rand".to_string(),
                duration: "1949-1971".to_string(),
                description: vec!["Built the A-0 system".to_string()],
            }],
            ..Default::default()
        },
    }
}
