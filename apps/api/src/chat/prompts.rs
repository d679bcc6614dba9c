// Chat prompt templates and user-facing texts.
// Everything the conversational core says on its own behalf is defined here.

use crate::chat::error::ChatError;
use crate::models::persona::{PersonaContext, ResumeData};

pub const SYSTEM_INSTRUCTION_TEMPLATE: &str = "\
You are {name}. Tone: {tone}.
Background: {description}.
History: {history_json}.
Expertise: {expertise}.
Speak as this person's AI twin. Use markdown.";

const WELCOME_TEMPLATE: &str = "Persona initialized. I am **{name}**. \
I've synthesized your background in **{focus}**. \
How can I assist with your career representation today?";

const RESET_WELCOME_TEMPLATE: &str = "Neural bridge reset. Persona **{name}** is at baseline.";

pub const CREDENTIAL_MISSING_TEXT: &str = "Credential required: no API key is configured for \
the generation service. Add one to the server configuration and send your message again.";

pub const CREDENTIAL_INVALID_TEXT: &str = "Credential rejected: the generation service did not \
accept the configured API key. Update the key and send your message again.";

pub const SAFETY_BLOCKED_TEXT: &str = "I can't answer that one: the request was stopped by the \
generation service's content-safety filter. Try asking about a different part of my background.";

pub const EMPTY_REPLY_TEXT: &str = "The neural engine returned an empty response. \
Please rephrase your question and try again.";

pub const INTERRUPTED_TEXT: &str = "The neural link was interrupted. Please try again.";

const INTERRUPTED_NOTE: &str = "\n\n_Connection interrupted. The reply above may be incomplete._";
const SAFETY_STOPPED_NOTE: &str = "\n\n_The rest of this reply was stopped by a content-safety filter._";

pub const NOTICE_FEEDBACK: &str = "Feedback recorded. Refining model...";
pub const NOTICE_RESET: &str = "Neural bridge reset successful.";
pub const NOTICE_DETACHED: &str = "Reply abandoned.";

/// Builds the system instruction sent once per generation call.
///
/// History is condensed to role and company per position; full bullet text is left out
/// to keep the instruction small.
pub fn build_system_instruction(persona: &PersonaContext, resume: &ResumeData) -> String {
    let history: Vec<_> = resume
        .experience
        .iter()
        .map(|e| serde_json::json!({ "role": e.role, "company": e.company }))
        .collect();
    let history_json = serde_json::to_string(&history).unwrap_or_else(|_| "[]".to_string());

    SYSTEM_INSTRUCTION_TEMPLATE
        .replace("{name}", &persona.name)
        .replace("{tone}", &persona.tone)
        .replace("{description}", &persona.description)
        .replace("{history_json}", &history_json)
        .replace("{expertise}", &persona.expertise.join(", "))
}

/// Welcome message for a conversation with no history.
pub fn welcome_message(persona: &PersonaContext) -> String {
    let focus = match persona.expertise.as_slice() {
        [] => "your field".to_string(),
        areas => areas.iter().take(2).cloned().collect::<Vec<_>>().join(" and "),
    };
    WELCOME_TEMPLATE
        .replace("{name}", &persona.name)
        .replace("{focus}", &focus)
}

/// Welcome message that reseeds a cleared conversation.
pub fn reset_welcome_message(persona: &PersonaContext) -> String {
    RESET_WELCOME_TEMPLATE.replace("{name}", &persona.name)
}

/// Assistant-turn content substituted for a failed reply with nothing revealed.
pub fn failure_text(err: &ChatError) -> &'static str {
    match err {
        ChatError::CredentialMissing => CREDENTIAL_MISSING_TEXT,
        ChatError::CredentialInvalid => CREDENTIAL_INVALID_TEXT,
        ChatError::SafetyBlocked(_) => SAFETY_BLOCKED_TEXT,
        ChatError::EmptyReply => EMPTY_REPLY_TEXT,
        _ => INTERRUPTED_TEXT,
    }
}

/// Note appended to a failed reply that already revealed some text.
pub fn failure_note(err: &ChatError) -> &'static str {
    match err {
        ChatError::SafetyBlocked(_) => SAFETY_STOPPED_NOTE,
        _ => INTERRUPTED_NOTE,
    }
}

/// Short toast shown alongside a failed reply.
pub fn failure_notice(err: &ChatError) -> &'static str {
    match err {
        ChatError::CredentialMissing => "Credential required.",
        ChatError::CredentialInvalid => "Credential rejected.",
        ChatError::SafetyBlocked(_) => "Reply blocked by content filter.",
        ChatError::EmptyReply => "Empty response received.",
        _ => "Connection interrupted.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::persona::Experience;

    fn persona() -> PersonaContext {
        PersonaContext {
            name: "Ada Lovelace".to_string(),
            tone: "Analytical and warm".to_string(),
            description: "I write programs for engines that do not exist yet.".to_string(),
            expertise: vec!["Algorithms".to_string(), "Mathematics".to_string(), "Poetry".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_system_instruction_embeds_persona_and_condensed_history() {
        let resume = ResumeData {
            experience: vec![Experience {
                role: "Analyst".to_string(),
                company: "Analytical Engine Co".to_string(),
                duration: "1842-1843".to_string(),
                description: vec!["Wrote Note G".to_string()],
            }],
            ..Default::default()
        };
        let instruction = build_system_instruction(&persona(), &resume);
        assert!(instruction.starts_with("You are Ada Lovelace. Tone: Analytical and warm."));
        assert!(instruction.contains(r#"{"company":"Analytical Engine Co","role":"Analyst"}"#));
        assert!(instruction.contains("Expertise: Algorithms, Mathematics, Poetry."));
        assert!(!instruction.contains("Note G"), "bullets are not part of the condensed history");
        assert!(!instruction.contains("{name}") && !instruction.contains("{history_json}"));
    }

    #[test]
    fn test_welcome_mentions_first_two_expertise_areas() {
        let text = welcome_message(&persona());
        assert!(text.contains("**Ada Lovelace**"));
        assert!(text.contains("**Algorithms and Mathematics**"));
        assert!(!text.contains("Poetry"));
    }

    #[test]
    fn test_welcome_without_expertise_is_still_complete() {
        let mut persona = persona();
        persona.expertise.clear();
        assert!(welcome_message(&persona).contains("**your field**"));
    }

    #[test]
    fn test_failure_texts_are_kind_specific() {
        assert_ne!(
            failure_text(&ChatError::CredentialMissing),
            failure_text(&ChatError::StreamInterrupted("x".to_string()))
        );
        assert_eq!(failure_text(&ChatError::EmptyReply), EMPTY_REPLY_TEXT);
        assert!(!failure_text(&ChatError::EmptyReply).is_empty());
        assert_ne!(
            failure_notice(&ChatError::CredentialMissing),
            failure_notice(&ChatError::StreamInterrupted("x".to_string()))
        );
    }

    #[test]
    fn test_failure_note_reads_as_appendix() {
        let note = failure_note(&ChatError::StreamInterrupted("eof".to_string()));
        assert!(note.starts_with("\n\n"));
        assert_ne!(note, failure_note(&ChatError::SafetyBlocked("x".to_string())));
    }
}
