//! Turn normalization. Shapes the UI message list into a history the generation API accepts.
//!
//! The upstream rejects histories that do not start with a user turn and strictly
//! alternate. The welcome message (a leading assistant turn) and the empty reply
//! placeholder both violate that, so every call normalizes first.
//!
//! Output either is empty or alternates user/model, starting with user and ending with
//! model. The live user message is appended by the caller as the final turn.

use serde::Serialize;

use crate::models::chat::{ChatMessage, Role};

/// Upstream turn vocabulary. Kept separate from `Role` so wire naming never leaks
/// into the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

/// What to do with consecutive turns of the same role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// Keep the first turn of a same-role run and discard the rest.
    #[default]
    DropRepeats,
    /// Join a same-role run into one turn, separated by a blank line.
    Concatenate,
}

impl From<Role> for TurnRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => TurnRole::User,
            Role::Assistant => TurnRole::Model,
        }
    }
}

/// Normalizes `messages` (in creation order) into an alternating turn history.
///
/// Steps: drop blank messages, map roles, drop leading model turns, collapse same-role
/// runs per `policy`, then drop a trailing user turn.
pub fn normalize_history(messages: &[ChatMessage], policy: MergePolicy) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::with_capacity(messages.len());

    for message in messages {
        if message.content.trim().is_empty() {
            continue;
        }
        let role = TurnRole::from(message.role);

        if turns.is_empty() && role == TurnRole::Model {
            continue;
        }

        match turns.last_mut() {
            Some(previous) if previous.role == role => match policy {
                MergePolicy::DropRepeats => {}
                MergePolicy::Concatenate => {
                    previous.text.push_str("\n\n");
                    previous.text.push_str(&message.content);
                }
            },
            _ => turns.push(Turn {
                role,
                text: message.content.clone(),
            }),
        }
    }

    if turns.last().is_some_and(|t| t.role == TurnRole::User) {
        turns.pop();
    }

    turns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> ChatMessage {
        ChatMessage::user(text)
    }

    fn assistant(text: &str) -> ChatMessage {
        ChatMessage::assistant(text)
    }

    fn roles(turns: &[Turn]) -> Vec<TurnRole> {
        turns.iter().map(|t| t.role).collect()
    }

    fn assert_alternates(turns: &[Turn]) {
        if turns.is_empty() {
            return;
        }
        assert_eq!(turns.first().unwrap().role, TurnRole::User);
        assert_eq!(turns.last().unwrap().role, TurnRole::Model);
        for pair in turns.windows(2) {
            assert_ne!(pair[0].role, pair[1].role, "roles must alternate: {turns:?}");
        }
    }

    #[test]
    fn test_empty_input_is_empty_output() {
        assert!(normalize_history(&[], MergePolicy::DropRepeats).is_empty());
    }

    #[test]
    fn test_all_blank_messages_is_empty_output() {
        let messages = vec![user("  "), assistant(""), user("\n\t")];
        assert!(normalize_history(&messages, MergePolicy::DropRepeats).is_empty());
    }

    #[test]
    fn test_welcome_then_lone_user_normalizes_to_empty() {
        let messages = vec![assistant("hi"), user("Tell me about X")];
        assert!(normalize_history(&messages, MergePolicy::DropRepeats).is_empty());
    }

    #[test]
    fn test_roles_are_mapped_to_model_vocabulary() {
        let messages = vec![user("Q1"), assistant("A1")];
        let turns = normalize_history(&messages, MergePolicy::DropRepeats);
        assert_eq!(roles(&turns), vec![TurnRole::User, TurnRole::Model]);
        assert_eq!(turns[1].text, "A1");
    }

    #[test]
    fn test_empty_placeholder_is_dropped() {
        let messages = vec![assistant("welcome"), user("Q1"), assistant("A1"), user("Q2"), assistant("")];
        let turns = normalize_history(&messages, MergePolicy::DropRepeats);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "Q1");
        assert_eq!(turns[1].text, "A1");
    }

    #[test]
    fn test_same_role_repeats_keep_first() {
        let messages = vec![user("first"), user("second"), assistant("A"), assistant("B")];
        let turns = normalize_history(&messages, MergePolicy::DropRepeats);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "first");
        assert_eq!(turns[1].text, "A");
    }

    #[test]
    fn test_concatenate_policy_joins_runs() {
        let messages = vec![user("first"), user("second"), assistant("A"), assistant("B")];
        let turns = normalize_history(&messages, MergePolicy::Concatenate);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "first\n\nsecond");
        assert_eq!(turns[1].text, "A\n\nB");
    }

    #[test]
    fn test_repeat_separated_by_blank_still_collapses() {
        // The blank assistant turn vanishes first, leaving two adjacent user turns.
        let messages = vec![user("Q1"), assistant(" "), user("Q2"), assistant("A")];
        let turns = normalize_history(&messages, MergePolicy::DropRepeats);
        assert_eq!(turns[0].text, "Q1");
        assert_eq!(turns.len(), 2);
    }

    #[test]
    fn test_trailing_user_is_dropped() {
        let messages = vec![user("Q1"), assistant("A1"), user("Q2")];
        let turns = normalize_history(&messages, MergePolicy::DropRepeats);
        assert_eq!(roles(&turns), vec![TurnRole::User, TurnRole::Model]);
    }

    #[test]
    fn test_alternation_invariant_over_mixed_histories() {
        let histories = vec![
            vec![assistant("w"), assistant("w2"), user("q"), user("q2"), assistant("a")],
            vec![user("q"), assistant(""), assistant("a"), user(""), user("q2")],
            vec![assistant("a"), user("q"), assistant("a"), user("q"), assistant("a"), user("q")],
            vec![user("only")],
            vec![assistant("only")],
        ];
        for history in histories {
            for policy in [MergePolicy::DropRepeats, MergePolicy::Concatenate] {
                assert_alternates(&normalize_history(&history, policy));
            }
        }
    }
}
