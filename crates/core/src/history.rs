//! Transcript-to-turn encoding.
//!
//! The model API accepts a strictly alternating sequence of non-empty
//! turns beginning with `user`. An arbitrary append-only transcript does
//! not satisfy that contract on its own: tool round-trips leave two
//! adjacent model fragments, greeting flows can start with a model
//! message, and a message whose text was consumed elsewhere may be empty.
//! [`encode`] is the pure transform that repairs all of that.

use crate::transcript::{MediaRef, Message, Role};

/// Substituted for a turn that would otherwise have no content. The model
/// API rejects empty turns outright.
pub const EMPTY_TURN_PLACEHOLDER: &str = "...";

/// One piece of a turn's content.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineMedia(MediaRef),
}

/// One role-tagged unit of conversation, ready for submission.
///
/// Invariants maintained by [`encode`]: `parts` is never empty, turns
/// strictly alternate role, and the first turn has role `user`.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

/// Renders the submittable text of a message: the visible text, with a
/// machine-readable marker appended when a tool already fired in that
/// turn.
fn rendered_text(message: &Message) -> String {
    match &message.tool_payload {
        Some(record) if message.text.is_empty() => {
            format!("[tool:{} {}]", record.name, record.summary)
        }
        Some(record) => format!("{}\n[tool:{} {}]", message.text, record.name, record.summary),
        None => message.text.clone(),
    }
}

/// Encodes a transcript into the turn sequence the model API requires.
///
/// Consecutive messages of the same role merge into one turn with their
/// parts concatenated in order. A message with no text and no media
/// contributes the [`EMPTY_TURN_PLACEHOLDER`] token instead of nothing.
/// If the merged sequence would open with a `model` turn, that turn is
/// dropped so the result starts with `user`.
///
/// This function is pure: the same transcript prefix always yields the
/// same turns.
pub fn encode(transcript: &[Message]) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();

    for message in transcript {
        let mut parts = Vec::new();
        let text = rendered_text(message);
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        if let Some(media) = &message.image {
            parts.push(Part::InlineMedia(media.clone()));
        }
        if parts.is_empty() {
            parts.push(Part::Text(EMPTY_TURN_PLACEHOLDER.to_string()));
        }

        match turns.last_mut() {
            Some(last) if last.role == message.role => last.parts.extend(parts),
            _ => turns.push(Turn {
                role: message.role,
                parts,
            }),
        }
    }

    if turns.first().is_some_and(|t| t.role == Role::Model) {
        turns.remove(0);
    }

    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::ToolInvocationRecord;

    fn text_of(turn: &Turn) -> String {
        turn.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.clone()),
                Part::InlineMedia(_) => None,
            })
            .collect::<Vec<_>>()
            .join("|")
    }

    fn assert_contract(turns: &[Turn]) {
        assert!(turns.first().is_none_or(|t| t.role == Role::User));
        for turn in turns {
            assert!(!turn.parts.is_empty(), "empty turn emitted");
        }
        for pair in turns.windows(2) {
            assert_ne!(pair[0].role, pair[1].role, "adjacent turns share a role");
        }
    }

    #[test]
    fn empty_transcript_encodes_to_nothing() {
        assert!(encode(&[]).is_empty());
    }

    #[test]
    fn alternating_transcript_passes_through() {
        let transcript = vec![
            Message::user("Xin chào", None),
            Message::model("Chào anh, em có thể giúp gì?"),
            Message::user("Tôi muốn mua căn hộ", None),
        ];
        let turns = encode(&transcript);
        assert_contract(&turns);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(text_of(&turns[2]), "Tôi muốn mua căn hộ");
    }

    #[test]
    fn consecutive_same_role_messages_merge_in_order() {
        let transcript = vec![
            Message::user("first", None),
            Message::model("a"),
            Message::model("b"),
        ];
        let turns = encode(&transcript);
        assert_contract(&turns);
        assert_eq!(turns.len(), 2);
        assert_eq!(text_of(&turns[1]), "a|b");
    }

    #[test]
    fn leading_model_turn_is_dropped() {
        let transcript = vec![
            Message::model("greeting the user first"),
            Message::user("hello", None),
            Message::model("reply"),
        ];
        let turns = encode(&transcript);
        assert_contract(&turns);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(text_of(&turns[0]), "hello");
    }

    #[test]
    fn merged_leading_model_fragments_drop_as_one_turn() {
        let transcript = vec![
            Message::model("greet"),
            Message::model("more greeting"),
            Message::user("hi", None),
        ];
        let turns = encode(&transcript);
        assert_contract(&turns);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
    }

    #[test]
    fn empty_message_without_media_gets_placeholder() {
        let transcript = vec![Message::user("", None), Message::model("noted")];
        let turns = encode(&transcript);
        assert_contract(&turns);
        assert_eq!(text_of(&turns[0]), EMPTY_TURN_PLACEHOLDER);
    }

    #[test]
    fn empty_message_with_media_keeps_media_only() {
        let media = MediaRef {
            mime: "image/png".into(),
            data: "QUJD".into(),
        };
        let transcript = vec![Message::user("", Some(media.clone()))];
        let turns = encode(&transcript);
        assert_contract(&turns);
        assert_eq!(turns[0].parts, vec![Part::InlineMedia(media)]);
    }

    #[test]
    fn resolved_tool_invocation_appends_marker() {
        let transcript = vec![
            Message::user("0971 132 378", None),
            Message::model_with_tools(
                "Em đã ghi nhận số điện thoại.",
                ToolInvocationRecord {
                    name: "capture_lead".into(),
                    summary: "recorded 0971132378".into(),
                },
            ),
        ];
        let turns = encode(&transcript);
        assert_contract(&turns);
        let text = text_of(&turns[1]);
        assert!(text.contains("[tool:capture_lead recorded 0971132378]"));
        assert!(text.starts_with("Em đã ghi nhận số điện thoại."));
    }

    #[test]
    fn encode_is_idempotent_for_a_fixed_prefix() {
        let transcript = vec![
            Message::model("lead-in"),
            Message::user("", None),
            Message::model("x"),
            Message::model("y"),
        ];
        assert_eq!(encode(&transcript), encode(&transcript));
    }
}
