//! The conversation transcript data model.
//!
//! A transcript is an append-only sequence of [`Message`]s owned by the
//! layer driving the session. Messages are immutable once constructed;
//! the only sanctioned way to grow a conversation is appending through
//! [`crate::dialogue::DialogueSession`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two conversational roles the model API understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// The wire name of the role, as the model API expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque reference to an attached piece of media (base64 payload plus
/// its MIME type). The core never inspects the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub mime: String,
    /// Base64-encoded payload, ready for inline submission.
    pub data: String,
}

/// Records that a tool call was resolved inside the turn that produced a
/// message, so the history encoding can tell the model the tool already
/// fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub name: String,
    pub summary: String,
}

/// One entry of the conversation transcript.
///
/// Role and timestamp are fixed at construction time; there are no
/// mutators. `result_record` carries a domain-specific payload (a score,
/// a chart input) that the UI layer may render; the core treats it as
/// opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaRef>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_payload: Option<ToolInvocationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_record: Option<serde_json::Value>,
}

impl Message {
    /// A user message, optionally carrying an encoded attachment.
    pub fn user(text: impl Into<String>, image: Option<MediaRef>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image,
            timestamp: Utc::now(),
            tool_payload: None,
            result_record: None,
        }
    }

    /// A plain model message.
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            image: None,
            timestamp: Utc::now(),
            tool_payload: None,
            result_record: None,
        }
    }

    /// A model message produced after a resolved tool round-trip.
    pub fn model_with_tools(text: impl Into<String>, record: ToolInvocationRecord) -> Self {
        Self {
            tool_payload: Some(record),
            ..Self::model(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_wire_names() {
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Model.as_str(), "model");
        assert_eq!(format!("{}", Role::Model), "model");
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        let parsed: Role = serde_json::from_str("\"model\"").unwrap();
        assert_eq!(parsed, Role::Model);
    }

    #[test]
    fn message_constructors_set_roles() {
        let user = Message::user("Xin chào", None);
        assert_eq!(user.role, Role::User);
        assert!(user.tool_payload.is_none());

        let model = Message::model_with_tools(
            "Đã lưu thông tin.",
            ToolInvocationRecord {
                name: "capture_lead".into(),
                summary: "saved".into(),
            },
        );
        assert_eq!(model.role, Role::Model);
        assert_eq!(model.tool_payload.unwrap().name, "capture_lead");
    }

    #[test]
    fn message_round_trips_through_json() {
        let msg = Message::user(
            "này là gì?",
            Some(MediaRef {
                mime: "image/jpeg".into(),
                data: "aGVsbG8=".into(),
            }),
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::User);
        assert_eq!(back.image.unwrap().mime, "image/jpeg");
    }
}
