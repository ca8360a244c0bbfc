//! Defines the WebSocket message protocol between the browser client and
//! the API server. Binary frames are not described here: the client
//! streams raw 24 kHz PCM16 microphone audio as binary messages while
//! voice is enabled.

use homevise_core::voice::VoiceSessionState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An attachment sent with a user message.
#[derive(Deserialize, Debug, Clone)]
pub struct ImagePayload {
    pub mime: String,
    /// Base64-encoded content.
    pub data: String,
}

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Starts a conversation. This must be the first message.
    #[serde(rename = "init")]
    Init,
    /// A text message from the user to the advisor.
    #[serde(rename = "user_message")]
    UserMessage {
        text: String,
        image: Option<ImagePayload>,
    },
    /// Toggles the voice session.
    #[serde(rename = "set_voice_enabled")]
    SetVoiceEnabled { enabled: bool },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the conversation is ready.
    Initialized { session_id: Uuid },
    /// Signals the beginning of an advisor reply.
    ResponseStart,
    /// The advisor's reply text.
    ResponseChunk { chunk: String },
    /// Signals the end of an advisor reply.
    ResponseEnd,
    /// A tool fired while settling the reply.
    ToolActivity { name: String },
    /// The voice session changed state.
    VoiceState {
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// An update on the user's speech transcription.
    TranscriptionUpdate { text: String, is_final: bool },
    /// A chunk of advisor speech (base64 PCM16 at 24 kHz) with its
    /// position on the playback timeline, in seconds.
    AudioChunk { data: String, start: f64 },
    /// The advisor finished speaking.
    AiSpeakingEnd,
    /// Reports an error to the client.
    Error { message: String },
}

impl ServerMessage {
    /// Maps a core voice state onto the wire representation.
    pub fn voice_state(state: &VoiceSessionState) -> Self {
        match state {
            VoiceSessionState::Idle => ServerMessage::VoiceState {
                state: "idle".into(),
                reason: None,
            },
            VoiceSessionState::Connecting => ServerMessage::VoiceState {
                state: "connecting".into(),
                reason: None,
            },
            VoiceSessionState::Active => ServerMessage::VoiceState {
                state: "active".into(),
                reason: None,
            },
            VoiceSessionState::Error(reason) => ServerMessage::VoiceState {
                state: "error".into(),
                reason: Some(reason.clone()),
            },
        }
    }
}
