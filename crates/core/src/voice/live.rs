//! The bidirectional streaming transport to the generative live API.
//!
//! [`LiveConnector`] and [`LiveChannel`] are the seams the voice session
//! is written against; [`GeminiLiveConnector`] is the production
//! implementation over a tokio-tungstenite WebSocket. Wire types stay
//! private to this module.

use super::VoiceError;
use crate::audio;
use crate::tools::{ToolCall, ToolDeclaration, ToolResult};
use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{error, info, warn};

const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const INPUT_MIME: &str = "audio/pcm;rate=16000";

/// Outbound events a voice session can put on the wire.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// One encoded PCM16 capture frame at the input contract rate.
    AudioFrame(Vec<u8>),
    /// Results answering an in-band tool-call batch.
    ToolResults(Vec<ToolResult>),
}

/// Inbound events the transport surfaces to the voice session. A closed
/// stream is signalled by `recv` returning `None`.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A decoded chunk of synthesized speech at the playback rate.
    Audio(Vec<f32>),
    /// A batch of tool calls to execute without leaving the stream.
    ToolCalls(Vec<ToolCall>),
    /// Transcription of the user's speech.
    Transcription { text: String, is_final: bool },
    /// The model finished its spoken turn.
    TurnComplete,
    /// The user barged in; queued playback should be dropped.
    Interrupted,
}

/// Opens live channels. Separate from [`LiveChannel`] so the session can
/// be handed a connector long before any socket exists.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn LiveChannel>, VoiceError>;
}

/// One open full-duplex stream.
#[async_trait]
pub trait LiveChannel: Send {
    async fn send(&mut self, event: ClientEvent) -> Result<(), VoiceError>;
    async fn recv(&mut self) -> Option<Result<ServerEvent, VoiceError>>;
}

// --- Wire Types (local to this transport) ---
mod wire {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientMessage {
        Setup(Setup),
        RealtimeInput(RealtimeInput),
        ToolResponse(ToolResponse),
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Setup {
        pub model: String,
        pub generation_config: GenerationConfig,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub system_instruction: Option<Content>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub tools: Option<Vec<ToolSet>>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<ResponseModality>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }

    #[derive(Serialize)]
    pub(super) struct Content {
        pub parts: Vec<Part>,
    }

    #[derive(Serialize)]
    pub(super) struct Part {
        pub text: String,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct RealtimeInput {
        pub audio: Blob,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ToolSet {
        pub function_declarations: Vec<FunctionDeclaration>,
    }

    #[derive(Serialize)]
    pub(super) struct FunctionDeclaration {
        pub name: String,
        pub description: String,
        pub parameters: serde_json::Value,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ToolResponse {
        pub function_responses: Vec<FunctionResponse>,
    }

    #[derive(Serialize)]
    pub(super) struct FunctionResponse {
        pub id: String,
        pub name: String,
        pub response: serde_json::Value,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerMessage {
        pub setup_complete: Option<serde_json::Value>,
        pub server_content: Option<ServerContent>,
        pub tool_call: Option<ToolCallMessage>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerContent {
        pub model_turn: Option<ModelTurn>,
        pub input_transcription: Option<Transcription>,
        pub turn_complete: Option<bool>,
        pub interrupted: Option<bool>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct ModelTurn {
        pub parts: Vec<ServerPart>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerPart {
        pub text: Option<String>,
        pub inline_data: Option<ServerBlob>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct ServerBlob {
        pub data: String,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Transcription {
        pub text: String,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ToolCallMessage {
        pub function_calls: Vec<FunctionCallMessage>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct FunctionCallMessage {
        pub id: Option<String>,
        pub name: String,
        #[serde(default)]
        pub args: serde_json::Value,
    }
}

/// Maps one parsed server message onto zero or more session events, in
/// the order a client should observe them.
fn events_from_message(message: wire::ServerMessage, queue: &mut VecDeque<ServerEvent>) {
    if let Some(content) = message.server_content {
        if let Some(transcription) = content.input_transcription {
            queue.push_back(ServerEvent::Transcription {
                text: transcription.text,
                is_final: true,
            });
        }
        if content.interrupted == Some(true) {
            queue.push_back(ServerEvent::Interrupted);
        }
        if let Some(model_turn) = content.model_turn {
            for part in model_turn.parts {
                if let Some(blob) = part.inline_data {
                    let samples = audio::decode_base64_pcm16(&blob.data);
                    if !samples.is_empty() {
                        queue.push_back(ServerEvent::Audio(samples));
                    }
                }
            }
        }
        if content.turn_complete == Some(true) {
            queue.push_back(ServerEvent::TurnComplete);
        }
    }
    if let Some(tool_call) = message.tool_call {
        let calls: Vec<ToolCall> = tool_call
            .function_calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| ToolCall {
                id: call.id.unwrap_or_else(|| format!("{}-{}", call.name, index)),
                name: call.name,
                args: call.args,
            })
            .collect();
        if !calls.is_empty() {
            queue.push_back(ServerEvent::ToolCalls(calls));
        }
    }
}

/// Connects to the Gemini live API, performing the setup handshake with
/// the session's system instruction and tool declarations.
pub struct GeminiLiveConnector {
    api_key: String,
    model: String,
    system_prompt: String,
    declarations: Vec<ToolDeclaration>,
    endpoint: String,
}

impl GeminiLiveConnector {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        declarations: Vec<ToolDeclaration>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            declarations,
            endpoint: LIVE_ENDPOINT.to_string(),
        }
    }

    fn setup_message(&self) -> wire::ClientMessage {
        let tools = if self.declarations.is_empty() {
            None
        } else {
            Some(vec![wire::ToolSet {
                function_declarations: self
                    .declarations
                    .iter()
                    .map(|d| wire::FunctionDeclaration {
                        name: d.name.clone(),
                        description: d.description.clone(),
                        parameters: d.parameters.clone(),
                    })
                    .collect(),
            }])
        };
        wire::ClientMessage::Setup(wire::Setup {
            model: self.model.clone(),
            generation_config: wire::GenerationConfig {
                response_modalities: vec![wire::ResponseModality::Audio],
            },
            system_instruction: Some(wire::Content {
                parts: vec![wire::Part {
                    text: self.system_prompt.clone(),
                }],
            }),
            tools,
        })
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self) -> Result<Box<dyn LiveChannel>, VoiceError> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        let (mut tx, mut rx) = stream.split();

        let setup = serde_json::to_string(&self.setup_message())
            .map_err(|e| VoiceError::Protocol(e.to_string()))?;
        tx.send(WsMessage::Text(setup.into()))
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))?;

        // The server acknowledges setup before any streaming starts.
        loop {
            match rx.next().await {
                Some(Ok(msg)) => {
                    let Some(text) = message_payload(&msg) else {
                        continue;
                    };
                    match serde_json::from_str::<wire::ServerMessage>(&text) {
                        Ok(parsed) if parsed.setup_complete.is_some() => {
                            info!("live session setup complete");
                            return Ok(Box::new(GeminiLiveChannel {
                                tx,
                                rx,
                                pending: VecDeque::new(),
                            }));
                        }
                        Ok(_) => warn!("unexpected message during live setup"),
                        Err(e) => error!(error = %e, "unparseable message during live setup"),
                    }
                }
                Some(Err(e)) => return Err(VoiceError::Transport(e.to_string())),
                None => {
                    return Err(VoiceError::Transport(
                        "connection closed during setup".to_string(),
                    ));
                }
            }
        }
    }
}

/// The server interleaves JSON over both text and binary frames.
fn message_payload(message: &WsMessage) -> Option<String> {
    match message {
        WsMessage::Text(text) => Some(text.to_string()),
        WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok(),
        _ => None,
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type WsSource = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

struct GeminiLiveChannel {
    tx: WsSink,
    rx: WsSource,
    pending: VecDeque<ServerEvent>,
}

#[async_trait]
impl LiveChannel for GeminiLiveChannel {
    async fn send(&mut self, event: ClientEvent) -> Result<(), VoiceError> {
        let message = match event {
            ClientEvent::AudioFrame(frame) => {
                wire::ClientMessage::RealtimeInput(wire::RealtimeInput {
                    audio: wire::Blob {
                        mime_type: INPUT_MIME.to_string(),
                        data: base64::engine::general_purpose::STANDARD.encode(frame),
                    },
                })
            }
            ClientEvent::ToolResults(results) => {
                wire::ClientMessage::ToolResponse(wire::ToolResponse {
                    function_responses: results
                        .into_iter()
                        .map(|result| wire::FunctionResponse {
                            id: result.id,
                            name: result.name,
                            response: result.outcome.response_body(),
                        })
                        .collect(),
                })
            }
        };
        let payload =
            serde_json::to_string(&message).map_err(|e| VoiceError::Protocol(e.to_string()))?;
        self.tx
            .send(WsMessage::Text(payload.into()))
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerEvent, VoiceError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            match self.rx.next().await? {
                Ok(WsMessage::Close(frame)) => {
                    info!(?frame, "live connection closed by server");
                    return None;
                }
                Ok(msg) => {
                    let Some(text) = message_payload(&msg) else {
                        continue;
                    };
                    match serde_json::from_str::<wire::ServerMessage>(&text) {
                        Ok(parsed) => events_from_message(parsed, &mut self.pending),
                        // One malformed message is not fatal to the stream.
                        Err(e) => error!(error = %e, "dropping unparseable live message"),
                    }
                }
                Err(e) => return Some(Err(VoiceError::Transport(e.to_string()))),
            }
        }
    }
}
