//! Manages the primary WebSocket connection lifecycle for one advisor
//! conversation.
//!
//! Each connection owns its transcript, dialogue session, and (while
//! enabled) one voice session. The loop below is the single writer of
//! all of that state, so text exchanges are naturally serialized and a
//! voice toggle can never race a pending round-trip.

use super::protocol::{ClientMessage, ImagePayload, ServerMessage};
use crate::{
    catalog::ListingLookupHandler,
    resample::InputResampler,
    state::{AppState, OFFLINE_FALLBACK_REPLY},
};
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use homevise_core::{
    audio,
    dialogue::DialogueSession,
    tools::{ToolRouter, lead::LeadCaptureHandler},
    transcript::MediaRef,
    voice::{ChannelCapture, VoiceSession, VoiceUpdate, live::GeminiLiveConnector},
};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for a new connection: performs the `init` handshake and
/// spawns the conversation loop.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let temp_id: u32 = rand::random();
    tracing::Span::current().record("session_id", &temp_id.to_string());
    info!("New WebSocket connection. Awaiting init...");

    let (socket_tx, mut socket_rx) = socket.split();
    let socket_tx = Arc::new(Mutex::new(socket_tx));

    // The first message from the client must be `init`.
    match socket_rx.next().await {
        Some(Ok(Message::Text(text)))
            if matches!(
                serde_json::from_str::<ClientMessage>(&text),
                Ok(ClientMessage::Init)
            ) => {}
        Some(Ok(_)) => {
            let mut sink = socket_tx.lock().await;
            let _ = send_msg(
                &mut sink,
                ServerMessage::Error {
                    message: "first message must be `init`".to_string(),
                },
            )
            .await;
            return;
        }
        _ => {
            info!("Client disconnected before sending init.");
            return;
        }
    }

    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", &session_id.to_string());
    if send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::Initialized { session_id },
    )
    .await
    .is_err()
    {
        error!("Failed to send Initialized message to client.");
        return;
    }

    let session_span = tracing::info_span!("conversation", %session_id);
    if let Err(e) = run_conversation(state, socket_tx, socket_rx)
        .instrument(session_span)
        .await
    {
        error!(error = ?e, "Conversation terminated with error.");
    }
    info!("Conversation finished.");
}

/// The main event loop for an initialized connection.
async fn run_conversation(
    state: Arc<AppState>,
    socket_tx: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    mut socket_rx: futures_util::stream::SplitStream<WebSocket>,
) -> Result<()> {
    // Both transports share one tool registry per conversation.
    let mut router = ToolRouter::new();
    router.register(Arc::new(LeadCaptureHandler::new(state.leads.clone())));
    router.register(Arc::new(ListingLookupHandler::new(state.catalog.clone())));
    let router = Arc::new(router);

    let mut dialogue = DialogueSession::new(
        state.model_client.clone(),
        router.clone(),
        state.system_prompt.clone(),
    )
    .with_offline_fallback(OFFLINE_FALLBACK_REPLY);

    let (voice_updates_tx, mut voice_updates_rx) = mpsc::channel::<VoiceUpdate>(64);
    let mut voice: Option<VoiceSession> = None;
    let mut voice_feed: Option<mpsc::Sender<Vec<f32>>> = None;
    let mut mic_resampler: Option<InputResampler> = None;

    loop {
        tokio::select! {
            // Messages from the browser.
            incoming = socket_rx.next() => {
                let Some(message) = incoming else { break };
                match message {
                    Ok(Message::Text(text)) => {
                        let Ok(parsed) = serde_json::from_str::<ClientMessage>(&text) else {
                            warn!("Ignoring unparseable client message.");
                            continue;
                        };
                        match parsed {
                            ClientMessage::UserMessage { text, image } => {
                                run_exchange(&mut dialogue, &text, image, &socket_tx).await?;
                            }
                            ClientMessage::SetVoiceEnabled { enabled } => {
                                if let Some(mut session) = voice.take() {
                                    session.stop();
                                }
                                voice_feed = None;
                                mic_resampler = None;

                                if enabled {
                                    let (capture, feed) = ChannelCapture::new(64);
                                    let connector = GeminiLiveConnector::new(
                                        state.config.gemini_api_key.clone(),
                                        state.config.live_model.clone(),
                                        state.system_prompt.as_str(),
                                        router.declarations(),
                                    );
                                    let mut session = VoiceSession::new(
                                        Arc::new(connector),
                                        Arc::new(capture),
                                        router.clone(),
                                        voice_updates_tx.clone(),
                                    );
                                    match session.start() {
                                        Ok(()) => {
                                            voice = Some(session);
                                            voice_feed = Some(feed);
                                            mic_resampler = Some(InputResampler::new()?);
                                        }
                                        // The failure reason reaches the
                                        // client through the state update
                                        // the session already emitted.
                                        Err(e) => error!(error = %e, "Voice session failed to start."),
                                    }
                                } else {
                                    info!("Voice disabled by client.");
                                }
                            }
                            ClientMessage::Init => warn!("Ignoring duplicate init."),
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        match (&voice_feed, &mut mic_resampler) {
                            (Some(feed), Some(resampler)) => {
                                let frontend = audio::i16_to_f32(&audio::pcm16_from_bytes(&data));
                                let converted = resampler.process(&frontend);
                                // The capture handoff must not block this
                                // loop; a saturated session drops frames.
                                if !converted.is_empty() && feed.try_send(converted).is_err() {
                                    warn!("Capture channel full, dropping microphone block.");
                                }
                            }
                            _ => warn!("Received audio while no voice session is active."),
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("Client sent close frame. Shutting down conversation.");
                        break;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Err(e) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break;
                    }
                }
            },
            // Updates from the voice session.
            Some(update) = voice_updates_rx.recv() => {
                let mut sink = socket_tx.lock().await;
                match update {
                    VoiceUpdate::State(voice_state) => {
                        send_msg(&mut sink, ServerMessage::voice_state(&voice_state)).await?;
                    }
                    VoiceUpdate::Audio { start, samples, .. } => {
                        send_msg(&mut sink, ServerMessage::AudioChunk {
                            data: audio::encode_base64_pcm16(&samples),
                            start,
                        }).await?;
                    }
                    VoiceUpdate::Transcription { text, is_final } => {
                        send_msg(&mut sink, ServerMessage::TranscriptionUpdate { text, is_final }).await?;
                    }
                    VoiceUpdate::SpeakingDone => {
                        send_msg(&mut sink, ServerMessage::AiSpeakingEnd).await?;
                    }
                    VoiceUpdate::ToolActivity { name } => {
                        send_msg(&mut sink, ServerMessage::ToolActivity { name }).await?;
                    }
                }
            },
        }
    }

    // Cleanup on every exit path.
    if let Some(mut session) = voice.take() {
        session.stop();
    }
    info!("WebSocket connection closed and conversation terminated.");
    Ok(())
}

/// Drives one text exchange and streams the settled reply back.
async fn run_exchange(
    dialogue: &mut DialogueSession,
    text: &str,
    image: Option<ImagePayload>,
    socket_tx: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
) -> Result<()> {
    let attachment = image.map(|payload| MediaRef {
        mime: payload.mime,
        data: payload.data,
    });

    let mut sink = socket_tx.lock().await;
    send_msg(&mut sink, ServerMessage::ResponseStart).await?;
    match dialogue.send(text, attachment).await {
        Ok(reply) => {
            if let Some(record) = &reply.tool_payload {
                send_msg(
                    &mut sink,
                    ServerMessage::ToolActivity {
                        name: record.name.clone(),
                    },
                )
                .await?;
            }
            send_msg(&mut sink, ServerMessage::ResponseChunk { chunk: reply.text }).await?;
            send_msg(&mut sink, ServerMessage::ResponseEnd).await?;
        }
        Err(e) => {
            error!(error = %e, "Exchange failed terminally.");
            send_msg(
                &mut sink,
                ServerMessage::Error {
                    message: format!("The advisor is unavailable: {e}"),
                },
            )
            .await?;
            send_msg(&mut sink, ServerMessage::ResponseEnd).await?;
        }
    }
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
