//! The full-duplex voice session.
//!
//! A [`VoiceSession`] owns one live connection, the audio pipeline, and
//! an inline tool-dispatch path. The transport's callback-style events
//! are mapped onto explicit [`VoiceEvent`]s fed through a pure
//! transition function, so the lifecycle logic is testable without a
//! socket. `stop()` is the single cleanup routine for every exit path
//! and is unconditionally safe to call.

pub mod live;

use crate::audio::{FrameEncoder, PlaybackScheduler};
use crate::tools::ToolRouter;
use live::{ClientEvent, LiveConnector, ServerEvent};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("voice session is already running")]
    NotIdle,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("live transport failed: {0}")]
    Transport(String),
    #[error("live protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("no capture device available")]
    Unavailable,
}

/// Where the session's outbound audio comes from.
///
/// Opening yields a channel of raw f32 sample blocks at the capture
/// contract rate. The producer side must hand blocks off without
/// blocking; dropping the receiver is how the session releases the
/// device.
pub trait CaptureSource: Send + Sync {
    fn open(&self) -> Result<mpsc::Receiver<Vec<f32>>, CaptureError>;
}

/// A [`CaptureSource`] fed by the surrounding application, used when the
/// microphone lives on the far side of a client connection. The sender
/// half uses `try_send`, so a stalled session drops frames instead of
/// blocking the feeder.
pub struct ChannelCapture {
    receiver: Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
}

impl ChannelCapture {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<Vec<f32>>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                receiver: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl CaptureSource for ChannelCapture {
    fn open(&self) -> Result<mpsc::Receiver<Vec<f32>>, CaptureError> {
        lock_unpoisoned(&self.receiver)
            .take()
            .ok_or(CaptureError::Unavailable)
    }
}

/// The session lifecycle. The only terminal state is `Idle` reached via
/// an explicit stop; `Error` keeps the failure reason until then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceSessionState {
    Idle,
    Connecting,
    Active,
    Error(String),
}

impl fmt::Display for VoiceSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceSessionState::Idle => f.write_str("idle"),
            VoiceSessionState::Connecting => f.write_str("connecting"),
            VoiceSessionState::Active => f.write_str("active"),
            VoiceSessionState::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Lifecycle inputs. Transport callbacks and user actions are both
/// expressed as these events.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    StartRequested,
    TransportOpened,
    /// The server closed the stream cleanly.
    TransportClosed,
    TransportFailed(String),
    CaptureDenied(String),
    StopRequested,
}

/// The pure transition function. Unknown combinations (stale events
/// after a stop, duplicate opens) leave the state unchanged.
fn next_state(current: &VoiceSessionState, event: &VoiceEvent) -> VoiceSessionState {
    use VoiceSessionState::*;
    match (current, event) {
        (Idle, VoiceEvent::StartRequested) => Connecting,
        (Connecting, VoiceEvent::TransportOpened) => Active,
        (Active, VoiceEvent::TransportClosed) => Idle,
        (Connecting, VoiceEvent::TransportClosed) => {
            Error("voice connection closed before it became active".to_string())
        }
        (_, VoiceEvent::TransportFailed(reason)) => {
            Error(format!("voice connection lost: {reason}"))
        }
        (_, VoiceEvent::CaptureDenied(reason)) => {
            Error(format!("microphone unavailable: {reason}"))
        }
        (_, VoiceEvent::StopRequested) => Idle,
        _ => current.clone(),
    }
}

/// Notifications the session pushes to the layer driving it.
#[derive(Debug, Clone)]
pub enum VoiceUpdate {
    State(VoiceSessionState),
    /// A playback chunk with its position on the session's audio clock.
    Audio {
        seq: u64,
        start: f64,
        samples: Vec<f32>,
    },
    Transcription {
        text: String,
        is_final: bool,
    },
    /// The model finished (or abandoned) its spoken turn.
    SpeakingDone,
    /// A tool fired in-band.
    ToolActivity {
        name: String,
    },
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared handles the session task works through.
#[derive(Clone)]
struct SessionCtx {
    state: Arc<Mutex<VoiceSessionState>>,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    router: Arc<ToolRouter>,
    updates: mpsc::Sender<VoiceUpdate>,
}

impl SessionCtx {
    /// Applies a lifecycle event through the transition function and
    /// emits the new state if it changed. Never blocks and never fails;
    /// a full update channel only costs the notification.
    fn apply(&self, event: VoiceEvent) {
        let mut state = lock_unpoisoned(&self.state);
        let next = next_state(&state, &event);
        if *state == next {
            return;
        }
        info!(from = %*state, to = %next, "voice session transition");
        *state = next.clone();
        if self.updates.try_send(VoiceUpdate::State(next)).is_err() {
            warn!("voice update channel full, state notification dropped");
        }
    }

    fn cancel_audio(&self) {
        let cancelled = lock_unpoisoned(&self.scheduler).cancel_all();
        if cancelled > 0 {
            info!(cancelled, "cancelled scheduled playback");
        }
    }
}

/// One full-duplex voice conversation.
pub struct VoiceSession {
    connector: Arc<dyn LiveConnector>,
    capture: Arc<dyn CaptureSource>,
    ctx: SessionCtx,
    task: Option<JoinHandle<()>>,
}

impl VoiceSession {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        capture: Arc<dyn CaptureSource>,
        router: Arc<ToolRouter>,
        updates: mpsc::Sender<VoiceUpdate>,
    ) -> Self {
        Self {
            connector,
            capture,
            ctx: SessionCtx {
                state: Arc::new(Mutex::new(VoiceSessionState::Idle)),
                scheduler: Arc::new(Mutex::new(PlaybackScheduler::new())),
                router,
                updates,
            },
            task: None,
        }
    }

    pub fn state(&self) -> VoiceSessionState {
        lock_unpoisoned(&self.ctx.state).clone()
    }

    /// Acquires the capture device, transitions to `Connecting`, and
    /// spawns the session task that opens the transport and runs the
    /// stream. Capture denial surfaces both as the returned error and as
    /// the session's `Error` state.
    pub fn start(&mut self) -> Result<(), VoiceError> {
        if self.state() != VoiceSessionState::Idle {
            return Err(VoiceError::NotIdle);
        }

        let frames = match self.capture.open() {
            Ok(frames) => frames,
            Err(error) => {
                self.ctx.apply(VoiceEvent::CaptureDenied(error.to_string()));
                return Err(error.into());
            }
        };

        self.ctx.apply(VoiceEvent::StartRequested);
        let ctx = self.ctx.clone();
        let connector = self.connector.clone();
        self.task = Some(tokio::spawn(run_session(connector, ctx, frames)));
        Ok(())
    }

    /// Tears the session down from any state: aborts the stream task,
    /// releases the capture device, cancels all scheduled playback, and
    /// resets to `Idle`. Safe to call repeatedly, including from error
    /// handlers; never fails.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.ctx.cancel_audio();
        self.ctx.apply(VoiceEvent::StopRequested);
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The session task: connect, then stream until the transport ends.
async fn run_session(
    connector: Arc<dyn LiveConnector>,
    ctx: SessionCtx,
    mut frames: mpsc::Receiver<Vec<f32>>,
) {
    let mut channel = match connector.connect().await {
        Ok(channel) => channel,
        Err(error) => {
            ctx.apply(VoiceEvent::TransportFailed(error.to_string()));
            return;
        }
    };
    ctx.apply(VoiceEvent::TransportOpened);

    let epoch = Instant::now();
    let mut encoder = FrameEncoder::new();
    let mut next_seq: u64 = 0;

    loop {
        tokio::select! {
            block = frames.recv() => match block {
                Some(samples) => {
                    for frame in encoder.push(&samples) {
                        if let Err(error) = channel.send(ClientEvent::AudioFrame(frame)).await {
                            ctx.cancel_audio();
                            ctx.apply(VoiceEvent::TransportFailed(error.to_string()));
                            return;
                        }
                    }
                }
                // Capture side went away; the owning session is being
                // torn down and will finish the cleanup.
                None => return,
            },
            inbound = channel.recv() => match inbound {
                Some(Ok(event)) => {
                    if let Err(error) = handle_server_event(&ctx, &mut *channel, event, epoch, &mut next_seq).await {
                        ctx.cancel_audio();
                        ctx.apply(VoiceEvent::TransportFailed(error.to_string()));
                        return;
                    }
                }
                Some(Err(error)) => {
                    ctx.cancel_audio();
                    ctx.apply(VoiceEvent::TransportFailed(error.to_string()));
                    return;
                }
                None => {
                    ctx.cancel_audio();
                    ctx.apply(VoiceEvent::TransportClosed);
                    return;
                }
            },
        }
    }
}

/// Handles one inbound event while the session stays `Active`.
async fn handle_server_event(
    ctx: &SessionCtx,
    channel: &mut dyn live::LiveChannel,
    event: ServerEvent,
    epoch: Instant,
    next_seq: &mut u64,
) -> Result<(), VoiceError> {
    match event {
        ServerEvent::Audio(samples) => {
            let now = epoch.elapsed().as_secs_f64();
            let seq = *next_seq;
            *next_seq += 1;
            let released = {
                let mut scheduler = lock_unpoisoned(&ctx.scheduler);
                scheduler.reap(now);
                scheduler.submit(seq, PlaybackScheduler::chunk_duration(samples.len()), now)
            };
            // Chunks arrive in order on one stream, so the submitted
            // chunk is released immediately and alone.
            if let Some(chunk) = released.into_iter().next() {
                let update = VoiceUpdate::Audio {
                    seq: chunk.seq,
                    start: chunk.start,
                    samples,
                };
                if ctx.updates.send(update).await.is_err() {
                    warn!("voice update receiver dropped, discarding audio");
                }
            }
        }
        ServerEvent::ToolCalls(calls) => {
            for call in &calls {
                let _ = ctx
                    .updates
                    .try_send(VoiceUpdate::ToolActivity {
                        name: call.name.clone(),
                    });
            }
            let results = ctx.router.dispatch(&calls).await;
            channel.send(ClientEvent::ToolResults(results)).await?;
        }
        ServerEvent::Transcription { text, is_final } => {
            let _ = ctx
                .updates
                .send(VoiceUpdate::Transcription { text, is_final })
                .await;
        }
        ServerEvent::TurnComplete => {
            let _ = ctx.updates.send(VoiceUpdate::SpeakingDone).await;
        }
        ServerEvent::Interrupted => {
            ctx.cancel_audio();
            let _ = ctx.updates.send(VoiceUpdate::SpeakingDone).await;
        }
    }
    Ok(())
}
