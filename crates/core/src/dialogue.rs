//! The turn-based dialogue session.
//!
//! One [`DialogueSession::send`] call is one logical exchange: append the
//! user's input, settle the model's answer (running any tool calls it
//! issues), and append the final model message. A single call may
//! perform multiple model round-trips internally; the caller only ever
//! sees the settled result.

use crate::history;
use crate::model::{ModelClient, ModelError, ModelReply, ModelRequest, ToolRound};
use crate::retry::RetryPolicy;
use crate::tools::{ToolOutcome, ToolResult, ToolRouter};
use crate::transcript::{MediaRef, Message, ToolInvocationRecord};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Shown when the model produced neither text nor tool calls. The
/// session never ends an exchange in silence.
const EMPTY_REPLY_NOTICE: &str =
    "I could not produce an answer just now. Could you rephrase that?";

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Drives the request/response transport for one conversation.
///
/// The transcript is owned here and mutated only by `send`, which takes
/// `&mut self`: a second round-trip cannot be interleaved against the
/// same transcript, the borrow checker rejects it at the call site.
pub struct DialogueSession {
    client: Arc<dyn ModelClient>,
    router: Arc<ToolRouter>,
    retry: RetryPolicy,
    system_prompt: Arc<String>,
    transcript: Vec<Message>,
    /// Substitute answer used when the model is rate limited and the
    /// session was configured non-retryable.
    offline_fallback: Option<String>,
}

impl DialogueSession {
    pub fn new(
        client: Arc<dyn ModelClient>,
        router: Arc<ToolRouter>,
        system_prompt: Arc<String>,
    ) -> Self {
        Self {
            client,
            router,
            retry: RetryPolicy::default(),
            system_prompt,
            transcript: Vec::new(),
            offline_fallback: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Configures the precomputed offline answer used when quota is
    /// exhausted and the policy does not allow waiting it out.
    pub fn with_offline_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.offline_fallback = Some(fallback.into());
        self
    }

    /// The append-only transcript, oldest message first.
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    /// Performs one full exchange and returns the final model message.
    pub async fn send(
        &mut self,
        text: &str,
        attachment: Option<MediaRef>,
    ) -> Result<Message, DialogueError> {
        self.transcript.push(Message::user(text, attachment));

        let reply = match self.submit(None).await {
            Ok(reply) => reply,
            Err(error) => return self.settle_failure(error),
        };

        if reply.tool_calls.is_empty() {
            let message = Message::model(non_empty(reply.text));
            self.transcript.push(message.clone());
            return Ok(message);
        }

        // The model asked for tools. Route calls in order; the first
        // validation failure short-circuits the batch, because the model
        // needs one corrective round-trip before anything else can
        // meaningfully proceed.
        let mut results: Vec<ToolResult> = Vec::new();
        let mut interrupted = false;
        for call in &reply.tool_calls {
            let result = self.router.route(call).await;
            if matches!(result.outcome, ToolOutcome::Invalid { .. }) {
                warn!(tool = %result.name, "tool arguments failed validation, short-circuiting batch");
                results = vec![result];
                interrupted = true;
                break;
            }
            results.push(result);
        }

        let record = invocation_record(&results, interrupted);
        let round = ToolRound {
            calls: reply.tool_calls.clone(),
            results,
        };

        let follow_up = match self.submit(Some(round)).await {
            Ok(reply) => reply,
            Err(error) => return self.settle_failure(error),
        };
        if !follow_up.tool_calls.is_empty() {
            // One round of tools per exchange; a second batch is
            // acknowledged but not executed.
            warn!(
                count = follow_up.tool_calls.len(),
                "model issued further tool calls in the follow-up turn, ignoring them"
            );
        }

        let message = Message::model_with_tools(non_empty(follow_up.text), record);
        self.transcript.push(message.clone());
        Ok(message)
    }

    /// One model submission under the retry policy, built from the
    /// current transcript plus an optional resolved tool round.
    async fn submit(&self, tool_round: Option<ToolRound>) -> Result<ModelReply, ModelError> {
        let request = ModelRequest {
            system: Some(self.system_prompt.as_str().to_string()),
            turns: history::encode(&self.transcript),
            tools: self.router.declarations(),
            tool_round,
        };
        self.retry
            .run(|attempt| {
                let request = request.clone();
                async move {
                    if attempt > 1 {
                        info!(attempt, "resubmitting after transient failure");
                    }
                    self.client.generate(request).await
                }
            })
            .await
    }

    /// Terminal-failure policy: rate-limit exhaustion degrades to the
    /// configured offline answer when one is present; everything else
    /// propagates.
    fn settle_failure(&mut self, error: ModelError) -> Result<Message, DialogueError> {
        if matches!(error, ModelError::RateLimited) {
            if let Some(fallback) = &self.offline_fallback {
                warn!("model quota exhausted, serving offline fallback reply");
                let message = Message::model(fallback.clone());
                self.transcript.push(message.clone());
                return Ok(message);
            }
        }
        Err(error.into())
    }
}

fn non_empty(text: String) -> String {
    if text.trim().is_empty() {
        EMPTY_REPLY_NOTICE.to_string()
    } else {
        text
    }
}

fn invocation_record(results: &[ToolResult], interrupted: bool) -> ToolInvocationRecord {
    let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
    let summary = if interrupted {
        "rejected input, awaiting correction".to_string()
    } else {
        "completed".to_string()
    };
    ToolInvocationRecord {
        name: names.join("+"),
        summary,
    }
}
