//! The request/response model API boundary.
//!
//! [`ModelClient`] is the seam the dialogue loop talks through; the
//! concrete [`gemini::GenerativeClient`] implements it against the
//! generative-language REST endpoint. Keeping the trait here and the
//! wire types in the submodule mirrors how the live transport is split
//! in [`crate::voice`].

pub mod gemini;

use crate::history::Turn;
use crate::retry::Transient;
use crate::tools::{ToolCall, ToolDeclaration, ToolResult};
use async_trait::async_trait;
use thiserror::Error;

pub use gemini::GenerativeClient;

/// A resolved tool round: the calls the model issued and the results the
/// router produced, submitted back as the follow-up turn.
#[derive(Debug, Clone)]
pub struct ToolRound {
    pub calls: Vec<ToolCall>,
    pub results: Vec<ToolResult>,
}

/// One submission to the model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolDeclaration>,
    /// Present only on the follow-up submission of a tool round-trip.
    pub tool_round: Option<ToolRound>,
}

/// What the model answered: free text, zero or more tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Failure taxonomy for the request/response transport. The
/// [`Transient`] impl is what the retry loop keys off.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model endpoint returned HTTP {status}")]
    Http { status: u16 },
    #[error("rate limit or quota exhausted")]
    RateLimited,
    #[error("network failure reaching model endpoint: {0}")]
    Network(String),
    #[error("could not decode model response: {0}")]
    Decode(String),
    #[error("model returned no candidates")]
    EmptyReply,
}

impl Transient for ModelError {
    fn is_transient(&self) -> bool {
        match self {
            ModelError::Http { status } => *status >= 500,
            ModelError::RateLimited | ModelError::Network(_) => true,
            ModelError::Decode(_) | ModelError::EmptyReply => false,
        }
    }
}

/// The model seam used by [`crate::dialogue::DialogueSession`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ModelError::Http { status: 503 }.is_transient());
        assert!(ModelError::RateLimited.is_transient());
        assert!(ModelError::Network("reset".into()).is_transient());
        assert!(!ModelError::Http { status: 400 }.is_transient());
        assert!(!ModelError::Decode("bad json".into()).is_transient());
        assert!(!ModelError::EmptyReply.is_transient());
    }
}
