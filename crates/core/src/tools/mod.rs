//! Tool-call routing.
//!
//! The model issues structured calls against a registry of named
//! handlers. The router validates, executes, and answers each call with
//! an id-correlated result; validation failures come back as structured
//! error results rather than Rust errors so the model can ask the user
//! to correct the input.

pub mod lead;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A structured request emitted by the model. The client never
/// constructs these except when matching a response to its call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// The outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The side effect ran; the payload is a summary the model can
    /// narrate to the user.
    Success(String),
    /// The arguments failed validation. Carries the offending raw input
    /// and a human-readable correction hint for the model to relay.
    Invalid { raw: String, hint: String },
    /// The handler was found and the arguments were acceptable, but the
    /// effect itself failed.
    Failed(String),
}

impl ToolOutcome {
    /// The structured payload submitted back to the model for this
    /// outcome.
    pub fn response_body(&self) -> serde_json::Value {
        match self {
            ToolOutcome::Success(summary) => json!({ "result": summary }),
            ToolOutcome::Invalid { raw, hint } => json!({ "error": hint, "received": raw }),
            ToolOutcome::Failed(reason) => json!({ "error": reason }),
        }
    }
}

/// Exactly one result is produced per [`ToolCall`], correlated by id.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

/// A tool's advertised interface: its name plus a JSON-schema argument
/// declaration, submitted to the model alongside each request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One pluggable operation the model may request.
///
/// Handlers validate their own arguments and must keep their side effect
/// idempotent with respect to the same call id, since a transport retry
/// can deliver the same call twice.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;
    async fn invoke(&self, call: &ToolCall) -> ToolOutcome;
}

/// The name-to-handler registry shared by the text and voice sessions.
#[derive(Default)]
pub struct ToolRouter {
    order: Vec<String>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its declared name. Re-registering a
    /// name replaces the previous handler.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.declaration().name;
        if self.handlers.insert(name.clone(), handler).is_none() {
            self.order.push(name);
        }
    }

    /// Declarations for every registered handler, in registration order.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.order
            .iter()
            .filter_map(|name| self.handlers.get(name))
            .map(|h| h.declaration())
            .collect()
    }

    /// Routes a single call to its handler. An unknown name produces an
    /// error result, not a panic or an Err: the model should hear about
    /// it and move on.
    pub async fn route(&self, call: &ToolCall) -> ToolResult {
        let outcome = match self.handlers.get(&call.name) {
            Some(handler) => {
                info!(tool = %call.name, id = %call.id, "dispatching tool call");
                handler.invoke(call).await
            }
            None => {
                warn!(tool = %call.name, "model requested an unregistered tool");
                ToolOutcome::Failed(format!("unsupported operation: {}", call.name))
            }
        };
        ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            outcome,
        }
    }

    /// Dispatches a batch in order, one result per call. A failing call
    /// does not stop the calls after it; batch-level short-circuiting on
    /// validation failures is the dialogue session's decision, not the
    /// router's.
    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.route(call).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler {
        name: &'static str,
    }

    #[async_trait]
    impl ToolHandler for EchoHandler {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration {
                name: self.name.to_string(),
                description: "echoes its argument".into(),
                parameters: json!({ "type": "object", "properties": {} }),
            }
        }

        async fn invoke(&self, call: &ToolCall) -> ToolOutcome {
            ToolOutcome::Success(format!("{}:{}", self.name, call.args))
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            args: json!({}),
        }
    }

    #[tokio::test]
    async fn dispatch_preserves_call_order_and_ids() {
        let mut router = ToolRouter::new();
        router.register(Arc::new(EchoHandler { name: "alpha" }));
        router.register(Arc::new(EchoHandler { name: "beta" }));

        let calls = vec![call("c1", "beta"), call("c2", "alpha"), call("c3", "beta")];
        let results = router.dispatch(&calls).await;

        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["c1", "c2", "c3"]
        );
        assert_eq!(results[1].name, "alpha");
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result_not_failure() {
        let router = ToolRouter::new();
        let results = router.dispatch(&[call("c1", "nonexistent")]).await;
        assert_eq!(results.len(), 1);
        match &results[0].outcome {
            ToolOutcome::Failed(reason) => assert!(reason.contains("unsupported operation")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_does_not_block_later_calls() {
        let mut router = ToolRouter::new();
        router.register(Arc::new(EchoHandler { name: "alpha" }));
        let results = router
            .dispatch(&[call("c1", "missing"), call("c2", "alpha")])
            .await;
        assert!(matches!(results[0].outcome, ToolOutcome::Failed(_)));
        assert!(matches!(results[1].outcome, ToolOutcome::Success(_)));
    }

    #[test]
    fn declarations_follow_registration_order() {
        let mut router = ToolRouter::new();
        router.register(Arc::new(EchoHandler { name: "zulu" }));
        router.register(Arc::new(EchoHandler { name: "alpha" }));
        let names: Vec<String> = router.declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zulu", "alpha"]);
    }

    #[test]
    fn outcome_response_bodies() {
        let ok = ToolOutcome::Success("done".into());
        assert_eq!(ok.response_body()["result"], "done");

        let invalid = ToolOutcome::Invalid {
            raw: "123456".into(),
            hint: "too short".into(),
        };
        assert_eq!(invalid.response_body()["received"], "123456");
        assert_eq!(invalid.response_body()["error"], "too short");
    }
}
