//! The lead-capture tool: validates a prospect's phone number and hands
//! the contact off to the surrounding application.

use super::{ToolCall, ToolDeclaration, ToolHandler, ToolOutcome};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// A validated prospect contact, ready to hand to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lead {
    pub name: Option<String>,
    pub phone: String,
    pub note: Option<String>,
}

/// Where captured leads go. Persistence is the surrounding application's
/// concern; the core only promises the phone number it hands over has
/// passed validation.
#[async_trait]
pub trait LeadSink: Send + Sync {
    async fn record(&self, lead: Lead) -> anyhow::Result<()>;
}

/// Normalizes a raw phone string to bare digits and checks the national
/// format: at least 10 digits, beginning with the trunk digit `0`.
/// Returns a correction hint on failure.
pub fn normalize_phone(raw: &str) -> Result<String, String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return Err("the phone number must contain at least 10 digits".to_string());
    }
    if !digits.starts_with('0') {
        return Err("the phone number must start with 0".to_string());
    }
    Ok(digits)
}

/// Handler for the `capture_lead` tool.
///
/// Repeated calls with the same call id answer with the originally
/// recorded summary without touching the sink again, so a retried
/// round-trip cannot double-register a prospect.
pub struct LeadCaptureHandler {
    sink: Arc<dyn LeadSink>,
    resolved: Mutex<HashMap<String, String>>,
}

impl LeadCaptureHandler {
    pub const NAME: &'static str = "capture_lead";

    pub fn new(sink: Arc<dyn LeadSink>) -> Self {
        Self {
            sink,
            resolved: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ToolHandler for LeadCaptureHandler {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: Self::NAME.to_string(),
            description: "Record a prospective buyer's contact details so an advisor can \
                          follow up. Call this once the user has shared a phone number."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "phone": {
                        "type": "string",
                        "description": "The prospect's phone number as given by the user."
                    },
                    "name": {
                        "type": "string",
                        "description": "The prospect's name, if they shared one."
                    },
                    "note": {
                        "type": "string",
                        "description": "What the prospect is looking for."
                    }
                },
                "required": ["phone"]
            }),
        }
    }

    async fn invoke(&self, call: &ToolCall) -> ToolOutcome {
        if let Some(summary) = self.resolved.lock().unwrap().get(&call.id) {
            return ToolOutcome::Success(summary.clone());
        }

        let raw = match call.args.get("phone").and_then(|v| v.as_str()) {
            Some(raw) => raw.to_string(),
            None => {
                return ToolOutcome::Invalid {
                    raw: String::new(),
                    hint: "a phone number is required; ask the user for one".to_string(),
                };
            }
        };

        let phone = match normalize_phone(&raw) {
            Ok(phone) => phone,
            Err(hint) => return ToolOutcome::Invalid { raw, hint },
        };

        let lead = Lead {
            name: call
                .args
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            phone: phone.clone(),
            note: call
                .args
                .get("note")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        };

        match self.sink.record(lead).await {
            Ok(()) => {
                info!(phone = %phone, "lead captured");
                let summary = format!("saved the contact number {phone} for advisor follow-up");
                self.resolved
                    .lock()
                    .unwrap()
                    .insert(call.id.clone(), summary.clone());
                ToolOutcome::Success(summary)
            }
            Err(error) => ToolOutcome::Failed(format!("could not save the contact: {error}")),
        }
    }
}
