//! Gemini `generateContent` implementation of [`ModelClient`].

use super::{ModelClient, ModelError, ModelReply, ModelRequest};
use crate::history::{Part, Turn};
use crate::transcript::Role;
use async_trait::async_trait;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

// --- Wire Types (local to this transport) ---
mod wire {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerateContentRequest {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub system_instruction: Option<Content>,
        pub contents: Vec<Content>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub tools: Option<Vec<ToolSet>>,
    }

    #[derive(Serialize, Deserialize, Debug)]
    pub(super) struct Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub role: Option<String>,
        pub parts: Vec<Part>,
    }

    #[derive(Serialize, Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Part {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub inline_data: Option<Blob>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub function_call: Option<FunctionCall>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub function_response: Option<FunctionResponse>,
    }

    #[derive(Serialize, Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }

    #[derive(Serialize, Deserialize, Debug)]
    pub(super) struct FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        pub name: String,
        #[serde(default)]
        pub args: serde_json::Value,
    }

    #[derive(Serialize, Deserialize, Debug)]
    pub(super) struct FunctionResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        pub name: String,
        pub response: serde_json::Value,
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

    #[derive(Deserialize, Debug)]
    pub(super) struct GenerateContentResponse {
        #[serde(default)]
        pub candidates: Vec<Candidate>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Candidate {
        pub content: Option<Content>,
    }
}

/// HTTP client for the request/response transport. One instance per
/// process is enough; `reqwest::Client` pools connections internally.
pub struct GenerativeClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl GenerativeClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Points the client at a different endpoint. Used by tests and
    /// proxy deployments.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn build_body(request: &ModelRequest) -> wire::GenerateContentRequest {
        let mut contents: Vec<wire::Content> =
            request.turns.iter().map(content_from_turn).collect();

        // A resolved tool round appends the model's calls and our
        // responses as two additional turns.
        if let Some(round) = &request.tool_round {
            contents.push(wire::Content {
                role: Some(Role::Model.as_str().to_string()),
                parts: round
                    .calls
                    .iter()
                    .map(|call| wire::Part {
                        function_call: Some(wire::FunctionCall {
                            id: None,
                            name: call.name.clone(),
                            args: call.args.clone(),
                        }),
                        ..Default::default()
                    })
                    .collect(),
            });
            contents.push(wire::Content {
                role: Some(Role::User.as_str().to_string()),
                parts: round
                    .results
                    .iter()
                    .map(|result| wire::Part {
                        function_response: Some(wire::FunctionResponse {
                            id: None,
                            name: result.name.clone(),
                            response: result.outcome.response_body(),
                        }),
                        ..Default::default()
                    })
                    .collect(),
            });
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(vec![wire::ToolSet {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|d| wire::FunctionDeclaration {
                        name: d.name.clone(),
                        description: d.description.clone(),
                        parameters: d.parameters.clone(),
                    })
                    .collect(),
            }])
        };

        wire::GenerateContentRequest {
            system_instruction: request.system.as_ref().map(|text| wire::Content {
                role: None,
                parts: vec![wire::Part {
                    text: Some(text.clone()),
                    ..Default::default()
                }],
            }),
            contents,
            tools,
        }
    }

    fn reply_from_response(response: wire::GenerateContentResponse) -> Result<ModelReply, ModelError> {
        let content = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .ok_or(ModelError::EmptyReply)?;

        let mut reply = ModelReply::default();
        for (index, part) in content.parts.into_iter().enumerate() {
            if let Some(text) = part.text {
                reply.text.push_str(&text);
            }
            if let Some(call) = part.function_call {
                // REST replies may omit call ids; synthesize a stable
                // one so results stay correlated.
                let id = call
                    .id
                    .unwrap_or_else(|| format!("{}-{}", call.name, index));
                reply.tool_calls.push(crate::tools::ToolCall {
                    id,
                    name: call.name,
                    args: call.args,
                });
            }
        }
        Ok(reply)
    }
}

fn content_from_turn(turn: &Turn) -> wire::Content {
    wire::Content {
        role: Some(turn.role.as_str().to_string()),
        parts: turn
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => wire::Part {
                    text: Some(text.clone()),
                    ..Default::default()
                },
                Part::InlineMedia(media) => wire::Part {
                    inline_data: Some(wire::Blob {
                        mime_type: media.mime.clone(),
                        data: media.data.clone(),
                    }),
                    ..Default::default()
                },
            })
            .collect(),
    }
}

#[async_trait]
impl ModelClient for GenerativeClient {
    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, ModelError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint, self.model, self.api_key
        );
        let body = Self::build_body(&request);

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ModelError::RateLimited);
        }
        if !status.is_success() {
            return Err(ModelError::Http {
                status: status.as_u16(),
            });
        }

        let parsed: wire::GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))?;
        debug!(candidates = ?parsed, "model response received");
        Self::reply_from_response(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolRound;
    use crate::tools::{ToolCall, ToolOutcome, ToolResult};
    use serde_json::json;

    fn text_turn(role: Role, text: &str) -> Turn {
        Turn {
            role,
            parts: vec![Part::Text(text.to_string())],
        }
    }

    #[test]
    fn request_body_has_expected_wire_shape() {
        let request = ModelRequest {
            system: Some("you are an advisor".into()),
            turns: vec![
                text_turn(Role::User, "Xin chào"),
                text_turn(Role::Model, "Chào anh"),
                text_turn(Role::User, "tư vấn giúp tôi"),
            ],
            tools: vec![crate::tools::ToolDeclaration {
                name: "capture_lead".into(),
                description: "records a lead".into(),
                parameters: json!({ "type": "object" }),
            }],
            tool_round: None,
        };

        let body = serde_json::to_value(GenerativeClient::build_body(&request)).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "you are an advisor");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "capture_lead"
        );
        assert!(body["contents"][0]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn tool_round_appends_call_and_response_turns() {
        let request = ModelRequest {
            system: None,
            turns: vec![text_turn(Role::User, "0971132378")],
            tools: vec![],
            tool_round: Some(ToolRound {
                calls: vec![ToolCall {
                    id: "c1".into(),
                    name: "capture_lead".into(),
                    args: json!({ "phone": "0971132378" }),
                }],
                results: vec![ToolResult {
                    id: "c1".into(),
                    name: "capture_lead".into(),
                    outcome: ToolOutcome::Success("saved".into()),
                }],
            }),
        };

        let body = serde_json::to_value(GenerativeClient::build_body(&request)).unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(
            contents[1]["parts"][0]["functionCall"]["name"],
            "capture_lead"
        );
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["result"],
            "saved"
        );
    }

    #[test]
    fn media_parts_become_inline_data() {
        let request = ModelRequest {
            system: None,
            turns: vec![Turn {
                role: Role::User,
                parts: vec![
                    Part::Text("what is this?".into()),
                    Part::InlineMedia(crate::transcript::MediaRef {
                        mime: "image/jpeg".into(),
                        data: "QUJD".into(),
                    }),
                ],
            }],
            tools: vec![],
            tool_round: None,
        };
        let body = serde_json::to_value(GenerativeClient::build_body(&request)).unwrap();
        assert_eq!(
            body["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/jpeg"
        );
    }

    #[test]
    fn response_with_text_parses_to_reply() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{ "text": "Chào anh, " }, { "text": "em đây." }]
                }
            }]
        });
        let parsed: wire::GenerateContentResponse = serde_json::from_value(raw).unwrap();
        let reply = GenerativeClient::reply_from_response(parsed).unwrap();
        assert_eq!(reply.text, "Chào anh, em đây.");
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn response_with_function_call_synthesizes_id() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "functionCall": {
                            "name": "capture_lead",
                            "args": { "phone": "0971132378" }
                        }
                    }]
                }
            }]
        });
        let parsed: wire::GenerateContentResponse = serde_json::from_value(raw).unwrap();
        let reply = GenerativeClient::reply_from_response(parsed).unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "capture_lead");
        assert_eq!(reply.tool_calls[0].id, "capture_lead-0");
        assert_eq!(reply.tool_calls[0].args["phone"], "0971132378");
    }

    #[test]
    fn empty_candidate_list_is_an_empty_reply_error() {
        let parsed: wire::GenerateContentResponse =
            serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(matches!(
            GenerativeClient::reply_from_response(parsed),
            Err(ModelError::EmptyReply)
        ));
    }
}
