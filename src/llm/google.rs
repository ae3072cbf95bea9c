// Google generative AI adapter (Gemini / Vertex AI generateContent)
// API Reference: https://ai.google.dev/api/generate-content
//
// The service takes one flattened prompt string. Tool schemas are appended
// to the prompt as JSON, and a JSON object found in the reply is turned
// back into a tool call so callers see the same shape as the local runtime.

use crate::llm::provider::LLMAdapter;
use crate::prompt::flatten_messages;
use crate::prompt::schemas::{tool_name, ARTICLE_TOOL};
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse, ToolCall};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub struct GoogleAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Deserialize)]
struct GoogleErrorResponse {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
    status: Option<String>,
}

impl GoogleAdapter {
    pub fn new(base_url: &str, api_key: &str) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    fn build_prompt(request: &LLMRequest) -> String {
        let mut prompt = flatten_messages(&request.messages);
        if !request.tools.is_empty() {
            prompt.push_str("\nAvailable tools:\n");
            for tool in &request.tools {
                prompt.push_str(&serde_json::to_string_pretty(tool).unwrap_or_default());
                prompt.push('\n');
            }
        }
        prompt
    }

    /// The JSON object between the first `{` and the last `}` of `text`.
    fn extract_json_object(text: &str) -> Option<Value> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end < start {
            return None;
        }
        match serde_json::from_str::<Value>(&text[start..=end]) {
            Ok(value) if value.is_object() => Some(value),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed parsing JSON from generated text");
                None
            }
        }
    }
}

#[async_trait]
impl LLMAdapter for GoogleAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Self::build_prompt(request),
                }],
            }],
        };

        let response = self
            .client
            .post(self.generate_url(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LLMApi(format!("Google request failed: {}", e)))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            if let Ok(error_response) = serde_json::from_str::<GoogleErrorResponse>(&error_text) {
                return Err(AppError::LLMApi(format!(
                    "Google API error ({}): {} (status: {:?})",
                    status, error_response.error.message, error_response.error.status
                )));
            }

            return Err(AppError::LLMApi(format!(
                "Google API error ({}): {}",
                status, error_text
            )));
        }

        let generated: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMApi(format!("Failed to parse Google response: {}", e)))?;

        let text = generated
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| AppError::LLMApi("No response generated from model".to_string()))?;

        if request.tools.is_empty() {
            return Ok(LLMResponse {
                content: text,
                tool_calls: Vec::new(),
            });
        }

        let name = request
            .tools
            .first()
            .and_then(tool_name)
            .unwrap_or(ARTICLE_TOOL);

        // A reply parsed into a tool call carries no separate prose.
        Ok(match Self::extract_json_object(&text) {
            Some(arguments) => LLMResponse {
                content: String::new(),
                tool_calls: vec![ToolCall::new(name, arguments)],
            },
            None => LLMResponse {
                content: text,
                tool_calls: Vec::new(),
            },
        })
    }
}
