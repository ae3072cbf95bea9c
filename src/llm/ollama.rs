// Ollama adapter for the local chat-completion runtime
// API Reference: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion

use crate::llm::provider::LLMAdapter;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest, LLMResponse, ToolCall};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub struct OllamaAdapter {
    client: Client,
    base_url: String,
}

// Request types for the Ollama chat API
#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [LLMMessage],
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    tools: &'a [Value],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_ctx: u32,
}

// Response types for the Ollama chat API
#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct OllamaErrorResponse {
    error: String,
}

impl OllamaAdapter {
    pub fn new(base_url: &str) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl LLMAdapter for OllamaAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let body = OllamaChatRequest {
            model: &request.model,
            messages: &request.messages,
            tools: &request.tools,
            stream: false,
            options: request.num_ctx.map(|num_ctx| OllamaOptions { num_ctx }),
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LLMApi(format!("Ollama request failed: {}", e)))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            if let Ok(error_response) = serde_json::from_str::<OllamaErrorResponse>(&error_text) {
                return Err(AppError::LLMApi(format!(
                    "Ollama API error ({}): {}",
                    status, error_response.error
                )));
            }

            return Err(AppError::LLMApi(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let chat: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMApi(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(LLMResponse {
            content: chat.message.content,
            tool_calls: chat.message.tool_calls,
        })
    }
}
