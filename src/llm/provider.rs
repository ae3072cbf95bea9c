use async_trait::async_trait;
use crate::config::{BackendKind, LLMConfig};
use crate::types::{LLMRequest, LLMResponse, AppResult};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

pub struct LLM {
    adapter: Box<dyn LLMAdapter>,
    provider_name: String,
}

impl LLM {
    /// Pick the backend named by the configuration.
    pub fn from_config(config: &LLMConfig) -> AppResult<Self> {
        let llm = match config.backend {
            BackendKind::Ollama => Self::with_adapter(
                "ollama",
                Box::new(crate::llm::ollama::OllamaAdapter::new(&config.ollama_url)?),
            ),
            BackendKind::Google => Self::with_adapter(
                "google",
                Box::new(crate::llm::google::GoogleAdapter::new(
                    &config.google_api_url,
                    &config.google_api_key,
                )?),
            ),
        };
        Ok(llm)
    }

    pub fn with_adapter(provider_name: impl Into<String>, adapter: Box<dyn LLMAdapter>) -> Self {
        Self {
            adapter,
            provider_name: provider_name.into(),
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }
}
