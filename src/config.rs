use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::prompt::DEFAULT_SYSTEM_PROMPT;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub llm: LLMConfig,
    pub callback: CallbackConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub data_dir: PathBuf,
    pub stats_file: PathBuf,
    /// Hostnames a job may name in its `hostname` field, on top of the local one.
    pub allowed_hostnames: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BackendKind {
    /// Local chat-completion runtime (Ollama)
    Ollama,
    /// Cloud generative text service (Gemini / Vertex AI)
    Google,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" | "local" | "llama" => Ok(BackendKind::Ollama),
            "google" | "vertexai" | "gemini" | "cloud" => Ok(BackendKind::Google),
            other => Err(anyhow::anyhow!("Unsupported LLM backend: {}", other)),
        }
    }
}

impl BackendKind {
    /// Primary and fallback model names used when none are configured.
    pub fn default_models(self) -> (&'static str, &'static str) {
        match self {
            BackendKind::Ollama => ("llama3.1", "llama3.2"),
            BackendKind::Google => ("gemini-1.5-flash", "gemini-1.5-pro"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub backend: BackendKind,
    pub ollama_url: String,
    pub google_api_url: String,
    pub google_api_key: String,
    pub model: String,
    pub fallback_model: String,
    pub num_ctx: Option<u32>,
    pub timeout_secs: u64,
    pub system_prompt: String,
    pub alert_pass: bool,
}

impl LLMConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackConfig {
    pub timeout_secs: u64,
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let data_dir = PathBuf::from(var("DATA_DIR", "./DATA"));
        let stats_file = lookup("STATS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("stats.json"));

        let num_ctx: u32 = var("NUM_CTX", "65536").parse()?;
        let backend: BackendKind = var("LLM_BACKEND", "ollama").parse()?;
        let (default_model, default_fallback) = backend.default_models();

        Ok(Self {
            server: ServerConfig {
                port: var("PORT", "5000").parse()?,
                host: var("HOST", "0.0.0.0"),
            },
            queue: QueueConfig {
                data_dir,
                stats_file,
                allowed_hostnames: var("ALLOWED_HOSTNAMES", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            llm: LLMConfig {
                backend,
                ollama_url: var("OLLAMA_URL", "http://localhost:11434"),
                google_api_url: var(
                    "GOOGLE_API_URL",
                    "https://generativelanguage.googleapis.com",
                ),
                google_api_key: var("GOOGLE_API_KEY", ""),
                model: var("LLM_MODEL", default_model),
                fallback_model: var("LLM_FALLBACK_MODEL", default_fallback),
                num_ctx: (num_ctx > 0).then_some(num_ctx),
                timeout_secs: var("INFERENCE_TIMEOUT_SECS", "180").parse()?,
                system_prompt: var("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
                alert_pass: var("ALERT_PASS", "true").parse()?,
            },
            callback: CallbackConfig {
                timeout_secs: var("CALLBACK_TIMEOUT_SECS", "30").parse()?,
                accept_invalid_certs: var("CALLBACK_ACCEPT_INVALID_CERTS", "true").parse()?,
            },
            logging: LoggingConfig {
                log_dir: lookup("LOG_DIR").map(PathBuf::from),
            },
        })
    }

    /// Defaults rooted at `data_dir`, independent of the environment.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let mut config = Self::from_lookup(|_| None)?;
        config.queue.stats_file = data_dir.join("stats.json");
        config.queue.data_dir = data_dir;
        Ok(config)
    }
}
