//! Job records and the job loader
//!
//! A job file is a JSON object. Only `id` and `callback_url` are required;
//! every other field, known or not, is carried through to the callback.
//! The content payload is resolved once, at load time, into a [`JobShape`].

use std::path::Path;

use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, error, warn};

use crate::types::{AppError, AppResult, LLMMessage};

/// User text used when an article arrives without an explicit prompt.
pub const ARTICLE_INSTRUCTION: &str = "Set all the information about the text provided.";

/// What the job asks the backend to do.
#[derive(Debug, Clone, PartialEq)]
pub enum JobShape {
    /// A precomputed message list, sent verbatim, with optional tool schemas.
    Raw {
        messages: Vec<LLMMessage>,
        tools: Vec<Value>,
    },
    /// Translate `text` through the translation tool.
    Translation { text: String },
    /// Assistant context plus user text, with or without structured extraction.
    Legacy {
        assistant: String,
        user: String,
        structured: bool,
    },
}

impl JobShape {
    /// Resolve the payload of a job record.
    ///
    /// Precedence: `raw_messages`, then translation, then `user_prompt`,
    /// then article/prompt combinations, then a bare `message`.
    pub fn resolve(record: &Map<String, Value>) -> AppResult<Self> {
        let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);
        let job_type = record.get("type").and_then(Value::as_str).unwrap_or_default();

        if let Some(raw) = record.get("raw_messages") {
            let messages: Vec<LLMMessage> = serde_json::from_value(raw.clone())
                .map_err(|e| AppError::InvalidJob(format!("raw_messages: {}", e)))?;
            let tools = record
                .get("raw_tools")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            return Ok(JobShape::Raw { messages, tools });
        }

        let prompt = text("prompt");
        let assistant = text("assistant").or_else(|| text("article"));

        if job_type == "translation" {
            if let Some(prompt) = prompt {
                return Ok(JobShape::Translation { text: prompt });
            }
        }

        if job_type == "user_prompt" {
            if let Some(prompt) = prompt {
                return Ok(JobShape::Legacy {
                    assistant: assistant.unwrap_or_default(),
                    user: prompt,
                    structured: false,
                });
            }
        }

        match (assistant, prompt) {
            (Some(assistant), Some(prompt)) => Ok(JobShape::Legacy {
                assistant,
                user: prompt,
                structured: true,
            }),
            (Some(assistant), None) => Ok(JobShape::Legacy {
                assistant,
                user: ARTICLE_INSTRUCTION.to_string(),
                structured: true,
            }),
            (None, Some(prompt)) => Ok(JobShape::Legacy {
                assistant: String::new(),
                user: prompt,
                structured: true,
            }),
            (None, None) => match text("message") {
                Some(message) => Ok(JobShape::Legacy {
                    assistant: String::new(),
                    user: message,
                    structured: false,
                }),
                None => Err(AppError::InvalidJob(
                    "no prompt, article, message or raw_messages".to_string(),
                )),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub callback_url: String,
    pub shape: JobShape,
    record: Map<String, Value>,
}

impl Job {
    pub fn from_value(value: Value) -> AppResult<Self> {
        let Value::Object(record) = value else {
            return Err(AppError::InvalidJob("job is not a JSON object".to_string()));
        };

        let id = match record.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(AppError::InvalidJob("missing id".to_string())),
        };
        let callback_url = match record.get("callback_url") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => return Err(AppError::InvalidJob("missing callback_url".to_string())),
        };
        let shape = JobShape::resolve(&record)?;

        Ok(Self {
            id,
            callback_url,
            shape,
            record,
        })
    }

    pub fn from_json(content: &str) -> AppResult<Self> {
        Self::from_value(serde_json::from_str(content)?)
    }

    pub fn record(&self) -> &Map<String, Value> {
        &self.record
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.record.insert(key.to_string(), value.into());
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.record.get(key).and_then(Value::as_str)
    }

    pub fn model(&self) -> Option<&str> {
        self.get_str("model").filter(|m| !m.is_empty())
    }

    pub fn num_ctx(&self) -> Option<u32> {
        self.record
            .get("num_ctx")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }

    /// The job's own system prompt, if it supplies one.
    pub fn system(&self) -> Option<&str> {
        self.get_str("system").filter(|s| !s.is_empty())
    }

    pub fn hostname(&self) -> Option<&Value> {
        self.record.get("hostname")
    }

    pub fn is_dev(&self) -> bool {
        self.record.contains_key("dev")
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(&self.record)?)
    }

    /// Write the record back to `path`.
    pub async fn save(&self, path: &Path) -> AppResult<()> {
        fs::write(path, self.to_json()?).await?;
        Ok(())
    }
}

/// Load and validate a claimed job file.
///
/// Anything that cannot become a [`Job`] is permanently invalid: the file
/// is deleted and `None` returned. No error escapes.
pub async fn load_job(path: &Path) -> Option<Job> {
    let parsed = match fs::read_to_string(path).await {
        Ok(content) => Job::from_json(&content),
        Err(e) => Err(AppError::Io(e)),
    };

    match parsed {
        Ok(job) => {
            debug!(job_id = %job.id, file = %path.display(), "Loaded job");
            Some(job)
        }
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Invalid job file, deleting");
            if let Err(remove_err) = fs::remove_file(path).await {
                error!(file = %path.display(), error = %remove_err, "Failed to delete invalid job file");
            }
            None
        }
    }
}
