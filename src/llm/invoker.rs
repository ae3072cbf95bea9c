//! Inference Invoker
//!
//! Runs one job against the configured backend under a wall-clock
//! deadline, retries structured extraction once on the fallback model, and
//! normalizes whatever came back into an [`InferenceOutput`].

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::LLMConfig;
use crate::llm::provider::LLM;
use crate::prompt::build_messages;
use crate::prompt::schemas::{
    article_information_tool, portfolio_alert_tool, translation_tool, ALERT_LEVEL_RANGE,
    INTEREST_SCORE_RANGE, SENTIMENT_SCORE_RANGE,
};
use crate::queue::jobs::{Job, JobShape};
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest, LLMResponse, ToolCall};

/// Per-job inference settings: configuration defaults with the job's
/// `model` and `num_ctx` overrides applied.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    pub model: String,
    pub fallback_model: String,
    pub num_ctx: Option<u32>,
    pub system_prompt: String,
    pub alert_pass: bool,
}

impl InferenceSettings {
    pub fn for_job(config: &LLMConfig, job: &Job) -> Self {
        Self {
            model: job.model().unwrap_or(&config.model).to_string(),
            fallback_model: config.fallback_model.clone(),
            num_ctx: job.num_ctx().or(config.num_ctx),
            system_prompt: config.system_prompt.clone(),
            alert_pass: config.alert_pass,
        }
    }

    /// Models to try for structured extraction, primary first.
    fn models(&self) -> Vec<&str> {
        let mut models = vec![self.model.as_str()];
        if !self.fallback_model.is_empty() && self.fallback_model != self.model {
            models.push(self.fallback_model.as_str());
        }
        models
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceOutput {
    /// Tool-call results, primary extraction first.
    pub structured: Option<Vec<ToolCall>>,
    /// Free-text output, not yet cleaned.
    pub narrative: Option<String>,
    /// Model that produced the output.
    pub model: String,
    pub elapsed: Duration,
}

impl InferenceOutput {
    pub fn is_empty(&self) -> bool {
        self.structured.is_none() && self.narrative.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("inference crashed: {0}")]
    Crash(#[from] AppError),
}

pub struct Invoker {
    llm: LLM,
    timeout: Duration,
}

impl Invoker {
    pub fn new(llm: LLM, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Run inference for `job`, bounded by the configured timeout.
    pub async fn invoke(
        &self,
        job: &Job,
        settings: &InferenceSettings,
    ) -> Result<InferenceOutput, InferenceError> {
        let started = Instant::now();
        info!(
            job_id = %job.id,
            provider = self.llm.provider_name(),
            model = %settings.model,
            "Starting inference"
        );

        match tokio::time::timeout(self.timeout, self.run(job, settings)).await {
            Ok(Ok(mut output)) => {
                output.elapsed = started.elapsed();
                info!(
                    job_id = %job.id,
                    model = %output.model,
                    elapsed_secs = output.elapsed.as_secs_f64(),
                    structured = output.structured.is_some(),
                    narrative = output.narrative.is_some(),
                    "Inference finished"
                );
                Ok(output)
            }
            Ok(Err(e)) => Err(InferenceError::Crash(e)),
            Err(_) => Err(InferenceError::Timeout(self.timeout)),
        }
    }

    async fn run(&self, job: &Job, settings: &InferenceSettings) -> AppResult<InferenceOutput> {
        let messages = build_messages(&job.shape, job.system(), &settings.system_prompt);

        match &job.shape {
            JobShape::Raw { tools, .. } => self.raw(messages, tools.clone(), settings).await,
            JobShape::Translation { .. } => self.translate(&job.id, messages, settings).await,
            JobShape::Legacy {
                structured: true, ..
            } => self.extract(&job.id, messages, settings).await,
            JobShape::Legacy {
                structured: false, ..
            } => {
                let response = self.chat(&settings.model, messages, Vec::new(), settings).await?;
                Ok(InferenceOutput {
                    narrative: non_empty(response.content),
                    model: settings.model.clone(),
                    ..Default::default()
                })
            }
        }
    }

    async fn chat(
        &self,
        model: &str,
        messages: Vec<LLMMessage>,
        tools: Vec<Value>,
        settings: &InferenceSettings,
    ) -> AppResult<LLMResponse> {
        let request = LLMRequest::new(model, messages)
            .with_tools(tools)
            .with_num_ctx(settings.num_ctx);
        self.llm.create_chat_completion(&request).await
    }

    /// Send a job's own message list and tool schemas as they are.
    async fn raw(
        &self,
        messages: Vec<LLMMessage>,
        tools: Vec<Value>,
        settings: &InferenceSettings,
    ) -> AppResult<InferenceOutput> {
        let started = Instant::now();
        let response = self.chat(&settings.model, messages, tools, settings).await?;
        let structured = (!response.tool_calls.is_empty())
            .then(|| finalize(response.tool_calls, &settings.model, started.elapsed()));

        Ok(InferenceOutput {
            structured,
            narrative: non_empty(response.content),
            model: settings.model.clone(),
            ..Default::default()
        })
    }

    async fn translate(
        &self,
        job_id: &str,
        messages: Vec<LLMMessage>,
        settings: &InferenceSettings,
    ) -> AppResult<InferenceOutput> {
        let mut last_content = None;

        for model in settings.models() {
            let response = self
                .chat(model, messages.clone(), vec![translation_tool()], settings)
                .await?;
            let translation = response
                .tool_calls
                .iter()
                .find_map(|call| call.function.arguments.get("translation"))
                .and_then(Value::as_str)
                .map(str::to_string);

            if let Some(translation) = translation {
                return Ok(InferenceOutput {
                    narrative: Some(translation),
                    model: model.to_string(),
                    ..Default::default()
                });
            }
            warn!(job_id = %job_id, model = %model, "No translation returned");
            last_content = non_empty(response.content).or(last_content);
        }

        Ok(InferenceOutput {
            narrative: last_content,
            model: settings.model.clone(),
            ..Default::default()
        })
    }

    /// Structured extraction plus the optional alert pass.
    async fn extract(
        &self,
        job_id: &str,
        messages: Vec<LLMMessage>,
        settings: &InferenceSettings,
    ) -> AppResult<InferenceOutput> {
        let started = Instant::now();
        let mut last_content = None;

        for model in settings.models() {
            let response = self
                .chat(model, messages.clone(), vec![article_information_tool()], settings)
                .await?;

            if response.tool_calls.is_empty() {
                warn!(job_id = %job_id, model = %model, "Failed loading JSON from result");
                last_content = non_empty(response.content).or(last_content);
                continue;
            }

            let mut calls = response.tool_calls;
            if settings.alert_pass {
                match self
                    .chat(model, messages.clone(), vec![portfolio_alert_tool()], settings)
                    .await
                {
                    Ok(alert) => calls.extend(alert.tool_calls),
                    Err(e) => warn!(job_id = %job_id, error = %e, "Alert pass failed"),
                }
            }

            return Ok(InferenceOutput {
                structured: Some(finalize(calls, model, started.elapsed())),
                narrative: non_empty(response.content),
                model: model.to_string(),
                ..Default::default()
            });
        }

        Ok(InferenceOutput {
            narrative: last_content,
            model: settings.model.clone(),
            ..Default::default()
        })
    }
}

fn non_empty(text: String) -> Option<String> {
    (!text.trim().is_empty()).then_some(text)
}

/// Clamp known numeric fields and stamp provenance on the first call.
fn finalize(mut calls: Vec<ToolCall>, model: &str, elapsed: Duration) -> Vec<ToolCall> {
    for call in &mut calls {
        if let Value::Object(arguments) = &mut call.function.arguments {
            clamp_field(arguments, "sentiment_score", SENTIMENT_SCORE_RANGE);
            clamp_field(arguments, "interest_score", INTEREST_SCORE_RANGE);
            clamp_field(arguments, "defcon_level", ALERT_LEVEL_RANGE);
        }
    }

    if let Some(Value::Object(arguments)) = calls.first_mut().map(|c| &mut c.function.arguments) {
        arguments.insert("model".to_string(), Value::from(model));
        let process_time = (elapsed.as_secs_f64() * 100.0).round() / 100.0;
        arguments.insert("process_time".to_string(), Value::from(process_time));
    }

    calls
}

/// Numbers are clamped into `[lo, hi]`; anything else is left untouched.
fn clamp_field(arguments: &mut Map<String, Value>, key: &str, (lo, hi): (i64, i64)) {
    let Some(value) = arguments.get_mut(key) else {
        return;
    };
    if let Some(n) = value.as_i64() {
        *value = Value::from(n.clamp(lo, hi));
    } else if let Some(n) = value.as_f64() {
        *value = Value::from(n.clamp(lo as f64, hi as f64));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::provider::LLMAdapter;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// What a scripted backend does on one call.
    #[derive(Clone)]
    pub(crate) enum Step {
        Reply(LLMResponse),
        Fail(String),
        Hang,
    }

    /// Backend that replays a fixed script and records every request.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedAdapter {
        steps: Arc<Mutex<VecDeque<Step>>>,
        pub(crate) requests: Arc<Mutex<Vec<LLMRequest>>>,
    }

    impl ScriptedAdapter {
        pub(crate) fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Arc::new(Mutex::new(steps.into())),
                requests: Arc::default(),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LLMAdapter for ScriptedAdapter {
        async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(response)) => Ok(response),
                Some(Step::Fail(message)) => Err(AppError::LLMApi(message)),
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(LLMResponse::default())
                }
                None => Err(AppError::LLMApi("script exhausted".to_string())),
            }
        }
    }

    pub(crate) fn text(content: &str) -> Step {
        Step::Reply(LLMResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
        })
    }

    pub(crate) fn tool(name: &str, arguments: Value) -> Step {
        Step::Reply(LLMResponse {
            content: String::new(),
            tool_calls: vec![ToolCall::new(name, arguments)],
        })
    }

    fn settings() -> InferenceSettings {
        InferenceSettings {
            model: "primary".to_string(),
            fallback_model: "fallback".to_string(),
            num_ctx: Some(1024),
            system_prompt: "persona".to_string(),
            alert_pass: true,
        }
    }

    fn invoker(adapter: &ScriptedAdapter, timeout: Duration) -> Invoker {
        Invoker::new(LLM::with_adapter("scripted", Box::new(adapter.clone())), timeout)
    }

    fn job(value: Value) -> Job {
        Job::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_plain_message_is_narrative() {
        let adapter = ScriptedAdapter::new(vec![text("hello back")]);
        let output = invoker(&adapter, Duration::from_secs(5))
            .invoke(&job(json!({"id": "1", "callback_url": "http://x/cb", "message": "hi"})), &settings())
            .await
            .unwrap();

        assert_eq!(output.narrative.as_deref(), Some("hello back"));
        assert!(output.structured.is_none());
        let requests = adapter.requests.lock().unwrap();
        assert!(requests[0].tools.is_empty());
        assert_eq!(requests[0].num_ctx, Some(1024));
    }

    #[tokio::test]
    async fn test_structured_merges_alert_after_primary() {
        let adapter = ScriptedAdapter::new(vec![
            tool("set_article_information", json!({"title": "t", "sentiment_score": 42, "interest_score": -3})),
            tool("send_portfolio_alert", json!({"defcon_level": 9, "defcon_outcome": "positive"})),
        ]);
        let output = invoker(&adapter, Duration::from_secs(5))
            .invoke(&job(json!({"id": "1", "callback_url": "http://x/cb", "article": "a"})), &settings())
            .await
            .unwrap();

        let calls = output.structured.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "set_article_information");
        assert_eq!(calls[0].function.arguments["sentiment_score"], json!(10));
        assert_eq!(calls[0].function.arguments["interest_score"], json!(0));
        assert_eq!(calls[0].function.arguments["model"], json!("primary"));
        assert!(calls[0].function.arguments.get("process_time").is_some());
        assert_eq!(calls[1].function.name, "send_portfolio_alert");
        assert_eq!(calls[1].function.arguments["defcon_level"], json!(5));
    }

    #[tokio::test]
    async fn test_falls_back_once_to_second_model() {
        let adapter = ScriptedAdapter::new(vec![
            text("I am too lazy for tools"),
            tool("set_article_information", json!({"title": "t"})),
            tool("send_portfolio_alert", json!({"defcon_level": 3})),
        ]);
        let output = invoker(&adapter, Duration::from_secs(5))
            .invoke(&job(json!({"id": "1", "callback_url": "http://x/cb", "article": "a"})), &settings())
            .await
            .unwrap();

        assert_eq!(output.model, "fallback");
        assert_eq!(output.structured.unwrap()[0].function.arguments["model"], json!("fallback"));
        let models: Vec<String> = adapter.requests.lock().unwrap().iter().map(|r| r.model.clone()).collect();
        assert_eq!(models, vec!["primary", "fallback", "fallback"]);
    }

    #[tokio::test]
    async fn test_no_structured_result_after_fallback() {
        let adapter = ScriptedAdapter::new(vec![text(""), text("")]);
        let output = invoker(&adapter, Duration::from_secs(5))
            .invoke(&job(json!({"id": "1", "callback_url": "http://x/cb", "article": "a"})), &settings())
            .await
            .unwrap();

        assert!(output.is_empty());
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn test_alert_pass_failure_keeps_primary() {
        let adapter = ScriptedAdapter::new(vec![
            tool("set_article_information", json!({"title": "t"})),
            Step::Fail("boom".to_string()),
        ]);
        let output = invoker(&adapter, Duration::from_secs(5))
            .invoke(&job(json!({"id": "1", "callback_url": "http://x/cb", "article": "a"})), &settings())
            .await
            .unwrap();

        assert_eq!(output.structured.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_error_is_crash() {
        let adapter = ScriptedAdapter::new(vec![Step::Fail("connection refused".to_string())]);
        let err = invoker(&adapter, Duration::from_secs(5))
            .invoke(&job(json!({"id": "1", "callback_url": "http://x/cb", "message": "hi"})), &settings())
            .await
            .unwrap_err();

        assert!(matches!(err, InferenceError::Crash(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_distinct() {
        let adapter = ScriptedAdapter::new(vec![Step::Hang]);
        let err = invoker(&adapter, Duration::from_millis(50))
            .invoke(&job(json!({"id": "1", "callback_url": "http://x/cb", "message": "hi"})), &settings())
            .await
            .unwrap_err();

        assert!(matches!(err, InferenceError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_raw_mode_passes_messages_and_tools() {
        let adapter = ScriptedAdapter::new(vec![tool("custom", json!({"k": "v"}))]);
        let raw_job = job(json!({
            "id": "1",
            "callback_url": "http://x/cb",
            "type": "raw_llama",
            "raw_messages": [{"role": "system", "content": "s"}, {"role": "user", "content": "u"}],
            "raw_tools": [{"type": "function", "function": {"name": "custom"}}]
        }));
        let output = invoker(&adapter, Duration::from_secs(5))
            .invoke(&raw_job, &settings())
            .await
            .unwrap();

        assert_eq!(output.structured.unwrap()[0].function.name, "custom");
        let requests = adapter.requests.lock().unwrap();
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_translation() {
        let adapter = ScriptedAdapter::new(vec![tool("set_translation", json!({"translation": "hello", "editor_comments": ""}))]);
        let output = invoker(&adapter, Duration::from_secs(5))
            .invoke(
                &job(json!({"id": "1", "callback_url": "http://x/cb", "type": "translation", "prompt": "hola"})),
                &settings(),
            )
            .await
            .unwrap();

        assert_eq!(output.narrative.as_deref(), Some("hello"));
    }

    #[test]
    fn test_job_overrides_settings() {
        let config = crate::config::Config::from_lookup(|_| None).unwrap().llm;
        let job = job(json!({"id": "1", "callback_url": "http://x/cb", "message": "hi", "model": "mistral", "num_ctx": 8192}));
        let settings = InferenceSettings::for_job(&config, &job);

        assert_eq!(settings.model, "mistral");
        assert_eq!(settings.num_ctx, Some(8192));
        assert_eq!(settings.models(), vec!["mistral", "llama3.2"]);
    }

    #[test]
    fn test_clamp_leaves_non_numbers() {
        let mut arguments = json!({"sentiment_score": "very", "interest_score": 4.5}).as_object().unwrap().clone();
        clamp_field(&mut arguments, "sentiment_score", SENTIMENT_SCORE_RANGE);
        clamp_field(&mut arguments, "interest_score", INTEREST_SCORE_RANGE);

        assert_eq!(arguments["sentiment_score"], json!("very"));
        assert_eq!(arguments["interest_score"], json!(4.5));
    }
}
