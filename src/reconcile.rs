//! Result Reconciler
//!
//! Merges inference output into the job record, writes it back, posts the
//! callback and files the job into its terminal folder.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::CallbackConfig;
use crate::llm::invoker::InferenceOutput;
use crate::queue::folders::{Folder, FolderQueue};
use crate::queue::jobs::Job;
use crate::queue::workers::Outcome;
use crate::types::AppResult;

const STEP_MARKER: &str = "StepType.inference> ";
const DEV_FAILED_SUFFIX: &str = ".FAILED";

/// Boilerplate preamble some models put in front of their answer.
static PREAMBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)summary.*(text|article).*markdown.*facts[:\s]*").expect("valid regex")
});

/// Strip step-trace markers and the boilerplate preamble.
pub fn clean_narrative(text: &str) -> String {
    let text = text.replace(STEP_MARKER, "");
    PREAMBLE_RE.replace_all(&text, "").trim().to_string()
}

/// Attach `output` to `job`. Returns `false` when there was nothing usable.
pub fn merge_output(job: &mut Job, output: &InferenceOutput) -> AppResult<bool> {
    let narrative = output
        .narrative
        .as_deref()
        .map(clean_narrative)
        .filter(|text| !text.is_empty());

    match (&output.structured, narrative) {
        (Some(calls), narrative) => {
            job.set("type", "dict");
            job.set("dict", serde_json::to_value(calls)?);
            if let Some(narrative) = narrative {
                job.set("ai_summary", narrative);
            }
        }
        (None, Some(narrative)) => job.set("result", narrative),
        (None, None) => return Ok(false),
    }

    let secs = (output.elapsed.as_secs_f64() * 100.0).round() / 100.0;
    job.set("at_process_time_secs", secs);
    Ok(true)
}

/// HTTP POST of a job record to its `callback_url`.
pub struct CallbackClient {
    client: Client,
}

impl CallbackClient {
    pub fn new(config: &CallbackConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self { client })
    }

    /// `true` on any 2xx answer; every other status or a network error is a failure.
    pub async fn deliver(&self, url: &str, record: &Map<String, Value>) -> bool {
        match self.client.post(url).json(record).send().await {
            Ok(response) if response.status().is_success() => {
                info!(url = %url, status = %response.status(), "Callback successful");
                true
            }
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Callback rejected");
                false
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to callback");
                false
            }
        }
    }
}

pub struct Reconciler<'a> {
    queue: &'a FolderQueue,
    callback: &'a CallbackClient,
}

impl<'a> Reconciler<'a> {
    pub fn new(queue: &'a FolderQueue, callback: &'a CallbackClient) -> Self {
        Self { queue, callback }
    }

    /// Merge, persist, call back and file a job that went through inference.
    pub async fn reconcile(&self, job: &mut Job, path: &Path, output: &InferenceOutput) -> Outcome {
        let merged = match merge_output(job, output) {
            Ok(merged) => merged,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to merge result");
                return self.discard(path).await;
            }
        };

        if !merged {
            warn!(job_id = %job.id, "No result from inference");
            return self.file(path, Folder::AiCrashed, Outcome::InferenceCrash).await;
        }

        if let Err(e) = job.save(path).await {
            error!(job_id = %job.id, file = %path.display(), error = %e, "Failed to save result to file");
            return self.discard(path).await;
        }

        self.deliver(job, path).await
    }

    /// Post the callback for a saved job and file it by the answer.
    pub async fn deliver(&self, job: &Job, path: &Path) -> Outcome {
        let delivered = self.callback.deliver(&job.callback_url, job.record()).await;

        if job.is_dev() {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.json", job.id));
            let target_name = if delivered {
                file_name
            } else {
                format!("{}{}", file_name, DEV_FAILED_SUFFIX)
            };
            return match self.queue.move_to_named(path, Folder::Dev, &target_name).await {
                Ok(_) => Outcome::DevDelivered { delivered },
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to move dev job");
                    self.discard(path).await
                }
            };
        }

        if delivered {
            self.file(path, Folder::Processed, Outcome::Processed).await
        } else {
            self.file(path, Folder::Failed, Outcome::CallbackFailure).await
        }
    }

    /// Move into `folder` and report `outcome`; a failed move discards the file.
    pub async fn file(&self, path: &Path, folder: Folder, outcome: Outcome) -> Outcome {
        match self.queue.move_to(path, folder).await {
            Ok(_) => outcome,
            Err(e) => {
                error!(file = %path.display(), to = %folder, error = %e, "Failed to move job");
                self.discard(path).await
            }
        }
    }

    /// The job cannot be persisted, so it cannot be kept.
    async fn discard(&self, path: &Path) -> Outcome {
        match fs::remove_file(path).await {
            Ok(()) => warn!(file = %path.display(), "Deleted file due to save error"),
            Err(e) => error!(file = %path.display(), error = %e, "Failed to delete unsavable job file"),
        }
        Outcome::PersistFailure
    }
}
