// One scheduler pass: redeliver a failed callback, then take at most one new job

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{Config, LLMConfig};
use crate::llm::invoker::{InferenceError, InferenceSettings, Invoker};
use crate::llm::provider::LLM;
use crate::queue::folders::{Folder, FolderQueue};
use crate::queue::jobs::{load_job, Job};
use crate::queue::stats::StatsStore;
use crate::reconcile::{CallbackClient, Reconciler};
use crate::types::AppResult;

/// Slack on top of the inference and callback deadlines before a claim
/// in `PROCESSING` counts as abandoned.
const STALE_CLAIM_MARGIN: Duration = Duration::from_secs(60);

/// How a job left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Nothing to do.
    Idle,
    /// Called back and filed in `PROCESSED`.
    Processed,
    /// Dev job, called back (or not) and filed in `DEV_FOLDER`.
    DevDelivered { delivered: bool },
    /// Malformed or missing `id`/`callback_url`; deleted.
    PermanentInvalid,
    /// Failed a policy gate; filed in `REJECTED`.
    PolicyRejected,
    /// Backend missed the deadline; filed in `AI_TIMEOUT`.
    InferenceTimeout,
    /// Backend errored or returned nothing usable; filed in `AI_FAILED`.
    InferenceCrash,
    /// Callback failed; filed in `FAILED` for redelivery.
    CallbackFailure,
    /// Result could not be written or moved; deleted.
    PersistFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    /// Outcome of the failed-callback redelivery, if one was attempted.
    pub redelivery: Option<Outcome>,
    pub job_id: Option<String>,
    pub outcome: Outcome,
}

pub struct Worker {
    queue: FolderQueue,
    invoker: Invoker,
    callback: CallbackClient,
    stats: StatsStore,
    llm_config: LLMConfig,
    allowed_hostnames: HashSet<String>,
    stale_after: Duration,
}

impl Worker {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::new(config, LLM::from_config(&config.llm)?)
    }

    pub fn new(config: &Config, llm: LLM) -> AppResult<Self> {
        let mut allowed_hostnames: HashSet<String> = config
            .queue
            .allowed_hostnames
            .iter()
            .map(|h| h.to_lowercase())
            .collect();
        match hostname::get() {
            Ok(local) => {
                allowed_hostnames.insert(local.to_string_lossy().to_lowercase());
            }
            Err(e) => warn!(error = %e, "Could not read local hostname"),
        }

        Ok(Self {
            queue: FolderQueue::new(&config.queue.data_dir),
            invoker: Invoker::new(llm, config.llm.timeout()),
            callback: CallbackClient::new(&config.callback)?,
            stats: StatsStore::new(&config.queue.stats_file),
            llm_config: config.llm.clone(),
            allowed_hostnames,
            stale_after: config.llm.timeout()
                + Duration::from_secs(config.callback.timeout_secs)
                + STALE_CLAIM_MARGIN,
        })
    }

    pub fn queue(&self) -> &FolderQueue {
        &self.queue
    }

    /// Run one pass. Per-job failures are reported in the [`PassReport`];
    /// only a queue that cannot be set up at all is an error.
    pub async fn run_once(&self) -> AppResult<PassReport> {
        self.queue.ensure_folders().await?;

        match self.queue.recover_stale(self.stale_after).await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Requeued abandoned jobs"),
            Err(e) => error!(error = %e, "Failed to scan processing folder"),
        }

        let redelivery = self.redeliver_failed().await?;

        let Some(claimed) = self
            .queue
            .claim_next(&[Folder::Priority, Folder::Pending])
            .await?
        else {
            info!("No JSON files to process");
            return Ok(PassReport {
                redelivery,
                job_id: None,
                outcome: Outcome::Idle,
            });
        };

        let started = Instant::now();
        let Some(mut job) = load_job(&claimed.path).await else {
            return Ok(PassReport {
                redelivery,
                job_id: None,
                outcome: Outcome::PermanentInvalid,
            });
        };

        info!(job_id = %job.id, file = %claimed.file_name, from = %claimed.source, "File to process");
        let outcome = self.process_job(&mut job, &claimed.path).await;
        info!(job_id = %job.id, outcome = ?outcome, "Job finished");
        self.record_stats(started.elapsed()).await;

        Ok(PassReport {
            redelivery,
            job_id: Some(job.id),
            outcome,
        })
    }

    /// Retry the callback of the oldest failed job. No inference is run.
    async fn redeliver_failed(&self) -> AppResult<Option<Outcome>> {
        let Some(claimed) = self.queue.claim_next(&[Folder::Failed]).await? else {
            return Ok(None);
        };

        let Some(job) = load_job(&claimed.path).await else {
            return Ok(Some(Outcome::PermanentInvalid));
        };

        info!(job_id = %job.id, "Redelivering failed callback");
        let outcome = Reconciler::new(&self.queue, &self.callback)
            .deliver(&job, &claimed.path)
            .await;
        Ok(Some(outcome))
    }

    async fn process_job(&self, job: &mut Job, path: &Path) -> Outcome {
        let reconciler = Reconciler::new(&self.queue, &self.callback);

        if !self.hostname_allowed(job.hostname()) {
            warn!(job_id = %job.id, hostname = ?job.hostname(), "Rejected job for unknown hostname");
            return reconciler
                .file(path, Folder::Rejected, Outcome::PolicyRejected)
                .await;
        }

        let settings = InferenceSettings::for_job(&self.llm_config, job);
        match self.invoker.invoke(job, &settings).await {
            Ok(output) => reconciler.reconcile(job, path, &output).await,
            Err(InferenceError::Timeout(limit)) => {
                error!(job_id = %job.id, limit_secs = limit.as_secs(), "Inference timed out");
                reconciler
                    .file(path, Folder::AiTimeout, Outcome::InferenceTimeout)
                    .await
            }
            Err(InferenceError::Crash(e)) => {
                error!(job_id = %job.id, error = %e, "Failed to contact inference");
                reconciler
                    .file(path, Folder::AiCrashed, Outcome::InferenceCrash)
                    .await
            }
        }
    }

    /// A job without `hostname` passes; one that names a host must name
    /// an allowed one.
    fn hostname_allowed(&self, hostname: Option<&Value>) -> bool {
        match hostname {
            None => true,
            Some(Value::String(name)) if !name.trim().is_empty() => {
                self.allowed_hostnames.contains(&name.trim().to_lowercase())
            }
            Some(_) => false,
        }
    }

    async fn record_stats(&self, elapsed: Duration) {
        if let Err(e) = self.stats.record(elapsed).await {
            error!(file = %self.stats.path().display(), error = %e, "Failed to update stats");
        }
    }
}
