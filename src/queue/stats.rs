// Cumulative processing statistics, persisted as a small JSON file

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::types::AppResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub files_processed: u64,
    pub total_time: f64,
    pub average_time: f64,
}

impl Stats {
    pub fn record(&mut self, elapsed: Duration) {
        self.files_processed += 1;
        self.total_time += elapsed.as_secs_f64();
        self.average_time = self.total_time / self.files_processed as f64;
    }
}

pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current stats. A missing file reads as zero; a corrupted
    /// one is deleted and also reads as zero.
    pub async fn load(&self) -> AppResult<Stats> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Stats::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(stats) => Ok(stats),
            Err(e) => {
                warn!(file = %self.path.display(), error = %e, "Corrupted stats file, resetting");
                fs::remove_file(&self.path).await?;
                Ok(Stats::default())
            }
        }
    }

    /// Add one pass of `elapsed` wall time and persist.
    pub async fn record(&self, elapsed: Duration) -> AppResult<Stats> {
        let mut stats = self.load().await?;
        stats.record(elapsed);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&stats)?).await?;

        info!(
            files_processed = stats.files_processed,
            average_time = stats.average_time,
            "Updated stats"
        );
        Ok(stats)
    }
}
