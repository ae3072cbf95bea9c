//! Folder Queue
//!
//! Job state is the folder a job file sits in. Selection orders candidates
//! per folder policy and claims one by renaming it into `PROCESSING`; the
//! rename is the lock, so two workers can never both own the same file.

use std::cmp::Ordering;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::types::AppResult;

const JOB_EXTENSION: &str = ".json";

/// Lifecycle roles of the queue, one directory each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Folder {
    Pending,
    Priority,
    Processing,
    Processed,
    Failed,
    AiCrashed,
    AiTimeout,
    Rejected,
    Dev,
}

impl Folder {
    pub const ALL: [Folder; 9] = [
        Folder::Pending,
        Folder::Priority,
        Folder::Processing,
        Folder::Processed,
        Folder::Failed,
        Folder::AiCrashed,
        Folder::AiTimeout,
        Folder::Rejected,
        Folder::Dev,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            Folder::Pending => "JSON_TO_PROCESS",
            Folder::Priority => "JSON_TO_PROCESS_PRIORITY",
            Folder::Processing => "PROCESSING",
            Folder::Processed => "PROCESSED",
            Folder::Failed => "FAILED",
            Folder::AiCrashed => "AI_FAILED",
            Folder::AiTimeout => "AI_TIMEOUT",
            Folder::Rejected => "REJECTED",
            Folder::Dev => "DEV_FOLDER",
        }
    }

    fn ordering(self) -> SelectionOrder {
        match self {
            Folder::Pending => SelectionOrder::FirstCharThenOldest,
            _ => SelectionOrder::Oldest,
        }
    }
}

impl std::fmt::Display for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectionOrder {
    /// Ascending queue time.
    Oldest,
    /// Ascending first byte of the file name, then ascending queue time.
    FirstCharThenOldest,
}

/// A job file seen during a directory scan.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub path: PathBuf,
    pub file_name: String,
    /// Modification time. Producers write a job once and rename keeps it,
    /// so this is when the job was queued. A claim restamps it, so in
    /// `PROCESSING` it is when the job was claimed.
    pub queued_at: SystemTime,
}

impl QueueEntry {
    fn first_byte(&self) -> u8 {
        self.file_name.as_bytes().first().copied().unwrap_or(0)
    }

    fn age_cmp(&self, other: &Self) -> Ordering {
        self.queued_at
            .cmp(&other.queued_at)
            .then_with(|| self.file_name.cmp(&other.file_name))
    }
}

fn sort_entries(entries: &mut [QueueEntry], order: SelectionOrder) {
    match order {
        SelectionOrder::Oldest => entries.sort_by(QueueEntry::age_cmp),
        SelectionOrder::FirstCharThenOldest => entries.sort_by(|a, b| {
            a.first_byte()
                .cmp(&b.first_byte())
                .then_with(|| a.age_cmp(b))
        }),
    }
}

/// A job file that this worker now owns, sitting in `PROCESSING`.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub source: Folder,
    pub path: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct FolderQueue {
    root: PathBuf,
}

impl FolderQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, folder: Folder) -> PathBuf {
        self.root.join(folder.dir_name())
    }

    /// Create every queue folder that does not exist yet.
    pub async fn ensure_folders(&self) -> AppResult<()> {
        for folder in Folder::ALL {
            fs::create_dir_all(self.path(folder)).await?;
        }
        debug!(root = %self.root.display(), "Queue folders ready");
        Ok(())
    }

    /// All job files in `folder`, in the order they would be selected.
    pub async fn candidates(&self, folder: Folder) -> AppResult<Vec<QueueEntry>> {
        let dir = self.path(folder);
        let mut entries = Vec::new();

        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.ends_with(JOB_EXTENSION) {
                continue;
            }

            // Files can disappear between listing and stat when another worker claims them.
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            entries.push(QueueEntry {
                path: entry.path(),
                file_name,
                queued_at: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        sort_entries(&mut entries, folder.ordering());
        Ok(entries)
    }

    /// Claim the first available job, trying `folders` in order.
    ///
    /// Candidates that vanish before the rename were claimed by someone
    /// else and are skipped. Candidates that fail to move for any other
    /// reason stay where they are.
    pub async fn claim_next(&self, folders: &[Folder]) -> AppResult<Option<ClaimedJob>> {
        let processing = self.path(Folder::Processing);

        for &folder in folders {
            for entry in self.candidates(folder).await? {
                let target = processing.join(&entry.file_name);
                match fs::rename(&entry.path, &target).await {
                    Ok(()) => {
                        info!(file = %entry.file_name, from = %folder, "Claimed job");
                        if let Err(e) = stamp_now(&target).await {
                            warn!(file = %entry.file_name, error = %e, "Could not stamp claim time");
                        }
                        return Ok(Some(ClaimedJob {
                            source: folder,
                            path: target,
                            file_name: entry.file_name,
                        }));
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        debug!(file = %entry.file_name, "Job already claimed by another worker");
                    }
                    Err(e) => {
                        warn!(file = %entry.file_name, from = %folder, error = %e, "Could not claim job, leaving it in place");
                    }
                }
            }
        }

        Ok(None)
    }

    /// Return jobs claimed more than `max_age` ago to `JSON_TO_PROCESS`.
    ///
    /// A worker that dies mid-pass leaves its job in `PROCESSING`; once
    /// the claim is older than any live pass can run, the job is queued
    /// again.
    pub async fn recover_stale(&self, max_age: Duration) -> AppResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let pending = self.path(Folder::Pending);
        let mut recovered = 0;

        for entry in self.candidates(Folder::Processing).await? {
            if entry.queued_at >= cutoff {
                continue;
            }
            match fs::rename(&entry.path, pending.join(&entry.file_name)).await {
                Ok(()) => {
                    warn!(file = %entry.file_name, "Requeued job abandoned in processing");
                    recovered += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(file = %entry.file_name, error = %e, "Could not requeue abandoned job");
                }
            }
        }

        Ok(recovered)
    }

    /// Move a job file into `folder`, keeping its name.
    pub async fn move_to(&self, path: &Path, folder: Folder) -> AppResult<PathBuf> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.move_to_named(path, folder, &file_name).await
    }

    /// Move a job file into `folder` under `file_name`. An existing file
    /// with the same name is replaced.
    pub async fn move_to_named(
        &self,
        path: &Path,
        folder: Folder,
        file_name: &str,
    ) -> AppResult<PathBuf> {
        let target = self.path(folder).join(file_name);
        fs::rename(path, &target).await?;
        info!(file = %file_name, to = %folder, "Moved job");
        Ok(target)
    }

    /// Number of job files in `folder`.
    pub async fn count(&self, folder: Folder) -> AppResult<usize> {
        Ok(self.candidates(folder).await?.len())
    }

    /// Delete job files in `folder` queued more than `max_age` ago.
    pub async fn remove_older_than(&self, folder: Folder, max_age: Duration) -> AppResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        for entry in self.candidates(folder).await? {
            if entry.queued_at >= cutoff {
                continue;
            }
            match fs::remove_file(&entry.path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed > 0 {
            info!(folder = %folder, removed, "Invalidated stale jobs");
        }
        Ok(removed)
    }
}

async fn stamp_now(path: &Path) -> std::io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    file.into_std().await.set_modified(SystemTime::now())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Write a job file and pin its queue time to `secs_ago` seconds in the past.
    pub(crate) fn write_job_at(dir: &Path, name: &str, body: &str, secs_ago: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        let when = SystemTime::now() - Duration::from_secs(secs_ago);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(when)
            .unwrap();
        path
    }

    async fn queue() -> (TempDir, FolderQueue) {
        let temp_dir = TempDir::new().unwrap();
        let queue = FolderQueue::new(temp_dir.path());
        queue.ensure_folders().await.unwrap();
        (temp_dir, queue)
    }

    #[tokio::test]
    async fn test_ensure_folders_is_idempotent() {
        let (_dir, queue) = queue().await;
        queue.ensure_folders().await.unwrap();

        for folder in Folder::ALL {
            assert!(queue.path(folder).is_dir(), "{} missing", folder);
        }
    }

    #[tokio::test]
    async fn test_pending_orders_by_first_char_before_age() {
        let (_dir, queue) = queue().await;
        let pending = queue.path(Folder::Pending);
        write_job_at(&pending, "B_y.json", "{}", 100);
        write_job_at(&pending, "A_x.json", "{}", 10);
        write_job_at(&pending, "A_w.json", "{}", 50);

        let names: Vec<String> = queue
            .candidates(Folder::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();

        assert_eq!(names, vec!["A_w.json", "A_x.json", "B_y.json"]);
    }

    #[tokio::test]
    async fn test_priority_orders_by_age_only() {
        let (_dir, queue) = queue().await;
        let priority = queue.path(Folder::Priority);
        write_job_at(&priority, "A.json", "{}", 10);
        write_job_at(&priority, "Z.json", "{}", 100);

        let entries = queue.candidates(Folder::Priority).await.unwrap();
        assert_eq!(entries[0].file_name, "Z.json");
    }

    #[tokio::test]
    async fn test_non_json_files_are_ignored() {
        let (_dir, queue) = queue().await;
        let pending = queue.path(Folder::Pending);
        write_job_at(&pending, "job.json.FAILED", "{}", 10);
        write_job_at(&pending, "notes.txt", "", 10);

        assert_eq!(queue.count(Folder::Pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_moves_into_processing() {
        let (_dir, queue) = queue().await;
        write_job_at(&queue.path(Folder::Pending), "1_data.json", "{}", 10);

        let claimed = queue
            .claim_next(&[Folder::Priority, Folder::Pending])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(claimed.source, Folder::Pending);
        assert_eq!(claimed.path, queue.path(Folder::Processing).join("1_data.json"));
        assert!(claimed.path.exists());
        assert_eq!(queue.count(Folder::Pending).await.unwrap(), 0);

        let processing = queue.candidates(Folder::Processing).await.unwrap();
        let claim_age = SystemTime::now().duration_since(processing[0].queued_at).unwrap_or_default();
        assert!(claim_age < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_recover_stale_requeues_old_claims_only() {
        let (_dir, queue) = queue().await;
        let processing = queue.path(Folder::Processing);
        write_job_at(&processing, "abandoned.json", "{}", 7200);
        write_job_at(&processing, "running.json", "{}", 30);

        let recovered = queue.recover_stale(Duration::from_secs(600)).await.unwrap();

        assert_eq!(recovered, 1);
        assert!(queue.path(Folder::Pending).join("abandoned.json").exists());
        assert!(processing.join("running.json").exists());
    }

    #[tokio::test]
    async fn test_claim_prefers_earlier_folders() {
        let (_dir, queue) = queue().await;
        write_job_at(&queue.path(Folder::Pending), "A.json", "{}", 100);
        write_job_at(&queue.path(Folder::Priority), "Z.json", "{}", 1);

        let claimed = queue
            .claim_next(&[Folder::Priority, Folder::Pending])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(claimed.source, Folder::Priority);
        assert_eq!(claimed.file_name, "Z.json");
    }

    #[tokio::test]
    async fn test_claim_on_empty_queue_is_none() {
        let (_dir, queue) = queue().await;
        let claimed = queue.claim_next(&[Folder::Pending]).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_share_a_file() {
        let (_dir, queue) = queue().await;
        write_job_at(&queue.path(Folder::Pending), "only.json", "{}", 10);

        let (a, b) = tokio::join!(
            queue.claim_next(&[Folder::Pending]),
            queue.claim_next(&[Folder::Pending])
        );
        let winners = [a.unwrap(), b.unwrap()].iter().filter(|c| c.is_some()).count();

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_remove_older_than() {
        let (_dir, queue) = queue().await;
        let pending = queue.path(Folder::Pending);
        write_job_at(&pending, "old.json", "{}", 7200);
        write_job_at(&pending, "new.json", "{}", 60);

        let removed = queue
            .remove_older_than(Folder::Pending, Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(pending.join("new.json").exists());
        assert!(!pending.join("old.json").exists());
    }
}
