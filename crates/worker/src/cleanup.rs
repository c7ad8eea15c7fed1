//! Removal of per-job transient files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::queue::Inbox;

/// Directories under the work dir that hold per-job files.
pub const TRANSIENT_DIRS: [&str; 3] = ["images", "output", "output_npy"];

/// Single consumer of finished job ids.
pub struct CleanupStage {
    work_dir: PathBuf,
    max_age: Duration,
}

impl CleanupStage {
    pub fn new(work_dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            work_dir: work_dir.into(),
            max_age,
        }
    }

    pub async fn run(self, inbox: Inbox<String>) {
        tracing::info!(work_dir = %self.work_dir.display(), "Cleanup stage started");
        while let Some(job_id) = inbox.recv().await {
            let removed = sweep(&self.work_dir, &job_id, Some(self.max_age)).await;
            tracing::debug!(job_id = %job_id, removed, "Transient files removed");
        }
        tracing::info!("Cleanup stage stopped");
    }
}

/// Remove every file in the transient directories whose name contains
/// `job_id` or, when `max_age` is set, whose modification time is older
/// than it. Returns the number of files removed. Failures are ignored.
pub async fn sweep(work_dir: &Path, job_id: &str, max_age: Option<Duration>) -> usize {
    let mut removed = 0;
    for dir in TRANSIENT_DIRS {
        let Ok(mut entries) = tokio::fs::read_dir(work_dir.join(dir)).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let matches_job = entry.file_name().to_string_lossy().contains(job_id);
            let expired = max_age.is_some_and(|max_age| {
                metadata
                    .modified()
                    .ok()
                    .and_then(|modified| modified.elapsed().ok())
                    .is_some_and(|age| age > max_age)
            });

            if matches_job || expired {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    // Another worker sharing the directory may have got there first.
                    Err(e) => tracing::debug!(path = %entry.path().display(), error = %e, "Skipping file"),
                }
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn scratch() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("aibrush-cleanup-{}", uuid::Uuid::new_v4()));
        for sub in TRANSIENT_DIRS {
            std::fs::create_dir_all(dir.join(sub)).unwrap();
        }
        dir
    }

    fn touch(path: &Path, age: Duration) {
        let file = std::fs::File::create(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn removes_matching_and_expired_files() {
        let dir = scratch();
        touch(&dir.join("images/job-1.jpg"), Duration::ZERO);
        touch(&dir.join("images/job-1-init.jpg"), Duration::ZERO);
        touch(&dir.join("output_npy/job-1.npy"), Duration::ZERO);
        touch(&dir.join("images/job-2.jpg"), Duration::ZERO);
        touch(&dir.join("output/orphan.jpg"), Duration::from_secs(7200));

        let removed = sweep(&dir, "job-1", Some(Duration::from_secs(3600))).await;

        assert_eq!(removed, 4);
        assert!(dir.join("images/job-2.jpg").exists());
        assert!(!dir.join("output/orphan.jpg").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_directories_are_ignored() {
        let dir = std::env::temp_dir().join(format!("aibrush-cleanup-{}", uuid::Uuid::new_v4()));
        assert_eq!(sweep(&dir, "job-1", None).await, 0);
    }

    #[tokio::test]
    async fn without_age_only_matching_files_go() {
        let dir = scratch();
        touch(&dir.join("images/old.jpg"), Duration::from_secs(7200));
        touch(&dir.join("images/job-9.jpg"), Duration::ZERO);

        assert_eq!(sweep(&dir, "job-9", None).await, 1);
        assert!(dir.join("images/old.jpg").exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
