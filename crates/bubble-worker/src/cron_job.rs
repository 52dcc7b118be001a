//! The Worker's deferred-cleanup job: `Clean(runner_id)` does not delete
//! `jobs/<runner_id>` immediately, it arms an hourly, one-shot local cron
//! trigger that does, giving a retried log read a grace window.
//!
//! Grounded on `worker/worker.go`'s inner `clean` `ICronJob`.

use std::path::PathBuf;

use bubble_cron::CronJob;

pub struct CleanJob {
    jobs_root: PathBuf,
    target: u64,
}

impl CleanJob {
    /// Default instance a Cron's factory builds for [`CronJob::from_bytes`]
    /// to restore on reload.
    pub fn new(jobs_root: PathBuf) -> Self {
        CleanJob { jobs_root, target: 0 }
    }

    pub fn for_runner(jobs_root: PathBuf, target: u64) -> Self {
        CleanJob { jobs_root, target }
    }
}

impl CronJob for CleanJob {
    fn repeat(&self) -> bool {
        false
    }

    fn execute(&mut self) {
        let dir = self.jobs_root.join(bubble_env::to_hex(self.target));
        if let Err(err) = std::fs::remove_dir_all(&dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(?err, runner = self.target, dir = %dir.display(), "deferred runner cleanup failed");
            }
        }
    }

    fn from_bytes(&mut self, bytes: &[u8]) {
        if let Ok(target) = serde_json::from_slice(bytes) {
            self.target = target;
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.target).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_removes_the_runner_directory() {
        let root = std::env::temp_dir().join(format!("bubble-worker-cronjob-test-{}", bubble_env::next_id()));
        let target = bubble_env::next_id();
        let dir = root.join(bubble_env::to_hex(target));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("streamdisk.zip"), b"leftover").unwrap();

        let mut job = CleanJob::for_runner(root.clone(), target);
        job.execute();

        assert!(!dir.exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn execute_on_an_already_missing_directory_does_not_panic() {
        let root = std::env::temp_dir().join(format!("bubble-worker-cronjob-test-missing-{}", bubble_env::next_id()));
        let mut job = CleanJob::for_runner(root, bubble_env::next_id());
        job.execute();
    }

    #[test]
    fn round_trips_target_through_bytes() {
        let root = PathBuf::from("/tmp");
        let mut job = CleanJob::new(root.clone());
        let target = bubble_env::next_id();
        job.from_bytes(&CleanJob::for_runner(root, target).to_bytes());
        assert_eq!(job.target, target);
        assert!(!job.repeat());
    }
}
