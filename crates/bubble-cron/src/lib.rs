//! Interval-based trigger scheduler used by both the Master (job triggers)
//! and the Worker (hourly cleanup of finished job directories).
//!
//! A [`Trigger`] fires a [`CronJob`] on a fixed interval, persisting its
//! last-fire timestamp after every fire so a restart resumes the remaining
//! wait instead of re-firing immediately.

mod error;
mod persist;
mod trigger;

pub use error::CronError;
pub use trigger::{CronJob, Trigger, TriggerHandle};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, warn};

use persist::TriggerStat;

/// The five fixed intervals the source system schedules triggers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Type {
    QuarterHourly = 1,
    Hourly = 2,
    Daily = 3,
    Weekly = 4,
    Monthly = 5,
}

impl Type {
    pub fn interval(self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            Type::QuarterHourly => Duration::from_secs(15 * 60),
            Type::Hourly => Duration::from_secs(60 * 60),
            Type::Daily => Duration::from_secs(24 * 60 * 60),
            Type::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
            Type::Monthly => Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Type::QuarterHourly),
            2 => Some(Type::Hourly),
            3 => Some(Type::Daily),
            4 => Some(Type::Weekly),
            5 => Some(Type::Monthly),
            _ => None,
        }
    }
}

/// Factory invoked once per trigger to build the job it will fire —
/// mirrors `JobFunc func() ICronJob`, since a job's state (e.g. "which
/// finished job directory to clean") is restored into it afterward via
/// [`CronJob::from_bytes`].
pub type JobFactory = Arc<dyn Fn() -> Box<dyn CronJob> + Send + Sync>;

/// Owns every trigger for one process (Master or Worker) and the file their
/// state is flushed to after each fire.
pub struct Cron {
    factory: JobFactory,
    file: PathBuf,
    triggers: Mutex<HashMap<u64, TriggerHandle>>,
}

impl Cron {
    /// Load persisted triggers from `file` (if present) and construct a
    /// Cron ready for [`Cron::start_all`].
    pub async fn load(factory: JobFactory, file: PathBuf) -> Arc<Self> {
        let mut triggers = HashMap::new();
        match persist::load(&file).await {
            Ok(stats) => {
                for (id, stat) in stats {
                    let Some(t) = Type::from_u8(stat.t) else {
                        warn!(id, t = stat.t, "unknown trigger type in persisted cron file, skipping");
                        continue;
                    };
                    let mut job = factory();
                    job.from_bytes(&stat.payload);
                    triggers.insert(id, TriggerHandle::new(id, t, stat.last_stamp, job));
                }
            }
            Err(err) => {
                warn!(?err, file = %file.display(), "no usable cron state, starting empty");
            }
        }

        Arc::new(Cron { factory, file, triggers: Mutex::new(triggers) })
    }

    /// Start every loaded trigger's timer loop.
    pub async fn start_all(self: &Arc<Self>) {
        let triggers = self.triggers.lock().await;
        for handle in triggers.values() {
            handle.start(self.clone());
        }
    }

    /// Register a new trigger of type `t`, using a freshly-built job.
    pub async fn add(self: &Arc<Self>, t: Type) -> u64 {
        self.add_job(t, (self.factory)()).await
    }

    /// Register a new trigger of type `t` around a caller-built job instead
    /// of the Cron's own factory — for a Cron whose triggers each carry
    /// distinct per-fire state (e.g. the Worker's per-runner cleanup jobs),
    /// where `factory` only exists to reconstruct a default instance for
    /// [`CronJob::from_bytes`] to restore on reload.
    pub async fn add_job(self: &Arc<Self>, t: Type, job: Box<dyn CronJob>) -> u64 {
        let id = bubble_env::next_id();
        let handle = TriggerHandle::new(id, t, now_unix(), job);
        handle.start(self.clone());
        self.triggers.lock().await.insert(id, handle);
        self.flush().await;
        id
    }

    /// Remove and stop a trigger by id.
    pub async fn remove(self: &Arc<Self>, id: u64) -> Result<(), CronError> {
        let handle = self.triggers.lock().await.remove(&id).ok_or(CronError::NotFound(id))?;
        handle.stop();
        self.flush().await;
        Ok(())
    }

    pub async fn ids(&self) -> Vec<u64> {
        self.triggers.lock().await.keys().copied().collect()
    }

    pub async fn destroy(&self) {
        let triggers = self.triggers.lock().await;
        for handle in triggers.values() {
            handle.stop();
        }
    }

    /// Persist every trigger's `(type, last_stamp, job payload)` atomically.
    /// Called by a trigger immediately after it fires, and whenever the
    /// trigger set itself changes (add/remove).
    pub(crate) async fn flush(&self) {
        let triggers = self.triggers.lock().await;
        let mut stats = HashMap::with_capacity(triggers.len());
        for (id, handle) in triggers.iter() {
            stats.insert(*id, handle.snapshot());
        }
        drop(triggers);

        if let Err(err) = persist::flush(&self.file, &stats).await {
            error!(?err, file = %self.file.display(), "failed to flush cron state");
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        fired: Arc<AtomicUsize>,
        repeat: bool,
    }

    impl CronJob for CountingJob {
        fn repeat(&self) -> bool {
            self.repeat
        }
        fn execute(&mut self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
        fn from_bytes(&mut self, _bytes: &[u8]) {}
        fn to_bytes(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    #[test]
    fn interval_durations_match_their_names() {
        assert_eq!(Type::QuarterHourly.interval().as_secs(), 15 * 60);
        assert_eq!(Type::Hourly.interval().as_secs(), 60 * 60);
        assert_eq!(Type::Daily.interval().as_secs(), 24 * 60 * 60);
        assert_eq!(Type::Weekly.interval().as_secs(), 7 * 24 * 60 * 60);
        assert_eq!(Type::Monthly.interval().as_secs(), 30 * 24 * 60 * 60);
    }

    #[tokio::test(start_paused = true)]
    async fn a_one_shot_trigger_fires_once_and_removes_itself() {
        let dir = std::env::temp_dir().join(format!("bubble-cron-test-{}", bubble_env::next_id()));
        let file = dir.join("cron.json");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_for_factory = fired.clone();
        let factory: JobFactory =
            Arc::new(move || Box::new(CountingJob { fired: fired_for_factory.clone(), repeat: false }));

        let cron = Cron::load(factory, file.clone()).await;
        let id = cron.add(Type::QuarterHourly).await;

        tokio::time::advance(Type::QuarterHourly.interval() + std::time::Duration::from_secs(1)).await;
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(cron.ids().await.is_empty(), "one-shot trigger {id} should have removed itself");
    }
}
