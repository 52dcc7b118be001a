use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::persist::TriggerStat;
use crate::{now_unix, Cron, Type};

/// A unit of recurring work a [`Trigger`] fires. Mirrors `ICronJob`: a job
/// knows whether it repeats, how to run itself once, and how to serialize
/// its own state for persistence (e.g. "which job id to clean").
pub trait CronJob: Send {
    /// Whether this job re-arms after firing, or is removed from the Cron.
    fn repeat(&self) -> bool;

    /// Run the job's side effect. Called from the trigger's own task, so
    /// long-running work should hand off rather than block here.
    fn execute(&mut self);

    /// Restore state from a prior [`CronJob::to_bytes`] payload.
    fn from_bytes(&mut self, bytes: &[u8]);

    /// Serialize this job's state for persistence.
    fn to_bytes(&self) -> Vec<u8>;
}

/// Alias documenting the Trigger/TriggerHandle split: `Trigger` is the pure
/// data type snapshotted to disk, `TriggerHandle` is the live, running
/// wrapper around one.
pub type Trigger = TriggerHandle;

struct Inner {
    id: u64,
    t: Type,
    last_stamp: Mutex<i64>,
    job: Mutex<Box<dyn CronJob>>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

/// A live, schedulable trigger: owns the timer loop that fires its job on
/// `t`'s interval and re-arms until the job reports it shouldn't repeat.
#[derive(Clone)]
pub struct TriggerHandle(Arc<Inner>);

impl TriggerHandle {
    pub fn new(id: u64, t: Type, last_stamp: i64, job: Box<dyn CronJob>) -> Self {
        TriggerHandle(Arc::new(Inner {
            id,
            t,
            last_stamp: Mutex::new(last_stamp),
            job: Mutex::new(job),
            stop: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn kind(&self) -> Type {
        self.0.t
    }

    /// Arm the trigger's timer loop on the current tokio runtime. A
    /// restart resumes the remaining wait (`interval - elapsed`) instead of
    /// firing immediately; a remaining wait of zero or less fires after 1s.
    pub fn start(&self, cron: Arc<Cron>) {
        let mut stop_guard = self.0.stop.lock().unwrap();
        if stop_guard.is_some() {
            return;
        }
        let (tx, mut rx) = oneshot::channel();
        *stop_guard = Some(tx);
        drop(stop_guard);

        let inner = self.0.clone();
        tokio::spawn(async move {
            let mut first = true;
            loop {
                let duration = if first {
                    first = false;
                    let elapsed = now_unix() - *inner.last_stamp.lock().unwrap();
                    let remaining =
                        inner.t.interval().checked_sub(Duration::from_secs(elapsed.max(0) as u64));
                    match remaining {
                        Some(d) if !d.is_zero() => d,
                        _ => Duration::from_secs(1),
                    }
                } else {
                    inner.t.interval()
                };

                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = &mut rx => break,
                }

                *inner.last_stamp.lock().unwrap() = now_unix();
                inner.job.lock().unwrap().execute();
                let repeat = inner.job.lock().unwrap().repeat();

                cron.flush().await;
                if !repeat {
                    let _ = cron.remove(inner.id).await;
                    break;
                }
            }
        });
    }

    /// Stop the timer loop without removing the trigger from the Cron.
    pub fn stop(&self) {
        if let Some(tx) = self.0.stop.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    pub(crate) fn snapshot(&self) -> TriggerStat {
        TriggerStat {
            t: self.0.t as u8,
            last_stamp: *self.0.last_stamp.lock().unwrap(),
            payload: self.0.job.lock().unwrap().to_bytes(),
        }
    }
}
