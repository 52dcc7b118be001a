//! One Runner executes one Job once: walk its commands in order, resolve a
//! Worker per group on first use, dispatch each eligible command and wait
//! for its terminal status, then persist the final per-command state.
//!
//! Grounded on `master/runner.go`'s goroutine-driven command loop (spec.md
//! §4.3's pseudocode is carried here unchanged in substance).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use bubble_script::{Command, Group, Status, When};

use crate::ctx::Ctx;
use crate::error::MasterError;
use crate::master::Master;
use crate::worker::Worker;

const STATFILE: &str = ".bubble.stat";
const SCRIPTFILE: &str = ".bubble.yml";
/// Bounded wait for `Master::select` to find a capable Worker, per spec.md
/// §4.3 ("bounded wait ≤ 60s, 1s poll").
const SELECT_TIMEOUT: Duration = Duration::from_secs(60);
const SELECT_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommandStat {
    status: Status,
    begin: i64,
    finish: i64,
}

pub struct Runner {
    id: u64,
    job_name: String,
    dir: PathBuf,
    commands: Vec<Arc<Command>>,
    groups: Vec<Group>,
    group_workers: Vec<Mutex<Option<Arc<Worker>>>>,
    interrupted: AtomicBool,
}

impl Runner {
    pub fn new(id: u64, job_name: String, dir: PathBuf, script_bytes: &[u8]) -> Result<Self, MasterError> {
        let (commands, groups) = bubble_script::parse(script_bytes, &dir)?;
        let group_workers = groups.iter().map(|_| Mutex::new(None)).collect();
        Ok(Runner {
            id,
            job_name,
            dir,
            commands: commands.into_iter().map(Arc::new).collect(),
            groups,
            group_workers,
            interrupted: AtomicBool::new(false),
        })
    }

    /// Reconstruct a Runner from `<job dir>/<runner_id_hex>`: reparse its
    /// frozen script copy and rehydrate command status/timestamps from
    /// `.bubble.stat`, repairing any `finishStamp == -1` on a terminal
    /// status to equal `beginStamp`.
    pub async fn load(dir: PathBuf, id: u64, job_name: String) -> Result<Self, MasterError> {
        let script_bytes = tokio::fs::read(dir.join(SCRIPTFILE)).await?;
        let runner = Self::new(id, job_name, dir.clone(), &script_bytes)?;

        if let Ok(bytes) = tokio::fs::read(dir.join(STATFILE)).await {
            if let Ok(stats) = serde_json::from_slice::<Vec<CommandStat>>(&bytes) {
                for (cmd, stat) in runner.commands.iter().zip(stats.iter()) {
                    cmd.restore_state(stat.status, stat.begin, stat.finish);
                }
            }
        }

        Ok(runner)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn command(&self, index: usize) -> Option<&Arc<Command>> {
        self.commands.get(index)
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Drive every command to completion or interruption, dispatching each
    /// eligible command to its group's Worker and persisting final state.
    pub async fn run(self: Arc<Self>, master: Arc<Master>) {
        let mut status = Status::Success;
        let mut touched: Vec<Arc<Worker>> = Vec::new();
        let mut last_worker_id: u64 = 0;
        let mut last_worker_base = String::new();

        for cmd in self.commands.clone() {
            if self.interrupted.load(Ordering::SeqCst) || status == Status::Interrupt {
                break;
            }

            let group = cmd.group;
            let mut slot = self.group_workers[group].lock().await;
            if slot.is_none() {
                match master.select(&self.groups[group].cmds, &self.commands, SELECT_TIMEOUT, SELECT_POLL).await {
                    Some(worker) => {
                        touched.push(worker.clone());
                        *slot = Some(worker);
                    }
                    None => {
                        cmd.notify(Status::Failure, b"capability miss: no worker satisfies this group", now_unix());
                        status = Status::Failure;
                        break;
                    }
                }
            }
            let worker = slot.clone().expect("just assigned above");
            drop(slot);

            if should_run(cmd.when, status) {
                let (ctx, waiter) = Ctx::new(
                    self.id,
                    master.id(),
                    last_worker_id,
                    last_worker_base.clone(),
                    cmd.disk.clone(),
                    cmd.script.clone(),
                    cmd.variables.clone(),
                    cmd.target.clone(),
                    cmd.clone(),
                    bubble_env::Env::new(),
                );
                worker.execute(cmd.alias(), Arc::new(ctx)).await;
                status = waiter.wait().await;
                last_worker_id = worker.id();
                last_worker_base = worker.base().to_string();
            }
        }

        self.persist_stat().await;

        for worker in touched {
            if let Err(err) = worker.clean(self.id).await {
                tracing::warn!(?err, worker = worker.id(), runner = self.id, "worker clean failed");
            }
        }
    }

    /// Cancel every in-flight or not-yet-started command: every group with
    /// a bound Worker has its current action's proc cancelled.
    pub async fn cancel(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        for cmd in &self.commands {
            if let Some(worker) = self.group_workers[cmd.group].lock().await.clone() {
                let _ = worker.cancel(cmd.alias(), self.id).await;
            }
        }
    }

    /// Mark every in-flight command INTERRUPT without touching remote
    /// Workers, as on process shutdown (spec.md §7 `InterruptOnShutdown`).
    pub async fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        for cmd in &self.commands {
            if !cmd.status().is_completed() {
                cmd.notify(Status::Interrupt, b"", now_unix());
            }
        }
    }

    async fn persist_stat(&self) {
        let stats: Vec<CommandStat> = self
            .commands
            .iter()
            .map(|cmd| {
                let (status, begin, finish) = cmd.snapshot();
                let finish = if finish == -1 && status.is_completed() { begin } else { finish };
                CommandStat { status, begin, finish }
            })
            .collect();

        match serde_json::to_vec(&stats) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(self.dir.join(STATFILE), bytes).await {
                    tracing::error!(?err, runner = self.id, job = %self.job_name, "failed to persist runner stat");
                }
            }
            Err(err) => tracing::error!(?err, "failed to serialize runner stat"),
        }
    }
}

/// `always` runs unconditionally (even over a Cancel, per spec.md §8
/// property 2); `success`/`failure` gate on the prior command's status,
/// and never run while that status is Cancel.
fn should_run(when: When, prior_status: Status) -> bool {
    match when {
        When::Always => true,
        When::Success => prior_status != Status::Cancel && prior_status == Status::Success,
        When::Failure => prior_status != Status::Cancel && prior_status == Status::Failure,
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bubble-master-runner-test-{label}-{}", bubble_env::next_id()))
    }

    #[test]
    fn always_runs_regardless_of_prior_status() {
        for status in [Status::NotStart, Status::Success, Status::Failure, Status::Cancel, Status::Interrupt] {
            assert!(should_run(When::Always, status), "always should run after {status:?}");
        }
    }

    #[test]
    fn success_and_failure_never_run_after_a_cancel() {
        assert!(!should_run(When::Success, Status::Cancel));
        assert!(!should_run(When::Failure, Status::Cancel));
    }

    #[test]
    fn success_gates_on_the_prior_status_alone() {
        assert!(should_run(When::Success, Status::Success));
        assert!(!should_run(When::Success, Status::Failure));
    }

    #[test]
    fn failure_gates_on_the_prior_status_alone() {
        assert!(should_run(When::Failure, Status::Failure));
        assert!(!should_run(When::Failure, Status::Success));
    }

    #[tokio::test]
    async fn new_parses_one_command_per_group_by_default() {
        let dir = tmp_dir("new");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let script = b"- action: shell\n  script: echo hi\n- action: shell\n  script: echo bye\n";
        let runner = Runner::new(bubble_env::next_id(), "demo".into(), dir.clone(), script).unwrap();
        assert_eq!(runner.command_count(), 2);
        assert_eq!(runner.command(0).unwrap().status(), Status::NotStart);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn persist_then_load_restores_terminal_status_and_timestamps() {
        let dir = tmp_dir("persist");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let script = b"- action: shell\n  script: echo hi\n";
        tokio::fs::write(dir.join(SCRIPTFILE), script).await.unwrap();

        let runner = Runner::new(bubble_env::next_id(), "demo".into(), dir.clone(), script).unwrap();
        runner.commands[0].notify(Status::Success, b"ok\n", 1000);
        runner.persist_stat().await;

        let reloaded = Runner::load(dir.clone(), runner.id(), "demo".into()).await.unwrap();
        assert_eq!(reloaded.command(0).unwrap().status(), Status::Success);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn load_repairs_a_missing_finish_stamp_on_a_completed_command() {
        let dir = tmp_dir("repair");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let script = b"- action: shell\n  script: echo hi\n";
        tokio::fs::write(dir.join(SCRIPTFILE), script).await.unwrap();
        let stats = vec![CommandStat { status: Status::Success, begin: 500, finish: -1 }];
        tokio::fs::write(dir.join(STATFILE), serde_json::to_vec(&stats).unwrap()).await.unwrap();

        let runner = Runner::load(dir.clone(), bubble_env::next_id(), "demo".into()).await.unwrap();
        let (status, begin, finish) = runner.commands[0].snapshot();
        assert_eq!(status, Status::Success);
        assert_eq!(finish, begin);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
