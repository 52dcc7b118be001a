//! The Master Controller: the set of connected Worker proxies, every named
//! Job, and the `Select` algorithm that matches a command group to a
//! Worker. Implements [`MasterApi`] directly so it can be served via
//! `bubble_proto::serve_master`.
//!
//! Grounded on `master/master.go` (`Master{workers,jobs,web}`,
//! `OnConnected`/`OnDisconnected`, `Create`/`Delete`/`Get`/`List`,
//! `loadJobs()`) and spec.md §4.4 (`Select`'s satisfies-every-command,
//! minimum-workload-with-tie-break-by-iteration-order rule).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;

use bubble_proto::{
    Ack, BroadcastKind, HttpAsyncCall, MasterApi, OnBroadcastRequest, OnFinishRequest, OnProgressRequest,
    ProtoError, RegisterRequest,
};
use bubble_script::Command;

use crate::error::MasterError;
use crate::job::Job;
use crate::worker::Worker;

pub struct Master {
    id: u64,
    jobs_root: PathBuf,
    workers: DashMap<u64, Arc<Worker>>,
    jobs: DashMap<String, Arc<Job>>,
    self_ref: std::sync::Weak<Master>,
}

impl Master {
    pub fn new(jobs_root: PathBuf) -> Arc<Self> {
        Arc::new_cyclic(|weak| Master {
            id: bubble_env::next_id(),
            jobs_root,
            workers: DashMap::new(),
            jobs: DashMap::new(),
            self_ref: weak.clone(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Walk `<jobs_root>/<name>@<id_hex>` directories and reconstruct every
    /// job found, mirroring `master.go`'s `loadJobs`.
    pub async fn load_jobs(self: &Arc<Self>) -> Result<(), MasterError> {
        tokio::fs::create_dir_all(&self.jobs_root).await?;
        let mut entries = tokio::fs::read_dir(&self.jobs_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else { continue };
            let Some((name, id_hex)) = file_name.rsplit_once('@') else { continue };
            let Some(id) = bubble_env::from_hex(id_hex) else { continue };

            match Job::load(entry.path(), id, name.to_string(), self.self_ref.clone()).await {
                Ok(job) => {
                    self.jobs.insert(name.to_string(), job);
                }
                Err(err) => tracing::warn!(?err, job = name, "failed to reload job, skipping"),
            }
        }
        Ok(())
    }

    pub async fn create_job(self: &Arc<Self>, name: &str) -> Result<(), MasterError> {
        if self.jobs.contains_key(name) {
            return Err(MasterError::JobExists(name.to_string()));
        }
        let job = Job::create(&self.jobs_root, name, self.self_ref.clone()).await?;
        self.jobs.insert(name.to_string(), job);
        Ok(())
    }

    pub async fn delete_job(&self, name: &str) -> Result<(), MasterError> {
        let (_, job) = self.jobs.remove(name).ok_or_else(|| MasterError::JobNotFound(name.to_string()))?;
        job.destroy().await;
        tokio::fs::remove_dir_all(job.dir()).await.ok();
        Ok(())
    }

    pub fn get_job(&self, name: &str) -> Option<Arc<Job>> {
        self.jobs.get(name).map(|j| j.clone())
    }

    pub fn list_jobs(&self) -> Vec<String> {
        self.jobs.iter().map(|e| e.key().clone()).collect()
    }

    pub fn on_connected(&self, worker_id: u64, base: String, api: Arc<dyn bubble_proto::WorkerApi>) -> Arc<Worker> {
        let worker = Arc::new(Worker::new(worker_id, base, api));
        self.workers.insert(worker_id, worker.clone());
        worker
    }

    pub async fn on_disconnected(&self, worker_id: u64) {
        if let Some((_, worker)) = self.workers.remove(&worker_id) {
            worker.destroy().await;
        }
    }

    /// Evict every Worker that has gone quiet for at least `timeout`:
    /// workers broadcast their workload every 5s (see
    /// `bubble_worker::Worker::spawn_workload_broadcast`), so a worker past
    /// `timeout` is presumed crashed or partitioned. Replaces the
    /// connection-teardown callback the Go original's service framework
    /// would have fired automatically.
    pub async fn sweep_stale_workers(&self, timeout: Duration) {
        let stale: Vec<u64> =
            self.workers.iter().filter(|e| e.value().idle_for() >= timeout.as_secs() as i64).map(|e| *e.key()).collect();
        for worker_id in stale {
            tracing::warn!(worker = worker_id, "worker went stale, disconnecting");
            self.on_disconnected(worker_id).await;
        }
    }

    pub fn worker(&self, worker_id: u64) -> Option<Arc<Worker>> {
        self.workers.get(&worker_id).map(|w| w.clone())
    }

    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.iter().map(|e| e.value().clone()).collect()
    }

    /// Poll for a Worker that satisfies every command in the group, up to
    /// `timeout`, sleeping `poll` between attempts. Ties on workload are
    /// broken by iteration order.
    pub async fn select(
        &self,
        group_cmd_indices: &[usize],
        commands: &[Arc<Command>],
        timeout: Duration,
        poll: Duration,
    ) -> Option<Arc<Worker>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(worker) = self.best_worker(group_cmd_indices, commands) {
                return Some(worker);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn best_worker(&self, group_cmd_indices: &[usize], commands: &[Arc<Command>]) -> Option<Arc<Worker>> {
        let mut best: Option<Arc<Worker>> = None;
        for entry in self.workers.iter() {
            let worker = entry.value();
            let satisfies = group_cmd_indices.iter().all(|&i| worker.satisfy(&commands[i]));
            if !satisfies {
                continue;
            }
            if best.as_ref().map(|b| worker.workload() < b.workload()).unwrap_or(true) {
                best = Some(worker.clone());
            }
        }
        best
    }
}

#[async_trait]
impl MasterApi for Master {
    async fn register(&self, req: RegisterRequest) -> Result<Ack, ProtoError> {
        let base_url = req.callback_base.parse().map_err(|_| ProtoError::Remote("bad callback url".into()))?;
        let api: Arc<dyn bubble_proto::WorkerApi> = Arc::new(HttpAsyncCall::new(base_url));
        let worker = if let Some(worker) = self.worker(req.worker_id) {
            worker
        } else {
            self.on_connected(req.worker_id, req.callback_base.clone(), api)
        };
        worker.bind(req.supports).map_err(|err| ProtoError::Remote(err.to_string()))?;
        Ok(Ack::ok())
    }

    async fn on_finish(&self, req: OnFinishRequest) -> Result<Ack, ProtoError> {
        let worker = self.worker(req.worker_id).ok_or_else(|| ProtoError::Remote("unknown worker".into()))?;
        worker
            .finish(&req.action, req.runner_id, req.success, &req.env_b64)
            .await
            .map_err(|err| ProtoError::Remote(err.to_string()))?;
        Ok(Ack::ok())
    }

    async fn on_progress(&self, req: OnProgressRequest) -> Result<Ack, ProtoError> {
        let worker = self.worker(req.worker_id).ok_or_else(|| ProtoError::Remote("unknown worker".into()))?;
        let payload = BASE64.decode(req.payload_b64.as_bytes())?;
        worker.progress(&req.action, req.runner_id, &payload).await;
        Ok(Ack::ok())
    }

    async fn on_broadcast(&self, req: OnBroadcastRequest) -> Result<Ack, ProtoError> {
        let worker = self.worker(req.worker_id).ok_or_else(|| ProtoError::Remote("unknown worker".into()))?;
        match req.kind {
            BroadcastKind::Workload => worker.on_broadcast_workload(req.workload),
        }
        Ok(Ack::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use bubble_proto::{
        AfterReceiveRequest, BeforeReceiveRequest, BeforeSendRequest, CleanRequest, ReceiveRequest, SendRequest,
        WorkerApi,
    };

    fn tmp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bubble-master-test-{label}-{}", bubble_env::next_id()))
    }

    fn config_b64(yaml: &str) -> String {
        BASE64.encode(yaml)
    }

    struct NoopWorkerApi;

    #[async_trait]
    impl WorkerApi for NoopWorkerApi {
        async fn execute(&self, _req: bubble_proto::ExecuteRequest) -> Result<Ack, ProtoError> {
            Ok(Ack::ok())
        }
        async fn cancel(&self, _req: bubble_proto::CancelRequest) -> Result<Ack, ProtoError> {
            Ok(Ack::ok())
        }
        async fn clean(&self, _req: CleanRequest) -> Result<Ack, ProtoError> {
            Ok(Ack::ok())
        }
        async fn before_send(&self, _req: BeforeSendRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by master tests")
        }
        async fn before_receive(&self, _req: BeforeReceiveRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by master tests")
        }
        async fn send(&self, _req: SendRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by master tests")
        }
        async fn receive(&self, _req: ReceiveRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by master tests")
        }
        async fn after_receive(&self, _req: AfterReceiveRequest) -> Result<Ack, ProtoError> {
            unreachable!("not exercised by master tests")
        }
    }

    fn shell_command(target: &str, dir: &Path) -> Arc<Command> {
        let yaml = format!("- action: shell\n  target: {target}\n  script: echo hi\n");
        let (commands, _groups) = bubble_script::parse(yaml.as_bytes(), dir).unwrap();
        Arc::new(commands.into_iter().next().unwrap())
    }

    #[tokio::test]
    async fn on_connected_registers_a_worker_reachable_via_workers() {
        let dir = tmp_dir("connect");
        let master = Master::new(dir.clone());
        master.on_connected(7, "http://w7/".into(), Arc::new(NoopWorkerApi));

        assert!(master.worker(7).is_some());
        assert_eq!(master.workers().len(), 1);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn on_disconnected_removes_the_worker() {
        let dir = tmp_dir("disconnect");
        let master = Master::new(dir.clone());
        master.on_connected(7, "http://w7/".into(), Arc::new(NoopWorkerApi));

        master.on_disconnected(7).await;

        assert!(master.worker(7).is_none());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn sweep_stale_workers_evicts_a_worker_past_the_timeout() {
        let dir = tmp_dir("sweep-stale");
        let master = Master::new(dir.clone());
        master.on_connected(7, "http://w7/".into(), Arc::new(NoopWorkerApi));

        master.sweep_stale_workers(Duration::from_secs(0)).await;

        assert!(master.worker(7).is_none());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn sweep_stale_workers_keeps_a_recently_seen_worker() {
        let dir = tmp_dir("sweep-fresh");
        let master = Master::new(dir.clone());
        master.on_connected(7, "http://w7/".into(), Arc::new(NoopWorkerApi));

        master.sweep_stale_workers(Duration::from_secs(60)).await;

        assert!(master.worker(7).is_some());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn select_picks_the_lowest_workload_among_satisfying_workers() {
        let dir = tmp_dir("select-lowest");
        let master = Master::new(dir.clone());
        let cmd = shell_command("linux", &dir);

        let w1 = master.on_connected(1, "http://w1/".into(), Arc::new(NoopWorkerApi));
        let w2 = master.on_connected(2, "http://w2/".into(), Arc::new(NoopWorkerApi));
        let supports: std::collections::BTreeMap<String, String> =
            [("shell".to_string(), config_b64("target:\n  - linux\n"))].into_iter().collect();
        w1.bind(supports.clone()).unwrap();
        w2.bind(supports).unwrap();
        w2.on_broadcast_workload(5);

        let chosen = master
            .select(&[0], std::slice::from_ref(&cmd), Duration::from_millis(50), Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(chosen.id(), 1);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn select_returns_none_when_no_worker_satisfies_the_target() {
        let dir = tmp_dir("select-none");
        let master = Master::new(dir.clone());
        let cmd = shell_command("windows", &dir);

        let w1 = master.on_connected(1, "http://w1/".into(), Arc::new(NoopWorkerApi));
        let supports: std::collections::BTreeMap<String, String> =
            [("shell".to_string(), config_b64("target:\n  - linux\n"))].into_iter().collect();
        w1.bind(supports).unwrap();

        let chosen = master
            .select(&[0], std::slice::from_ref(&cmd), Duration::from_millis(20), Duration::from_millis(5))
            .await;
        assert!(chosen.is_none());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn register_with_an_unparsable_callback_url_is_rejected() {
        let dir = tmp_dir("register-bad-url");
        let master = Master::new(dir.clone());
        let req =
            RegisterRequest { worker_id: 1, callback_base: "not a url".into(), supports: Default::default() };
        assert!(master.register(req).await.is_err());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn on_finish_and_on_progress_reject_an_unknown_worker() {
        let dir = tmp_dir("unknown-worker");
        let master = Master::new(dir.clone());
        let finish_req = OnFinishRequest {
            worker_id: 99,
            action: "shell".into(),
            runner_id: 1,
            success: true,
            env_b64: String::new(),
        };
        assert!(master.on_finish(finish_req).await.is_err());

        let progress_req =
            OnProgressRequest { worker_id: 99, action: "shell".into(), runner_id: 1, payload_b64: String::new() };
        assert!(master.on_progress(progress_req).await.is_err());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
