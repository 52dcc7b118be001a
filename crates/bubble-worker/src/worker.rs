//! The Worker Controller: advertised actions, the periodic workload
//! broadcast, and the [`WorkerApi`] surface the Master (and peer Workers,
//! for handoff) call into.
//!
//! Grounded on `worker/worker.go` (`Worker{actions,master,cron}`,
//! `Execute`/`Cancel`/`Clean`/`broadcastLoop`) and `worker/runner.go`'s
//! ack-then-background-run split: `Execute` returns as soon as the runner
//! pool accepts the job, the actual command runs on a task spawned off an
//! upgraded [`Self::self_ref`] so it can outlive the RPC handler.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bubble_actions::ActionFactory;
use bubble_cron::{Cron, Type as TriggerType};
use bubble_env::{Any, Env};
use bubble_proto::{
    Ack, AfterReceiveRequest, BeforeReceiveRequest, BeforeSendRequest, CancelRequest, CleanRequest, ExecuteRequest,
    MasterApi, OnBroadcastRequest, OnFinishRequest, ProtoError, ReceiveRequest, RegisterRequest, SendRequest,
    WorkerApi,
};
use dashmap::DashMap;

use crate::action_runner::ActionRunner;
use crate::cron_job::CleanJob;
use crate::error::WorkerError;
use crate::handoff::{HandoffReceiver, HandoffSender};
use crate::logger::ForwardingLog;

const BROADCAST_INTERVAL: Duration = Duration::from_secs(5);

/// One running process's set of advertised actions plus its live runner
/// pools, the cron that defers job-directory cleanup, and the
/// send/receive halves of the disk-handoff protocol.
pub struct Worker {
    id: u64,
    base: String,
    jobs_root: PathBuf,
    master: Arc<dyn MasterApi>,
    actions: DashMap<String, Arc<ActionRunner>>,
    receiver: HandoffReceiver,
    sender: Arc<HandoffSender>,
    cron: Arc<Cron>,
    cleaning: DashMap<u64, ()>,
    self_ref: Weak<Worker>,
}

impl Worker {
    pub fn new(id: u64, base: String, jobs_root: PathBuf, master: Arc<dyn MasterApi>, cron: Arc<Cron>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Worker {
            id,
            base: base.clone(),
            jobs_root: jobs_root.clone(),
            master,
            actions: DashMap::new(),
            receiver: HandoffReceiver::new(id, base, jobs_root.clone()),
            sender: HandoffSender::new(id, jobs_root),
            cron,
            cleaning: DashMap::new(),
            self_ref: weak.clone(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Validate `raw_yaml` against `factory` and, on success, advertise
    /// `name` to the Master on the next [`Worker::register`] call.
    pub fn configure_action(
        &self,
        name: String,
        mut factory: Box<dyn ActionFactory>,
        raw_yaml: &[u8],
    ) -> Result<(), WorkerError> {
        let conf = if raw_yaml.is_empty() { Any::Nil } else { Any::from_yaml_bytes(raw_yaml)? };
        factory.validate(&conf)?;
        let config_b64 = BASE64.encode(raw_yaml);
        self.actions.insert(name.clone(), Arc::new(ActionRunner::new(name, factory, config_b64)));
        Ok(())
    }

    /// Announce every configured action to the Master.
    pub async fn register(&self) -> Result<(), WorkerError> {
        let supports = self.actions.iter().map(|e| (e.key().clone(), e.value().config_b64().to_string())).collect();
        self.master
            .register(RegisterRequest { worker_id: self.id, callback_base: self.base.clone(), supports })
            .await?;
        Ok(())
    }

    /// Periodically report this worker's total in-flight proc count, which
    /// the Master's `Select` uses to break ties between otherwise-equal
    /// workers.
    pub fn spawn_workload_broadcast(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BROADCAST_INTERVAL);
            loop {
                ticker.tick().await;
                let workload: u32 = this.actions.iter().map(|e| e.value().workload()).sum();
                let req = OnBroadcastRequest {
                    worker_id: this.id,
                    kind: bubble_proto::BroadcastKind::Workload,
                    workload,
                };
                if let Err(err) = this.master.on_broadcast(req).await {
                    tracing::warn!(?err, "failed to broadcast workload to master");
                }
            }
        });
    }

    fn runner_cwd(&self, runner_id: u64) -> PathBuf {
        self.jobs_root.join(bubble_env::to_hex(runner_id))
    }

    async fn do_execute(self: Arc<Self>, req: ExecuteRequest) {
        let runner_id = req.runner_id;
        let action_name = req.action.clone();

        let Some(runner) = self.actions.get(&action_name).map(|e| e.clone()) else {
            tracing::warn!(action = %action_name, runner_id, "execute for unconfigured action");
            self.report_finish(&action_name, runner_id, false, Vec::new()).await;
            return;
        };

        let progress_req = bubble_proto::OnProgressRequest {
            worker_id: self.id,
            action: action_name.clone(),
            runner_id,
            payload_b64: String::new(),
        };
        if let Err(err) = self.master.on_progress(progress_req).await {
            tracing::warn!(?err, runner_id, action = %action_name, "failed to report execution start to master");
        }

        if req.last_worker_id != 0 && req.last_worker_id != self.id && !req.disk.is_empty() {
            if let Err(err) = self.receiver.pull(runner_id, &req.disk, &req.last_worker_base).await {
                tracing::error!(?err, runner_id, "disk handoff failed");
                self.report_finish(&action_name, runner_id, false, Vec::new()).await;
                return;
            }
        }

        let result = self.run_action(&runner, &req).await;
        match result {
            Ok((success, env_bytes)) => self.report_finish(&action_name, runner_id, success, env_bytes).await,
            Err(err) => {
                tracing::error!(?err, runner_id, action = %action_name, "action execution failed");
                self.report_finish(&action_name, runner_id, false, Vec::new()).await;
            }
        }

        runner.remove(runner_id);
    }

    async fn run_action(
        &self,
        runner: &Arc<ActionRunner>,
        req: &ExecuteRequest,
    ) -> Result<(bool, Vec<u8>), WorkerError> {
        let mut env = Env::new();
        let env_bytes = BASE64.decode(req.env_b64.as_bytes())?;
        env.from_bytes(&env_bytes)?;

        // Command-scoped variables are interpolated against the env they're
        // joining, then stored as plain strings — not merged verbatim.
        let variables_bytes = BASE64.decode(req.variables_b64.as_bytes())?;
        if !variables_bytes.is_empty() {
            let variables = Any::from_yaml_bytes(&variables_bytes)?;
            if let Some(map) = variables.map() {
                for (name, value) in map {
                    let formatted = env.format(value);
                    env.set(name, Any::String(formatted));
                }
            }
        }

        let script_bytes = BASE64.decode(req.script_b64.as_bytes())?;
        let script = if script_bytes.is_empty() { Any::Nil } else { Any::from_yaml_bytes(&script_bytes)? };

        let cwd = self.runner_cwd(req.runner_id);
        tokio::fs::create_dir_all(&cwd).await?;

        let action = runner.spawn(req.runner_id, &mut env).await?;
        let log = ForwardingLog::new(self.master.clone(), self.id, req.action.clone(), req.runner_id);
        let success = action.execute(&script, &req.target, &env, &log).await;

        Ok((success, env.to_bytes()?))
    }

    async fn report_finish(&self, action: &str, runner_id: u64, success: bool, env_bytes: Vec<u8>) {
        let req = OnFinishRequest {
            worker_id: self.id,
            action: action.to_string(),
            runner_id,
            success,
            env_b64: BASE64.encode(env_bytes),
        };
        if let Err(err) = self.master.on_finish(req).await {
            tracing::warn!(?err, runner_id, action, "failed to report finish to master");
        }
    }
}

#[async_trait]
impl WorkerApi for Worker {
    /// Accept immediately; the handoff pull, the action's `execute` and the
    /// `OnFinish` callback all happen on a background task so the Master's
    /// RPC does not block on the command's full duration.
    async fn execute(&self, req: ExecuteRequest) -> Result<Ack, ProtoError> {
        if !self.actions.contains_key(&req.action) {
            return Err(ProtoError::Remote(WorkerError::ActionNotFound(req.action).to_string()));
        }
        let Some(this) = self.self_ref.upgrade() else {
            return Err(ProtoError::Remote("worker is shutting down".into()));
        };
        tokio::spawn(async move { this.do_execute(req).await });
        Ok(Ack::ok())
    }

    async fn cancel(&self, req: CancelRequest) -> Result<Ack, ProtoError> {
        let runner = self
            .actions
            .get(&req.action)
            .map(|e| e.clone())
            .ok_or_else(|| ProtoError::Remote(WorkerError::ActionNotFound(req.action.clone()).to_string()))?;
        runner.cancel(req.runner_id).await.map_err(|err| ProtoError::Remote(err.to_string()))?;
        Ok(Ack::ok())
    }

    /// Defer `jobs/<runner_id>`'s deletion to an hourly one-shot trigger
    /// instead of removing it inline, guarded against scheduling the same
    /// runner's cleanup twice (runner ids never repeat, so the guard never
    /// needs to be lifted).
    async fn clean(&self, req: CleanRequest) -> Result<Ack, ProtoError> {
        if self.cleaning.insert(req.runner_id, ()).is_some() {
            return Ok(Ack::ok());
        }
        let job = Box::new(CleanJob::for_runner(self.jobs_root.clone(), req.runner_id));
        self.cron.add_job(TriggerType::Hourly, job).await;
        Ok(Ack::ok())
    }

    async fn before_send(&self, req: BeforeSendRequest) -> Result<Ack, ProtoError> {
        self.sender.before_send(req.dest_worker_id, req.dest_base, req.runner_id, req.disk);
        Ok(Ack::ok())
    }

    async fn before_receive(&self, req: BeforeReceiveRequest) -> Result<Ack, ProtoError> {
        self.receiver
            .before_receive(req.runner_id, req.length, req.chunks, req.checksum)
            .await
            .map_err(|err| ProtoError::Remote(err.to_string()))?;
        Ok(Ack::ok())
    }

    async fn send(&self, req: SendRequest) -> Result<Ack, ProtoError> {
        self.sender.send(req.runner_id).map_err(|err| ProtoError::Remote(err.to_string()))?;
        Ok(Ack::ok())
    }

    async fn receive(&self, req: ReceiveRequest) -> Result<Ack, ProtoError> {
        let data = BASE64.decode(req.data_b64.as_bytes())?;
        self.receiver
            .receive(req.runner_id, req.index, &data)
            .await
            .map_err(|err| ProtoError::Remote(err.to_string()))?;
        Ok(Ack::ok())
    }

    async fn after_receive(&self, req: AfterReceiveRequest) -> Result<Ack, ProtoError> {
        self.receiver.after_receive(req.runner_id).await.map_err(|err| ProtoError::Remote(err.to_string()))?;
        Ok(Ack::ok())
    }
}
