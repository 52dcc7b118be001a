//! The Master's view of a connected Worker: which actions it advertises,
//! its current workload, and the in-flight Ctx per action/runner pair.
//!
//! Grounded on `master/worker.go` (the `Bind`/`Satisfy`/`Broadcast`/`Clean`
//! methods) and `master/action.go` (the per-action proc table, `Execute`/
//! `Cancel`/`Finish`/`Progress`/`Destroy`).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bubble_env::Any;
use bubble_proto::{
    CancelRequest, CleanRequest, ExecuteRequest, ProtoError, WorkerApi,
};
use bubble_script::{Command, Status};
use dashmap::DashMap;

use crate::ctx::Ctx;
use crate::error::MasterError;

struct ActionProxy {
    name: String,
    target: Vec<Any>,
    prefer: Vec<Any>,
    procs: DashMap<u64, Arc<Ctx>>,
}

impl ActionProxy {
    fn from_config(name: &str, bytes: &[u8]) -> Result<Self, MasterError> {
        let conf = if bytes.is_empty() { Any::Nil } else { Any::from_yaml_bytes(bytes)? };
        let (mut target, mut prefer) = (Vec::new(), Vec::new());
        if let Some(map) = conf.map() {
            if let Some(t) = map.get("target").and_then(Any::array) {
                target = t.to_vec();
            }
            if let Some(p) = map.get("prefer").and_then(Any::array) {
                prefer = p.to_vec();
            }
        }
        Ok(ActionProxy { name: name.to_string(), target, prefer, procs: DashMap::new() })
    }

    fn satisfies(&self, cmd: &Command) -> bool {
        let target_ok =
            cmd.target.is_empty() || self.target.iter().any(|t| t.to_display_string() == cmd.target);
        let prefer_ok =
            cmd.prefer.is_empty() || self.prefer.iter().any(|p| p.to_display_string() == cmd.prefer);
        target_ok && prefer_ok
    }
}

/// One connected Worker, as seen by the Master.
pub struct Worker {
    id: u64,
    base: String,
    api: Arc<dyn WorkerApi>,
    actions: DashMap<String, ActionProxy>,
    workload: AtomicU32,
    /// Unix timestamp of the last workload broadcast received from this
    /// worker. The Go original leans on its service framework's own
    /// connection teardown to drive `OnDisconnected`; lacking that layer
    /// here, the Master polls this instead (see `Master::sweep_stale_workers`).
    last_seen: AtomicI64,
}

impl Worker {
    pub fn new(id: u64, base: String, api: Arc<dyn WorkerApi>) -> Self {
        Worker { id, base, api, actions: DashMap::new(), workload: AtomicU32::new(0), last_seen: AtomicI64::new(now_unix()) }
    }

    /// Seconds since this worker's last workload broadcast.
    pub fn idle_for(&self) -> i64 {
        now_unix() - self.last_seen.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// This worker's callback base, handed to a destination worker in
    /// `ExecuteRequest.last_worker_base` so it can open a disk handoff
    /// directly instead of asking the Master to broker it.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn workload(&self) -> u32 {
        self.workload.load(Ordering::SeqCst)
    }

    /// Decode every advertised `action name -> base64(yaml config)` pair
    /// into an [`ActionProxy`].
    pub fn bind(&self, supports: BTreeMap<String, String>) -> Result<(), MasterError> {
        self.actions.clear();
        for (name, b64) in supports {
            let bytes = BASE64.decode(b64.as_bytes())?;
            self.actions.insert(name.clone(), ActionProxy::from_config(&name, &bytes)?);
        }
        Ok(())
    }

    /// An action is advertised under the name a job's `action:`/`alias:`
    /// picks out; a worker satisfies a command if it has that action
    /// registered and the command's `target`/`prefer` hints match.
    pub fn satisfy(&self, cmd: &Command) -> bool {
        self.actions.get(cmd.alias()).map(|a| a.satisfies(cmd)).unwrap_or(false)
    }

    /// Kind `0` = workload broadcast, payload is a big-endian `u32`. Also
    /// the liveness signal: every broadcast refreshes `last_seen`.
    pub fn on_broadcast_workload(&self, value: u32) {
        self.workload.store(value, Ordering::SeqCst);
        self.last_seen.store(now_unix(), Ordering::SeqCst);
    }

    /// Dispatch `ctx` to this worker's `action`. On any failure to reach
    /// the worker, resolves `ctx`'s result as `Failure` immediately
    /// (mirrors `action.Execute`'s `ctx.SetResult(FAILURE, ...)` on RPC
    /// error); on success, the proc is tracked until `finish`/`cancel`
    /// resolves it instead.
    pub async fn execute(&self, action: &str, ctx: Arc<Ctx>) {
        if !self.actions.contains_key(action) {
            ctx_fail(&ctx).await;
            return;
        }

        let (script_b64, variables_b64, env_b64) = match encode_ctx(&ctx).await {
            Ok(v) => v,
            Err(_) => {
                ctx_fail(&ctx).await;
                return;
            }
        };

        let req = ExecuteRequest {
            action: action.to_string(),
            master_id: ctx.master_id(),
            last_worker_id: ctx.last_worker_id(),
            last_worker_base: ctx.last_worker_base().to_string(),
            runner_id: ctx.runner_id(),
            disk: ctx.disk().to_string(),
            script_b64,
            variables_b64,
            target: ctx.target().to_string(),
            env_b64,
        };

        match self.api.execute(req).await {
            Ok(ack) if ack.ok => {
                if let Some(proxy) = self.actions.get(action) {
                    proxy.procs.insert(ctx.runner_id(), ctx.clone());
                }
                tracing::info!(worker = self.id, %action, runner = ctx.runner_id(), "dispatched");
            }
            _ => ctx_fail(&ctx).await,
        }
    }

    pub async fn cancel(&self, action: &str, runner_id: u64) -> Result<(), MasterError> {
        let req = CancelRequest { action: action.to_string(), runner_id };
        self.api.cancel(req).await?;
        if let Some(proxy) = self.actions.get(action) {
            if let Some((_, ctx)) = proxy.procs.remove(&runner_id) {
                ctx.set_result(Status::Cancel, None).await;
            }
        }
        Ok(())
    }

    pub async fn finish(&self, action: &str, runner_id: u64, success: bool, env_b64: &str) -> Result<(), MasterError> {
        let status = if success { Status::Success } else { Status::Failure };
        let bytes = BASE64.decode(env_b64.as_bytes())?;
        if let Some(proxy) = self.actions.get(action) {
            if let Some((_, ctx)) = proxy.procs.remove(&runner_id) {
                ctx.set_result(status, Some(&bytes)).await;
            }
        }
        Ok(())
    }

    pub async fn progress(&self, action: &str, runner_id: u64, payload: &[u8]) {
        if let Some(proxy) = self.actions.get(action) {
            if let Some(ctx) = proxy.procs.get(&runner_id) {
                ctx.notify_progress(payload).await;
            }
        }
    }

    pub async fn clean(&self, runner_id: u64) -> Result<(), ProtoError> {
        self.api.clean(CleanRequest { runner_id }).await.map(|_| ())
    }

    /// Every outstanding proc becomes `Interrupt`, as when a Worker
    /// disconnects mid-job.
    pub async fn destroy(&self) {
        for proxy in self.actions.iter() {
            for entry in proxy.procs.iter() {
                entry.value().set_result(Status::Interrupt, None).await;
            }
        }
        self.actions.clear();
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

async fn encode_ctx(ctx: &Ctx) -> Result<(String, String, String), bubble_env::EnvError> {
    let script = ctx.script().to_yaml_bytes()?;
    let variables = ctx.variables().to_yaml_bytes()?;
    let env = ctx.env_bytes().await?;
    Ok((BASE64.encode(script), BASE64.encode(variables), BASE64.encode(env)))
}

async fn ctx_fail(ctx: &Ctx) {
    ctx.set_result(Status::Failure, None).await;
}
