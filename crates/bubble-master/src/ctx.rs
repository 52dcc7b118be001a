//! One in-flight command execution handed to a Worker's action proxy.
//!
//! Grounded on `master/ctx.go`: sets `_INSTANCE` to the owning Runner's id
//! on construction, and funnels the eventual terminal status back to the
//! Runner loop through a one-shot channel (the Go original uses a buffered-1
//! `chan def.STATUS`, since `SetResult` only ever fires once per Ctx).

use std::sync::Arc;

use bubble_env::{Any, Env};
use bubble_script::{Command, Status};
use tokio::sync::{oneshot, Mutex};

pub struct Ctx {
    runner_id: u64,
    master_id: u64,
    last_worker_id: u64,
    last_worker_base: String,
    disk: String,
    script: Any,
    variables: Any,
    target: String,
    command: Arc<Command>,
    env: Mutex<Env>,
    result: Mutex<Option<oneshot::Sender<Status>>>,
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub struct ResultWaiter(oneshot::Receiver<Status>);

impl ResultWaiter {
    pub async fn wait(self) -> Status {
        self.0.await.unwrap_or(Status::Interrupt)
    }
}

impl Ctx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner_id: u64,
        master_id: u64,
        last_worker_id: u64,
        last_worker_base: String,
        disk: String,
        script: Any,
        variables: Any,
        target: String,
        command: Arc<Command>,
        mut env: Env,
    ) -> (Self, ResultWaiter) {
        env.set("_instance", Any::from(bubble_env::to_hex(runner_id)));
        let (tx, rx) = oneshot::channel();
        let ctx = Ctx {
            runner_id,
            master_id,
            last_worker_id,
            last_worker_base,
            disk,
            script,
            variables,
            target,
            command,
            env: Mutex::new(env),
            result: Mutex::new(Some(tx)),
        };
        (ctx, ResultWaiter(rx))
    }

    pub fn runner_id(&self) -> u64 {
        self.runner_id
    }

    pub fn master_id(&self) -> u64 {
        self.master_id
    }

    pub fn last_worker_id(&self) -> u64 {
        self.last_worker_id
    }

    pub fn last_worker_base(&self) -> &str {
        &self.last_worker_base
    }

    pub fn disk(&self) -> &str {
        &self.disk
    }

    pub fn script(&self) -> &Any {
        &self.script
    }

    pub fn variables(&self) -> &Any {
        &self.variables
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn env_bytes(&self) -> Result<Vec<u8>, bubble_env::EnvError> {
        self.env.lock().await.to_bytes()
    }

    /// Replace the env from the Worker's reply and notify the terminal
    /// status. Safe to call at most once; later calls are ignored (mirrors
    /// a closed Go channel: `SetResult` is only ever invoked once in the
    /// reference flow).
    pub async fn set_result(&self, status: Status, env_bytes: Option<&[u8]>) {
        if let Some(bytes) = env_bytes {
            let mut env = self.env.lock().await;
            let _ = env.from_bytes(bytes);
        }
        self.command.notify(status, &[], now_unix());
        if let Some(tx) = self.result.lock().await.take() {
            let _ = tx.send(status);
        }
    }

    /// Append a progress chunk to the command's log without resolving the
    /// result channel (mirrors `Notify(ONGOING, payload)`).
    pub async fn notify_progress(&self, payload: &[u8]) {
        self.command.notify(Status::Ongoing, payload, now_unix());
    }
}
