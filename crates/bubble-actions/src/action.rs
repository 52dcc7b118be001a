//! The Action interface: a factory that validates a static per-kind config
//! once at registration time, and produces one instance per Runner
//! invocation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bubble_env::{Any, Env};

use crate::error::ActionError;

/// Sink the Action streams execution output into — one per command, backed
/// by that command's payload log on the worker side.
pub trait ActionLog: Send + Sync {
    fn write(&self, bytes: &[u8]);
}

#[async_trait]
pub trait Action: Send + Sync {
    /// Prepare the working directory for `runner_id` and register any
    /// env functions this action contributes (every action registers
    /// `_SIZEOF`).
    async fn init(&mut self, runner_id: u64, env: &mut Env) -> Result<(), ActionError>;

    fn cwd(&self) -> &Path;

    /// Run the action; `true` on success. Errors are recorded via
    /// [`Action::error`] rather than returned, matching the bounded
    /// `chan bool` completion signal the original interface exposes.
    ///
    /// Takes `&self`, not `&mut self`: a runner pool keeps the live
    /// instance behind an `Arc` so [`Action::cancel`] can reach the same
    /// instance concurrently while `execute` is still running. Mutable
    /// state an implementation needs across the two (e.g. a spawned
    /// child process handle) lives behind its own interior-mutability
    /// primitive, the way [`ActionBase::error`] does for the shared error
    /// message.
    async fn execute(&self, script: &Any, target: &str, env: &Env, log: &dyn ActionLog) -> bool;

    async fn cancel(&self) -> Result<(), ActionError>;

    fn error(&self) -> Option<String>;
}

pub trait ActionFactory: Send + Sync {
    fn validate(&mut self, conf: &Any) -> Result<(), ActionError>;
    fn create(&self) -> Box<dyn Action>;
}

/// Fields and behavior every concrete action embeds, shared by
/// `shell`/`zip`/`ftp`/`email`/`unity`.
pub struct ActionBase {
    cwd: PathBuf,
    error: Mutex<Option<String>>,
}

impl ActionBase {
    pub fn new() -> Self {
        ActionBase { cwd: PathBuf::new(), error: Mutex::new(None) }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    pub fn set_error(&self, err: impl std::fmt::Display) {
        *self.error.lock().unwrap() = Some(err.to_string());
    }

    pub fn clear_error(&self) {
        *self.error.lock().unwrap() = None;
    }

    /// Create `<exe_dir>/jobs/<runner_id_hex>` and register `_SIZEOF`
    /// against this action's working directory.
    pub async fn init(&mut self, runner_id: u64, env: &mut Env) -> Result<(), ActionError> {
        self.clear_error();

        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        self.cwd = exe_dir.join("jobs").join(bubble_env::to_hex(runner_id));

        if !self.cwd.exists() {
            tracing::debug!(dir = %self.cwd.display(), "creating action working directory");
            tokio::fs::create_dir_all(&self.cwd).await?;
        }

        let cwd = self.cwd.clone();
        let sizeof: bubble_env::MethodFunc = Arc::new(move |args| {
            if args.is_empty() {
                return Ok(Any::Int(0));
            }
            let rel = args[0].to_display_string();
            Ok(Any::Int(calc_size(&cwd, &rel)))
        });
        env.set_func("_SIZEOF", sizeof);

        Ok(())
    }
}

impl Default for ActionBase {
    fn default() -> Self {
        Self::new()
    }
}

fn calc_size(cwd: &Path, rel: &str) -> i64 {
    let path = cwd.join(rel);
    let meta = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(_) => return 0,
    };

    if meta.is_dir() {
        let entries = match std::fs::read_dir(&path) {
            Ok(e) => e,
            Err(_) => return 0,
        };
        let mut total = 0i64;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let child_rel = format!("{rel}/{}", name.to_string_lossy());
            total += calc_size(cwd, &child_rel);
        }
        total
    } else {
        meta.len() as i64
    }
}

/// Split one formatted script line the way every action that takes
/// whitespace-separated arguments does.
pub fn split_args(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
