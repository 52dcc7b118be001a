//! `unity` invokes a configured Unity Editor executable with templated
//! command-line arguments — structurally a `shell` action whose executable
//! comes from a per-target version table instead of the script itself.
//!
//! ```yaml
//! -
//!  action: unity
//!  script:
//!   - -projectPath ... -batchmode -executeMethod ...
//!  target: v2018.4
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use bubble_env::{Any, Env};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::action::{split_args, Action, ActionBase, ActionFactory, ActionLog};
use crate::error::ActionError;

const DEFAULT_VERSION: &str = "v?";

#[derive(Default, Clone)]
pub struct UnityFactory {
    target: Vec<String>,
    prefer: Vec<String>,
    version: BTreeMap<String, String>,
}

impl ActionFactory for UnityFactory {
    fn validate(&mut self, conf: &Any) -> Result<(), ActionError> {
        let map = conf.map().ok_or(ActionError::BadConfig("unity"))?;

        self.target = map
            .get("target")
            .ok_or(ActionError::MissingField("target", "unity"))?
            .array()
            .unwrap_or(&[])
            .iter()
            .map(Any::to_display_string)
            .collect();
        self.prefer = map
            .get("prefer")
            .ok_or(ActionError::MissingField("prefer", "unity"))?
            .array()
            .unwrap_or(&[])
            .iter()
            .map(Any::to_display_string)
            .collect();

        let versions = map.get("version").ok_or(ActionError::MissingField("version", "unity"))?;
        let vmap = versions.map().ok_or(ActionError::BadConfig("unity"))?;
        let mut version = BTreeMap::new();
        for (k, v) in vmap {
            let path = v.to_display_string();
            if !Path::new(&path).exists() {
                return Err(ActionError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("unity executable not found: {path}"),
                )));
            }
            version.insert(k.clone(), path);
        }
        self.version = version;

        Ok(())
    }

    fn create(&self) -> Box<dyn Action> {
        Box::new(UnityAction { base: ActionBase::new(), version: self.version.clone(), child: Mutex::new(None) })
    }
}

pub struct UnityAction {
    base: ActionBase,
    version: BTreeMap<String, String>,
    child: Mutex<Option<Child>>,
}

#[async_trait]
impl Action for UnityAction {
    async fn init(&mut self, runner_id: u64, env: &mut Env) -> Result<(), ActionError> {
        self.base.init(runner_id, env).await
    }

    fn cwd(&self) -> &Path {
        self.base.cwd()
    }

    async fn execute(&self, script: &Any, target: &str, env: &Env, log: &dyn ActionLog) -> bool {
        let target = if target.is_empty() { DEFAULT_VERSION } else { target };
        let Some(exe) = self.version.get(target) else {
            self.base.set_error(format!("there is no target [{target}] unity"));
            return false;
        };

        let Some(lines) = script.array() else {
            self.base.set_error("unity script format is incorrect");
            return false;
        };

        self.base.clear_error();
        for code in lines {
            let args = split_args(&env.format(code));
            tracing::debug!(?args, "unity");

            let mut cmd = Command::new(exe);
            cmd.args(&args).current_dir(self.base.cwd());
            cmd.stdout(std::process::Stdio::piped());
            cmd.stderr(std::process::Stdio::piped());

            let child = match cmd.spawn() {
                Ok(c) => c,
                Err(err) => {
                    self.base.set_error(err);
                    return false;
                }
            };
            *self.child.lock().await = Some(child);

            let mut guard = self.child.lock().await;
            let status = match guard.as_mut() {
                Some(child) => match child.wait().await {
                    Ok(s) => s,
                    Err(err) => {
                        drop(guard);
                        self.base.set_error(err);
                        return false;
                    }
                },
                None => {
                    drop(guard);
                    self.base.set_error("cancelled");
                    return false;
                }
            };
            *guard = None;
            drop(guard);

            if !status.success() {
                self.base.set_error(format!("command exited with {status}"));
                return false;
            }
            log.write(format!("ran unity target [{target}]\n").as_bytes());
        }

        true
    }

    async fn cancel(&self) -> Result<(), ActionError> {
        if let Some(mut child) = self.child.lock().await.take() {
            child.kill().await?;
        }
        Ok(())
    }

    fn error(&self) -> Option<String> {
        self.base.error()
    }
}
