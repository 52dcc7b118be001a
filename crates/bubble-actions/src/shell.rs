//! `shell` runs each script line as `sh -c <line>` inside the action's
//! working directory, streaming stdout/stderr to the command's log and
//! stopping at the first non-zero exit.
//!
//! ```yaml
//! -
//!  action: shell
//!  script:
//!   - mkdir ...
//!   - echo ...
//! ```

use async_trait::async_trait;
use bubble_env::{Any, Env};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::action::{Action, ActionBase, ActionFactory, ActionLog};
use crate::error::ActionError;

#[derive(Default)]
pub struct ShellFactory;

impl ActionFactory for ShellFactory {
    fn validate(&mut self, _conf: &Any) -> Result<(), ActionError> {
        Ok(())
    }

    fn create(&self) -> Box<dyn Action> {
        Box::new(ShellAction { base: ActionBase::new(), child: Mutex::new(None) })
    }
}

pub struct ShellAction {
    base: ActionBase,
    child: Mutex<Option<Child>>,
}

#[async_trait]
impl Action for ShellAction {
    async fn init(&mut self, runner_id: u64, env: &mut Env) -> Result<(), ActionError> {
        self.base.init(runner_id, env).await
    }

    fn cwd(&self) -> &std::path::Path {
        self.base.cwd()
    }

    async fn execute(&self, script: &Any, _target: &str, env: &Env, log: &dyn ActionLog) -> bool {
        let Some(lines) = script.array() else {
            self.base.set_error("shell command format is incorrect");
            return false;
        };

        self.base.clear_error();
        for code in lines {
            let line = env.format(code);
            tracing::debug!(line = %line, "shell");

            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&line).current_dir(self.base.cwd());
            cmd.stdout(std::process::Stdio::piped());
            cmd.stderr(std::process::Stdio::piped());

            let mut child = match cmd.spawn() {
                Ok(c) => c,
                Err(err) => {
                    self.base.set_error(err);
                    return false;
                }
            };

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            *self.child.lock().await = Some(child);

            if let Some(out) = stdout {
                stream_to_log(out, log).await;
            }
            if let Some(err) = stderr {
                stream_to_log(err, log).await;
            }

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
                // Cancelled mid-run: the child was already killed and removed.
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

async fn stream_to_log(reader: impl tokio::io::AsyncRead + Unpin, log: &dyn ActionLog) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log.write(line.as_bytes());
        log.write(b"\n");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use bubble_env::Env;

    use super::*;

    struct RecordingLog(StdMutex<Vec<u8>>);

    impl ActionLog for RecordingLog {
        fn write(&self, bytes: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(bytes);
        }
    }

    #[tokio::test]
    async fn runs_each_line_and_captures_output() {
        let mut action = ShellFactory.create();
        let mut env = Env::new();
        let runner_id = bubble_env::next_id();
        action.init(runner_id, &mut env).await.unwrap();

        let script = Any::Array(vec![Any::from("echo hello")]);
        let log = RecordingLog(StdMutex::new(Vec::new()));
        let ok = action.execute(&script, "", &env, &log).await;
        assert!(ok);
        assert!(String::from_utf8(log.0.into_inner().unwrap()).unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn stops_at_first_failing_command() {
        let mut action = ShellFactory.create();
        let mut env = Env::new();
        action.init(bubble_env::next_id(), &mut env).await.unwrap();

        let script = Any::Array(vec![Any::from("exit 1"), Any::from("echo unreachable")]);
        let log = RecordingLog(StdMutex::new(Vec::new()));
        let ok = action.execute(&script, "", &env, &log).await;
        assert!(!ok);
        assert!(action.error().is_some());
        assert!(!String::from_utf8(log.0.into_inner().unwrap()).unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn non_array_script_is_rejected() {
        let mut action = ShellFactory.create();
        let mut env = Env::new();
        action.init(bubble_env::next_id(), &mut env).await.unwrap();

        let log = RecordingLog(StdMutex::new(Vec::new()));
        let ok = action.execute(&Any::Map(Default::default()), "", &env, &log).await;
        assert!(!ok);
    }
}
