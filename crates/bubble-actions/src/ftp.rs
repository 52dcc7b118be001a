//! `ftp` uploads files under `Cwd()` to a configured FTP endpoint.
//!
//! Grounded on `worker/action/ftp.go`, which hands the transfer off to
//! `github.com/jlaffaye/ftp` rather than speaking the wire protocol itself;
//! this upload runs on `suppaftp::FtpStream` the same way, off the async
//! runtime via `spawn_blocking` since the crate is synchronous.
//!
//! ```yaml
//! -
//!  action: ftp
//!  script:
//!   - /remote/dir ./local/file
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bubble_env::{Any, Env};
use suppaftp::FtpStream;

use crate::action::{split_args, Action, ActionBase, ActionFactory, ActionLog};
use crate::error::ActionError;

#[derive(Default, Clone)]
pub struct FtpFactory {
    address: String,
    username: String,
    password: String,
}

impl ActionFactory for FtpFactory {
    fn validate(&mut self, conf: &Any) -> Result<(), ActionError> {
        let map = conf.map().ok_or(ActionError::BadConfig("ftp"))?;
        self.address = map
            .get("address")
            .ok_or(ActionError::MissingField("address", "ftp"))?
            .to_display_string();
        self.username = map
            .get("username")
            .ok_or(ActionError::MissingField("username", "ftp"))?
            .to_display_string();
        self.password = map
            .get("password")
            .ok_or(ActionError::MissingField("password", "ftp"))?
            .to_display_string();
        Ok(())
    }

    fn create(&self) -> Box<dyn Action> {
        Box::new(FtpAction {
            base: ActionBase::new(),
            address: self.address.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

pub struct FtpAction {
    base: ActionBase,
    address: String,
    username: String,
    password: String,
}

#[async_trait]
impl Action for FtpAction {
    async fn init(&mut self, runner_id: u64, env: &mut Env) -> Result<(), ActionError> {
        self.base.init(runner_id, env).await
    }

    fn cwd(&self) -> &Path {
        self.base.cwd()
    }

    async fn execute(&self, script: &Any, _target: &str, env: &Env, log: &dyn ActionLog) -> bool {
        let Some(lines) = script.array() else {
            self.base.set_error("ftp command format is incorrect");
            return false;
        };

        let mut uploads: Vec<(String, Vec<String>)> = Vec::new();
        for code in lines {
            let args = split_args(&env.format(code));
            if args.len() < 2 {
                continue;
            }
            uploads.push((args[0].clone(), args[1..].to_vec()));
        }

        let address = self.address.clone();
        let username = self.username.clone();
        let password = self.password.clone();
        let cwd = self.base.cwd().to_path_buf();

        let outcome =
            tokio::task::spawn_blocking(move || run_uploads(&address, &username, &password, &cwd, &uploads)).await;

        match outcome {
            Ok(Ok(messages)) => {
                self.base.clear_error();
                for message in messages {
                    log.write(message.as_bytes());
                }
                true
            }
            Ok(Err(err)) => {
                self.base.set_error(err);
                false
            }
            Err(join_err) => {
                self.base.set_error(join_err.to_string());
                false
            }
        }
    }

    async fn cancel(&self) -> Result<(), ActionError> {
        Ok(())
    }

    fn error(&self) -> Option<String> {
        self.base.error()
    }
}

/// Run one FTP session and every configured upload to completion, or bail
/// on the first failure. Runs on a blocking thread: `suppaftp::FtpStream`
/// is synchronous.
fn run_uploads(
    address: &str,
    username: &str,
    password: &str,
    cwd: &Path,
    uploads: &[(String, Vec<String>)],
) -> Result<Vec<String>, ActionError> {
    let addr = if address.contains(':') { address.to_string() } else { format!("{address}:21") };
    let mut ftp = FtpStream::connect(&addr).map_err(|e| ActionError::Ftp(e.to_string()))?;
    ftp.login(username, password).map_err(|e| ActionError::Ftp(e.to_string()))?;
    ftp.set_mode(suppaftp::Mode::Passive);

    let mut messages = Vec::new();
    for (remote_dir, locals) in uploads {
        for local_rel in locals {
            let local_path = cwd.join(local_rel);
            let mut file = std::fs::File::open(&local_path).map_err(|e| ActionError::Ftp(e.to_string()))?;
            let _ = ftp.cwd(remote_dir);
            let remote_name = remote_file_name(local_rel);
            ftp.put_file(&remote_name, &mut file).map_err(|e| ActionError::Ftp(e.to_string()))?;
            messages.push(format!("uploaded {local_rel} -> {remote_dir}/{remote_name}\n"));
        }
    }

    let _ = ftp.quit();
    Ok(messages)
}

fn remote_file_name(local_rel: &str) -> String {
    PathBuf::from(local_rel).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}
