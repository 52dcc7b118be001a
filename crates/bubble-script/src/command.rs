//! The parsed, largely-immutable shape of one script line plus the small
//! amount of runtime state (status, timestamps, log) a Runner mutates as it
//! drives the command to completion.

use std::path::PathBuf;
use std::sync::Mutex;

use bubble_env::Any;

use crate::payload::{PayloadError, PayloadLog};
use crate::status::Status;

/// When a command is eligible to run, relative to the status of the
/// command before it in the same Runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum When {
    Always,
    #[default]
    Success,
    Failure,
}

impl When {
    fn parse(s: &str) -> When {
        match s {
            "always" => When::Always,
            "failure" => When::Failure,
            _ => When::Success,
        }
    }
}

struct MutableState {
    status: Status,
    begin_stamp: i64,
    finish_stamp: i64,
}

/// One entry of a job script: an action name plus its script/variables and
/// scheduling hints (`when`, `where`, `target`, `prefer`).
pub struct Command {
    pub index: usize,
    pub name: String,
    pub alias: Option<String>,
    pub disk: String,
    pub script: Any,
    pub variables: Any,
    pub when: When,
    /// Raw `where` value from the script: -1 = fresh group, 0 = same group
    /// as the previous command (also Go's int zero value, so an absent
    /// `where` key defaults here), k>=1 = same group as `cmds[k-1]`.
    pub where_: i64,
    pub target: String,
    pub prefer: String,
    pub group: usize,
    state: Mutex<MutableState>,
    payload: PayloadLog,
}

impl Command {
    pub(crate) fn new(index: usize, group: usize, log_dir: &std::path::Path) -> Self {
        Command {
            index,
            name: "unknown".to_string(),
            alias: None,
            disk: String::new(),
            script: Any::Nil,
            variables: Any::Nil,
            when: When::default(),
            where_: 0,
            target: String::new(),
            prefer: String::new(),
            group,
            state: Mutex::new(MutableState { status: Status::NotStart, begin_stamp: -1, finish_stamp: -1 }),
            payload: PayloadLog::new(Self::log_file_path(log_dir, index)),
        }
    }

    fn log_file_path(dir: &std::path::Path, index: usize) -> PathBuf {
        dir.join(format!(".{index}.log"))
    }

    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn status(&self) -> Status {
        self.state.lock().unwrap().status
    }

    /// Seconds since the command started, or since it finished if it has.
    /// -1 if it never started.
    pub fn measure(&self, now_unix: i64) -> i64 {
        let s = self.state.lock().unwrap();
        if s.begin_stamp == -1 {
            return -1;
        }
        if s.finish_stamp == -1 {
            return now_unix - s.begin_stamp;
        }
        s.finish_stamp - s.begin_stamp
    }

    pub fn logs(&self, full: bool) -> Result<(Vec<u8>, bool), PayloadError> {
        self.payload.bytes(full)
    }

    /// Record a status transition and append `payload` to the log. Called
    /// both for streamed progress (`Status::Ongoing`) and terminal status.
    pub fn notify(&self, status: Status, payload: &[u8], now_unix: i64) {
        self.payload.write(payload);

        let mut s = self.state.lock().unwrap();
        s.status = status;
        match status {
            Status::Ongoing => {
                if s.begin_stamp == -1 {
                    s.begin_stamp = now_unix;
                }
            }
            Status::Success | Status::Failure | Status::Cancel | Status::Interrupt => {
                s.finish_stamp = now_unix;
                drop(s);
                self.payload.flush();
            }
            _ => {}
        }
    }

    /// Restore persisted `(status, begin, finish)` after a process restart.
    pub fn restore_state(&self, status: Status, begin: i64, mut finish: i64) {
        if finish == -1 && status.is_completed() {
            finish = begin;
        }
        let mut s = self.state.lock().unwrap();
        s.status = status;
        s.begin_stamp = begin;
        s.finish_stamp = finish;
    }

    pub fn snapshot(&self) -> (Status, i64, i64) {
        let s = self.state.lock().unwrap();
        (s.status, s.begin_stamp, s.finish_stamp)
    }
}

pub(crate) fn apply_field(cmd: &mut Command, key: &str, value: &Any) {
    match key {
        "action" => cmd.name = value.to_display_string(),
        "alias" => cmd.alias = Some(value.to_display_string()),
        "disk" => cmd.disk = value.to_display_string(),
        "script" => cmd.script = value.clone(),
        "variables" => cmd.variables = value.clone(),
        "when" => cmd.when = When::parse(&value.to_display_string()),
        "where" => cmd.where_ = if value.is_nil() { 0 } else { value.int() },
        "target" => cmd.target = value.to_display_string(),
        "prefer" => cmd.prefer = value.to_display_string(),
        _ => {}
    }
}
