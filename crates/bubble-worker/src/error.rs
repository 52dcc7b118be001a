use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("action [{0}] is not configured on this worker")]
    ActionNotFound(String),

    #[error("runner [{0}] does not exist")]
    RunnerNotFound(u64),

    #[error("handoff [{0}] is not in progress")]
    HandoffNotFound(u64),

    #[error("handoff [{0}] checksum mismatch: expected {1}, got {2}")]
    ChecksumMismatch(u64, String, String),

    #[error("handoff [{0}] timed out waiting for the peer worker")]
    HandoffTimeout(u64),

    #[error("env decode failed: {0}")]
    Env(#[from] bubble_env::EnvError),

    #[error("action error: {0}")]
    Action(#[from] bubble_actions::ActionError),

    #[error("cron error: {0}")]
    Cron(#[from] bubble_cron::CronError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("transport error: {0}")]
    Proto(#[from] bubble_proto::ProtoError),
}
