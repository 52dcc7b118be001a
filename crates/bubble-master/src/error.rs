use thiserror::Error;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("job [{0}] already exists")]
    JobExists(String),

    #[error("job [{0}] does not exist")]
    JobNotFound(String),

    #[error("runner [{0}] does not exist")]
    RunnerNotFound(u64),

    #[error("no worker can satisfy this command group")]
    NoCapableWorker,

    #[error("env decode failed: {0}")]
    Env(#[from] bubble_env::EnvError),

    #[error("script decode failed: {0}")]
    Script(#[from] bubble_script::ScriptError),

    #[error("cron error: {0}")]
    Cron(#[from] bubble_cron::CronError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("transport error: {0}")]
    Proto(#[from] bubble_proto::ProtoError),
}
