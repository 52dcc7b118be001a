use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("trigger [{0}] does not exist")]
    NotFound(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cron state decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}
