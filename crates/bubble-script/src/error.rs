use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("job script is not an array")]
    NotAnArray,

    #[error("command [{0}] format is incorrect")]
    BadCommand(usize),

    #[error("env decode failed: {0}")]
    Env(#[from] bubble_env::EnvError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
