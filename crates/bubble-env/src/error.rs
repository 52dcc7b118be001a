use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("yaml decode failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("division by zero")]
    DivByZero,
}
