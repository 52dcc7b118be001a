use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
}
