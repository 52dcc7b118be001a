use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0} configure format is incorrect")]
    BadConfig(&'static str),

    #[error("not setting \"{0}\" for {1}")]
    MissingField(&'static str, &'static str),

    #[error("there is no target [{0}]")]
    UnknownTarget(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("message error: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("ftp error: {0}")]
    Ftp(String),
}
