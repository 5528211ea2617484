use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("stage protocol error: {0}")]
    Protocol(String),
    #[error("stage communication error: {0}")]
    Comm(String),
    #[error("stage timeout")]
    Timeout,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
