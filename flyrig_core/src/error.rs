//! Typed error taxonomy for the rig core.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum RigError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("stage protocol error: {0}")]
    Protocol(String),
    #[error("communication error: {0}")]
    Comm(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("timed out waiting for the stage to arrive")]
    Timeout,
    #[error("hardware error: {0}")]
    Hardware(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing stage driver")]
    MissingStage,
    #[error("missing vision source")]
    MissingVision,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
