#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timeout")]
    Timeout,
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self { Error::Config(msg.into()) }
    pub fn protocol(msg: impl Into<String>) -> Self { Error::Protocol(msg.into()) }
}

impl From<nyx_control::Error> for Error {
    fn from(e: nyx_control::Error) -> Self {
        match e {
            nyx_control::Error::Io(io) => Error::Io(io),
            nyx_control::Error::Json(j) => Error::Serde(j),
            nyx_control::Error::Protocol(msg) => Error::Protocol(msg),
            other => Error::Config(other.to_string()),
        }
    }
}
