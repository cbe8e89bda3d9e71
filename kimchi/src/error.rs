// Error types for the harness
//
// Config generation, process start and log tail failures abort the run;
// management errors are handed back to the caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = KimchiError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum KimchiError {
    #[error("config generation: {0}")]
    ConfigGeneration(#[from] ConfigGenerationError),
    #[error("failed to start {server}: {source}")]
    ProcessStart {
        server: String,
        #[source]
        source: nyx_daemon::DaemonError,
    },
    #[error("management: {0}")]
    Management(#[from] ManagementError),
    #[error("log tail: {0}")]
    LogTail(#[from] LogTailError),
    #[error("client: {0}")]
    Client(#[from] nyx_sdk::Error),
    #[error("harness config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl KimchiError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn process_start(server: impl Into<String>, source: nyx_daemon::DaemonError) -> Self {
        Self::ProcessStart { server: server.into(), source }
    }
}

#[derive(Debug, Error)]
pub enum ConfigGenerationError {
    #[error("key generation: {0}")]
    Key(#[from] nyx_crypto::Error),
    #[error("invalid server config: {0}")]
    Invalid(#[from] nyx_control::Error),
    #[error("port space exhausted (next would be {0})")]
    PortsExhausted(u32),
    #[error("authority {0} has no addresses")]
    AuthorityWithoutAddress(String),
    #[error("non-voting PKI is not implemented")]
    NonVotingUnsupported,
}

#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{command}: expected {expected}, got {got} {text}")]
    UnexpectedStatus {
        command: String,
        expected: u16,
        got: u16,
        text: String,
    },
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("connection closed during {0}")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum LogTailError {
    #[error("open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tail workers still running after {0:?}")]
    Deadline(Duration),
    #[error("tail worker {label} died: {reason}")]
    Join { label: String, reason: String },
}
