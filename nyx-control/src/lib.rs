#![forbid(unsafe_code)]

//! nyx-control: Control plane models for a voting directory authority network.
//! This crate provides:
//! - Authority, node and client configuration with fixup + JSON Schema validation
//! - The epoch clock shared by authorities, nodes and clients
//! - Directory wire models (signed node descriptors, consensus document)
//! - The provider management ("thwack") line protocol codec

pub mod authority;
pub mod client;
pub mod directory;
pub mod epochtime;
pub mod logging;
pub mod node;
pub mod schema;
pub mod thwack;

pub use authority::{AuthorityConfig, AuthorityPeer, NodeEntry};
pub use client::ClientConfig;
pub use logging::Logging;
pub use node::{Kaetzchen, NodeConfig, Peer};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("schema violation: {0}")]
    Schema(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("key: {0}")]
    Key(#[from] nyx_crypto::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Every address must be a literal `host:port` socket address.
pub(crate) fn check_addresses(what: &str, addrs: &[String]) -> Result<()> {
    if addrs.is_empty() {
        return Err(Error::invalid(format!("{what}: no addresses")));
    }
    for a in addrs {
        a.parse::<std::net::SocketAddr>()
            .map_err(|e| Error::invalid(format!("{what}: bad address '{a}': {e}")))?;
    }
    Ok(())
}
