#![forbid(unsafe_code)]

//! In-process directory authority and mix/provider servers.
//!
//! Each server binds its configured TCP address, writes its own log under
//! its data directory and stops cooperatively: [`Server::shutdown`] only
//! signals, [`Server::wait`] resolves once every task the server spawned
//! has exited.

pub mod authority;
pub mod errors;
#[cfg(unix)]
pub mod management;
pub mod node;
pub mod server_log;
pub mod wire;

pub use authority::AuthorityServer;
pub use errors::{DaemonError, Result};
pub use node::NodeServer;

use async_trait::async_trait;

/// Construction/shutdown contract shared by authorities and nodes.
#[async_trait]
pub trait Server: Send + Sync {
    fn identifier(&self) -> &str;

    /// Request a stop. Idempotent, never blocks.
    fn shutdown(&self);

    /// Resolve once the server has fully stopped. Only meaningful after
    /// [`Server::shutdown`].
    async fn wait(&self);
}

/// Default timeout for one directory request/response exchange.
pub const DIRECTORY_TIMEOUT_MS: u64 = 5_000;
