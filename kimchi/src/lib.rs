#![forbid(unsafe_code)]

//! kimchi: spins up a complete voting mix network inside one process.
//!
//! A run generates keys and configs for a set of voting authorities,
//! providers and mixes, starts every server, tails each server log into
//! the harness log, registers a user at a provider over the management
//! socket, discovers the `loop` service through the client SDK and then
//! shuts everything down: first every server, then the log tailers behind
//! a completion barrier.

pub mod allocator;
pub mod authority;
pub mod config;
pub mod error;
pub mod harness;
pub mod logging;
pub mod management;
pub mod node;
pub mod supervisor;
pub mod tail;
pub mod whitelist;

pub use allocator::{Allocator, NodeKind};
pub use config::KimchiConfig;
pub use error::{ConfigGenerationError, KimchiError, LogTailError, ManagementError, Result};
pub use harness::{Kimchi, RunSummary};
pub use supervisor::Supervisor;
pub use tail::TailRegistry;
pub use whitelist::Whitelist;
