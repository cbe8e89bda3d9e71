#![forbid(unsafe_code)]

//! Nyx SDK: client side of the mix network
//!
//! - Error/Result types (`nyx_sdk::Error` / `nyx_sdk::Result<T>`)
//! - Consensus retrieval from the voting authorities (`directory`)
//! - `Client` / `Session`: wait for a usable consensus, then look up
//!   provider-hosted services by capability
//! - Deadline-bounded retry with jittered exponential backoff

pub mod client;
pub mod directory;
pub mod error;
pub mod retry;

pub use client::{Client, ServiceDescriptor, Session};
pub use error::{Error, Result};
