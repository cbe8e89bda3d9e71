//!
//! Nyx key material for the directory authority network (unsafe-forbid).
//! - Identity: Ed25519 key pairs, one per authority / node, never rotated
//! - Link: X25519 public key derived from the identity key (Edwards -> Montgomery)
//! - User: X25519 static key pairs registered at providers
//! - Signed payloads: `pk || sig || msg` envelopes used for descriptor upload
#![forbid(unsafe_code)]
#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unreachable,
    clippy::todo,
    clippy::unimplemented
)]
#![allow(missing_docs)]

/// Identity, link and user key types with their text encodings.
pub mod keys;
/// Ed25519 signed envelopes.
pub mod signed;

pub use keys::{
    IdentityKeyPair, IdentityPublicKey, LinkPublicKey, UserKeyPair, UserPublicKey,
    PUBLIC_KEY_SIZE, SEED_SIZE,
};
pub use signed::{open_signed, seal_signed, SIGNATURE_SIZE};

/// Error type for key generation and verification.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("entropy source failure: {0}")]
    /// The operating system random source could not be read
    Entropy(String),
    #[error("Invalid key: {0}")]
    /// Invalid key material or text encoding
    InvalidKey(String),
    #[error("signature verification failed")]
    /// Envelope too short or signature mismatch
    Signature,
}

/// Convenient Result alias for this crate.
pub type Result<T> = core::result::Result<T, Error>;
