#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Size of every public key handled here (Ed25519 and X25519 alike).
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of the secret seed a key pair is expanded from.
pub const SEED_SIZE: usize = 32;

/// Pull a fresh seed from the OS entropy source.
fn fresh_seed() -> Result<Zeroizing<[u8; SEED_SIZE]>> {
    let mut seed = Zeroizing::new([0u8; SEED_SIZE]);
    getrandom::getrandom(&mut *seed).map_err(|e| Error::Entropy(e.to_string()))?;
    Ok(seed)
}

fn decode_fixed(text: &str, what: &str, decoded: Vec<u8>) -> Result<[u8; PUBLIC_KEY_SIZE]> {
    <[u8; PUBLIC_KEY_SIZE]>::try_from(decoded.as_slice()).map_err(|_| {
        Error::InvalidKey(format!(
            "{what} '{text}' decodes to {} bytes, expected {PUBLIC_KEY_SIZE}",
            decoded.len()
        ))
    })
}

fn decode_base64(text: &str, what: &str) -> Result<[u8; PUBLIC_KEY_SIZE]> {
    let raw = STANDARD
        .decode(text.trim())
        .map_err(|e| Error::InvalidKey(format!("{what}: {e}")))?;
    decode_fixed(text, what, raw)
}

/// Public half of an identity key.
///
/// Equality, hashing and ordering are defined on the exact 32-byte encoding
/// only, so two records describe the same authority iff these compare equal.
#[derive(Clone, Copy)]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| Error::InvalidKey(format!("identity key: {e}")))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Base64 text form, as carried in configuration files.
    pub fn to_text(&self) -> String {
        STANDARD.encode(self.as_bytes())
    }

    pub fn from_text(text: &str) -> Result<Self> {
        Self::from_bytes(&decode_base64(text, "identity key")?)
    }

    /// X25519 link key derived from this identity key.
    pub fn to_link_key(&self) -> LinkPublicKey {
        LinkPublicKey(self.0.to_montgomery().to_bytes())
    }

    /// Strict Ed25519 verification of a detached signature.
    pub fn verify(&self, msg: &[u8], signature: &[u8; crate::SIGNATURE_SIZE]) -> Result<()> {
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        self.0.verify_strict(msg, &sig).map_err(|_| Error::Signature)
    }
}

impl PartialEq for IdentityPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for IdentityPublicKey {}

impl Hash for IdentityPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl PartialOrd for IdentityPublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdentityPublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl fmt::Display for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", self.to_text())
    }
}

impl Serialize for IdentityPublicKey {
    fn serialize<S: Serializer>(&self, s: S) -> core::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_text())
    }
}

impl<'de> Deserialize<'de> for IdentityPublicKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> core::result::Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        Self::from_text(&text).map_err(de::Error::custom)
    }
}

/// X25519 public key used on authority links.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkPublicKey([u8; PUBLIC_KEY_SIZE]);

impl LinkPublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_text(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        decode_base64(text, "link key").map(Self)
    }
}

impl fmt::Debug for LinkPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkPublicKey({})", self.to_text())
    }
}

impl Serialize for LinkPublicKey {
    fn serialize<S: Serializer>(&self, s: S) -> core::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_text())
    }
}

impl<'de> Deserialize<'de> for LinkPublicKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> core::result::Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        Self::from_text(&text).map_err(de::Error::custom)
    }
}

/// Ed25519 identity key pair of an authority or node.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a fresh key pair from the OS entropy source.
    ///
    /// # Errors
    /// Returns [`Error::Entropy`] when the random source cannot be read.
    pub fn generate() -> Result<Self> {
        let seed = fresh_seed()?;
        Ok(Self::from_seed(&seed))
    }

    pub fn from_seed(seed: &[u8; SEED_SIZE]) -> Self {
        Self { signing: SigningKey::from_bytes(seed) }
    }

    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing.verifying_key())
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; crate::SIGNATURE_SIZE] {
        self.signing.sign(msg).to_bytes()
    }

    /// Base64 of the secret seed. Only ever written into in-memory configs.
    pub fn to_text(&self) -> String {
        let seed = Zeroizing::new(self.signing.to_bytes());
        STANDARD.encode(*seed)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let seed = Zeroizing::new(decode_base64(text, "identity secret")?);
        Ok(Self::from_seed(&seed))
    }
}

impl PartialEq for IdentityKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for IdentityKeyPair {}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl Serialize for IdentityKeyPair {
    fn serialize<S: Serializer>(&self, s: S) -> core::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_text())
    }
}

impl<'de> Deserialize<'de> for IdentityKeyPair {
    fn deserialize<D: Deserializer<'de>>(d: D) -> core::result::Result<Self, D::Error> {
        let text = Zeroizing::new(String::deserialize(d)?);
        Self::from_text(&text).map_err(de::Error::custom)
    }
}

/// X25519 public key of a client user, hex encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserPublicKey([u8; PUBLIC_KEY_SIZE]);

impl UserPublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_text(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let raw =
            hex::decode(text.trim()).map_err(|e| Error::InvalidKey(format!("user key: {e}")))?;
        decode_fixed(text, "user key", raw).map(Self)
    }
}

impl fmt::Display for UserPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Debug for UserPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserPublicKey({})", self.to_text())
    }
}

/// X25519 static key pair of a client user.
pub struct UserKeyPair {
    secret: StaticSecret,
    public: UserPublicKey,
}

impl UserKeyPair {
    pub fn generate() -> Result<Self> {
        let seed = fresh_seed()?;
        let secret = StaticSecret::from(*seed);
        let public = UserPublicKey(X25519PublicKey::from(&secret).to_bytes());
        Ok(Self { secret, public })
    }

    pub fn public_key(&self) -> UserPublicKey {
        self.public
    }

    /// Raw Diffie-Hellman with a peer's X25519 key.
    pub fn diffie_hellman(&self, peer: &[u8; PUBLIC_KEY_SIZE]) -> Zeroizing<[u8; 32]> {
        let shared = self.secret.diffie_hellman(&X25519PublicKey::from(*peer));
        Zeroizing::new(shared.to_bytes())
    }
}

impl fmt::Debug for UserKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserKeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identities_are_distinct() -> Result<()> {
        let a = IdentityKeyPair::generate()?;
        let b = IdentityKeyPair::generate()?;
        assert_ne!(a.public_key(), b.public_key());
        assert_eq!(a.public_key(), a.clone().public_key());
        Ok(())
    }

    #[test]
    fn identity_text_forms_parse_back() -> Result<()> {
        let kp = IdentityKeyPair::generate()?;
        let pk = kp.public_key();
        assert_eq!(IdentityPublicKey::from_text(&pk.to_text())?, pk);
        assert_eq!(IdentityKeyPair::from_text(&kp.to_text())?.public_key(), pk);
        Ok(())
    }

    #[test]
    fn link_key_is_deterministic_per_identity() -> Result<()> {
        let a = IdentityKeyPair::generate()?.public_key();
        let b = IdentityKeyPair::generate()?.public_key();
        assert_eq!(a.to_link_key(), a.to_link_key());
        assert_ne!(a.to_link_key(), b.to_link_key());
        assert_eq!(LinkPublicKey::from_text(&a.to_link_key().to_text())?, a.to_link_key());
        Ok(())
    }

    #[test]
    fn truncated_text_is_rejected() {
        let err = IdentityPublicKey::from_text("AAAA").unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
        assert!(UserPublicKey::from_text("zz").is_err());
    }

    #[test]
    fn user_keys_agree_on_shared_secret() -> Result<()> {
        let alice = UserKeyPair::generate()?;
        let bob = UserKeyPair::generate()?;
        let ab = alice.diffie_hellman(bob.public_key().as_bytes());
        let ba = bob.diffie_hellman(alice.public_key().as_bytes());
        assert_eq!(*ab, *ba);
        assert_eq!(UserPublicKey::from_text(&alice.public_key().to_text())?, alice.public_key());
        Ok(())
    }
}
