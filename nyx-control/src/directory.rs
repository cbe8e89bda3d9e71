//! Directory wire models: newline-delimited JSON between nodes, clients and authorities.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use nyx_crypto::{open_signed, seal_signed, IdentityKeyPair, IdentityPublicKey, LinkPublicKey};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const CODE_OK: u16 = 0;
pub const CODE_BAD_REQUEST: u16 = 400;
pub const CODE_FORBIDDEN: u16 = 403;
pub const CODE_INTERNAL: u16 = 500;

/// A service a provider advertises in its descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub capability: String,
    pub endpoint: String,
}

/// Self-description a node uploads to every authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub identifier: String,
    pub identity_key: IdentityPublicKey,
    pub link_key: LinkPublicKey,
    pub addresses: Vec<String>,
    pub is_provider: bool,
    #[serde(default)]
    pub kaetzchen: Vec<ServiceDescriptor>,
    pub epoch: u64,
}

impl NodeDescriptor {
    /// Serialize and sign with the node's identity key; base64 for the JSON envelope.
    pub fn sign(&self, key: &IdentityKeyPair) -> Result<String> {
        if key.public_key() != self.identity_key {
            return Err(Error::invalid(format!(
                "{}: descriptor signed with a foreign key",
                self.identifier
            )));
        }
        let payload = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(seal_signed(key, &payload)))
    }

    /// Inverse of [`NodeDescriptor::sign`]; the signer must be the described node.
    pub fn open(signed: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(signed.trim())
            .map_err(|e| Error::protocol(format!("descriptor envelope: {e}")))?;
        let (signer, payload) = open_signed(&raw)?;
        let desc: Self = serde_json::from_slice(payload)?;
        if desc.identity_key != signer {
            return Err(Error::protocol(format!("{}: descriptor signer mismatch", desc.identifier)));
        }
        Ok(desc)
    }

    pub fn offers(&self, capability: &str) -> Option<&ServiceDescriptor> {
        self.kaetzchen.iter().find(|k| k.capability == capability)
    }
}

/// One authority's view of the network for an epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Consensus {
    pub epoch: u64,
    pub authority: String,
    pub providers: Vec<NodeDescriptor>,
    /// Mixes per layer, layer 0 first.
    pub topology: Vec<Vec<NodeDescriptor>>,
}

impl Consensus {
    pub fn mix_count(&self) -> usize {
        self.topology.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    PostDescriptor { signed: String },
    GetConsensus,
}

/// Reply envelope; `code` 0 means success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub ok: bool,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Self { ok: true, code: CODE_OK, data, error: None }
    }

    pub fn err(code: u16, msg: impl Into<String>) -> Self {
        Self { ok: false, code, data: None, error: Some(msg.into()) }
    }

    /// Turn an error reply into [`Error::Protocol`].
    pub fn into_result(self) -> Result<Option<serde_json::Value>> {
        if self.ok {
            Ok(self.data)
        } else {
            let msg = self.error.unwrap_or_else(|| "unknown error".into());
            Err(Error::protocol(format!("{msg} (code={})", self.code)))
        }
    }
}
