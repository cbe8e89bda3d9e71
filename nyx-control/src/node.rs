use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use nyx_crypto::{IdentityKeyPair, IdentityPublicKey, LinkPublicKey};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{check_addresses, schema, AuthorityPeer, Error, Logging, Result};

/// File name of the provider management socket inside its data directory.
pub const MANAGEMENT_SOCKET: &str = "management_sock";

/// Mix or provider server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NodeConfig {
    pub server: Server,
    #[serde(default)]
    pub logging: Logging,
    pub debug: NodeDebug,
    pub pki: Pki,
    #[serde(default)]
    pub management: Management,
    /// Present iff `server.is_provider`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Server {
    #[schemars(length(min = 1))]
    pub identifier: String,
    #[schemars(length(min = 1))]
    pub addresses: Vec<String>,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub is_provider: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NodeDebug {
    #[schemars(with = "String")]
    pub identity_key: IdentityKeyPair,
    #[serde(default)]
    pub num_sphinx_workers: u32,
}

/// PKI section. Only the voting flavour exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Pki {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting: Option<Voting>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Voting {
    #[schemars(length(min = 1))]
    pub peers: Vec<Peer>,
}

/// An authority as a node sees it: text-encoded keys plus addresses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Peer {
    #[schemars(length(min = 1))]
    pub addresses: Vec<String>,
    #[schemars(length(min = 1))]
    pub identity_public_key: String,
    #[schemars(length(min = 1))]
    pub link_public_key: String,
}

impl Peer {
    pub fn identity_key(&self) -> Result<IdentityPublicKey> {
        Ok(IdentityPublicKey::from_text(&self.identity_public_key)?)
    }

    pub fn link_key(&self) -> Result<LinkPublicKey> {
        Ok(LinkPublicKey::from_text(&self.link_public_key)?)
    }
}

impl From<&AuthorityPeer> for Peer {
    fn from(p: &AuthorityPeer) -> Self {
        Self {
            addresses: p.addresses.clone(),
            identity_public_key: p.identity_public_key.to_text(),
            link_public_key: p.link_public_key.to_text(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Management {
    #[serde(default)]
    pub enable: bool,
    /// Socket path; defaults to `<data_dir>/management_sock`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Provider {
    /// Alternate transport addresses keyed by transport name.
    #[serde(default)]
    pub alt_addresses: BTreeMap<String, Vec<String>>,
    /// Auxiliary services offered to clients.
    #[serde(default)]
    pub kaetzchen: Vec<Kaetzchen>,
}

/// Auxiliary provider service, e.g. the `loop` ping responder.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Kaetzchen {
    #[schemars(length(min = 1))]
    pub capability: String,
    #[schemars(length(min = 2))]
    pub endpoint: String,
    #[serde(default)]
    pub disable: bool,
}

impl Kaetzchen {
    pub fn new(capability: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self { capability: capability.into(), endpoint: endpoint.into(), disable: false }
    }
}

impl NodeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn identity(&self) -> IdentityPublicKey {
        self.debug.identity_key.public_key()
    }

    pub fn is_provider(&self) -> bool {
        self.server.is_provider
    }

    pub fn log_path(&self) -> PathBuf {
        self.server.data_dir.join(&self.logging.file)
    }

    pub fn management_socket(&self) -> PathBuf {
        self.management
            .path
            .clone()
            .unwrap_or_else(|| self.server.data_dir.join(MANAGEMENT_SOCKET))
    }

    /// Authorities this node trusts. Errors on a non-voting config.
    pub fn voting_peers(&self) -> Result<&[Peer]> {
        match &self.pki.voting {
            Some(v) => Ok(&v.peers),
            None => Err(Error::invalid(format!(
                "{}: non-voting PKI is not supported",
                self.server.identifier
            ))),
        }
    }

    /// Fill defaults, then check schema and cross-field invariants.
    pub fn fixup_and_validate(&mut self) -> Result<()> {
        self.logging.fixup();
        self.server.identifier = self.server.identifier.trim().to_string();
        if self.debug.num_sphinx_workers == 0 {
            self.debug.num_sphinx_workers = 1;
        }
        if self.management.enable && self.management.path.is_none() {
            self.management.path = Some(self.server.data_dir.join(MANAGEMENT_SOCKET));
        }
        schema::validate("node config", &*self)?;
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let id = &self.server.identifier;
        self.logging.validate()?;
        check_addresses(id, &self.server.addresses)?;

        let mut seen = HashSet::new();
        for peer in self.voting_peers()? {
            let key = peer.identity_key()?;
            if peer.link_key()? != key.to_link_key() {
                return Err(Error::invalid(format!(
                    "{id}: authority {key} link key does not match identity"
                )));
            }
            if !seen.insert(key) {
                return Err(Error::invalid(format!("{id}: authority {key} listed twice")));
            }
            check_addresses(id, &peer.addresses)?;
        }

        match (&self.provider, self.server.is_provider) {
            (Some(p), true) => {
                let mut caps = HashSet::new();
                for k in &p.kaetzchen {
                    if !k.endpoint.starts_with('+') {
                        return Err(Error::invalid(format!(
                            "{id}: kaetzchen endpoint must start with '+': {}",
                            k.endpoint
                        )));
                    }
                    if !caps.insert(k.capability.as_str()) {
                        return Err(Error::invalid(format!(
                            "{id}: duplicate capability {}",
                            k.capability
                        )));
                    }
                }
            }
            (None, true) => return Err(Error::invalid(format!("{id}: provider section missing"))),
            (Some(_), false) => {
                return Err(Error::invalid(format!("{id}: provider section on a mix")))
            }
            (None, false) => {}
        }
        if self.management.enable && !self.server.is_provider {
            return Err(Error::invalid(format!("{id}: management interface is provider-only")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority_peer(port: u16) -> Result<AuthorityPeer> {
        let key = IdentityKeyPair::generate()?.public_key();
        Ok(AuthorityPeer::new(key, vec![format!("127.0.0.1:{port}")]))
    }

    fn mix(peers: Vec<Peer>) -> Result<NodeConfig> {
        Ok(NodeConfig {
            server: Server {
                identifier: "node-0.eXaMpLe.org".into(),
                addresses: vec!["127.0.0.1:30010".into()],
                data_dir: PathBuf::from("/tmp/node-0"),
                is_provider: false,
            },
            logging: Logging::to_file("nyx.log", "DEBUG"),
            debug: NodeDebug { identity_key: IdentityKeyPair::generate()?, num_sphinx_workers: 0 },
            pki: Pki { voting: Some(Voting { peers }) },
            management: Management::default(),
            provider: None,
        })
    }

    #[test]
    fn fixup_fills_worker_count() -> Result<()> {
        let mut cfg = mix(vec![Peer::from(&authority_peer(30001)?)])?;
        cfg.fixup_and_validate()?;
        assert_eq!(cfg.debug.num_sphinx_workers, 1);
        assert_eq!(cfg.voting_peers()?.len(), 1);
        Ok(())
    }

    #[test]
    fn non_voting_pki_is_refused() -> Result<()> {
        let mut cfg = mix(vec![])?;
        cfg.pki.voting = None;
        let err = cfg.fixup_and_validate().unwrap_err();
        assert!(err.to_string().contains("non-voting"), "{err}");
        Ok(())
    }

    #[test]
    fn provider_gets_default_management_socket() -> Result<()> {
        let mut cfg = mix(vec![Peer::from(&authority_peer(30001)?)])?;
        cfg.server.is_provider = true;
        cfg.management.enable = true;
        cfg.provider = Some(Provider {
            alt_addresses: BTreeMap::new(),
            kaetzchen: vec![Kaetzchen::new("loop", "+loop")],
        });
        cfg.fixup_and_validate()?;
        assert_eq!(cfg.management_socket(), PathBuf::from("/tmp/node-0").join(MANAGEMENT_SOCKET));
        Ok(())
    }

    #[test]
    fn provider_section_on_mix_is_rejected() -> Result<()> {
        let mut cfg = mix(vec![Peer::from(&authority_peer(30001)?)])?;
        cfg.provider = Some(Provider::default());
        assert!(cfg.fixup_and_validate().is_err());
        Ok(())
    }

    #[test]
    fn duplicate_authority_is_rejected() -> Result<()> {
        let a = Peer::from(&authority_peer(30001)?);
        let mut cfg = mix(vec![a.clone(), a])?;
        assert!(cfg.fixup_and_validate().is_err());
        Ok(())
    }
}
