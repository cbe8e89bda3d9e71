use std::collections::HashSet;
use std::path::PathBuf;

use nyx_crypto::{IdentityKeyPair, IdentityPublicKey, LinkPublicKey};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{check_addresses, schema, Error, Logging, Result};

/// Voting directory authority configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AuthorityConfig {
    pub authority: Authority,
    #[serde(default)]
    pub logging: Logging,
    pub parameters: Parameters,
    pub debug: AuthorityDebug,
    /// Every other authority taking part in the vote. Never contains this authority.
    #[serde(default)]
    pub authorities: Vec<AuthorityPeer>,
    /// Pre-approved providers.
    #[serde(default)]
    pub providers: Vec<NodeEntry>,
    /// Pre-approved mixes.
    #[serde(default)]
    pub mixes: Vec<NodeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Authority {
    #[schemars(length(min = 1))]
    pub identifier: String,
    #[schemars(length(min = 1))]
    pub addresses: Vec<String>,
    pub data_dir: PathBuf,
}

/// Parameters published in every consensus document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Parameters {
    pub mix_lambda: f64,
    pub mix_max_delay: u64,
    pub send_lambda: f64,
    pub send_shift: u64,
    pub send_max_interval: u64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            mix_lambda: 0.00025,
            mix_max_delay: 90_000,
            send_lambda: 0.00006,
            send_shift: 15_000,
            send_max_interval: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AuthorityDebug {
    #[schemars(with = "String")]
    pub identity_key: IdentityKeyPair,
    #[schemars(range(min = 1))]
    pub layers: u32,
    #[schemars(range(min = 1))]
    pub min_nodes_per_layer: u32,
    #[serde(default)]
    pub generate_only: bool,
}

/// What one authority knows about another before any vote happens.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AuthorityPeer {
    #[schemars(with = "String")]
    pub identity_public_key: IdentityPublicKey,
    #[schemars(with = "String")]
    pub link_public_key: LinkPublicKey,
    #[schemars(length(min = 1))]
    pub addresses: Vec<String>,
}

impl AuthorityPeer {
    pub fn new(identity_public_key: IdentityPublicKey, addresses: Vec<String>) -> Self {
        Self {
            link_public_key: identity_public_key.to_link_key(),
            identity_public_key,
            addresses,
        }
    }
}

/// Whitelist entry. Providers are listed with their identifier, mixes by key only.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NodeEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[schemars(with = "String")]
    pub identity_key: IdentityPublicKey,
}

impl AuthorityConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn identity(&self) -> IdentityPublicKey {
        self.debug.identity_key.public_key()
    }

    /// Record describing this authority to its peers and to nodes.
    pub fn peer_record(&self) -> AuthorityPeer {
        AuthorityPeer::new(self.identity(), self.authority.addresses.clone())
    }

    pub fn log_path(&self) -> PathBuf {
        self.authority.data_dir.join(&self.logging.file)
    }

    /// Fill defaults, then check schema and cross-field invariants.
    ///
    /// # Errors
    /// Returns an error if the config violates its schema, lists itself as a
    /// peer, repeats a peer, or whitelists one key as both provider and mix.
    pub fn fixup_and_validate(&mut self) -> Result<()> {
        self.logging.fixup();
        self.authority.identifier = self.authority.identifier.trim().to_string();
        schema::validate("authority config", &*self)?;
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let id = &self.authority.identifier;
        self.logging.validate()?;
        check_addresses(id, &self.authority.addresses)?;

        let own = self.identity();
        let mut seen = HashSet::new();
        for peer in &self.authorities {
            if peer.identity_public_key == own {
                return Err(Error::invalid(format!("{id}: lists itself as a peer")));
            }
            if !seen.insert(peer.identity_public_key) {
                return Err(Error::invalid(format!(
                    "{id}: duplicate peer {}",
                    peer.identity_public_key
                )));
            }
            if peer.link_public_key != peer.identity_public_key.to_link_key() {
                return Err(Error::invalid(format!(
                    "{id}: peer {} link key does not match identity",
                    peer.identity_public_key
                )));
            }
            check_addresses(id, &peer.addresses)?;
        }

        let mut listed = HashSet::new();
        for p in &self.providers {
            if p.identifier.as_deref().map_or(true, str::is_empty) {
                return Err(Error::invalid(format!(
                    "{id}: provider {} without identifier",
                    p.identity_key
                )));
            }
            if !listed.insert(p.identity_key) {
                return Err(Error::invalid(format!(
                    "{id}: provider {} listed twice",
                    p.identity_key
                )));
            }
        }
        for m in &self.mixes {
            if !listed.insert(m.identity_key) {
                return Err(Error::invalid(format!(
                    "{id}: mix {} listed twice or as provider",
                    m.identity_key
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dir: &str) -> Result<AuthorityConfig> {
        Ok(AuthorityConfig {
            authority: Authority {
                identifier: "authority-0.example.org".into(),
                addresses: vec!["127.0.0.1:30001".into()],
                data_dir: PathBuf::from(dir),
            },
            logging: Logging::to_file("nyx.log", "debug"),
            parameters: Parameters::default(),
            debug: AuthorityDebug {
                identity_key: IdentityKeyPair::generate()?,
                layers: 3,
                min_nodes_per_layer: 1,
                generate_only: false,
            },
            authorities: vec![],
            providers: vec![],
            mixes: vec![],
        })
    }

    #[test]
    fn self_peer_is_rejected() -> Result<()> {
        let mut cfg = sample("/tmp/a0")?;
        cfg.authorities.push(cfg.peer_record());
        let err = cfg.fixup_and_validate().unwrap_err();
        assert!(err.to_string().contains("itself"), "{err}");
        Ok(())
    }

    #[test]
    fn empty_identifier_fails_schema() -> Result<()> {
        let mut cfg = sample("/tmp/a0")?;
        cfg.authority.identifier = "  ".into();
        assert!(matches!(cfg.fixup_and_validate(), Err(Error::Schema(_))));
        Ok(())
    }

    #[test]
    fn key_cannot_be_both_provider_and_mix() -> Result<()> {
        let mut cfg = sample("/tmp/a0")?;
        let k = IdentityKeyPair::generate()?.public_key();
        cfg.providers
            .push(NodeEntry { identifier: Some("provider-0.eXaMpLe.org".into()), identity_key: k });
        cfg.mixes.push(NodeEntry { identifier: None, identity_key: k });
        assert!(cfg.fixup_and_validate().is_err());
        cfg.mixes.clear();
        cfg.fixup_and_validate()?;
        Ok(())
    }

    #[test]
    fn parses_from_toml() -> Result<()> {
        let key = IdentityKeyPair::generate()?;
        let input = format!(
            r#"
            [authority]
            identifier = "authority-7.example.org"
            addresses = ["127.0.0.1:30009"]
            data_dir = "/tmp/authority7"

            [parameters]
            mix_lambda = 1.0
            mix_max_delay = 10000
            send_lambda = 123.0
            send_shift = 12
            send_max_interval = 123456

            [debug]
            identity_key = "{}"
            layers = 3
            min_nodes_per_layer = 1
            "#,
            key.to_text()
        );
        let mut cfg = AuthorityConfig::from_toml_str(&input)?;
        cfg.fixup_and_validate()?;
        assert_eq!(cfg.identity(), key.public_key());
        assert_eq!(cfg.logging.level, "NOTICE");
        assert!(cfg.authorities.is_empty());
        Ok(())
    }
}
