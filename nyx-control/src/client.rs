use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::node::Voting;
use crate::{check_addresses, schema, Error, Logging, Result};

/// Client (mail proxy) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ClientConfig {
    pub proxy: Proxy,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: ClientDebug,
    /// Authorities the client fetches the consensus from.
    pub voting: Voting,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Proxy {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ClientDebug {
    /// Upper bound, in seconds, on waiting for the first usable consensus.
    #[serde(default = "default_retrieval_delay")]
    pub initial_max_pki_retrieval_delay: u64,
}

const fn default_retrieval_delay() -> u64 {
    30
}

impl Default for ClientDebug {
    fn default() -> Self {
        Self { initial_max_pki_retrieval_delay: default_retrieval_delay() }
    }
}

impl ClientConfig {
    pub fn fixup_and_validate(&mut self) -> Result<()> {
        self.logging.fixup();
        if self.debug.initial_max_pki_retrieval_delay == 0 {
            self.debug.initial_max_pki_retrieval_delay = default_retrieval_delay();
        }
        schema::validate("client config", &*self)?;
        self.logging.validate()?;
        if self.proxy.data_dir.as_os_str().is_empty() {
            return Err(Error::invalid("client: empty data dir"));
        }
        for peer in &self.voting.peers {
            peer.identity_key()?;
            check_addresses("client authority", &peer.addresses)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_without_authorities_fails_schema() {
        let mut cfg = ClientConfig {
            proxy: Proxy { data_dir: PathBuf::from("/tmp/client_alice") },
            logging: Logging::default(),
            debug: ClientDebug { initial_max_pki_retrieval_delay: 0 },
            voting: Voting::default(),
        };
        assert!(matches!(cfg.fixup_and_validate(), Err(Error::Schema(_))));
        assert_eq!(cfg.debug.initial_max_pki_retrieval_delay, 30);
    }
}
