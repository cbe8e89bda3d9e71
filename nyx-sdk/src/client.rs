#![forbid(unsafe_code)]

use nyx_control::directory::Consensus;
use nyx_control::ClientConfig;
use tokio::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::{directory, retry};

/// Per-request budget when talking to an authority.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// A service reachable through a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Recipient endpoint at the provider, e.g. `+loop`.
    pub name: String,
    /// Identifier of the provider hosting the service.
    pub provider: String,
}

pub struct Client {
    cfg: ClientConfig,
    request_timeout_ms: u64,
}

impl Client {
    /// Fix up and validate `cfg`, then create the client's data directory.
    pub fn new(mut cfg: ClientConfig) -> Result<Self> {
        cfg.fixup_and_validate()?;
        std::fs::create_dir_all(&cfg.proxy.data_dir)?;
        tracing::debug!(
            data_dir = %cfg.proxy.data_dir.display(),
            authorities = cfg.voting.peers.len(),
            "client created"
        );
        Ok(Self { cfg, request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS })
    }

    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    /// Wait for a consensus listing at least one provider.
    ///
    /// # Errors
    /// [`Error::Timeout`] once `initial_max_pki_retrieval_delay` seconds pass
    /// without a usable document.
    pub async fn new_session(&self) -> Result<Session> {
        let delay = Duration::from_secs(self.cfg.debug.initial_max_pki_retrieval_delay);
        let deadline = Instant::now() + delay;
        let fetched = retry::retry_until(
            deadline,
            || self.fetch_usable(),
            |attempt| retry::exponential_with_jitter(attempt, 100, 2_000),
        )
        .await;
        match fetched {
            Ok(consensus) => {
                tracing::info!(
                    epoch = consensus.epoch,
                    authority = %consensus.authority,
                    providers = consensus.providers.len(),
                    mixes = consensus.mix_count(),
                    "session established"
                );
                Ok(Session { consensus })
            }
            Err(e) => {
                tracing::warn!(error = %e, "gave up waiting for a usable consensus");
                Err(Error::Timeout)
            }
        }
    }

    async fn fetch_usable(&self) -> Result<Consensus> {
        let consensus =
            directory::fetch_consensus(&self.cfg.voting.peers, self.request_timeout_ms).await?;
        if consensus.providers.is_empty() {
            return Err(Error::protocol(format!(
                "consensus for epoch {} lists no providers",
                consensus.epoch
            )));
        }
        Ok(consensus)
    }
}

/// A client's view of the network, fixed at creation.
#[derive(Debug, Clone)]
pub struct Session {
    consensus: Consensus,
}

impl Session {
    pub fn from_consensus(consensus: Consensus) -> Self {
        Self { consensus }
    }

    pub fn consensus(&self) -> &Consensus {
        &self.consensus
    }

    pub fn epoch(&self) -> u64 {
        self.consensus.epoch
    }

    /// Find a provider advertising `capability`; ties are broken at random.
    pub fn get_service(&self, capability: &str) -> Result<ServiceDescriptor> {
        let candidates: Vec<ServiceDescriptor> = self
            .consensus
            .providers
            .iter()
            .filter_map(|p| {
                p.offers(capability).map(|svc| ServiceDescriptor {
                    name: svc.endpoint.clone(),
                    provider: p.identifier.clone(),
                })
            })
            .collect();
        if candidates.is_empty() {
            return Err(Error::NotFound(format!("service {capability}")));
        }
        let pick = fastrand::usize(..candidates.len());
        Ok(candidates[pick].clone())
    }
}
