//! Top-level sequencing of one harness run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nyx_control::client::{ClientDebug, Proxy};
use nyx_control::node::Voting;
use nyx_control::{epochtime, AuthorityConfig, ClientConfig, Logging, NodeConfig, Peer};
use nyx_crypto::UserKeyPair;
use nyx_sdk::{Client, ServiceDescriptor};
use tempfile::TempDir;
use tracing::{info, warn};

use crate::allocator::{Allocator, NodeKind};
use crate::authority::{build_authorities, SERVER_LOG};
use crate::config::KimchiConfig;
use crate::error::{KimchiError, Result};
use crate::management;
use crate::node::build_node;
use crate::supervisor::Supervisor;
use crate::tail::TailRegistry;
use crate::whitelist::Whitelist;

/// What a completed run observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub authorities: usize,
    pub providers: usize,
    pub mixes: usize,
    pub service: ServiceDescriptor,
    pub tailed_lines: u64,
}

pub struct Kimchi {
    cfg: KimchiConfig,
    base_dir: PathBuf,
    // Scratch base dir when none is configured; removed on drop unless kept.
    scratch: Option<TempDir>,
    alloc: Allocator,
    authorities: Vec<AuthorityConfig>,
    nodes: Vec<NodeConfig>,
}

impl Kimchi {
    /// Validate `cfg` and prepare the base directory.
    pub fn new(cfg: KimchiConfig) -> Result<Self> {
        cfg.validate()?;
        let (base_dir, scratch) = match &cfg.base_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let tmp = tempfile::Builder::new().prefix("kimchi").tempdir()?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };
        let alloc = Allocator::new(cfg.base_port);
        Ok(Self { cfg, base_dir, scratch, alloc, authorities: vec![], nodes: vec![] })
    }

    /// Make a scratch base dir outlive the harness so the server logs can be
    /// read after the run. A configured base dir is never removed anyway.
    pub fn keep_base_dir(&mut self) -> &Path {
        if let Some(scratch) = self.scratch.take() {
            self.base_dir = scratch.keep();
            info!(base_dir = %self.base_dir.display(), "scratch base dir kept");
        }
        &self.base_dir
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config(&self) -> &KimchiConfig {
        &self.cfg
    }

    pub fn authority_configs(&self) -> &[AuthorityConfig] {
        &self.authorities
    }

    pub fn node_configs(&self) -> &[NodeConfig] {
        &self.nodes
    }

    /// Keys, authorities and the peer exchange, providers, mixes, then the
    /// whitelist copied into every authority. Nothing is started.
    pub fn generate_configs(&mut self) -> Result<()> {
        let level = self.cfg.server_log_level.clone();
        self.authorities =
            build_authorities(self.cfg.authorities, &mut self.alloc, &self.base_dir, &level)?;
        for kind in std::iter::repeat(NodeKind::Provider)
            .take(self.cfg.providers)
            .chain(std::iter::repeat(NodeKind::Mix).take(self.cfg.mixes))
        {
            let node =
                build_node(kind, true, &self.authorities, &mut self.alloc, &self.base_dir, &level)?;
            self.nodes.push(node);
        }
        let whitelist = Whitelist::from_nodes(&self.nodes);
        whitelist.apply(&mut self.authorities);
        info!(
            authorities = self.authorities.len(),
            providers = whitelist.providers.len(),
            mixes = whitelist.mixes.len(),
            "configs generated"
        );
        Ok(())
    }

    /// Client config trusting every authority.
    pub fn client_config(&self, user: &str) -> ClientConfig {
        let peers = self.authorities.iter().map(|a| Peer::from(&a.peer_record())).collect();
        ClientConfig {
            proxy: Proxy { data_dir: self.base_dir.join(format!("client_{user}")) },
            logging: Logging::to_file(SERVER_LOG, &self.cfg.server_log_level),
            debug: ClientDebug {
                initial_max_pki_retrieval_delay: self.cfg.pki_retrieval_delay_secs,
            },
            voting: Voting { peers },
        }
    }

    /// Generate configs, start everything, register the user, discover the
    /// service and shut down again. A scratch base dir is kept afterwards.
    pub async fn run(mut self) -> Result<RunSummary> {
        self.keep_base_dir();
        let (epoch, _, till) = epochtime::now();
        info!(epoch, till = ?till, "starting");
        if !epochtime::next_epoch_publishable(till) {
            warn!(epoch, till = ?till, "descriptor publication for the next epoch will FAIL");
        }

        self.generate_configs()?;

        let tails = TailRegistry::new(Duration::from_millis(self.cfg.tail_poll_ms));
        let mut supervisor = Supervisor::new();
        let outcome = self.start_and_exercise(&mut supervisor, &tails).await;

        let halted = supervisor.shutdown_all().await;
        info!(servers = halted, "All servers halted.");

        tails.stop_at_eof_all();
        let deadline = self.cfg.shutdown_deadline_secs.map(Duration::from_secs);
        let barrier = tails.wait_with_deadline(deadline).await;
        let tailed_lines = tails.close().await;

        let service = outcome?;
        barrier?;
        info!(lines = tailed_lines, "Terminated.");
        Ok(RunSummary {
            authorities: self.authorities.len(),
            providers: self.nodes.iter().filter(|n| n.is_provider()).count(),
            mixes: self.nodes.iter().filter(|n| !n.is_provider()).count(),
            service,
            tailed_lines,
        })
    }

    /// Launch order is authorities, then nodes. A failed log tail stops the
    /// run after the launch in progress or during any later exchange.
    async fn start_and_exercise(
        &self,
        supervisor: &mut Supervisor,
        tails: &TailRegistry,
    ) -> Result<ServiceDescriptor> {
        for a in &self.authorities {
            tails.follow(a.authority.identifier.clone(), a.log_path());
            supervisor.start_authority(a.clone()).await?;
            tails.check()?;
        }
        for n in &self.nodes {
            tails.follow(n.server.identifier.clone(), n.log_path());
            supervisor.start_node(n.clone()).await?;
            tails.check()?;
        }

        let user = self.cfg.user.clone();
        tails.guard(self.register_user(&user)).await?;

        let client = Client::new(self.client_config(&user))?;
        let session = tails
            .guard(async { Ok::<_, KimchiError>(client.new_session().await?) })
            .await?;
        let service = session.get_service(&self.cfg.service)?;
        info!(service = %service.name, provider = %service.provider, "service discovered");
        Ok(service)
    }

    /// `ADD_USER` at the first provider with a fresh user key.
    pub async fn register_user(&self, user: &str) -> Result<UserKeyPair> {
        let provider = self
            .nodes
            .iter()
            .find(|n| n.is_provider())
            .ok_or_else(|| KimchiError::config("no provider to register users with"))?;
        let key = UserKeyPair::generate().map_err(crate::error::ConfigGenerationError::from)?;
        management::register_user(&provider.management_socket(), user, &key.public_key()).await?;
        info!(user, provider = %provider.server.identifier, "user registered");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogTailError;
    use anyhow::Context;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn broken_log_tail_stops_the_run_before_registration() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = KimchiConfig {
            base_dir: Some(dir.path().to_path_buf()),
            base_port: 44000,
            tail_poll_ms: 10,
            ..KimchiConfig::default()
        };
        let mut k = Kimchi::new(cfg)?;
        k.generate_configs()?;

        let plain = dir.path().join("plain");
        std::fs::write(&plain, b"not a directory")?;
        let tails = TailRegistry::new(Duration::from_millis(10));
        tails.follow("stray", plain.join("nyx.log"));
        tokio::time::timeout(Duration::from_secs(5), tails.failed()).await?;

        let mut supervisor = Supervisor::new();
        let res = k.start_and_exercise(&mut supervisor, &tails).await;
        let halted = supervisor.shutdown_all().await;
        tails.stop_at_eof_all();
        tails.wait_with_deadline(Some(Duration::from_secs(10))).await?;
        tails.close().await;

        assert!(matches!(res, Err(KimchiError::LogTail(LogTailError::Open { .. }))), "{res:?}");
        assert_eq!(halted, 1, "only the first authority should have been started");
        let provider = k.node_configs().iter().find(|n| n.is_provider()).context("provider")?;
        assert!(!provider.management_socket().exists());
        Ok(())
    }

    #[test]
    fn scratch_base_dir_is_removed_unless_kept() -> anyhow::Result<()> {
        let k = Kimchi::new(KimchiConfig::default())?;
        let dropped = k.base_dir().to_path_buf();
        assert!(dropped.is_dir());
        drop(k);
        assert!(!dropped.exists());

        let mut k = Kimchi::new(KimchiConfig::default())?;
        let kept = k.keep_base_dir().to_path_buf();
        drop(k);
        assert!(kept.is_dir());
        std::fs::remove_dir_all(&kept)?;
        Ok(())
    }
}
