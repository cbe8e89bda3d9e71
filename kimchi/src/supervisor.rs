//! Owns every started server and stops them in order.

use nyx_control::{AuthorityConfig, NodeConfig};
use nyx_daemon::{AuthorityServer, NodeServer, Server};
use tracing::{debug, info};

use crate::error::{KimchiError, Result};

#[derive(Default)]
pub struct Supervisor {
    servers: Vec<Box<dyn Server>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an authority; a failure aborts the run, there is no retry.
    pub async fn start_authority(&mut self, cfg: AuthorityConfig) -> Result<()> {
        let id = cfg.authority.identifier.clone();
        let server =
            AuthorityServer::new(cfg).await.map_err(|e| KimchiError::process_start(&id, e))?;
        info!(server = %id, addr = %server.local_addr(), "authority started");
        self.servers.push(Box::new(server));
        Ok(())
    }

    pub async fn start_node(&mut self, cfg: NodeConfig) -> Result<()> {
        let id = cfg.server.identifier.clone();
        let kind = if cfg.is_provider() { "provider" } else { "mix" };
        let server = NodeServer::new(cfg).await.map_err(|e| KimchiError::process_start(&id, e))?;
        info!(server = %id, addr = %server.local_addr(), kind, "node started");
        self.servers.push(Box::new(server));
        Ok(())
    }

    /// Register an already running server.
    pub fn adopt(&mut self, server: Box<dyn Server>) {
        self.servers.push(server);
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.identifier()).collect()
    }

    /// Signal every server, then wait for each. Handles are dropped here.
    pub async fn shutdown_all(self) -> usize {
        for s in &self.servers {
            debug!(server = s.identifier(), "shutdown requested");
            s.shutdown();
        }
        for s in &self.servers {
            s.wait().await;
            debug!(server = s.identifier(), "halted");
        }
        self.servers.len()
    }
}
