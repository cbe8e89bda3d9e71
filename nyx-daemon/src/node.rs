#![forbid(unsafe_code)]

//! Mix and provider node.
//!
//! A node binds its address, publishes a signed descriptor to every voting
//! authority and, when it is a provider, exposes the management socket.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use nyx_control::directory::{NodeDescriptor, Request, ServiceDescriptor};
use nyx_control::{epochtime, NodeConfig, Peer};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::authority::first_addr;
use crate::errors::{DaemonError, Result};
use crate::server_log::ServerLog;
use crate::{wire, Server, DIRECTORY_TIMEOUT_MS};

#[cfg(unix)]
use crate::management::ManagementServer;

pub struct NodeServer {
    identifier: String,
    addr: SocketAddr,
    log: Arc<ServerLog>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    #[cfg(unix)]
    management: Option<ManagementServer>,
}

impl NodeServer {
    /// Validate `cfg`, start listening and publish the descriptor.
    ///
    /// # Errors
    /// Fails on a non-voting PKI section, an invalid config, a bind failure,
    /// or when any authority refuses the descriptor. In the last case the
    /// partially started server is stopped before returning.
    pub async fn new(mut cfg: NodeConfig) -> Result<Self> {
        if cfg.pki.voting.is_none() {
            return Err(DaemonError::not_implemented(format!(
                "{}: non-voting PKI",
                cfg.server.identifier
            )));
        }
        cfg.fixup_and_validate()?;
        let identifier = cfg.server.identifier.clone();
        let addr = first_addr(&identifier, &cfg.server.addresses)?;

        std::fs::create_dir_all(&cfg.server.data_dir)?;
        let component = if cfg.is_provider() { "provider" } else { "mix" };
        let log = Arc::new(ServerLog::open(&cfg.server.data_dir, &cfg.logging, component)?);
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        log.notice(format!(
            "{identifier} ({}) listening on {addr}, {} sphinx worker(s)",
            cfg.identity(),
            cfg.debug.num_sphinx_workers
        ));

        #[cfg(unix)]
        let management = if cfg.is_provider() && cfg.management.enable {
            Some(ManagementServer::start(&cfg.management_socket(), log.clone())?)
        } else {
            None
        };

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(drain_loop(listener, log.clone(), stop_rx));

        let server = Self {
            identifier,
            addr,
            log,
            stop,
            tasks: Mutex::new(vec![task]),
            #[cfg(unix)]
            management,
        };
        if let Err(e) = server.publish(&cfg).await {
            server.log.error(format!("descriptor publication failed: {e}"));
            server.shutdown();
            server.wait().await;
            return Err(e);
        }
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    #[cfg(unix)]
    pub fn management(&self) -> Option<&ManagementServer> {
        self.management.as_ref()
    }

    async fn publish(&self, cfg: &NodeConfig) -> Result<()> {
        let (epoch, _, till) = epochtime::now();
        if !epochtime::next_epoch_publishable(till) {
            self.log.warning(format!(
                "{till:?} until epoch {}; next epoch descriptor may be late",
                epoch + 1
            ));
        }
        let signed = descriptor(cfg, epoch).sign(&cfg.debug.identity_key)?;
        let req = Request::PostDescriptor { signed };

        for peer in cfg.voting_peers()? {
            post_to(peer, &req, &self.log).await?;
        }
        Ok(())
    }
}

/// Self-description uploaded to the authorities.
pub fn descriptor(cfg: &NodeConfig, epoch: u64) -> NodeDescriptor {
    let identity_key = cfg.identity();
    let kaetzchen = cfg
        .provider
        .iter()
        .flat_map(|p| p.kaetzchen.iter())
        .filter(|k| !k.disable)
        .map(|k| ServiceDescriptor {
            capability: k.capability.clone(),
            endpoint: k.endpoint.clone(),
        })
        .collect();
    NodeDescriptor {
        identifier: cfg.server.identifier.clone(),
        identity_key,
        link_key: identity_key.to_link_key(),
        addresses: cfg.server.addresses.clone(),
        is_provider: cfg.is_provider(),
        kaetzchen,
        epoch,
    }
}

async fn post_to(peer: &Peer, req: &Request, log: &ServerLog) -> Result<()> {
    let mut last = None;
    for a in &peer.addresses {
        let addr: SocketAddr = match a.parse() {
            Ok(addr) => addr,
            Err(e) => {
                last = Some(DaemonError::config(format!("authority address '{a}': {e}")));
                continue;
            }
        };
        match wire::call(addr, req, DIRECTORY_TIMEOUT_MS).await {
            Ok(resp) => {
                return match resp.into_result() {
                    Ok(_) => {
                        log.info(format!("descriptor accepted by {}", peer.identity_public_key));
                        Ok(())
                    }
                    Err(e) => {
                        Err(DaemonError::rejected(format!("{}: {e}", peer.identity_public_key)))
                    }
                };
            }
            Err(e) => {
                log.debug(format!("authority {a} unreachable: {e}"));
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| {
        DaemonError::config(format!("authority {} has no addresses", peer.identity_public_key))
    }))
}

/// Nodes carry no traffic here; connections are accepted and dropped.
async fn drain_loop(listener: TcpListener, log: Arc<ServerLog>, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            acc = listener.accept() => match acc {
                Ok((_, peer)) => log.debug(format!("dropping connection from {peer}")),
                Err(e) => {
                    log.error(format!("accept failed: {e}"));
                    break;
                }
            }
        }
    }
    log.notice("node stopped");
}

#[async_trait]
impl Server for NodeServer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn shutdown(&self) {
        let _ = self.stop.send(true);
        #[cfg(unix)]
        if let Some(m) = &self.management {
            m.shutdown();
        }
    }

    async fn wait(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for t in tasks {
            let _ = t.await;
        }
        #[cfg(unix)]
        if let Some(m) = &self.management {
            m.wait().await;
        }
    }
}
