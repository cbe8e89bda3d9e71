#![forbid(unsafe_code)]

//! Voting directory authority.
//!
//! Serves newline-delimited JSON requests on its TCP address: nodes post
//! signed descriptors, clients fetch the consensus. Only whitelisted nodes
//! are admitted.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use nyx_control::directory::{
    Consensus, NodeDescriptor, Request, Response, CODE_BAD_REQUEST, CODE_FORBIDDEN, CODE_INTERNAL,
};
use nyx_control::{epochtime, AuthorityConfig};
use nyx_crypto::IdentityPublicKey;
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::errors::{DaemonError, Result};
use crate::server_log::ServerLog;
use crate::{wire, Server, DIRECTORY_TIMEOUT_MS};

pub struct AuthorityServer {
    identifier: String,
    addr: SocketAddr,
    state: Arc<State>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct State {
    cfg: AuthorityConfig,
    log: ServerLog,
    descriptors: RwLock<BTreeMap<IdentityPublicKey, NodeDescriptor>>,
}

impl AuthorityServer {
    /// Validate `cfg`, create the data directory and log, bind and start serving.
    pub async fn new(mut cfg: AuthorityConfig) -> Result<Self> {
        cfg.fixup_and_validate()?;
        let identifier = cfg.authority.identifier.clone();
        let addr = first_addr(&identifier, &cfg.authority.addresses)?;

        std::fs::create_dir_all(&cfg.authority.data_dir)?;
        let log = ServerLog::open(&cfg.authority.data_dir, &cfg.logging, "authority")?;
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        log.notice(format!("{identifier} ({}) listening on {addr}", cfg.identity()));
        for peer in &cfg.authorities {
            let addrs = peer.addresses.join(",");
            log.debug(format!("peer authority {} at {addrs}", peer.identity_public_key));
        }
        log.info(format!(
            "whitelist: {} providers, {} mixes; {} layers",
            cfg.providers.len(),
            cfg.mixes.len(),
            cfg.debug.layers
        ));

        let state = Arc::new(State { cfg, log, descriptors: RwLock::new(BTreeMap::new()) });
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, state.clone(), stop_rx));

        Ok(Self { identifier, addr, state, stop, tasks: Mutex::new(vec![task]) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn identity(&self) -> IdentityPublicKey {
        self.state.cfg.identity()
    }

    /// Current consensus as this authority would serve it.
    pub fn consensus(&self) -> Consensus {
        self.state.consensus()
    }
}

#[async_trait]
impl Server for AuthorityServer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    async fn wait(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for t in tasks {
            let _ = t.await;
        }
    }
}

pub(crate) fn first_addr(id: &str, addrs: &[String]) -> Result<SocketAddr> {
    let first = addrs.first().ok_or_else(|| DaemonError::config(format!("{id}: no addresses")))?;
    first
        .parse()
        .map_err(|e| DaemonError::config(format!("{id}: bad address '{first}': {e}")))
}

async fn accept_loop(listener: TcpListener, state: Arc<State>, mut stop: watch::Receiver<bool>) {
    let mut conns = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
            acc = listener.accept() => match acc {
                Ok((stream, peer)) => {
                    let state = state.clone();
                    conns.spawn(async move {
                        if let Err(e) = serve_conn(stream, &state).await {
                            state.log.warning(format!("request from {peer} failed: {e}"));
                        }
                    });
                }
                Err(e) => {
                    state.log.error(format!("accept failed: {e}"));
                    break;
                }
            }
        }
    }
    conns.shutdown().await;
    state.log.notice("authority stopped");
}

async fn serve_conn(mut stream: TcpStream, state: &State) -> Result<()> {
    let mut buf = Vec::with_capacity(1024);
    wire::read_one_line_with_timeout(&mut stream, &mut buf, DIRECTORY_TIMEOUT_MS).await?;
    if buf.is_empty() {
        return Ok(());
    }
    let resp = match serde_json::from_slice::<Request>(&buf) {
        Ok(req) => state.handle(req),
        Err(e) => Response::err(CODE_BAD_REQUEST, format!("bad request: {e}")),
    };
    wire::write_json_line(&mut stream, &resp).await
}

impl State {
    fn handle(&self, req: Request) -> Response {
        match req {
            Request::GetConsensus => match serde_json::to_value(self.consensus()) {
                Ok(v) => Response::ok(Some(v)),
                Err(e) => Response::err(CODE_INTERNAL, e.to_string()),
            },
            Request::PostDescriptor { signed } => match self.admit(&signed) {
                Ok(desc) => {
                    self.log.notice(format!(
                        "accepted descriptor: {} ({}) epoch {}",
                        desc.identifier, desc.identity_key, desc.epoch
                    ));
                    Response::ok(None)
                }
                Err((code, msg)) => {
                    self.log.warning(format!("rejected descriptor: {msg}"));
                    Response::err(code, msg)
                }
            },
        }
    }

    fn admit(&self, signed: &str) -> std::result::Result<NodeDescriptor, (u16, String)> {
        let desc = NodeDescriptor::open(signed).map_err(|e| (CODE_BAD_REQUEST, e.to_string()))?;
        let (epoch, _, _) = epochtime::now();
        if desc.epoch != epoch && desc.epoch != epoch + 1 {
            return Err((
                CODE_BAD_REQUEST,
                format!(
                    "{}: descriptor for epoch {}, current is {epoch}",
                    desc.identifier, desc.epoch
                ),
            ));
        }

        let listed = if desc.is_provider {
            self.cfg.providers.iter().any(|p| {
                p.identity_key == desc.identity_key
                    && p.identifier.as_deref() == Some(desc.identifier.as_str())
            })
        } else {
            self.cfg.mixes.iter().any(|m| m.identity_key == desc.identity_key)
        };
        if !listed {
            return Err((
                CODE_FORBIDDEN,
                format!("{} ({}) is not whitelisted", desc.identifier, desc.identity_key),
            ));
        }

        self.descriptors.write().insert(desc.identity_key, desc.clone());
        Ok(desc)
    }

    fn consensus(&self) -> Consensus {
        let (epoch, _, _) = epochtime::now();
        let descs = self.descriptors.read();
        let layers = self.cfg.debug.layers.max(1) as usize;

        let providers = descs.values().filter(|d| d.is_provider).cloned().collect();
        let mut topology = vec![Vec::new(); layers];
        for (i, mix) in descs.values().filter(|d| !d.is_provider).enumerate() {
            topology[i % layers].push(mix.clone());
        }
        Consensus { epoch, authority: self.cfg.authority.identifier.clone(), providers, topology }
    }
}
