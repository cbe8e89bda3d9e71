#![forbid(unsafe_code)]

//! Provider management endpoint: a Unix socket speaking the thwack line protocol.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nyx_control::thwack::{
    format_reply, Command, MAX_LINE_LEN, STATUS_OK, STATUS_SERVICE_READY, STATUS_SYNTAX_ERROR,
    STATUS_TRANSACTION_FAILED,
};
use nyx_crypto::UserPublicKey;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::errors::Result;
use crate::server_log::ServerLog;

/// Users registered at a provider.
#[derive(Default)]
pub struct UserDb {
    users: RwLock<BTreeMap<String, UserPublicKey>>,
}

impl UserDb {
    /// Returns `false` if the user already exists.
    pub fn add(&self, user: &str, key: UserPublicKey) -> bool {
        let mut users = self.users.write();
        if users.contains_key(user) {
            return false;
        }
        users.insert(user.to_string(), key);
        true
    }

    pub fn remove(&self, user: &str) -> bool {
        self.users.write().remove(user).is_some()
    }

    pub fn get(&self, user: &str) -> Option<UserPublicKey> {
        self.users.read().get(user).copied()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ManagementServer {
    path: PathBuf,
    users: Arc<UserDb>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ManagementServer {
    /// Bind `path` (replacing a stale socket file) and start serving.
    pub fn start(path: &Path, log: Arc<ServerLog>) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        let users = Arc::new(UserDb::default());
        let (stop, mut stop_rx) = watch::channel(false);
        log.notice(format!("management interface listening on {}", path.display()));

        let db = users.clone();
        let sock_path = path.to_path_buf();
        let task = tokio::spawn(async move {
            let mut sessions = JoinSet::new();
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                    acc = listener.accept() => match acc {
                        Ok((stream, _)) => {
                            let (db, log) = (db.clone(), log.clone());
                            sessions.spawn(async move {
                                if let Err(e) = serve_session(stream, &db, &log).await {
                                    log.warning(format!("management session error: {e}"));
                                }
                            });
                        }
                        Err(e) => {
                            log.error(format!("management accept failed: {e}"));
                            break;
                        }
                    }
                }
            }
            sessions.shutdown().await;
            let _ = std::fs::remove_file(&sock_path);
            log.notice("management interface stopped");
        });

        Ok(Self { path: path.to_path_buf(), users, stop, task: Mutex::new(Some(task)) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn users(&self) -> Arc<UserDb> {
        self.users.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    pub async fn wait(&self) {
        let task = self.task.lock().take();
        if let Some(t) = task {
            let _ = t.await;
        }
    }
}

enum Inbound {
    Line(String),
    TooLong,
    Closed,
}

/// Next command line, never buffering more than `MAX_LINE_LEN + 1` bytes.
/// The rest of an over-long line is skipped.
async fn next_line<R: AsyncBufRead + Unpin>(rd: &mut R, buf: &mut Vec<u8>) -> Result<Inbound> {
    buf.clear();
    let n = (&mut *rd).take(MAX_LINE_LEN as u64 + 1).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(Inbound::Closed);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_LINE_LEN {
        skip_line(rd).await?;
        return Ok(Inbound::TooLong);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Inbound::Line(String::from_utf8_lossy(buf).into_owned()))
}

async fn skip_line<R: AsyncBufRead + Unpin>(rd: &mut R) -> Result<()> {
    loop {
        let chunk = rd.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(pos) = memchr::memchr(b'\n', chunk) {
            rd.consume(pos + 1);
            return Ok(());
        }
        let len = chunk.len();
        rd.consume(len);
    }
}

async fn serve_session(stream: UnixStream, db: &UserDb, log: &ServerLog) -> Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    let mut buf = Vec::with_capacity(256);
    wr.write_all(format_reply(STATUS_SERVICE_READY, &["management ready"]).as_bytes()).await?;

    loop {
        let line = match next_line(&mut rd, &mut buf).await? {
            Inbound::Line(line) => line,
            Inbound::TooLong => {
                let reply = format_reply(STATUS_SYNTAX_ERROR, &["line too long"]);
                wr.write_all(reply.as_bytes()).await?;
                continue;
            }
            Inbound::Closed => break,
        };
        let (reply, quit) = match Command::parse(&line) {
            Ok(cmd) => execute(cmd, db, log),
            Err(e) => (format_reply(e.status(), &[&e.to_string()]), false),
        };
        wr.write_all(reply.as_bytes()).await?;
        if quit {
            break;
        }
    }
    wr.shutdown().await?;
    Ok(())
}

fn execute(cmd: Command, db: &UserDb, log: &ServerLog) -> (String, bool) {
    match cmd {
        Command::AddUser { user, key } => {
            let key = match UserPublicKey::from_text(&key) {
                Ok(k) => k,
                Err(e) => return (format_reply(STATUS_SYNTAX_ERROR, &[&e.to_string()]), false),
            };
            if db.add(&user, key) {
                log.notice(format!("added user {user}"));
                (format_reply(STATUS_OK, &["OK"]), false)
            } else {
                (format_reply(STATUS_TRANSACTION_FAILED, &["user already exists"]), false)
            }
        }
        Command::RemoveUser { user } => {
            if db.remove(&user) {
                log.notice(format!("removed user {user}"));
                (format_reply(STATUS_OK, &["OK"]), false)
            } else {
                (format_reply(STATUS_TRANSACTION_FAILED, &["no such user"]), false)
            }
        }
        Command::Quit => (format_reply(STATUS_OK, &["Bye"]), true),
    }
}
