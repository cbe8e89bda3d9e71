//! Client side of the provider management socket.

use std::path::Path;
use std::time::Duration;

use nyx_control::thwack::{parse_reply_line, Command, STATUS_OK, STATUS_SERVICE_READY};
use nyx_crypto::UserPublicKey;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::ManagementError;

/// Per-reply read budget.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// A complete, possibly multi-line, reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

pub struct ManagementClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ManagementClient {
    /// Connect and consume the `220` greeting.
    pub async fn connect(path: &Path) -> Result<Self, ManagementError> {
        let stream = UnixStream::connect(path).await?;
        let (rd, wr) = stream.into_split();
        let mut client = Self { reader: BufReader::new(rd), writer: wr };
        match client.expect("greeting", STATUS_SERVICE_READY).await {
            Ok(_) => Ok(client),
            Err(e) => {
                client.shutdown().await;
                Err(e)
            }
        }
    }

    /// Send one command and require `expected` as the reply status.
    pub async fn command(
        &mut self,
        cmd: &Command,
        expected: u16,
    ) -> Result<Reply, ManagementError> {
        self.writer.write_all(format!("{cmd}\r\n").as_bytes()).await?;
        self.writer.flush().await?;
        let verb = cmd.to_string().split_whitespace().next().unwrap_or_default().to_string();
        self.expect(&verb, expected).await
    }

    pub async fn add_user(
        &mut self,
        user: &str,
        key: &UserPublicKey,
    ) -> Result<Reply, ManagementError> {
        let cmd = Command::AddUser { user: user.to_string(), key: key.to_text() };
        self.command(&cmd, STATUS_OK).await
    }

    pub async fn quit(&mut self) -> Result<Reply, ManagementError> {
        self.command(&Command::Quit, STATUS_OK).await
    }

    /// Close our side. Errors are ignored; the peer may already be gone.
    pub async fn shutdown(mut self) {
        let _ = self.writer.shutdown().await;
    }

    async fn expect(&mut self, what: &str, expected: u16) -> Result<Reply, ManagementError> {
        let reply = self.read_reply(what).await?;
        if reply.code != expected {
            return Err(ManagementError::UnexpectedStatus {
                command: what.to_string(),
                expected,
                got: reply.code,
                text: reply.lines.join(" / "),
            });
        }
        debug!(command = what, code = reply.code, "management reply");
        Ok(reply)
    }

    async fn read_reply(&mut self, what: &str) -> Result<Reply, ManagementError> {
        let mut code = None;
        let mut lines = Vec::new();
        loop {
            let mut raw = String::new();
            let n = timeout(REPLY_TIMEOUT, self.reader.read_line(&mut raw))
                .await
                .map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::TimedOut, format!("{what}: no reply"))
                })??;
            if n == 0 {
                return Err(ManagementError::Closed(what.to_string()));
            }
            let line =
                parse_reply_line(&raw).map_err(|e| ManagementError::Malformed(e.to_string()))?;
            match code {
                None => code = Some(line.code),
                Some(c) if c != line.code => {
                    return Err(ManagementError::Malformed(format!(
                        "status changed from {c} to {} mid-reply",
                        line.code
                    )));
                }
                Some(_) => {}
            }
            lines.push(line.text.to_string());
            if !line.more {
                return Ok(Reply { code: line.code, lines });
            }
        }
    }
}

/// Register `user` with the provider listening on `path`, then `QUIT`.
/// The socket is shut down whatever the outcome.
pub async fn register_user(
    path: &Path,
    user: &str,
    key: &UserPublicKey,
) -> Result<(), ManagementError> {
    let mut client = ManagementClient::connect(path).await?;
    let res = async {
        client.add_user(user, key).await?;
        client.quit().await?;
        Ok::<_, ManagementError>(())
    }
    .await;
    client.shutdown().await;
    res
}
