#![forbid(unsafe_code)]

//! Consensus retrieval from the voting authorities.

use std::net::SocketAddr;

use nyx_control::directory::{Consensus, Request, Response};
use nyx_control::Peer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration, Instant};

use crate::error::{Error, Result};

/// Ask each authority in turn; the first usable answer wins.
pub async fn fetch_consensus(peers: &[Peer], timeout_ms: u64) -> Result<Consensus> {
    let mut last = Error::config("no authorities configured");
    for peer in peers {
        for a in &peer.addresses {
            let addr: SocketAddr = match a.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    last = Error::config(format!("authority address '{a}': {e}"));
                    continue;
                }
            };
            match get_consensus(addr, timeout_ms).await {
                Ok(c) => return Ok(c),
                Err(e) => {
                    tracing::debug!(authority = %addr, error = %e, "consensus fetch failed");
                    last = e;
                }
            }
        }
    }
    Err(last)
}

async fn get_consensus(addr: SocketAddr, timeout_ms: u64) -> Result<Consensus> {
    let budget = Duration::from_millis(timeout_ms);
    let mut stream = timeout(budget, TcpStream::connect(addr)).await.map_err(|_| Error::Timeout)??;
    let line = serde_json::to_string(&Request::GetConsensus)? + "\n";
    timeout(budget, stream.write_all(line.as_bytes())).await.map_err(|_| Error::Timeout)??;
    let mut buf = Vec::with_capacity(4096);
    read_one_line_with_timeout(&mut stream, &mut buf, timeout_ms).await?;
    let resp: Response = serde_json::from_slice(&buf)?;
    let data = resp
        .into_result()?
        .ok_or_else(|| Error::protocol(format!("{addr}: empty consensus reply")))?;
    Ok(serde_json::from_value(data)?)
}

async fn read_one_line_with_timeout<R: AsyncRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    timeout_ms: u64,
) -> Result<()> {
    let deadline = Duration::from_millis(timeout_ms);
    let start = Instant::now();
    out.clear();
    let mut buf = [0u8; 1024];
    loop {
        let remain = deadline.saturating_sub(start.elapsed());
        if remain.is_zero() {
            return Err(Error::Timeout);
        }
        let n = timeout(remain, reader.read(&mut buf)).await.map_err(|_| Error::Timeout)??;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
        if memchr::memchr(b'\n', &buf[..n]).is_some() {
            break;
        }
        if out.len() > 4 * 1024 * 1024 {
            return Err(Error::protocol("response too large"));
        }
    }
    if let Some(pos) = memchr::memchr(b'\n', out) {
        out.truncate(pos);
    }
    if out.last().copied() == Some(b'\r') {
        out.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn read_one_line_trims_crlf() -> Result<()> {
        let (mut a, mut b) = duplex(64);
        tokio::spawn(async move {
            let _ = b.write_all(b"{\"ok\":true}\r\n{\"ok\":false}\n").await;
        });
        let mut buf = Vec::new();
        read_one_line_with_timeout(&mut a, &mut buf, 1_000).await?;
        assert_eq!(buf, b"{\"ok\":true}");
        Ok(())
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (mut a, _b) = duplex(64);
        let mut buf = Vec::new();
        let res = read_one_line_with_timeout(&mut a, &mut buf, 50).await;
        assert!(matches!(res, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn no_authorities_is_a_config_error() {
        assert!(matches!(fetch_consensus(&[], 100).await, Err(Error::Config(_))));
    }
}
