#![forbid(unsafe_code)]

use std::net::SocketAddr;

use nyx_control::directory::{Request, Response};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration, Instant};

use crate::errors::{DaemonError, Result};

/// Upper bound on a single request or response line.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Read up to the first newline or until `timeout_ms` elapses. CR/LF are stripped.
pub async fn read_one_line_with_timeout<R: AsyncRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    timeout_ms: u64,
) -> std::io::Result<()> {
    let deadline = Duration::from_millis(timeout_ms);
    let start = Instant::now();
    out.clear();
    let mut tmp = [0u8; 1024];
    loop {
        let remain = deadline.saturating_sub(start.elapsed());
        if remain.is_zero() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "line read timed out"));
        }
        let n = match timeout(remain, reader.read(&mut tmp)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "line read timed out",
                ))
            }
        };
        if n == 0 {
            break;
        }
        out.extend_from_slice(&tmp[..n]);
        if memchr::memchr(b'\n', &tmp[..n]).is_some() || out.len() > MAX_LINE_LEN {
            break;
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

pub async fn write_json_line<W: AsyncWrite + Unpin, T: Serialize>(w: &mut W, v: &T) -> Result<()> {
    let mut buf = serde_json::to_vec(v)?;
    buf.push(b'\n');
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

/// One request/response exchange with an authority.
pub async fn call(addr: SocketAddr, req: &Request, timeout_ms: u64) -> Result<Response> {
    let mut stream = timeout(Duration::from_millis(timeout_ms), TcpStream::connect(addr))
        .await
        .map_err(|_| DaemonError::timeout(format!("connect to {addr}")))??;
    write_json_line(&mut stream, req).await?;
    let mut buf = Vec::with_capacity(1024);
    read_one_line_with_timeout(&mut stream, &mut buf, timeout_ms).await?;
    if buf.is_empty() {
        return Err(DaemonError::protocol(format!("{addr} closed without a response")));
    }
    Ok(serde_json::from_slice(&buf)?)
}
