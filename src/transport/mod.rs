//! Owns one TCP socket: line framing over CRLF, a non-blocking availability
//! probe, and teardown. Generalizes the teacher's `SmtpProtocol<R, W>` I/O
//! layer (which was generic over reader/writer traits for testability) into a
//! concrete transport the session worker can both read and probe.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::ProtocolError;

/// Direction of a framed line, used only to decide whether a line-logging
/// callback should mask its content (e.g. a LOGIN password).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDirection {
    Sent,
    Received,
}

/// A single connection's socket, plus the small read buffer needed to
/// implement a non-consuming `has_data` probe without desyncing from
/// `read_line`'s own buffering.
pub struct Transport {
    stream: TcpStream,
    read_buf: Vec<u8>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl Transport {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let local_addr = stream.local_addr().context("reading local socket address")?;
        let peer_addr = stream.peer_addr().context("reading peer socket address")?;
        Ok(Self {
            stream,
            read_buf: Vec::new(),
            local_addr,
            peer_addr,
        })
    }

    /// Appends `\r\n` to `line`, writes it, and flushes.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("-> {line}");
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Blocking (from the caller's perspective) read of the next CRLF- or
    /// LF-terminated line. Fails with [`ProtocolError::ConnectionClosed`] if
    /// the peer hangs up before a full line arrives.
    pub async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(idx) = self.read_buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.read_buf.drain(..=idx).collect();
                line.pop(); // '\n'
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let line = String::from_utf8_lossy(&line).into_owned();
                debug!("<- {line}");
                return Ok(line);
            }

            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Non-blocking probe for unread bytes. Never consumes data: bytes
    /// already buffered by a prior partial read are reported without a
    /// syscall, and otherwise a zero-copy `peek` is used.
    pub async fn has_data(&mut self) -> Result<bool> {
        if !self.read_buf.is_empty() {
            return Ok(true);
        }
        let mut probe = [0u8; 1];
        let n = self.stream.peek(&mut probe).await?;
        Ok(n > 0)
    }

    /// Idempotent: shutting down an already-shut-down stream is a no-op error
    /// we deliberately swallow.
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_host(&self) -> String {
        self.peer_addr.ip().to_string()
    }
}
