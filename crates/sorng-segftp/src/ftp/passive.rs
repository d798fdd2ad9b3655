//! Passive-mode data channels (RFC 959 PASV).
//!
//! The server opens a listening port and advertises it as
//! `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`; the client connects to
//! it *before* sending the file command that uses it.

use crate::ftp::control::ControlChannel;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::status;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

lazy_static! {
    /// Innermost parenthesised group of a PASV reply.
    static ref PASV_GROUP: Regex = Regex::new(r"\(([^()]*)\)").expect("PASV pattern is valid");
}

/// Address a PASV reply advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveEndpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl PassiveEndpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for PassiveEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Extract `(a,b,c,d,p1,p2)` from anywhere in `text`.
///
/// Exactly six comma-separated integers in `0..=255` are required.
pub fn parse_passive_endpoint(text: &str) -> FtpResult<PassiveEndpoint> {
    let group = PASV_GROUP
        .captures(text)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| FtpError::data_channel(format!("No address tuple in PASV reply: '{}'", text.trim_end())))?;

    let fields: Vec<&str> = group.as_str().split(',').map(str::trim).collect();
    if fields.len() != 6 {
        return Err(FtpError::data_channel(format!(
            "PASV tuple has {} fields, expected 6: '{}'",
            fields.len(),
            group.as_str()
        )));
    }

    let mut nums = [0u8; 6];
    for (slot, field) in nums.iter_mut().zip(&fields) {
        *slot = field.parse::<u8>().map_err(|_| {
            FtpError::data_channel(format!("PASV field '{}' is not a byte value", field))
        })?;
    }

    Ok(PassiveEndpoint {
        ip: Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]),
        port: u16::from(nums[4]) * 256 + u16::from(nums[5]),
    })
}

/// Issue `PASV`, parse the reply, connect to the advertised endpoint with the
/// control connection's timeout.
pub async fn open_passive(control: &mut ControlChannel) -> FtpResult<DataChannel> {
    let reply = control
        .send_command("PASV")
        .await
        .map_err(|e| FtpError::data_channel(format!("PASV exchange failed: {}", e.message)))?;
    if reply.code != status::ENTERING_PASSIVE_MODE {
        return Err(FtpError::data_channel(format!(
            "PASV refused: {}",
            reply.text()
        )));
    }
    let endpoint = parse_passive_endpoint(reply.text())?;
    DataChannel::connect(endpoint, control.io_timeout()).await
}

/// One short-lived data connection (one LIST, one segment, one upload).
pub struct DataChannel {
    stream: TcpStream,
    endpoint: PassiveEndpoint,
    io_timeout: Duration,
}

impl DataChannel {
    pub async fn connect(endpoint: PassiveEndpoint, io_timeout: Duration) -> FtpResult<Self> {
        let stream = timeout(io_timeout, TcpStream::connect(endpoint.socket_addr()))
            .await
            .map_err(|_| FtpError::data_channel(format!("Data connect to {} timed out", endpoint)))?
            .map_err(|e| FtpError::data_channel(format!("Data connect to {}: {}", endpoint, e)))?;
        log::trace!("data channel open to {}", endpoint);
        Ok(Self {
            stream,
            endpoint,
            io_timeout,
        })
    }

    pub fn endpoint(&self) -> PassiveEndpoint {
        self.endpoint
    }

    /// Receive up to `buf.len()` bytes; `0` means the server closed the
    /// channel.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> FtpResult<usize> {
        timeout(self.io_timeout, self.stream.read(buf))
            .await
            .map_err(|_| FtpError::transfer_failed(format!("Receive from {} timed out", self.endpoint)))?
            .map_err(|e| FtpError::transfer_failed(format!("Receive from {}: {}", self.endpoint, e)))
    }

    /// Send one chunk in full; anything less is a short send.
    pub async fn send_chunk(&mut self, chunk: &[u8]) -> FtpResult<()> {
        timeout(self.io_timeout, self.stream.write_all(chunk))
            .await
            .map_err(|_| {
                FtpError::transfer_failed(format!(
                    "Short send to {}: {} byte chunk timed out",
                    self.endpoint,
                    chunk.len()
                ))
            })?
            .map_err(|e| {
                FtpError::transfer_failed(format!(
                    "Short send to {}: {} byte chunk failed: {}",
                    self.endpoint,
                    chunk.len(),
                    e
                ))
            })
    }

    /// Drain the channel until the server closes it.
    pub async fn read_to_end(&mut self) -> FtpResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = self.read_chunk(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Flush and close. The server takes EOF as the end of an upload.
    pub async fn close(mut self) -> FtpResult<()> {
        let flushed = self.stream.flush().await;
        let shut = self.stream.shutdown().await;
        log::trace!("data channel to {} closed", self.endpoint);
        flushed
            .and(shut)
            .map_err(|e| FtpError::transfer_failed(format!("Closing data channel: {}", e)))
    }

    /// Drop the connection without a graceful shutdown (download side,
    /// after the segment boundary is reached).
    pub fn abandon(self) {
        log::trace!("data channel to {} dropped", self.endpoint);
    }
}
