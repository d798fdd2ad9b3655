//! Low-level FTP command/reply codec (RFC 959 §4).
//!
//! Handles:
//! - Sending commands terminated with `\r\n`
//! - Receiving one reply per call through a fixed-size buffer
//! - The send/receive timeout policy of the control connection

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::reply::{self, FtpReply};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Log target for raw control-channel traffic.
pub const WIRE_TARGET: &str = "sorng_segftp::wire";

/// The FTP command/reply codec operating on split halves.
pub struct FtpCodec {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    reply_buffer: usize,
    send_timeout: Duration,
    /// `None` blocks indefinitely.
    recv_timeout: Option<Duration>,
}

impl FtpCodec {
    /// Wrap a connected control socket. Both timeouts start at `io_timeout`.
    pub fn from_tcp(stream: TcpStream, reply_buffer: usize, io_timeout: Duration) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: BufReader::with_capacity(reply_buffer, rd),
            writer: wr,
            reply_buffer,
            send_timeout: io_timeout,
            recv_timeout: Some(io_timeout),
        }
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout
    }

    pub fn set_recv_timeout(&mut self, limit: Option<Duration>) {
        self.recv_timeout = limit;
    }

    /// Send a raw FTP command. The CRLF terminator is appended here.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let line = format!("{}\r\n", cmd);
        timeout(self.send_timeout, self.writer.write_all(line.as_bytes()))
            .await
            .map_err(|_| FtpError::timeout(format!("Sending '{}' timed out", redact(cmd))))?
            .map_err(|e| FtpError::protocol_error(format!("Send failed: {}", e)))?;
        log::trace!(target: WIRE_TARGET, ">>> {}", redact(cmd));
        Ok(())
    }

    /// Receive one reply line (terminator included) of at most
    /// `reply_buffer` bytes.
    pub async fn receive_raw(&mut self) -> FtpResult<String> {
        let limit = self.recv_timeout;
        let cap = self.reply_buffer;
        let read = read_bounded_line(&mut self.reader, cap);
        let bytes = match limit {
            Some(d) => timeout(d, read)
                .await
                .map_err(|_| FtpError::timeout("Timed out waiting for reply"))?,
            None => read.await,
        }
        .map_err(|e| FtpError::protocol_error(format!("Receive failed: {}", e)))?;

        if bytes.is_empty() {
            return Err(FtpError::protocol_error("Server closed connection"));
        }
        let raw = String::from_utf8_lossy(&bytes).into_owned();
        log::trace!(target: WIRE_TARGET, "<<< {}", raw.trim_end());
        Ok(raw)
    }

    /// Read and parse a single reply.
    pub async fn read_reply(&mut self) -> FtpResult<FtpReply> {
        let raw = self.receive_raw().await?;
        reply::parse_reply(&raw)
    }

    /// Send a command and return the reply.
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpReply> {
        self.send_command(cmd).await?;
        self.read_reply().await
    }

    /// Close the write half; the server sees EOF on the control connection.
    pub async fn shutdown(&mut self) -> FtpResult<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| FtpError::protocol_error(format!("Shutdown failed: {}", e)))
    }
}

/// Fill `cap` bytes at most, stopping after the first `\n`. An empty result
/// means the peer closed the connection.
async fn read_bounded_line(
    reader: &mut BufReader<OwnedReadHalf>,
    cap: usize,
) -> std::io::Result<Vec<u8>> {
    let mut line = Vec::new();
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            break;
        }
        let room = cap - line.len();
        let window = &buf[..buf.len().min(room)];
        if let Some(i) = window.iter().position(|&b| b == b'\n') {
            line.extend_from_slice(&window[..=i]);
            reader.consume(i + 1);
            break;
        }
        let n = window.len();
        line.extend_from_slice(window);
        reader.consume(n);
        if line.len() >= cap {
            break;
        }
    }
    Ok(line)
}

/// Hide the password argument in logs.
fn redact(cmd: &str) -> &str {
    if cmd.get(..4).is_some_and(|verb| verb.eq_ignore_ascii_case("PASS")) {
        "PASS ****"
    } else {
        cmd
    }
}
