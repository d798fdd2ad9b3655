//! TCP transport for the FTP control connection.
//!
//! Handles host resolution, the connect timeout, and the 220 greeting.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::reply::FtpReply;
use crate::ftp::status;
use crate::ftp::types::FtpConnectionConfig;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

/// Resolve `host:port` and connect within `config.timeout_ms`, trying every
/// resolved address in turn.
pub async fn open_tcp(config: &FtpConnectionConfig, host: &str, port: u16) -> FtpResult<TcpStream> {
    let dur = config.timeout();
    let addrs: Vec<_> = timeout(dur, lookup_host((host, port)))
        .await
        .map_err(|_| FtpError::connection_failed(format!("Resolving {} timed out", host)))?
        .map_err(|e| FtpError::connection_failed(format!("Cannot resolve {}: {}", host, e)))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match timeout(dur, TcpStream::connect(addr)).await {
            Ok(Ok(tcp)) => {
                tcp.set_nodelay(true).ok();
                return Ok(tcp);
            }
            Ok(Err(e)) => last_err = Some(format!("{}: {}", addr, e)),
            Err(_) => last_err = Some(format!("{}: connect timed out", addr)),
        }
    }
    Err(FtpError::connection_failed(format!(
        "TCP connect to {}:{} failed ({})",
        host,
        port,
        last_err.unwrap_or_else(|| "no addresses resolved".into())
    )))
}

/// Establish the control connection and return a ready-to-use codec
/// **plus** the server greeting, which must be 220.
pub async fn connect(config: &FtpConnectionConfig) -> FtpResult<(FtpCodec, FtpReply)> {
    let tcp = open_tcp(config, &config.host, config.port).await?;
    let mut codec = FtpCodec::from_tcp(tcp, config.reply_buffer, config.timeout());

    let greeting = codec
        .read_reply()
        .await
        .map_err(|e| FtpError::connection_failed(format!("No greeting from {}: {}", config.address(), e.message)))?;
    if greeting.code != status::SERVICE_READY {
        log::info!("FTP server {} not ready: {}", config.address(), greeting.text());
        return Err(FtpError::connection_failed(format!(
            "Server not ready: {}",
            greeting.text()
        ))
        .with_code(greeting.code));
    }
    Ok((codec, greeting))
}
