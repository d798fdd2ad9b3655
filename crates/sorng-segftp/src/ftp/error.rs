//! FTP-specific error type.
//!
//! Errors are two-tier: a failure either happened locally (socket, file,
//! parse) or the server answered with a well-formed but unexpected code.
//! [`FtpError::status_code`] folds both tiers into the legacy integer
//! contract: `0` success, the verbatim server code when one is known, and a
//! small negative sentinel for purely local failures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Local file could not be opened or created.
pub const SENTINEL_FILE_OPEN: i32 = -1;
/// Passive data channel could not be negotiated or connected.
pub const SENTINEL_DATA_CHANNEL: i32 = -2;
/// Local I/O failure while streaming or merging.
pub const SENTINEL_LOCAL_IO: i32 = -3;
pub const SENTINEL_CANCELLED: i32 = -4;
/// Resolve/connect/greeting failure or a dropped control connection.
pub const SENTINEL_CONNECTION: i32 = -5;
/// Malformed reply, invalid configuration, or another local fault without a
/// server code attached.
pub const SENTINEL_PROTOCOL: i32 = -6;

/// Categorised FTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
    /// Zero-based index of the download segment that failed.
    pub segment: Option<usize>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// DNS resolution, TCP connect or greeting failure.
    ConnectionFailed,
    /// Credentials rejected.
    AuthFailed,
    /// Reply absent, empty, or the control connection broke mid-exchange.
    ProtocolError,
    /// Reply present but missing the expected structure or argument.
    ParseError,
    /// PASV reply unusable or the data connection could not be opened.
    DataChannelFailed,
    /// SIZE did not answer with a file status.
    SizeQueryFailed,
    /// Local file could not be opened or created.
    FileOpenFailed,
    /// Local file read/write/seek failed.
    FileIoFailed,
    /// Short send/receive or merge failure.
    TransferFailed,
    /// Well-formed reply with an unexpected code.
    ServerError,
    Timeout,
    Cancelled,
    InvalidConfig,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            segment: None,
            session_id: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_segment(mut self, index: usize) -> Self {
        self.segment = Some(index);
        self
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolError, msg)
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ParseError, msg)
    }

    pub fn data_channel(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::DataChannelFailed, msg)
    }

    pub fn size_query(code: u16, msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::SizeQueryFailed, msg).with_code(code)
    }

    pub fn file_open(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::FileOpenFailed, msg)
    }

    pub fn file_io(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::FileIoFailed, msg)
    }

    pub fn transfer_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TransferFailed, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Cancelled, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    /// A well-formed reply whose code the caller did not expect.
    pub fn from_reply(code: u16, text: &str) -> Self {
        Self::new(FtpErrorKind::ServerError, text.trim_end().to_string()).with_code(code)
    }

    // ── Two-tier contract ────────────────────────────────────────

    /// Whether the failure originated on this side of the connection.
    pub fn is_local(&self) -> bool {
        self.code.is_none()
    }

    /// Legacy integer result: the server code when one is attached,
    /// otherwise a negative sentinel naming the local failure class.
    pub fn status_code(&self) -> i32 {
        if let Some(code) = self.code {
            return i32::from(code);
        }
        match self.kind {
            FtpErrorKind::FileOpenFailed => SENTINEL_FILE_OPEN,
            FtpErrorKind::DataChannelFailed => SENTINEL_DATA_CHANNEL,
            FtpErrorKind::FileIoFailed | FtpErrorKind::TransferFailed => SENTINEL_LOCAL_IO,
            FtpErrorKind::Cancelled => SENTINEL_CANCELLED,
            FtpErrorKind::ConnectionFailed | FtpErrorKind::Timeout => SENTINEL_CONNECTION,
            FtpErrorKind::AuthFailed
            | FtpErrorKind::ProtocolError
            | FtpErrorKind::ParseError
            | FtpErrorKind::SizeQueryFailed
            | FtpErrorKind::ServerError
            | FtpErrorKind::InvalidConfig => SENTINEL_PROTOCOL,
        }
    }
}

/// Collapse any operation result into the legacy integer contract
/// (`0` on success).
pub fn outcome_code<T>(result: &FtpResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status_code(),
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[FTP {:?}", self.kind)?;
        if let Some(code) = self.code {
            write!(f, " {}", code)?;
        }
        if let Some(segment) = self.segment {
            write!(f, " segment {}", segment + 1)?;
        }
        write!(f, "] {}", self.message)
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(format!("I/O timeout: {}", e))
        } else {
            Self::file_io(e.to_string())
        }
    }
}

impl From<FtpError> for String {
    fn from(e: FtpError) -> String {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_code_passes_through() {
        let err = FtpError::from_reply(550, "550 No such file\r\n");
        assert_eq!(err.kind, FtpErrorKind::ServerError);
        assert_eq!(err.status_code(), 550);
        assert!(!err.is_local());
        assert_eq!(err.message, "550 No such file");
    }

    #[test]
    fn local_failures_map_to_sentinels() {
        assert_eq!(FtpError::file_open("x").status_code(), SENTINEL_FILE_OPEN);
        assert_eq!(FtpError::data_channel("x").status_code(), SENTINEL_DATA_CHANNEL);
        assert_eq!(FtpError::file_io("x").status_code(), SENTINEL_LOCAL_IO);
        assert_eq!(FtpError::transfer_failed("x").status_code(), SENTINEL_LOCAL_IO);
        assert_eq!(FtpError::cancelled("x").status_code(), SENTINEL_CANCELLED);
        assert!(FtpError::file_open("x").is_local());
    }

    #[test]
    fn size_query_carries_code() {
        let err = FtpError::size_query(500, "SIZE not understood");
        assert_eq!(err.kind, FtpErrorKind::SizeQueryFailed);
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn outcome_code_is_zero_on_success() {
        let ok: FtpResult<u64> = Ok(12);
        assert_eq!(outcome_code(&ok), 0);
        let err: FtpResult<u64> = Err(FtpError::from_reply(530, "530 Not logged in"));
        assert_eq!(outcome_code(&err), 530);
    }

    #[test]
    fn display_names_segment_one_based() {
        let err = FtpError::data_channel("PASV connect refused").with_segment(1);
        assert_eq!(
            err.to_string(),
            "[FTP DataChannelFailed segment 2] PASV connect refused"
        );
    }

    #[test]
    fn io_timeout_becomes_timeout_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let err: FtpError = io.into();
        assert_eq!(err.kind, FtpErrorKind::Timeout);
    }
}
