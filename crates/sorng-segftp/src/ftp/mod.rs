//! # sorng-segftp: Segmented FTP client
//!
//! Plain FTP (RFC 959) over passive data channels, with a transfer engine
//! that splits downloads across concurrent streams and resumes both
//! directions from whatever is already in place.
//!
//! Architecture:
//! - `types`: config, session info, progress and report structures
//! - `error`: two-tier error type (local sentinels vs. server codes)
//! - `status`: reply codes the client acts on
//! - `reply`: reply line parsing
//! - `protocol`: low-level command/reply codec
//! - `network`: process-wide network stack lifetime
//! - `connection`: TCP connect + greeting
//! - `control`: login, command exchanges, transfer completion tickets
//! - `passive`: PASV negotiation and data channels
//! - `directory`: CWD, MKD, LIST, RNFR/RNTO, …
//! - `plan`: segment layout and scratch file naming
//! - `progress`: `TRANSFER_PROGRESS` publishing
//! - `engine`: transfer engine handle and per-call options
//! - `download`: segmented, resumable RETR
//! - `upload`: STOR and resumable APPE

pub mod types;
pub mod error;
pub mod status;
pub mod reply;
pub mod protocol;
pub mod network;
pub mod connection;
pub mod control;
pub mod passive;
pub mod directory;
pub mod plan;
pub mod progress;
pub mod engine;
pub mod download;
pub mod upload;

// Re-exports for lib.rs consumers
pub use types::*;
pub use error::{outcome_code, FtpError, FtpErrorKind, FtpResult};
pub use reply::FtpReply;
pub use control::{ControlChannel, SharedControl, TransferTicket};
pub use engine::{DownloadOptions, TransferEngine, UploadOptions};
pub use plan::{Segment, TransferPlan};

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

lazy_static! {
    /// Global transfer progress map, keyed by transfer_id.
    pub static ref TRANSFER_PROGRESS: StdMutex<HashMap<String, TransferProgress>> =
        StdMutex::new(HashMap::new());
}
