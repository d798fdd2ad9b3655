//! # SortOfRemote NG – Segmented FTP
//!
//! Plain FTP (RFC 959) client built around a resumable transfer engine:
//!   • Control channel with login handshake and serialized command/reply exchanges
//!   • Passive-mode (PASV) data channel negotiation
//!   • Multi-stream segmented downloads into a pre-sized scratch file, merged on success
//!   • Resume-by-length downloads and resume-by-size (APPE) uploads
//!   • Two-tier error model (local sentinels vs. verbatim server codes)
//!   • Thin directory command set (CWD, MKD, LIST, RNFR/RNTO, …)
//!   • Transfer progress tracking

pub mod ftp;
