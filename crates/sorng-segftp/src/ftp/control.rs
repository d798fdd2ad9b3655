//! Stateful control channel: owns the control connection and issues commands.
//!
//! Lifecycle: `connect()` → `authenticate()` → commands / transfers →
//! `disconnect()`.
//!
//! Transfers leave a terminal reply (226 and friends) owed on the control
//! connection after their data channel closes. Several segment workers can
//! have such a reply outstanding at once, so each accepted transfer takes a
//! [`TransferTicket`]. Servers send terminal replies in the order the data
//! channels finish, so a reply is credited to the oldest ticket whose data
//! channel is already closed ("drained"). Replies that arrive before any
//! ticket is drained wait in a queue until one is. One that shows up while
//! somebody else is waiting for a command reply is stashed instead of being
//! returned as that command's answer.

use crate::ftp::connection;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::network::{self, NetworkLease};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::reply::{self, FtpReply};
use crate::ftp::status;
use crate::ftp::types::*;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Control channel shared by concurrent segment workers. The mutex keeps
/// command/reply exchanges from interleaving.
pub type SharedControl = Arc<Mutex<ControlChannel>>;

const STREAMING: u8 = 0;
const DRAINED: u8 = 1;
const ABANDONED: u8 = 2;

/// Claim on the terminal reply of one accepted transfer.
///
/// The owning worker marks the ticket once its data channel is closed.
/// Marking does not need the control channel lock, so a worker still
/// queueing for the lock is already eligible for its reply.
#[derive(Debug, Clone)]
pub struct TransferTicket {
    id: u64,
    state: Arc<AtomicU8>,
}

impl TransferTicket {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: Arc::new(AtomicU8::new(STREAMING)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The data channel is closed and the terminal reply may come any time.
    pub fn mark_drained(&self) {
        // Never downgrades an abandoned ticket.
        self.state.fetch_max(DRAINED, Ordering::AcqRel);
    }

    /// The data channel is closed and nobody will collect the reply; it is
    /// dropped when it arrives.
    pub fn abandon(&self) {
        self.state.store(ABANDONED, Ordering::Release);
    }

    pub fn is_drained(&self) -> bool {
        self.state.load(Ordering::Acquire) != STREAMING
    }

    fn is_abandoned(&self) -> bool {
        self.state.load(Ordering::Acquire) == ABANDONED
    }
}

/// A connected FTP control channel.
pub struct ControlChannel {
    pub id: String,
    codec: FtpCodec,
    pub config: FtpConnectionConfig,
    pub info: FtpSessionInfo,
    last_reply: Option<FtpReply>,
    lease: NetworkLease,
    next_ticket: u64,
    /// Tickets still owed a terminal reply, oldest first.
    outstanding: VecDeque<TransferTicket>,
    /// Terminal replies read while no outstanding ticket was drained.
    unclaimed: VecDeque<FtpReply>,
    /// Terminal replies credited to a ticket nobody was waiting on yet.
    completed: HashMap<u64, FtpReply>,
}

impl ControlChannel {
    /// Open the control connection and read the 220 greeting. No
    /// credentials are sent.
    pub async fn connect(config: FtpConnectionConfig) -> FtpResult<Self> {
        config.validate()?;

        let lease = network::acquire();
        let (codec, greeting) = connection::connect(&config).await?;
        let id = Uuid::new_v4().to_string();
        log::info!("FTP session {} connected to {}", id, config.address());

        let now = Utc::now();
        let info = FtpSessionInfo {
            id: id.clone(),
            host: config.host.clone(),
            port: config.port,
            username: None,
            login_state: LoginState::Connected,
            connected: true,
            server_banner: greeting.message().to_string(),
            connected_at: now,
            last_activity: now,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
        };

        Ok(Self {
            id,
            codec,
            config,
            info,
            last_reply: Some(greeting),
            lease,
            next_ticket: 0,
            outstanding: VecDeque::new(),
            unclaimed: VecDeque::new(),
            completed: HashMap::new(),
        })
    }

    /// Connect and log in with the configured credentials.
    ///
    /// A connect failure surfaces as `ConnectionFailed`, rejected
    /// credentials as `AuthFailed`; the connection is closed in the latter
    /// case.
    pub async fn login(config: FtpConnectionConfig) -> FtpResult<Self> {
        let username = config.username.clone();
        let password = config.password.clone();
        let mut control = Self::connect(config).await?;
        if let Err(e) = control.authenticate(&username, &password).await {
            control.disconnect().await.ok();
            return Err(e);
        }
        Ok(control)
    }

    /// USER/PASS handshake.
    ///
    /// The receive timeout is lifted for this exchange only and set back to
    /// the connection default afterwards, whether or not the login worked.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> FtpResult<()> {
        self.codec.set_recv_timeout(None);
        let outcome = self.login_exchange(username, password).await;
        self.codec.set_recv_timeout(Some(self.config.timeout()));

        match outcome {
            Ok(()) => {
                self.info.username = Some(username.to_string());
                self.info.login_state = if is_anonymous(username) {
                    LoginState::Anonymous
                } else {
                    LoginState::Authenticated
                };
                log::info!("FTP session {} logged in as {}", self.id, username);
                Ok(())
            }
            Err(e) => Err(e.with_session(self.id.clone())),
        }
    }

    async fn login_exchange(&mut self, username: &str, password: &str) -> FtpResult<()> {
        let user = self.send_command(&format!("USER {}", username)).await?;
        match user.code {
            status::LOGGED_IN => return Ok(()),
            status::PASSWORD_REQUIRED => {}
            code => {
                return Err(FtpError::auth_failed(format!("USER rejected: {}", user.text()))
                    .with_code(code))
            }
        }

        let pass = self.send_command(&format!("PASS {}", password)).await?;
        if pass.code != status::LOGGED_IN {
            return Err(
                FtpError::auth_failed(format!("Login failed: {}", pass.text())).with_code(pass.code)
            );
        }
        Ok(())
    }

    // ─── Command / reply ─────────────────────────────────────────

    /// Send one command and return its reply.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<FtpReply> {
        self.codec.send_command(cmd).await?;
        self.command_reply().await
    }

    /// Like [`send_command`](Self::send_command) but the reply must carry
    /// an argument (`213 3582`).
    pub async fn send_command_with_argument(&mut self, cmd: &str) -> FtpResult<FtpReply> {
        let plain = self.send_command(cmd).await?;
        let reply = reply::parse_reply_with_argument(&plain.raw)?;
        self.last_reply = Some(reply.clone());
        Ok(reply)
    }

    /// Read one reply without sending anything.
    pub async fn read_reply(&mut self) -> FtpResult<FtpReply> {
        let reply = self.codec.read_reply().await?;
        self.touch();
        self.last_reply = Some(reply.clone());
        Ok(reply)
    }

    async fn command_reply(&mut self) -> FtpResult<FtpReply> {
        loop {
            let reply = self.codec.read_reply().await?;
            if !self.outstanding.is_empty() && status::is_data_completion(reply.code) {
                self.credit(reply);
                continue;
            }
            self.touch();
            self.last_reply = Some(reply.clone());
            return Ok(reply);
        }
    }

    // ─── Transfer tickets ────────────────────────────────────────

    /// Register an accepted transfer (after 150/125) whose terminal reply
    /// is still to come.
    pub fn begin_transfer(&mut self) -> TransferTicket {
        let ticket = TransferTicket::new(self.next_ticket);
        self.next_ticket += 1;
        self.outstanding.push_back(ticket.clone());
        ticket
    }

    /// Wait for the terminal reply belonging to `ticket`. The caller must
    /// already have closed the ticket's data channel; the ticket is marked
    /// drained here in case it was not.
    pub async fn read_completion(&mut self, ticket: TransferTicket) -> FtpResult<FtpReply> {
        ticket.mark_drained();
        loop {
            self.settle();
            if let Some(reply) = self.completed.remove(&ticket.id) {
                self.last_reply = Some(reply.clone());
                return Ok(reply);
            }
            if !self.outstanding.iter().any(|t| t.id == ticket.id) {
                return Err(FtpError::protocol_error(format!(
                    "Transfer ticket {} is not outstanding",
                    ticket.id
                )));
            }

            let reply = match self.codec.read_reply().await {
                Ok(reply) => reply,
                Err(e) => {
                    // Nobody will come back for this ticket.
                    ticket.abandon();
                    return Err(e);
                }
            };
            self.touch();
            if !status::is_transfer_terminal(reply.code) {
                return Err(FtpError::from_reply(reply.code, reply.text()));
            }
            self.unclaimed.push_back(reply);
        }
    }

    /// Transfers still owed a terminal reply.
    pub fn pending_transfers(&self) -> usize {
        self.outstanding.len()
    }

    fn credit(&mut self, reply: FtpReply) {
        self.unclaimed.push_back(reply);
        self.settle();
    }

    /// Hand queued terminal replies to drained tickets, oldest ticket
    /// first. Replies for abandoned tickets are dropped.
    fn settle(&mut self) {
        while !self.unclaimed.is_empty() {
            let Some(pos) = self.outstanding.iter().position(TransferTicket::is_drained) else {
                break;
            };
            let (Some(ticket), Some(reply)) = (self.outstanding.remove(pos), self.unclaimed.pop_front()) else {
                break;
            };
            if ticket.is_abandoned() {
                log::debug!("FTP session {}: dropped {} for abandoned transfer {}", self.id, reply.code, ticket.id);
            } else {
                log::trace!("FTP session {}: {} credited to transfer {}", self.id, reply.code, ticket.id);
                self.completed.insert(ticket.id, reply);
            }
        }
        if self.outstanding.is_empty() {
            for reply in self.unclaimed.drain(..) {
                log::warn!("FTP session {}: stray reply '{}'", self.id, reply.text());
            }
        }
    }

    // ─── TYPE / SIZE ─────────────────────────────────────────────

    pub async fn set_type(&mut self, tt: TransferType) -> FtpResult<()> {
        self.send_command(tt.command())
            .await?
            .expect_code(status::COMMAND_OK)?;
        Ok(())
    }

    /// Size of a remote file. Anything but 213 is a `SizeQueryFailed`
    /// carrying the server code.
    pub async fn size(&mut self, path: &str) -> FtpResult<u64> {
        let plain = self.send_command(&format!("SIZE {}", path)).await?;
        if plain.code != status::FILE_STATUS {
            return Err(FtpError::size_query(
                plain.code,
                format!("SIZE {} failed: {}", path, plain.text()),
            ));
        }
        let reply = reply::parse_reply_with_argument(&plain.raw)?;
        reply::parse_size_argument(&reply)
    }

    // ─── QUIT ────────────────────────────────────────────────────

    /// Send QUIT, close the socket and give back the network-stack lease.
    pub async fn disconnect(&mut self) -> FtpResult<()> {
        if !self.info.connected {
            return Ok(());
        }
        match self.codec.execute("QUIT").await {
            Ok(reply) if reply.code != status::SERVICE_CLOSING_CONTROL => {
                log::debug!("FTP session {}: QUIT answered '{}'", self.id, reply.text())
            }
            Ok(_) => {}
            Err(e) => log::warn!("FTP session {}: QUIT failed: {}", self.id, e),
        }
        if let Err(e) = self.codec.shutdown().await {
            log::debug!("FTP session {}: socket shutdown failed: {}", self.id, e);
        }
        self.info.connected = false;
        self.lease.release();
        log::info!("FTP session {} disconnected", self.id);
        Ok(())
    }

    // ─── Utility ─────────────────────────────────────────────────

    pub(crate) fn touch(&mut self) {
        self.info.last_activity = Utc::now();
    }

    pub(crate) fn record_download(&mut self, bytes: u64) {
        self.info.bytes_downloaded += bytes;
    }

    pub(crate) fn record_upload(&mut self, bytes: u64) {
        self.info.bytes_uploaded += bytes;
    }

    /// Timeout for data connections opened through this session.
    pub fn io_timeout(&self) -> Duration {
        self.config.timeout()
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        self.codec.recv_timeout()
    }

    pub fn last_reply(&self) -> Option<&FtpReply> {
        self.last_reply.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.info.connected
    }

    pub fn info(&self) -> FtpSessionInfo {
        self.info.clone()
    }

    pub fn into_shared(self) -> SharedControl {
        Arc::new(Mutex::new(self))
    }
}

fn is_anonymous(username: &str) -> bool {
    username.eq_ignore_ascii_case("anonymous") || username.eq_ignore_ascii_case("ftp")
}
