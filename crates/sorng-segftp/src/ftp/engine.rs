//! Transfer engine: owns a shared control channel and runs segmented
//! downloads (`download.rs`) and uploads (`upload.rs`) on it.

use crate::ftp::control::{ControlChannel, SharedControl};
use crate::ftp::error::FtpResult;
use crate::ftp::types::*;
use tokio_util::sync::CancellationToken;

/// Per-call knobs for [`TransferEngine::download_with`].
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Overrides `FtpConnectionConfig::segments`.
    pub segments: Option<usize>,
    pub cancel: CancellationToken,
    /// Publish progress under this id in `TRANSFER_PROGRESS`.
    pub transfer_id: Option<String>,
}

impl DownloadOptions {
    pub fn with_segments(mut self, segments: usize) -> Self {
        self.segments = Some(segments);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_transfer_id(mut self, id: impl Into<String>) -> Self {
        self.transfer_id = Some(id.into());
        self
    }
}

/// Per-call knobs for [`TransferEngine::upload_with`].
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub cancel: CancellationToken,
    pub transfer_id: Option<String>,
}

pub struct TransferEngine {
    pub(crate) control: SharedControl,
    pub(crate) config: FtpConnectionConfig,
    pub(crate) session_id: String,
}

impl TransferEngine {
    pub fn new(control: ControlChannel) -> Self {
        let config = control.config.clone();
        let session_id = control.id.clone();
        Self {
            control: control.into_shared(),
            config,
            session_id,
        }
    }

    /// Connect, log in with the configured credentials and wrap the
    /// resulting session.
    pub async fn login(config: FtpConnectionConfig) -> FtpResult<Self> {
        Ok(Self::new(ControlChannel::login(config).await?))
    }

    pub async fn from_shared(control: SharedControl) -> Self {
        let (config, session_id) = {
            let c = control.lock().await;
            (c.config.clone(), c.id.clone())
        };
        Self {
            control,
            config,
            session_id,
        }
    }

    /// Handle to the control channel, e.g. for directory commands between
    /// transfers.
    pub fn control(&self) -> SharedControl {
        self.control.clone()
    }

    pub fn config(&self) -> &FtpConnectionConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn session_info(&self) -> FtpSessionInfo {
        self.control.lock().await.info()
    }

    pub async fn disconnect(&self) -> FtpResult<()> {
        self.control.lock().await.disconnect().await
    }
}
