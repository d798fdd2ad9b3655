//! Uploads: STOR (replace) and SIZE + APPE (resumable append).

use crate::ftp::control::ControlChannel;
use crate::ftp::engine::{TransferEngine, UploadOptions};
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::passive;
use crate::ftp::progress::ProgressTracker;
use crate::ftp::reply;
use crate::ftp::status;
use crate::ftp::types::*;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

impl TransferEngine {
    /// Create or overwrite `remote` with the contents of `local`.
    pub async fn upload_replace(&self, local: impl AsRef<Path>, remote: &str) -> FtpResult<UploadReport> {
        self.upload_with(local, remote, UploadMode::Replace, UploadOptions::default())
            .await
    }

    /// Send only the part of `local` that `remote` does not have yet.
    pub async fn upload_append(&self, local: impl AsRef<Path>, remote: &str) -> FtpResult<UploadReport> {
        self.upload_with(local, remote, UploadMode::Append, UploadOptions::default())
            .await
    }

    pub async fn upload_with(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
        mode: UploadMode,
        opts: UploadOptions,
    ) -> FtpResult<UploadReport> {
        self.upload_inner(local.as_ref(), remote, mode, opts)
            .await
            .map_err(|e| e.with_session(self.session_id.clone()))
    }

    async fn upload_inner(
        &self,
        local: &Path,
        remote: &str,
        mode: UploadMode,
        opts: UploadOptions,
    ) -> FtpResult<UploadReport> {
        let started = Instant::now();
        let mut file = File::open(local)
            .await
            .map_err(|e| FtpError::file_open(format!("Cannot open {}: {}", local.display(), e)))?;
        let local_size = file
            .metadata()
            .await
            .map_err(|e| FtpError::file_io(format!("Cannot stat {}: {}", local.display(), e)))?
            .len();

        // One stream only, so the session stays locked for the whole upload.
        let mut control = self.control.lock().await;

        let resumed_from = match mode {
            UploadMode::Replace => 0,
            UploadMode::Append => remote_length(&mut control, remote).await?,
        };
        let report = |bytes_transferred: u64, data_channel_opened: bool| UploadReport {
            mode,
            local_size,
            resumed_from,
            bytes_transferred,
            data_channel_opened,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if mode == UploadMode::Append && local_size <= resumed_from {
            log::debug!("{} already holds {} bytes, nothing to append", remote, resumed_from);
            return Ok(report(0, false));
        }
        if resumed_from > 0 {
            file.seek(SeekFrom::Start(resumed_from))
                .await
                .map_err(|e| FtpError::file_io(format!("Seek in {}: {}", local.display(), e)))?;
        }

        control.set_type(TransferType::Binary).await?;
        let mut data = passive::open_passive(&mut control).await?;
        let resp = control
            .send_command(&format!("{} {}", mode.command(), remote))
            .await?;
        if !status::is_transfer_open(resp.code) {
            data.abandon();
            return Err(FtpError::from_reply(resp.code, resp.text()));
        }
        let ticket = control.begin_transfer();

        let progress = ProgressTracker::new(
            opts.transfer_id.clone(),
            self.session_id.clone(),
            TransferDirection::Upload,
            local.display().to_string(),
            remote,
            local_size,
            resumed_from,
        );

        let mut buf = vec![0u8; self.config.chunk_size];
        let mut sent = 0u64;
        let streamed: FtpResult<()> = async {
            loop {
                if opts.cancel.is_cancelled() {
                    return Err(FtpError::cancelled(format!("Upload cancelled after {} bytes", sent)));
                }
                let n = file
                    .read(&mut buf)
                    .await
                    .map_err(|e| FtpError::file_io(format!("Read from {}: {}", local.display(), e)))?;
                if n == 0 {
                    return Ok(());
                }
                data.send_chunk(&buf[..n]).await?;
                sent += n as u64;
                progress.add(n as u64);
            }
        }
        .await;

        if let Err(e) = streamed {
            data.abandon();
            ticket.abandon();
            progress.set_state(if e.kind == FtpErrorKind::Cancelled {
                TransferState::Cancelled
            } else {
                TransferState::Failed
            });
            control.record_upload(sent);
            return Err(e);
        }
        // EOF on the data channel marks the end of the file.
        if let Err(e) = data.close().await {
            ticket.abandon();
            control.record_upload(sent);
            progress.set_state(TransferState::Failed);
            return Err(e);
        }
        ticket.mark_drained();

        let done = control.read_completion(ticket).await?;
        control.record_upload(sent);
        if done.code != status::DATA_CONNECTION_CLOSE {
            progress.set_state(TransferState::Failed);
            return Err(FtpError::from_reply(done.code, done.text()));
        }
        progress.set_state(TransferState::Completed);
        log::debug!("{} {} bytes to {} (from offset {})", mode.command(), sent, remote, resumed_from);
        Ok(report(sent, true))
    }
}

/// Current length of `remote` for an append: 213 gives it, 550 means the
/// file does not exist yet.
async fn remote_length(control: &mut ControlChannel, remote: &str) -> FtpResult<u64> {
    let resp = control.send_command(&format!("SIZE {}", remote)).await?;
    match resp.code {
        status::FILE_STATUS => {
            let with_arg = reply::parse_reply_with_argument(&resp.raw)?;
            reply::parse_size_argument(&with_arg)
        }
        status::FILE_UNAVAILABLE => Ok(0),
        code => Err(FtpError::size_query(
            code,
            format!("SIZE {} failed: {}", remote, resp.text()),
        )),
    }
}
