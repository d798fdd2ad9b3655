//! Segmented, resumable downloads.
//!
//! The destination's current length is the resume point. The missing tail
//! is fetched by one worker per segment, each over its own PASV data
//! channel started with `REST <offset>`, into a pre-sized scratch file.
//! Only when every worker has finished is the scratch file appended to the
//! destination.

use crate::ftp::control::SharedControl;
use crate::ftp::engine::{DownloadOptions, TransferEngine};
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::passive;
use crate::ftp::plan::{scratch_path_for, Segment, TransferPlan};
use crate::ftp::progress::ProgressTracker;
use crate::ftp::status;
use crate::ftp::types::*;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything a segment worker needs, shared by all workers of one
/// download.
struct SegmentJob {
    control: SharedControl,
    remote: String,
    scratch: PathBuf,
    local_size: u64,
    chunk_size: usize,
    tolerate_abort: bool,
    cancel: CancellationToken,
    progress: Arc<ProgressTracker>,
}

impl TransferEngine {
    /// Download `remote` into `local`, resuming after whatever `local`
    /// already holds.
    pub async fn download(&self, remote: &str, local: impl AsRef<Path>) -> FtpResult<DownloadReport> {
        self.download_with(remote, local, DownloadOptions::default())
            .await
    }

    pub async fn download_with(
        &self,
        remote: &str,
        local: impl AsRef<Path>,
        opts: DownloadOptions,
    ) -> FtpResult<DownloadReport> {
        let dest = local.as_ref();
        self.download_inner(remote, dest, opts)
            .await
            .map_err(|e| e.with_session(self.session_id.clone()))
    }

    async fn download_inner(
        &self,
        remote: &str,
        dest: &Path,
        opts: DownloadOptions,
    ) -> FtpResult<DownloadReport> {
        let started = Instant::now();

        let local_size = match fs::metadata(dest).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(FtpError::file_open(format!("Cannot stat {}: {}", dest.display(), e)))
            }
        };

        let remote_size = self.control.lock().await.size(remote).await?;
        let count = opts.segments.unwrap_or(self.config.segments);
        let plan = TransferPlan::new(remote_size, local_size, count)?;

        // Opened only once the plan stands, so a failed SIZE leaves nothing
        // behind.
        let mut dest_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dest)
            .await
            .map_err(|e| FtpError::file_open(format!("Cannot open {}: {}", dest.display(), e)))?;

        if plan.is_complete() {
            log::debug!("{} already complete ({} bytes), nothing to fetch", dest.display(), local_size);
            return Ok(DownloadReport {
                remote_size,
                resumed_from: local_size,
                bytes_transferred: 0,
                segments_run: 0,
                scratch_path: None,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let scratch = scratch_path_for(dest, &self.config.scratch_marker);
        prepare_scratch(&scratch, plan.remaining()).await?;
        log::debug!(
            "Downloading {} [{}..{}) in {} segment(s) via {}",
            remote,
            local_size,
            remote_size,
            count,
            scratch.display()
        );

        let progress = Arc::new(ProgressTracker::new(
            opts.transfer_id.clone(),
            self.session_id.clone(),
            TransferDirection::Download,
            dest.display().to_string(),
            remote,
            remote_size,
            local_size,
        ));
        let job = Arc::new(SegmentJob {
            control: self.control.clone(),
            remote: remote.to_string(),
            scratch: scratch.clone(),
            local_size,
            chunk_size: self.config.chunk_size,
            tolerate_abort: self.config.tolerate_abort_after_truncation,
            cancel: opts.cancel.clone(),
            progress: progress.clone(),
        });

        let segments: Vec<Segment> = plan.active_segments().copied().collect();
        let results = match self.config.scheduling {
            SegmentScheduling::Concurrent => {
                let handles: Vec<(usize, JoinHandle<FtpResult<u64>>)> = segments
                    .iter()
                    .map(|seg| (seg.index, tokio::spawn(run_segment(job.clone(), *seg))))
                    .collect();
                let mut results = Vec::with_capacity(handles.len());
                for (index, handle) in handles {
                    results.push((index, join_segment(handle).await));
                }
                results
            }
            SegmentScheduling::Serialized => {
                let mut results = Vec::with_capacity(segments.len());
                for seg in &segments {
                    let handle = tokio::spawn(run_segment(job.clone(), *seg));
                    results.push((seg.index, join_segment(handle).await));
                }
                results
            }
        };

        let mut fetched = 0u64;
        let mut failure: Option<FtpError> = None;
        for (index, result) in results {
            match result {
                Ok(n) => fetched += n,
                Err(e) if failure.is_none() => failure = Some(e.with_segment(index)),
                Err(e) => log::warn!("Segment {}/{} of {} also failed: {}", index + 1, count, remote, e),
            }
        }
        if fetched > 0 {
            self.control.lock().await.record_download(fetched);
        }

        if failure.is_none() && opts.cancel.is_cancelled() {
            failure = Some(FtpError::cancelled(format!("Download of {} cancelled", remote)));
        }
        if let Some(e) = failure {
            let state = if e.kind == FtpErrorKind::Cancelled {
                TransferState::Cancelled
            } else {
                TransferState::Failed
            };
            progress.set_state(state);
            log::warn!("Download of {} failed, scratch left at {}: {}", remote, scratch.display(), e);
            return Err(e);
        }

        progress.set_state(TransferState::Merging);
        merge_scratch(&scratch, &mut dest_file, self.config.chunk_size).await?;
        progress.set_state(TransferState::Completed);

        let scratch_path = match self.config.scratch_policy {
            ScratchPolicy::Keep => Some(scratch),
            ScratchPolicy::DeleteOnSuccess => match fs::remove_file(&scratch).await {
                Ok(()) => None,
                Err(e) => {
                    log::warn!("Could not remove scratch file {}: {}", scratch.display(), e);
                    Some(scratch)
                }
            },
        };

        Ok(DownloadReport {
            remote_size,
            resumed_from: local_size,
            bytes_transferred: fetched,
            segments_run: segments.len(),
            scratch_path,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Create (truncating) the scratch file and size it to the missing range.
async fn prepare_scratch(path: &Path, len: u64) -> FtpResult<()> {
    let file = fs::File::create(path)
        .await
        .map_err(|e| FtpError::file_open(format!("Cannot create {}: {}", path.display(), e)))?;
    file.set_len(len)
        .await
        .map_err(|e| FtpError::file_io(format!("Cannot size {} to {} bytes: {}", path.display(), len, e)))
}

async fn join_segment(handle: JoinHandle<FtpResult<u64>>) -> FtpResult<u64> {
    handle
        .await
        .unwrap_or_else(|e| Err(FtpError::transfer_failed(format!("Segment worker aborted: {}", e))))
}

/// Fetch one segment into its window of the scratch file. Returns the bytes
/// written.
async fn run_segment(job: Arc<SegmentJob>, seg: Segment) -> FtpResult<u64> {
    if job.cancel.is_cancelled() {
        return Err(FtpError::cancelled("Cancelled before start"));
    }

    let mut scratch = OpenOptions::new()
        .write(true)
        .open(&job.scratch)
        .await
        .map_err(|e| FtpError::file_open(format!("Cannot open {}: {}", job.scratch.display(), e)))?;
    scratch
        .seek(SeekFrom::Start(seg.scratch_offset(job.local_size)))
        .await
        .map_err(|e| FtpError::file_io(format!("Seek in {}: {}", job.scratch.display(), e)))?;

    let (mut data, ticket) = {
        let mut control = job.control.lock().await;
        let data = passive::open_passive(&mut control).await?;
        control.set_type(TransferType::Binary).await?;
        let rest = control.send_command(&format!("REST {}", seg.offset)).await?;
        if rest.code != status::FILE_ACTION_PENDING {
            data.abandon();
            return Err(FtpError::from_reply(rest.code, rest.text()));
        }
        let retr = control.send_command(&format!("RETR {}", job.remote)).await?;
        if !status::is_transfer_open(retr.code) {
            data.abandon();
            return Err(FtpError::from_reply(retr.code, retr.text()));
        }
        (data, control.begin_transfer())
    };
    log::debug!(
        "Segment {} streaming [{}..{}) from {}",
        seg.index + 1,
        seg.offset,
        seg.end(),
        data.endpoint()
    );

    let mut buf = vec![0u8; job.chunk_size];
    let mut written = 0u64;
    let streamed: FtpResult<()> = async {
        while written < seg.length {
            let n = tokio::select! {
                _ = job.cancel.cancelled() => {
                    return Err(FtpError::cancelled(format!("Cancelled after {} bytes", written)));
                }
                read = data.read_chunk(&mut buf) => read?,
            };
            if n == 0 {
                break;
            }
            // The server sends to end of file; stop at the segment boundary.
            let take = (n as u64).min(seg.length - written) as usize;
            scratch
                .write_all(&buf[..take])
                .await
                .map_err(|e| FtpError::file_io(format!("Write to {}: {}", job.scratch.display(), e)))?;
            written += take as u64;
            job.progress.add(take as u64);
        }
        scratch
            .flush()
            .await
            .map_err(|e| FtpError::file_io(format!("Flush {}: {}", job.scratch.display(), e)))
    }
    .await;
    data.abandon();
    if let Err(e) = streamed {
        // The late reply is dropped when it arrives.
        ticket.abandon();
        return Err(e);
    }
    ticket.mark_drained();

    let done = job.control.lock().await.read_completion(ticket).await?;
    let truncated = written >= seg.length;
    let accepted = done.code == status::DATA_CONNECTION_CLOSE
        || (job.tolerate_abort
            && truncated
            && matches!(done.code, status::TRANSFER_ABORTED | status::LOCAL_PROCESSING_ERROR));
    if !accepted {
        return Err(FtpError::from_reply(done.code, done.text()));
    }
    if written < seg.length {
        return Err(FtpError::transfer_failed(format!(
            "Data channel closed after {} of {} bytes",
            written, seg.length
        )));
    }
    Ok(written)
}

/// Append the scratch file to the destination.
async fn merge_scratch(scratch: &Path, dest: &mut fs::File, chunk_size: usize) -> FtpResult<u64> {
    let mut src = fs::File::open(scratch)
        .await
        .map_err(|e| FtpError::transfer_failed(format!("Cannot reopen {}: {}", scratch.display(), e)))?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut copied = 0u64;
    loop {
        let n = src
            .read(&mut buf)
            .await
            .map_err(|e| FtpError::transfer_failed(format!("Merge read from {}: {}", scratch.display(), e)))?;
        if n == 0 {
            break;
        }
        dest.write_all(&buf[..n])
            .await
            .map_err(|e| FtpError::transfer_failed(format!("Merge write: {}", e)))?;
        copied += n as u64;
    }
    dest.flush()
        .await
        .map_err(|e| FtpError::transfer_failed(format!("Merge flush: {}", e)))?;
    log::debug!("Merged {} bytes from {}", copied, scratch.display());
    Ok(copied)
}
