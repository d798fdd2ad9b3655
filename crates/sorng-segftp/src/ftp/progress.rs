//! Transfer progress published to `TRANSFER_PROGRESS`.
//!
//! One [`ProgressTracker`] per transfer, shared by every segment worker of
//! a download. Transfers without an id are not tracked.

use crate::ftp::types::*;
use crate::ftp::TRANSFER_PROGRESS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct ProgressTracker {
    transfer_id: Option<String>,
    session_id: String,
    direction: TransferDirection,
    local_path: String,
    remote_path: String,
    /// Full size of the file once the transfer is done.
    total_bytes: u64,
    /// Bytes already in place before this transfer started.
    resumed_from: u64,
    moved: AtomicU64,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(
        transfer_id: Option<String>,
        session_id: impl Into<String>,
        direction: TransferDirection,
        local_path: impl Into<String>,
        remote_path: impl Into<String>,
        total_bytes: u64,
        resumed_from: u64,
    ) -> Self {
        let tracker = Self {
            transfer_id,
            session_id: session_id.into(),
            direction,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            total_bytes,
            resumed_from,
            moved: AtomicU64::new(0),
            started: Instant::now(),
        };
        tracker.publish(TransferState::InProgress);
        tracker
    }

    /// Count `n` more bytes moved over a data channel.
    pub fn add(&self, n: u64) {
        self.moved.fetch_add(n, Ordering::Relaxed);
        self.publish(TransferState::InProgress);
    }

    /// Bytes moved by this transfer so far.
    pub fn moved(&self) -> u64 {
        self.moved.load(Ordering::Relaxed)
    }

    pub fn set_state(&self, state: TransferState) {
        self.publish(state);
    }

    fn publish(&self, state: TransferState) {
        let Some(id) = self.transfer_id.as_deref() else {
            return;
        };
        let moved = self.moved();
        let transferred = self.resumed_from + moved;
        let elapsed = self.started.elapsed().as_secs_f64().max(0.001);
        let percent = if self.total_bytes > 0 {
            (transferred as f64 / self.total_bytes as f64 * 100.0) as f32
        } else {
            100.0
        };

        let progress = TransferProgress {
            transfer_id: id.to_string(),
            session_id: self.session_id.clone(),
            direction: self.direction,
            local_path: self.local_path.clone(),
            remote_path: self.remote_path.clone(),
            total_bytes: self.total_bytes,
            transferred_bytes: transferred,
            speed_bps: (moved as f64 / elapsed) as u64,
            percent: if state == TransferState::Completed { 100.0 } else { percent },
            state,
        };

        if let Ok(mut map) = TRANSFER_PROGRESS.lock() {
            map.insert(id.to_string(), progress);
        }
    }
}

/// Latest snapshot for one transfer.
pub fn get_progress(transfer_id: &str) -> Option<TransferProgress> {
    TRANSFER_PROGRESS
        .lock()
        .ok()
        .and_then(|map| map.get(transfer_id).cloned())
}

pub fn all_progress() -> Vec<TransferProgress> {
    TRANSFER_PROGRESS
        .lock()
        .map(|map| map.values().cloned().collect())
        .unwrap_or_default()
}

/// Forget a finished transfer.
pub fn clear_progress(transfer_id: &str) -> Option<TransferProgress> {
    TRANSFER_PROGRESS
        .lock()
        .ok()
        .and_then(|mut map| map.remove(transfer_id))
}
