//! Segment planning for resumable multi-stream downloads.
//!
//! The bytes still missing locally, `[local_size, remote_size)`, are split
//! into `n` contiguous windows. Each window maps onto the same range of a
//! scratch file shifted down by `local_size`, so the scratch file holds
//! exactly the missing tail once every segment has run.

use crate::ftp::error::{FtpError, FtpResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One contiguous byte range of the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub index: usize,
    /// Absolute offset in the remote file (the REST argument).
    pub offset: u64,
    pub length: u64,
}

impl Segment {
    /// One past the last remote byte covered.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Where this segment's bytes land in the scratch file.
    pub fn scratch_offset(&self, local_size: u64) -> u64 {
        self.offset - local_size
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPlan {
    pub remote_size: u64,
    pub local_size: u64,
    pub segments: Vec<Segment>,
}

impl TransferPlan {
    /// Split `[local_size, remote_size)` into `count` segments of equal
    /// width; the last one absorbs the remainder. When fewer bytes remain
    /// than segments, the leading segments come out empty.
    pub fn new(remote_size: u64, local_size: u64, count: usize) -> FtpResult<Self> {
        if count == 0 {
            return Err(FtpError::invalid_config("Segment count must be at least 1"));
        }
        if local_size > remote_size {
            return Err(FtpError::transfer_failed(format!(
                "Local file ({} bytes) is larger than the remote file ({} bytes)",
                local_size, remote_size
            )));
        }

        let remaining = remote_size - local_size;
        let n = count as u64;
        let width = remaining / n;

        let segments = (0..count)
            .map(|index| {
                let i = index as u64;
                let offset = local_size + i * width;
                let length = if i + 1 == n {
                    remaining - i * width
                } else {
                    width
                };
                Segment {
                    index,
                    offset,
                    length,
                }
            })
            .collect();

        Ok(Self {
            remote_size,
            local_size,
            segments,
        })
    }

    pub fn remaining(&self) -> u64 {
        self.remote_size - self.local_size
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Segments that actually move bytes.
    pub fn active_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| !s.is_empty())
    }
}

/// Scratch file next to `dest`: the marker goes in front of the extension
/// (`movie.mkv` → `movietemp.mkv`) or at the end when there is none.
pub fn scratch_path_for(dest: &Path, marker: &str) -> PathBuf {
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match dest.extension() {
        Some(ext) => format!("{}{}.{}", stem, marker, ext.to_string_lossy()),
        None => format!("{}{}", stem, marker),
    };
    dest.with_file_name(name)
}
