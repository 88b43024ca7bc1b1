//! Transport selection policy and split planning.
//!
//! [`select`] is a pure decision function: given a resolved file size and the
//! configured capabilities it names the delivery path, with no I/O, so the
//! policy is independently testable.

use std::fmt;

use thiserror::Error;

use crate::config::TransportCapabilities;

/// Outcome of transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Small-file path.
    Direct,
    /// Large-file path (credentials configured).
    LargeFile,
    /// Chunked fallback when the large-file path is unavailable.
    SplitFallback,
    /// No viable path.
    Reject(RejectReason),
}

/// Why a file cannot be delivered at all.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Above the absolute ceiling; no transport takes it.
    #[error("file size {} exceeds maximum size {}", format_size(*.size), format_size(*.max))]
    ExceedsMaximum {
        /// Resolved file size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Above the direct ceiling, large-file credentials missing, split
    /// fallback disabled.
    #[error("file size {} requires large-file credentials", format_size(*.size))]
    LargeFileUnavailable {
        /// Resolved file size.
        size: u64,
    },
}

/// Picks the delivery path for a file of `file_size` bytes.
///
/// Policy:
/// - at or below the small-file threshold: always [`Delivery::Direct`]
/// - above the threshold, at or below the maximum: [`Delivery::LargeFile`]
///   when configured, else [`Delivery::SplitFallback`] when enabled, else
///   reject asking for credentials
/// - above the maximum: always reject
#[must_use]
pub fn select(file_size: u64, caps: &TransportCapabilities) -> Delivery {
    if file_size <= caps.small_file_threshold {
        return Delivery::Direct;
    }
    if file_size > caps.max_file_size {
        return Delivery::Reject(RejectReason::ExceedsMaximum {
            size: file_size,
            max: caps.max_file_size,
        });
    }
    if caps.large_file_transport {
        Delivery::LargeFile
    } else if caps.split_fallback {
        Delivery::SplitFallback
    } else {
        Delivery::Reject(RejectReason::LargeFileUnavailable { size: file_size })
    }
}

/// Chunk layout for split delivery of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    /// Original filename the parts reassemble into.
    pub filename: String,
    /// Size of each part except possibly the last.
    pub chunk_size: u64,
    /// Part filenames in order (`name.part001.ext`, ...).
    pub parts: Vec<String>,
}

impl SplitPlan {
    /// Computes the chunk layout for a file.
    ///
    /// # Panics
    ///
    /// Never; a zero `chunk_size` is clamped to 1.
    #[must_use]
    pub fn new(filename: &str, file_size: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let count = file_size.div_ceil(chunk_size).max(1);
        let (stem, ext) = split_extension(filename);
        let parts = (1..=count)
            .map(|n| format!("{stem}.part{n:03}{ext}"))
            .collect();
        Self {
            filename: filename.to_string(),
            chunk_size,
            parts,
        }
    }

    /// Number of parts.
    #[must_use]
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Renders user-facing reassembly instructions for the part files.
    #[must_use]
    pub fn reassembly_instructions(&self) -> String {
        let (stem, ext) = split_extension(&self.filename);
        format!(
            "File Reassembly Instructions\n\n\
             Your file \"{name}\" has been split into {count} parts.\n\n\
             Windows:\n\
             copy /b \"{stem}.part001{ext}\"+\"{stem}.part002{ext}\"+... \"{name}\"\n\n\
             Linux/Mac:\n\
             cat \"{stem}.part001{ext}\" \"{stem}.part002{ext}\" ... > \"{name}\"\n\n\
             Alternative: use file joining software like HJSplit, 7-Zip, or WinRAR.",
            name = self.filename,
            count = self.part_count(),
        )
    }
}

impl fmt::Display for SplitPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SplitPlan {{ file: {}, parts: {} }}",
            self.filename,
            self.part_count()
        )
    }
}

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        // A leading dot is a hidden file, not an extension.
        Some(idx) if idx > 0 => (&filename[..idx], &filename[idx..]),
        _ => (filename, ""),
    }
}

/// Formats a byte count in human readable form (`1.5 MB`, `312 B`).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(size_bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if size_bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{size_bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
