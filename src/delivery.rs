//! Delivery boundary: transport variants and the sink capability trait.
//!
//! The two concrete transports (direct bot upload vs. large-file client) and
//! the split fallback are a closed set of variants behind one `deliver`
//! capability; the chat-platform adapter implements [`DeliverySink`] outside
//! this crate. Keeping the variants closed keeps the transfer selector pure
//! and the engine free of platform branching.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transfer::SplitPlan;

/// Delivery path for a fetched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Small-file path with a fixed size ceiling.
    Direct,
    /// Path for files above the direct ceiling, requires separate credentials.
    LargeFile,
    /// Chunked-delivery degradation when the large-file transport is unavailable.
    Split,
}

impl Transport {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::LargeFile => "large_file",
            Self::Split => "split",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a sink needs to relay one artifact to one user.
#[derive(Debug)]
pub struct DeliveryRequest<'a> {
    /// Destination chat / user id.
    pub user_id: i64,
    /// On-disk location of the fetched artifact. Valid only for the duration
    /// of the call; the engine releases the file afterwards.
    pub path: &'a Path,
    /// Filename to present to the user.
    pub filename: &'a str,
    /// Artifact size in bytes.
    pub file_size: u64,
    /// Selected transport.
    pub transport: Transport,
    /// Chunk layout, present exactly when `transport` is [`Transport::Split`].
    pub split_plan: Option<&'a SplitPlan>,
}

/// Errors surfaced by a delivery sink.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The selected transport is not usable right now (e.g. the large-file
    /// client lost its session).
    #[error("transport {transport} unavailable: {reason}")]
    TransportUnavailable {
        /// Transport that could not be used.
        transport: Transport,
        /// Human-readable reason.
        reason: String,
    },

    /// The transport was reachable but delivery failed.
    #[error("delivery failed: {reason}")]
    Failed {
        /// Human-readable reason.
        reason: String,
    },
}

/// Capability interface implemented by the chat-platform adapter.
///
/// One request's delivery may be long-running (large uploads); the engine
/// runs each request on its own task, so implementations only need to be
/// internally cancel-safe.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Relays the artifact to the user over the selected transport.
    async fn deliver(&self, request: DeliveryRequest<'_>) -> Result<(), DeliveryError>;
}
