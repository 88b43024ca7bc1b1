//! Download audit record types.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::delivery::Transport;

/// Terminal outcome of a download request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// File fetched and delivered.
    Succeeded,
    /// Fetch or delivery failed.
    Failed,
    /// Rejected by the transfer selector (too large or transport missing).
    SizeRejected,
    /// Rejected before any fetch because the daily quota was exhausted.
    QuotaRejected,
}

impl DownloadOutcome {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::SizeRejected => "size_rejected",
            Self::QuotaRejected => "quota_rejected",
        }
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "size_rejected" => Ok(Self::SizeRejected),
            "quota_rejected" => Ok(Self::QuotaRejected),
            _ => Err(format!("invalid download outcome: {s}")),
        }
    }
}

/// Input for appending one audit row.
#[derive(Debug, Clone)]
pub struct NewDownloadRecord<'a> {
    /// Owning user.
    pub user_id: i64,
    /// Source URL as submitted.
    pub url: &'a str,
    /// Resolved filename, empty when the request never reached resolution.
    pub filename: &'a str,
    /// Resolved size in bytes, 0 when unknown.
    pub file_size: i64,
    /// Chosen transport, when selection happened.
    pub transport: Option<Transport>,
    /// Terminal outcome.
    pub outcome: DownloadOutcome,
}

/// A persisted download audit row.
///
/// Rows are immutable once written and exist for statistics and audit;
/// quota enforcement reads the per-user counter instead.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRecord {
    /// Unique identifier.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Source URL.
    pub url: String,
    /// Resolved filename.
    pub filename: String,
    /// Resolved size in bytes.
    pub file_size: i64,
    /// Chosen transport (stored as text, absent when rejected early).
    pub transport: Option<String>,
    /// Outcome (stored as text, parsed via [`DownloadRecord::outcome`]).
    #[sqlx(rename = "outcome")]
    pub outcome_str: String,
    /// When the attempt finished.
    pub created_at: String,
}

impl DownloadRecord {
    /// Returns the parsed outcome enum.
    ///
    /// Falls back to `Failed` if the stored string is invalid.
    #[must_use]
    pub fn outcome(&self) -> DownloadOutcome {
        self.outcome_str.parse().unwrap_or(DownloadOutcome::Failed)
    }
}

/// Aggregate usage numbers for one user, rendered by `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSummary {
    /// Downloads consumed today.
    pub used_today: i64,
    /// Configured base daily limit.
    pub base_limit: i64,
    /// Currently active referral bonuses.
    pub active_bonus_count: i64,
    /// base_limit + active_bonus_count.
    pub effective_limit: i64,
    /// Lifetime download count.
    pub total_downloads: i64,
}

/// Aggregate numbers across all users, rendered by the admin panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverallStats {
    /// Registered users.
    pub total_users: i64,
    /// Users seen today.
    pub active_today: i64,
    /// All download attempts that succeeded, ever.
    pub total_downloads: i64,
    /// Successful downloads today.
    pub downloads_today: i64,
}
