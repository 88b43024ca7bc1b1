//! Fileferry Core Library
//!
//! This library is the delivery core of a file-relay chat bot: a user submits
//! a URL, the bot fetches the resource and relays it back as a file, subject
//! to per-user daily quotas, size-dependent delivery transports, and a
//! referral-based quota bonus.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`ledger`] - Per-user daily quota counters and download audit records
//! - [`referral`] - Referral bonus processing and referral links
//! - [`transfer`] - Pure transport selection policy and split planning
//! - [`download`] - HTTP fetch pipeline with streaming size/time bounds
//! - [`delivery`] - Transport variants and the delivery sink boundary
//! - [`engine`] - Per-request orchestration tying the above together
//! - [`config`] - Explicitly passed configuration values

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod delivery;
pub mod download;
pub mod engine;
pub mod ledger;
pub mod referral;
pub mod transfer;

// Re-export commonly used types
pub use config::{BotConfig, TransportCapabilities};
pub use db::{Database, DbError};
pub use delivery::{DeliveryError, DeliveryRequest, DeliverySink, Transport};
pub use download::{FetchError, FetchLimits, Fetcher, TransientArtifact};
pub use engine::{DeliveryEngine, DeliveryReport, DownloadRequest, EngineError};
pub use ledger::{
    DownloadOutcome, DownloadRecord, Ledger, LedgerError, NewDownloadRecord, OverallStats,
    UsageSummary, User,
};
pub use referral::{LeaderboardEntry, ReferralError, ReferralOutcome, ReferralProcessor, ReferralStats};
pub use transfer::{Delivery, RejectReason, SplitPlan, format_size, select};
