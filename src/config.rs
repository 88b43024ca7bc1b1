//! Bot configuration.
//!
//! Configuration is an explicitly passed value threaded into each component,
//! not ambient process state. [`BotConfig::from_env`] exists for the bot
//! entry point; everything below it takes the struct.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Default per-user daily download limit.
const DEFAULT_DAILY_LIMIT: i64 = 5;

/// Direct-transport ceiling: 50 MB (chat platform bot-API upload limit).
const DEFAULT_SMALL_FILE_THRESHOLD: u64 = 50 * 1024 * 1024;

/// Absolute maximum file size: 2 GiB (large-file transport ceiling).
const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Default time budget for a single fetch.
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Default referral bonus lifetime.
const DEFAULT_BONUS_DURATION_HOURS: u64 = 24;

/// Default chunk size for the split fallback: 45 MB, safely under the
/// direct-transport ceiling.
const DEFAULT_SPLIT_CHUNK_SIZE: u64 = 45 * 1024 * 1024;

/// Capability descriptor consumed by the transfer selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Large-file transport credentials are configured.
    pub large_file_transport: bool,
    /// Chunked split delivery may be used when the large-file transport is not.
    pub split_fallback: bool,
    /// Sizes at or below this always take the direct transport.
    pub small_file_threshold: u64,
    /// Sizes above this are always rejected.
    pub max_file_size: u64,
}

/// Complete configuration for the delivery core.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Base number of downloads a user gets per UTC day.
    pub daily_download_limit: i64,
    /// Direct-transport size ceiling in bytes.
    pub small_file_threshold: u64,
    /// Absolute size ceiling in bytes; larger files are rejected.
    pub max_file_size: u64,
    /// Wall-clock budget for a single fetch.
    pub download_timeout: Duration,
    /// How long a referral bonus stays active after it is granted.
    pub bonus_duration: Duration,
    /// Whether large-file transport credentials are present.
    pub large_file_transport: bool,
    /// Whether the split fallback is enabled.
    pub split_fallback: bool,
    /// Chunk size used by the split fallback.
    pub split_chunk_size: u64,
    /// SQLite database file path.
    pub database_path: PathBuf,
    /// Bot username used to build referral deep links.
    pub bot_username: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            daily_download_limit: DEFAULT_DAILY_LIMIT,
            small_file_threshold: DEFAULT_SMALL_FILE_THRESHOLD,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            bonus_duration: Duration::from_secs(DEFAULT_BONUS_DURATION_HOURS * 3600),
            large_file_transport: false,
            split_fallback: true,
            split_chunk_size: DEFAULT_SPLIT_CHUNK_SIZE,
            database_path: PathBuf::from("bot_database.db"),
            bot_username: "your_bot_username".to_string(),
        }
    }
}

impl BotConfig {
    /// Builds a configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable (a bad value logs a warning
    /// instead of aborting startup).
    ///
    /// Recognized variables: `MAX_DAILY_DOWNLOADS`, `MAX_FILE_SIZE`,
    /// `MAX_LARGE_FILE_SIZE`, `DOWNLOAD_TIMEOUT`,
    /// `REFERRAL_BONUS_DURATION_HOURS`, `SPLIT_FALLBACK`, `CHUNK_PART_SIZE`,
    /// `DATABASE_PATH`, `BOT_USERNAME`, and the large-file transport
    /// credential pair `TELEGRAM_API_ID` / `TELEGRAM_API_HASH` (both must be
    /// non-empty for the capability to count as configured).
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            daily_download_limit: env_parsed("MAX_DAILY_DOWNLOADS", defaults.daily_download_limit),
            small_file_threshold: env_parsed("MAX_FILE_SIZE", defaults.small_file_threshold),
            max_file_size: env_parsed("MAX_LARGE_FILE_SIZE", defaults.max_file_size),
            download_timeout: Duration::from_secs(env_parsed(
                "DOWNLOAD_TIMEOUT",
                DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            )),
            bonus_duration: Duration::from_secs(
                env_parsed("REFERRAL_BONUS_DURATION_HOURS", DEFAULT_BONUS_DURATION_HOURS) * 3600,
            ),
            large_file_transport: env_present("TELEGRAM_API_ID") && env_present("TELEGRAM_API_HASH"),
            split_fallback: std::env::var("SPLIT_FALLBACK").map_or(true, |v| v != "0"),
            split_chunk_size: env_parsed("CHUNK_PART_SIZE", defaults.split_chunk_size),
            database_path: std::env::var("DATABASE_PATH")
                .map_or(defaults.database_path, PathBuf::from),
            bot_username: std::env::var("BOT_USERNAME").unwrap_or(defaults.bot_username),
        }
    }

    /// Projects the selector-facing capability descriptor.
    #[must_use]
    pub fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            large_file_transport: self.large_file_transport,
            split_fallback: self.split_fallback,
            small_file_threshold: self.small_file_threshold,
            max_file_size: self.max_file_size,
        }
    }
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "invalid numeric value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_present(key: &str) -> bool {
    std::env::var(key).is_ok_and(|v| !v.trim().is_empty())
}
