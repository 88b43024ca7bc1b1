//! Quota ledger: per-user daily counters, referral bonus accounting, and the
//! append-only download audit log.
//!
//! # Overview
//!
//! The ledger is the source of truth for "can this user download now":
//! - [`Ledger::can_consume`] / [`Ledger::consume`] - limit check and atomic
//!   check-and-increment against `base_limit + active_bonus_count`
//! - counter reset is date-boundary triggered and lazy: the first access
//!   after the UTC day rolls over zeroes the counter, so there are no
//!   scheduled jobs
//! - [`Ledger::record`] - immutable audit rows for statistics; quota math
//!   never reads them
//!
//! Same-user calls serialize on a per-user async mutex; different users
//! never contend on it.

mod error;
mod record;
mod user;

pub use error::LedgerError;
pub use record::{DownloadOutcome, DownloadRecord, NewDownloadRecord, OverallStats, UsageSummary};
pub use user::User;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::db::Database;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Quota ledger backed by SQLite.
///
/// Cheap to clone; clones share the pool and the per-user lock table, so one
/// instance can serve every concurrently handled request.
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
    base_limit: i64,
    /// Per-user mutual-exclusion scopes for check-and-increment.
    /// Arc so the entry can be cloned out and the map shard released
    /// before awaiting on the inner Mutex.
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl Ledger {
    /// Creates a ledger with the configured base daily limit.
    #[must_use]
    pub fn new(db: Database, base_limit: i64) -> Self {
        Self {
            db,
            base_limit,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Returns the configured base daily limit.
    #[must_use]
    pub fn base_limit(&self) -> i64 {
        self.base_limit
    }

    fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fetches a user, creating the row on first contact.
    ///
    /// On repeat contact the stored `username` / `first_name` are refreshed
    /// and `last_active` is bumped. The returned flag is `true` when the row
    /// was created by this call (first-ever contact), which gates referral
    /// processing.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on query failure.
    #[instrument(skip(self, username, first_name))]
    pub async fn get_or_create_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(User, bool)> {
        let existing = sqlx::query_as::<_, User>(r"SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;

        if existing.is_some() {
            let user = sqlx::query_as::<_, User>(
                r"UPDATE users
                  SET username = ?, first_name = ?, last_active = ?
                  WHERE id = ?
                  RETURNING *",
            )
            .bind(username)
            .bind(first_name)
            .bind(now.to_rfc3339())
            .bind(user_id)
            .fetch_one(self.db.pool())
            .await?;
            return Ok((user, false));
        }

        debug!(user_id, "registering new user");
        let user = sqlx::query_as::<_, User>(
            r"INSERT INTO users
              (id, username, first_name, downloads_used_today, last_reset_date,
               total_downloads, created_at, last_active)
              VALUES (?, ?, ?, 0, ?, 0, ?, ?)
              RETURNING *",
        )
        .bind(user_id)
        .bind(username)
        .bind(first_name)
        .bind(now.date_naive().to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(self.db.pool())
        .await?;
        Ok((user, true))
    }

    /// Fetches a user without creating one.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on query failure.
    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(r"SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(user)
    }

    /// Counts referral bonuses for `user_id` that are still active at `now`.
    ///
    /// Expired rows are excluded, never deleted.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on query failure.
    pub async fn active_bonus_count(&self, user_id: i64, now: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query(
            r"SELECT COUNT(*) as count FROM referrals
              WHERE referrer_id = ? AND bonus_expires_at > ?",
        )
        .bind(user_id)
        .bind(now.to_rfc3339())
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("count"))
    }

    /// Returns `base_limit + active_bonus_count` for the user.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on query failure.
    pub async fn effective_limit(&self, user_id: i64, now: DateTime<Utc>) -> Result<i64> {
        Ok(self.base_limit + self.active_bonus_count(user_id, now).await?)
    }

    /// Reports whether the user may start a download right now.
    ///
    /// Applies the lazy date-boundary reset before comparing, under the same
    /// per-user lock `consume` uses.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UserNotFound`] for an unknown user, or
    /// [`LedgerError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn can_consume(&self, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let used = self.reset_and_read(user_id, now).await?;
        Ok(used < self.effective_limit(user_id, now).await?)
    }

    /// Atomic check-and-increment of the daily counter.
    ///
    /// Returns `false` with no side effect when the user is at or above the
    /// effective limit. On success the daily counter, the lifetime total and
    /// `last_active` advance together. Two concurrent calls for the same
    /// user serialize on the per-user lock, so a user at the limit loses
    /// exactly one of two racing calls.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UserNotFound`] for an unknown user, or
    /// [`LedgerError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn consume(&self, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let used = self.reset_and_read(user_id, now).await?;
        if used >= self.effective_limit(user_id, now).await? {
            debug!(user_id, used, "consume rejected at limit");
            return Ok(false);
        }

        sqlx::query(
            r"UPDATE users
              SET downloads_used_today = downloads_used_today + 1,
                  total_downloads = total_downloads + 1,
                  last_active = ?
              WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(user_id)
        .execute(self.db.pool())
        .await?;
        Ok(true)
    }

    /// Zeroes the counter if the stored reset date is before `now`'s UTC
    /// date, then returns the current counter value.
    async fn reset_and_read(&self, user_id: i64, now: DateTime<Utc>) -> Result<i64> {
        let today = now.date_naive().to_string();
        sqlx::query(
            r"UPDATE users
              SET downloads_used_today = 0, last_reset_date = ?
              WHERE id = ? AND last_reset_date < ?",
        )
        .bind(&today)
        .bind(user_id)
        .bind(&today)
        .execute(self.db.pool())
        .await?;

        let row = sqlx::query(r"SELECT downloads_used_today FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|r| r.get("downloads_used_today"))
            .ok_or(LedgerError::UserNotFound(user_id))
    }

    /// Appends one immutable audit row.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the insert fails.
    #[instrument(skip(self, record), fields(user_id = record.user_id, outcome = %record.outcome))]
    pub async fn record(
        &self,
        record: &NewDownloadRecord<'_>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r"INSERT INTO downloads (user_id, url, filename, file_size, transport, outcome, created_at)
              VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.user_id)
        .bind(record.url)
        .bind(record.filename)
        .bind(record.file_size)
        .bind(record.transport.map(|t| t.as_str()))
        .bind(record.outcome.as_str())
        .bind(now.to_rfc3339())
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Reads the audit rows for one user, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on query failure.
    pub async fn records_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query_as::<_, DownloadRecord>(
            r"SELECT * FROM downloads WHERE user_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Builds the usage summary rendered by the status command.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UserNotFound`] for an unknown user, or
    /// [`LedgerError::Database`] on query failure.
    pub async fn usage_summary(&self, user_id: i64, now: DateTime<Utc>) -> Result<UsageSummary> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let used_today = self.reset_and_read(user_id, now).await?;
        let bonus = self.active_bonus_count(user_id, now).await?;
        let user = self
            .get_user(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;
        Ok(UsageSummary {
            used_today,
            base_limit: self.base_limit,
            active_bonus_count: bonus,
            effective_limit: self.base_limit + bonus,
            total_downloads: user.total_downloads,
        })
    }

    /// Aggregates bot-wide statistics for the admin panel.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on query failure.
    pub async fn overall_stats(&self, now: DateTime<Utc>) -> Result<OverallStats> {
        let today = now.date_naive().to_string();
        let row = sqlx::query(
            r"SELECT
                (SELECT COUNT(*) FROM users) AS total_users,
                (SELECT COUNT(*) FROM users WHERE date(last_active) = ?) AS active_today,
                (SELECT COUNT(*) FROM downloads WHERE outcome = 'succeeded') AS total_downloads,
                (SELECT COUNT(*) FROM downloads
                   WHERE outcome = 'succeeded' AND date(created_at) = ?) AS downloads_today",
        )
        .bind(&today)
        .bind(&today)
        .fetch_one(self.db.pool())
        .await?;
        Ok(OverallStats {
            total_users: row.get("total_users"),
            active_today: row.get("active_today"),
            total_downloads: row.get("total_downloads"),
            downloads_today: row.get("downloads_today"),
        })
    }

    /// Returns the top users by lifetime download count.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on query failure.
    pub async fn top_users(&self, limit: i64) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r"SELECT * FROM users ORDER BY total_downloads DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(users)
    }
}
