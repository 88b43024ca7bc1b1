//! Referral bonus processing and referral links.
//!
//! A referral applies exactly once, on the referred user's first-ever
//! contact. Semantically invalid codes (malformed, self-referral, unknown
//! referrer, replay) are ignored rather than surfaced as errors so a bad
//! code never blocks the download the user actually asked for.

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::db::Database;

/// Errors that can occur during referral processing.
#[derive(Error, Debug)]
pub enum ReferralError {
    /// Database operation failed.
    #[error("referral database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of processing one referral code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferralOutcome {
    /// Bonus granted and referral relationship recorded.
    Applied,
    /// Invalid or replayed code; nothing changed.
    Ignored,
}

/// Referral numbers for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralStats {
    /// Users this user has referred, ever.
    pub referral_count: i64,
    /// Bonuses still active at the query instant.
    pub active_bonus_count: i64,
    /// When the next active bonus lapses, if any.
    pub earliest_expiry: Option<DateTime<Utc>>,
}

/// One row of the referral leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// Referrer user id.
    pub user_id: i64,
    /// Last seen username.
    pub username: Option<String>,
    /// Last seen display name.
    pub first_name: Option<String>,
    /// Number of users referred.
    pub referral_count: i64,
}

/// Referral processor backed by the shared database.
#[derive(Debug, Clone)]
pub struct ReferralProcessor {
    db: Database,
    bonus_duration: Duration,
    bot_username: String,
}

impl ReferralProcessor {
    /// Creates a processor granting bonuses of `bonus_duration` length.
    ///
    /// Sub-second precision of the duration is discarded.
    #[must_use]
    pub fn new(db: Database, bonus_duration: std::time::Duration, bot_username: &str) -> Self {
        Self {
            db,
            bonus_duration: Duration::seconds(
                i64::try_from(bonus_duration.as_secs()).unwrap_or(i64::MAX),
            ),
            bot_username: bot_username.to_string(),
        }
    }

    /// Applies a referral code supplied at a new user's registration.
    ///
    /// Grants the referrer one bonus expiring at `now + bonus_duration` and
    /// sets the new user's referrer link, both in one transaction. Returns
    /// [`ReferralOutcome::Ignored`] for anything semantically invalid:
    /// malformed code, self-referral, unknown referrer, unknown referred
    /// user, or a referred user whose referrer is already set (idempotent
    /// under retry).
    ///
    /// # Errors
    ///
    /// Returns [`ReferralError::Database`] only for storage failures.
    #[instrument(skip(self))]
    pub async fn process(
        &self,
        new_user_id: i64,
        referrer_code: &str,
        now: DateTime<Utc>,
    ) -> Result<ReferralOutcome, ReferralError> {
        let Ok(referrer_id) = referrer_code.trim().parse::<i64>() else {
            debug!(code = referrer_code, "ignoring malformed referral code");
            return Ok(ReferralOutcome::Ignored);
        };
        if referrer_id == new_user_id {
            debug!(new_user_id, "ignoring self-referral");
            return Ok(ReferralOutcome::Ignored);
        }

        let referrer_exists = sqlx::query(r"SELECT 1 FROM users WHERE id = ?")
            .bind(referrer_id)
            .fetch_optional(self.db.pool())
            .await?
            .is_some();
        if !referrer_exists {
            debug!(referrer_id, "ignoring referral from unknown user");
            return Ok(ReferralOutcome::Ignored);
        }

        let mut tx = self.db.pool().begin().await?;

        // The referrer link is immutable once set; this guard also makes
        // retries after a crash between registration and referral no-ops.
        let linked = sqlx::query(
            r"UPDATE users SET referrer_id = ? WHERE id = ? AND referrer_id IS NULL",
        )
        .bind(referrer_id)
        .bind(new_user_id)
        .execute(&mut *tx)
        .await?;
        if linked.rows_affected() == 0 {
            debug!(new_user_id, "referral already applied or user unknown");
            return Ok(ReferralOutcome::Ignored);
        }

        let expires_at = now + self.bonus_duration;
        let inserted = sqlx::query(
            r"INSERT INTO referrals (referrer_id, referred_id, created_at, bonus_expires_at)
              VALUES (?, ?, ?, ?)",
        )
        .bind(referrer_id)
        .bind(new_user_id)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                debug!(referrer_id, new_user_id, "referral applied");
                Ok(ReferralOutcome::Applied)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // A user can be referred at most once; a concurrent
                // duplicate loses quietly.
                warn!(referrer_id, new_user_id, "duplicate referral ignored");
                Ok(ReferralOutcome::Ignored)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Builds the shareable deep link for a user.
    #[must_use]
    pub fn referral_link(&self, user_id: i64) -> String {
        format!(
            "https://t.me/{}?start={}",
            self.bot_username,
            urlencoding::encode(&user_id.to_string())
        )
    }

    /// Reads referral statistics for one user.
    ///
    /// # Errors
    ///
    /// Returns [`ReferralError::Database`] on query failure.
    pub async fn stats(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<ReferralStats, ReferralError> {
        let now_str = now.to_rfc3339();
        let row = sqlx::query(
            r"SELECT
                COUNT(*) AS referral_count,
                COUNT(CASE WHEN bonus_expires_at > ? THEN 1 END) AS active_bonus_count,
                MIN(CASE WHEN bonus_expires_at > ? THEN bonus_expires_at END) AS earliest_expiry
              FROM referrals WHERE referrer_id = ?",
        )
        .bind(&now_str)
        .bind(&now_str)
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;

        let earliest: Option<String> = row.get("earliest_expiry");
        Ok(ReferralStats {
            referral_count: row.get("referral_count"),
            active_bonus_count: row.get("active_bonus_count"),
            earliest_expiry: earliest
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }

    /// Returns the top referrers, most referrals first.
    ///
    /// # Errors
    ///
    /// Returns [`ReferralError::Database`] on query failure.
    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, ReferralError> {
        let rows = sqlx::query(
            r"SELECT r.referrer_id, u.username, u.first_name, COUNT(r.id) AS referral_count
              FROM referrals r
              JOIN users u ON r.referrer_id = u.id
              GROUP BY r.referrer_id
              ORDER BY referral_count DESC
              LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LeaderboardEntry {
                user_id: row.get("referrer_id"),
                username: row.get("username"),
                first_name: row.get("first_name"),
                referral_count: row.get("referral_count"),
            })
            .collect())
    }
}
