//! User row type.

use std::fmt;

use sqlx::FromRow;

/// A registered bot user.
///
/// Created on first contact. The quota counter fields
/// (`downloads_used_today`, `last_reset_date`) are the only mutable quota
/// state; download history lives in append-only audit rows.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    /// Platform user id (primary key, assigned by the chat platform).
    pub id: i64,
    /// Last seen username, if the platform exposes one.
    pub username: Option<String>,
    /// Last seen display name.
    pub first_name: Option<String>,
    /// Downloads consumed during the current UTC day.
    pub downloads_used_today: i64,
    /// UTC date (`YYYY-MM-DD`) the counter was last reset for.
    pub last_reset_date: String,
    /// Lifetime download count.
    pub total_downloads: i64,
    /// Referrer user id; set at most once, immutable after set.
    pub referrer_id: Option<i64>,
    /// Registration timestamp (RFC 3339, UTC).
    pub created_at: String,
    /// Last contact timestamp (RFC 3339, UTC).
    pub last_active: String,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User {{ id: {}, used_today: {}, total: {} }}",
            self.id, self.downloads_used_today, self.total_downloads
        )
    }
}
