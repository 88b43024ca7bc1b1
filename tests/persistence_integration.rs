//! Persistence tests: ledger and referral state must survive a database
//! reopen, and cross-component reads must agree on the same rows.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

use fileferry::{Database, Ledger, ReferralOutcome, ReferralProcessor};

fn at(date: &str, hour: u32) -> DateTime<Utc> {
    let d = date.parse::<chrono::NaiveDate>().unwrap();
    Utc.from_utc_datetime(&d.and_hms_opt(hour, 0, 0).unwrap())
}

#[tokio::test]
async fn test_quota_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ferry.db");
    let now = at("2026-08-30", 9);

    {
        let db = Database::new(&db_path).await.unwrap();
        let ledger = Ledger::new(db.clone(), 5);
        ledger.get_or_create_user(1, Some("alice"), None, now).await.unwrap();
        assert!(ledger.consume(1, now).await.unwrap());
        assert!(ledger.consume(1, now).await.unwrap());
        db.close().await;
    }

    let db = Database::new(&db_path).await.unwrap();
    let ledger = Ledger::new(db, 5);
    let user = ledger.get_user(1).await.unwrap().unwrap();
    assert_eq!(user.downloads_used_today, 2);
    assert_eq!(user.total_downloads, 2);
    assert_eq!(user.last_reset_date, "2026-08-30");

    // Same day: counter picks up where it left off.
    assert!(ledger.consume(1, now).await.unwrap());
    let summary = ledger.usage_summary(1, now).await.unwrap();
    assert_eq!(summary.used_today, 3);
}

#[tokio::test]
async fn test_referral_bonus_visible_to_ledger_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ferry.db");
    let now = at("2026-08-30", 9);

    {
        let db = Database::new(&db_path).await.unwrap();
        let ledger = Ledger::new(db.clone(), 5);
        ledger.get_or_create_user(1, Some("ref"), None, now).await.unwrap();
        ledger.get_or_create_user(2, Some("new"), None, now).await.unwrap();

        let referrals = ReferralProcessor::new(db.clone(), Duration::from_secs(24 * 3600), "bot");
        let outcome = referrals.process(2, "1", now).await.unwrap();
        assert_eq!(outcome, ReferralOutcome::Applied);
        db.close().await;
    }

    let db = Database::new(&db_path).await.unwrap();
    let ledger = Ledger::new(db.clone(), 5);

    // Active within 24h of the grant, inert after.
    assert_eq!(ledger.effective_limit(1, at("2026-08-30", 20)).await.unwrap(), 6);
    assert_eq!(ledger.effective_limit(1, at("2026-09-01", 0)).await.unwrap(), 5);

    let referrals = ReferralProcessor::new(db, Duration::from_secs(24 * 3600), "bot");
    let stats = referrals.stats(1, at("2026-09-01", 0)).await.unwrap();
    assert_eq!(stats.referral_count, 1, "expired rows stay on the books");
    assert_eq!(stats.active_bonus_count, 0);
}
