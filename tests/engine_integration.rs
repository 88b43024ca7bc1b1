//! End-to-end tests for the delivery engine: registration, quota gate,
//! fetch, transport selection, delivery, and audit bookkeeping against a
//! mock HTTP server and a recording delivery sink.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fileferry::{
    BotConfig, Database, DeliveryEngine, DeliveryError, DeliveryRequest, DeliverySink,
    DownloadOutcome, DownloadRequest, EngineError, ReferralOutcome, Transport,
};

/// One delivery observed by the fake sink.
#[derive(Debug, Clone)]
struct Delivered {
    user_id: i64,
    filename: String,
    file_size: u64,
    transport: Transport,
    part_count: Option<usize>,
}

/// Delivery sink that records calls and can be told to fail.
#[derive(Debug, Default)]
struct RecordingSink {
    deliveries: Mutex<Vec<Delivered>>,
    fail_next: AtomicBool,
}

impl RecordingSink {
    fn deliveries(&self) -> Vec<Delivered> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, request: DeliveryRequest<'_>) -> Result<(), DeliveryError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DeliveryError::Failed {
                reason: "connection reset".to_string(),
            });
        }
        // The artifact must exist for the duration of the call.
        assert!(request.path.exists(), "artifact missing during delivery");
        self.deliveries.lock().unwrap().push(Delivered {
            user_id: request.user_id,
            filename: request.filename.to_string(),
            file_size: request.file_size,
            transport: request.transport,
            part_count: request.split_plan.map(fileferry::SplitPlan::part_count),
        });
        Ok(())
    }
}

/// Sized-down limits so test payloads stay small: direct up to 1 KiB,
/// absolute ceiling 10 KB, split parts of 512 bytes.
fn test_config(large_file: bool, split_fallback: bool) -> BotConfig {
    BotConfig {
        daily_download_limit: 5,
        small_file_threshold: 1024,
        max_file_size: 10_000,
        split_chunk_size: 512,
        large_file_transport: large_file,
        split_fallback,
        bot_username: "ferry_test_bot".to_string(),
        ..BotConfig::default()
    }
}

struct Harness {
    engine: DeliveryEngine,
    sink: Arc<RecordingSink>,
    server: MockServer,
    workdir: tempfile::TempDir,
}

async fn harness(config: BotConfig) -> Harness {
    let db = Database::new_in_memory().await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let workdir = tempfile::tempdir().unwrap();
    let engine = DeliveryEngine::new(
        config,
        db,
        Arc::clone(&sink) as Arc<dyn DeliverySink>,
        workdir.path().to_path_buf(),
    )
    .unwrap();
    Harness {
        engine,
        sink,
        server: MockServer::start().await,
        workdir,
    }
}

async fn mount_file(server: &MockServer, route: &str, size: usize) {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", size.to_string()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xAB; size]))
        .mount(server)
        .await;
}

fn request(harness: &Harness, user_id: i64, route: &str) -> DownloadRequest {
    DownloadRequest {
        user_id,
        username: Some("tester".to_string()),
        first_name: Some("Tester".to_string()),
        url: format!("{}{route}", harness.server.uri()),
        referral_code: None,
    }
}

fn at(date: &str, hour: u32) -> DateTime<Utc> {
    let d = date.parse::<chrono::NaiveDate>().unwrap();
    Utc.from_utc_datetime(&d.and_hms_opt(hour, 0, 0).unwrap())
}

#[tokio::test]
async fn test_large_file_delivery_end_to_end() {
    let h = harness(test_config(true, true)).await;
    mount_file(&h.server, "/video.mkv", 2048).await;
    let now = at("2026-08-30", 12);

    let report = h
        .engine
        .handle_request(&request(&h, 1, "/video.mkv"), now)
        .await
        .unwrap();

    assert_eq!(report.filename, "video.mkv");
    assert_eq!(report.file_size, 2048);
    assert_eq!(report.transport, Transport::LargeFile);
    assert_eq!(report.remaining_today, 4);

    let delivered = h.sink.deliveries();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].user_id, 1);
    assert_eq!(delivered[0].filename, "video.mkv");
    assert_eq!(delivered[0].file_size, 2048);
    assert_eq!(delivered[0].transport, Transport::LargeFile);
    assert_eq!(delivered[0].part_count, None);

    // Quota charged and the success recorded.
    let user = h.engine.ledger().get_user(1).await.unwrap().unwrap();
    assert_eq!(user.downloads_used_today, 1);
    assert_eq!(user.total_downloads, 1);
    let records = h.engine.ledger().records_for_user(1, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome(), DownloadOutcome::Succeeded);
    assert_eq!(records[0].transport.as_deref(), Some("large_file"));

    // Working storage is empty once the request completes.
    assert_eq!(std::fs::read_dir(h.workdir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_small_file_takes_direct_transport() {
    let h = harness(test_config(true, true)).await;
    mount_file(&h.server, "/note.txt", 512).await;

    let report = h
        .engine
        .handle_request(&request(&h, 1, "/note.txt"), at("2026-08-30", 12))
        .await
        .unwrap();

    assert_eq!(report.transport, Transport::Direct);
    assert_eq!(h.sink.deliveries()[0].transport, Transport::Direct);
}

#[tokio::test]
async fn test_split_fallback_carries_part_plan() {
    let h = harness(test_config(false, true)).await;
    mount_file(&h.server, "/archive.zip", 2048).await;

    let report = h
        .engine
        .handle_request(&request(&h, 1, "/archive.zip"), at("2026-08-30", 12))
        .await
        .unwrap();

    assert_eq!(report.transport, Transport::Split);
    let delivered = h.sink.deliveries();
    // 2048 bytes in 512-byte parts.
    assert_eq!(delivered[0].part_count, Some(4));
}

#[tokio::test]
async fn test_oversize_without_transports_is_size_rejected() {
    let h = harness(test_config(false, false)).await;
    mount_file(&h.server, "/archive.zip", 2048).await;
    let now = at("2026-08-30", 12);

    let err = h
        .engine
        .handle_request(&request(&h, 1, "/archive.zip"), now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SizeRejected(_)));

    // No delivery, no quota, one size_rejected row.
    assert!(h.sink.deliveries().is_empty());
    let user = h.engine.ledger().get_user(1).await.unwrap().unwrap();
    assert_eq!(user.downloads_used_today, 0);
    let records = h.engine.ledger().records_for_user(1, 10).await.unwrap();
    assert_eq!(records[0].outcome(), DownloadOutcome::SizeRejected);
    assert_eq!(std::fs::read_dir(h.workdir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_quota_gate_rejects_before_any_fetch() {
    let h = harness(BotConfig {
        daily_download_limit: 0,
        ..test_config(true, true)
    })
    .await;
    // Any GET or HEAD reaching the server fails the test.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;
    let now = at("2026-08-30", 12);

    let err = h
        .engine
        .handle_request(&request(&h, 1, "/anything"), now)
        .await
        .unwrap_err();
    match err {
        EngineError::QuotaExceeded { used, limit } => {
            assert_eq!(used, 0);
            assert_eq!(limit, 0);
        }
        other => panic!("unexpected error: {other}"),
    }

    let records = h.engine.ledger().records_for_user(1, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome(), DownloadOutcome::QuotaRejected);
}

#[tokio::test]
async fn test_failed_delivery_charges_no_quota() {
    let h = harness(test_config(true, true)).await;
    mount_file(&h.server, "/doc.pdf", 256).await;
    h.sink.fail_next.store(true, Ordering::SeqCst);
    let now = at("2026-08-30", 12);

    let err = h
        .engine
        .handle_request(&request(&h, 1, "/doc.pdf"), now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Delivery(_)));

    let user = h.engine.ledger().get_user(1).await.unwrap().unwrap();
    assert_eq!(user.downloads_used_today, 0, "quota only charged on success");
    let records = h.engine.ledger().records_for_user(1, 10).await.unwrap();
    assert_eq!(records[0].outcome(), DownloadOutcome::Failed);
    assert_eq!(std::fs::read_dir(h.workdir.path()).unwrap().count(), 0);

    // The next attempt goes through.
    let report = h
        .engine
        .handle_request(&request(&h, 1, "/doc.pdf"), now)
        .await
        .unwrap();
    assert_eq!(report.remaining_today, 4);
}

#[tokio::test]
async fn test_fetch_failure_records_failed_outcome() {
    let h = harness(test_config(true, true)).await;
    Mock::given(method("HEAD"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;
    let now = at("2026-08-30", 12);

    let err = h
        .engine
        .handle_request(&request(&h, 1, "/gone"), now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Fetch(_)));

    let user = h.engine.ledger().get_user(1).await.unwrap().unwrap();
    assert_eq!(user.downloads_used_today, 0);
    let records = h.engine.ledger().records_for_user(1, 10).await.unwrap();
    assert_eq!(records[0].outcome(), DownloadOutcome::Failed);
}

#[tokio::test]
async fn test_referral_code_applies_on_first_contact_only() {
    let h = harness(test_config(true, true)).await;
    mount_file(&h.server, "/a.bin", 128).await;
    let now = at("2026-08-30", 12);

    // Referrer must exist first.
    h.engine
        .handle_request(&request(&h, 10, "/a.bin"), now)
        .await
        .unwrap();

    let mut req = request(&h, 20, "/a.bin");
    req.referral_code = Some("10".to_string());
    h.engine.handle_request(&req, now).await.unwrap();

    // Referrer has one active bonus: limit 5 + 1.
    let summary = h.engine.ledger().usage_summary(10, now).await.unwrap();
    assert_eq!(summary.active_bonus_count, 1);
    assert_eq!(summary.effective_limit, 6);

    // Replaying the code on a later contact changes nothing.
    h.engine.handle_request(&req, now).await.unwrap();
    let summary = h.engine.ledger().usage_summary(10, now).await.unwrap();
    assert_eq!(summary.active_bonus_count, 1);
}

#[tokio::test]
async fn test_broken_referral_code_does_not_block_download() {
    let h = harness(test_config(true, true)).await;
    mount_file(&h.server, "/a.bin", 128).await;
    let now = at("2026-08-30", 12);

    let mut req = request(&h, 1, "/a.bin");
    req.referral_code = Some("not-a-number".to_string());
    let report = h.engine.handle_request(&req, now).await.unwrap();
    assert_eq!(report.file_size, 128);

    // Explicitly ignored, not an error.
    assert_eq!(
        h.engine.referrals().process(1, "not-a-number", now).await.unwrap(),
        ReferralOutcome::Ignored
    );
}

#[tokio::test]
async fn test_bonus_slot_unlocks_extra_download_today() {
    let h = harness(BotConfig {
        daily_download_limit: 1,
        ..test_config(true, true)
    })
    .await;
    mount_file(&h.server, "/a.bin", 128).await;
    let now = at("2026-08-30", 12);

    h.engine
        .handle_request(&request(&h, 10, "/a.bin"), now)
        .await
        .unwrap();

    // At the base limit now.
    let err = h
        .engine
        .handle_request(&request(&h, 10, "/a.bin"), now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::QuotaExceeded { .. }));

    // A new referred user grants one bonus slot immediately.
    let mut req = request(&h, 20, "/a.bin");
    req.referral_code = Some("10".to_string());
    h.engine.handle_request(&req, now).await.unwrap();

    let report = h
        .engine
        .handle_request(&request(&h, 10, "/a.bin"), now)
        .await
        .unwrap();
    assert_eq!(report.remaining_today, 0);

    // The bonus lapses after its lifetime; next day the user is back to base.
    let later = at("2026-09-01", 12);
    let summary = h.engine.ledger().usage_summary(10, later).await.unwrap();
    assert_eq!(summary.active_bonus_count, 0);
    assert_eq!(summary.effective_limit, 1);
}
