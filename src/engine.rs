//! Delivery engine: the single entry point that runs a download request
//! through registration, quota, fetch, transport selection, and delivery.
//!
//! The engine owns the ordering guarantees:
//! - the quota check happens before any network traffic
//! - quota is consumed only after delivery succeeds
//! - every terminal state appends exactly one audit row
//! - the fetched artifact is released on every exit path

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::BotConfig;
use crate::db::Database;
use crate::delivery::{DeliveryError, DeliveryRequest, DeliverySink, Transport};
use crate::download::{FetchError, FetchLimits, Fetcher};
use crate::ledger::{DownloadOutcome, Ledger, LedgerError, NewDownloadRecord};
use crate::referral::ReferralProcessor;
use crate::transfer::{self, Delivery, RejectReason, SplitPlan};

/// One user-initiated download request.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Requesting user id.
    pub user_id: i64,
    /// Current username, if the platform supplies one.
    pub username: Option<String>,
    /// Current display name.
    pub first_name: Option<String>,
    /// URL to fetch.
    pub url: String,
    /// Referral code carried by the user's first contact, if any.
    pub referral_code: Option<String>,
}

/// Summary of a completed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Filename as presented to the user.
    pub filename: String,
    /// Delivered size in bytes.
    pub file_size: u64,
    /// Transport the file went out on.
    pub transport: Transport,
    /// Downloads left today after this one.
    pub remaining_today: i64,
}

/// Terminal failures of a download request.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The user is at their effective daily limit.
    #[error("daily limit reached ({used}/{limit})")]
    QuotaExceeded { used: i64, limit: i64 },

    /// The fetch failed before a deliverable artifact existed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// No transport can carry a file of this size.
    #[error(transparent)]
    SizeRejected(RejectReason),

    /// The outbound delivery failed.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Orchestrates the full request lifecycle.
///
/// Cheap to clone; clones share the ledger, referral processor, HTTP client
/// and delivery sink.
#[derive(Clone)]
pub struct DeliveryEngine {
    config: BotConfig,
    ledger: Ledger,
    referrals: ReferralProcessor,
    fetcher: Fetcher,
    sink: Arc<dyn DeliverySink>,
    workdir: PathBuf,
}

impl DeliveryEngine {
    /// Wires an engine from its configuration and backing database.
    ///
    /// Fetched files are staged under `workdir` for the lifetime of each
    /// request.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: BotConfig,
        db: Database,
        sink: Arc<dyn DeliverySink>,
        workdir: PathBuf,
    ) -> Result<Self, reqwest::Error> {
        let ledger = Ledger::new(db.clone(), config.daily_download_limit);
        let referrals = ReferralProcessor::new(db, config.bonus_duration, &config.bot_username);
        let fetcher = Fetcher::new()?;
        Ok(Self {
            config,
            ledger,
            referrals,
            fetcher,
            sink,
            workdir,
        })
    }

    /// Shared quota ledger, for status and admin commands.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Shared referral processor, for referral commands.
    #[must_use]
    pub fn referrals(&self) -> &ReferralProcessor {
        &self.referrals
    }

    /// Runs one download request end to end.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for every terminal failure; the matching audit
    /// row has already been written when this returns.
    #[instrument(skip(self, request), fields(user_id = request.user_id, url = %request.url))]
    pub async fn handle_request(
        &self,
        request: &DownloadRequest,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport, EngineError> {
        let (_, created) = self
            .ledger
            .get_or_create_user(
                request.user_id,
                request.username.as_deref(),
                request.first_name.as_deref(),
                now,
            )
            .await?;

        // Referral codes only count on first-ever contact. A broken code
        // must not block the download itself.
        if created {
            if let Some(code) = &request.referral_code {
                if let Err(e) = self.referrals.process(request.user_id, code, now).await {
                    warn!(error = %e, "referral processing failed");
                }
            }
        }

        // Quota gate, before any bytes move.
        if !self.ledger.can_consume(request.user_id, now).await? {
            let summary = self.ledger.usage_summary(request.user_id, now).await?;
            self.append_record(
                request,
                "",
                0,
                None,
                DownloadOutcome::QuotaRejected,
                now,
            )
            .await;
            return Err(EngineError::QuotaExceeded {
                used: summary.used_today,
                limit: summary.effective_limit,
            });
        }

        let limits = FetchLimits {
            size_limit: self.config.max_file_size,
            time_budget: self.config.download_timeout,
        };
        let artifact = match self.fetcher.fetch(&request.url, &limits, &self.workdir).await {
            Ok(artifact) => artifact,
            Err(e) => {
                let outcome = if e.is_size_exceeded() {
                    DownloadOutcome::SizeRejected
                } else {
                    DownloadOutcome::Failed
                };
                self.append_record(request, "", 0, None, outcome, now).await;
                return Err(e.into());
            }
        };

        let transport = match transfer::select(artifact.size(), &self.config.capabilities()) {
            Delivery::Direct => Transport::Direct,
            Delivery::LargeFile => Transport::LargeFile,
            Delivery::SplitFallback => Transport::Split,
            Delivery::Reject(reason) => {
                self.append_record(
                    request,
                    artifact.filename(),
                    artifact.size(),
                    None,
                    DownloadOutcome::SizeRejected,
                    now,
                )
                .await;
                return Err(EngineError::SizeRejected(reason));
            }
        };

        let split_plan = (transport == Transport::Split).then(|| {
            SplitPlan::new(
                artifact.filename(),
                artifact.size(),
                self.config.split_chunk_size,
            )
        });

        let delivery = DeliveryRequest {
            user_id: request.user_id,
            path: artifact.path(),
            filename: artifact.filename(),
            file_size: artifact.size(),
            transport,
            split_plan: split_plan.as_ref(),
        };
        if let Err(e) = self.sink.deliver(delivery).await {
            self.append_record(
                request,
                artifact.filename(),
                artifact.size(),
                Some(transport),
                DownloadOutcome::Failed,
                now,
            )
            .await;
            return Err(e.into());
        }

        // Quota is charged only for a delivered file. Losing the race here
        // means a concurrent request for the same user consumed the last
        // slot after our gate check; the file already went out, so keep it.
        if !self.ledger.consume(request.user_id, now).await? {
            warn!(user_id = request.user_id, "delivered past the limit after a lost quota race");
        }
        self.append_record(
            request,
            artifact.filename(),
            artifact.size(),
            Some(transport),
            DownloadOutcome::Succeeded,
            now,
        )
        .await;

        let summary = self.ledger.usage_summary(request.user_id, now).await?;
        let report = DeliveryReport {
            filename: artifact.filename().to_string(),
            file_size: artifact.size(),
            transport,
            remaining_today: (summary.effective_limit - summary.used_today).max(0),
        };
        info!(
            filename = %report.filename,
            size = report.file_size,
            transport = %report.transport,
            "delivery complete"
        );
        Ok(report)
    }

    /// Appends an audit row, logging instead of failing the request when the
    /// insert itself goes wrong.
    async fn append_record(
        &self,
        request: &DownloadRequest,
        filename: &str,
        file_size: u64,
        transport: Option<Transport>,
        outcome: DownloadOutcome,
        now: DateTime<Utc>,
    ) {
        let record = NewDownloadRecord {
            user_id: request.user_id,
            url: &request.url,
            filename,
            file_size: i64::try_from(file_size).unwrap_or(i64::MAX),
            transport,
            outcome,
        };
        if let Err(e) = self.ledger.record(&record, now).await {
            warn!(error = %e, outcome = %outcome, "failed to append download record");
        }
    }
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("config", &self.config)
            .field("workdir", &self.workdir)
            .finish_non_exhaustive()
    }
}
