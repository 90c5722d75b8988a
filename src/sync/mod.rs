//! Connection sync: provider traits, the per-account processor, and the
//! orchestrator that runs them.

mod locks;
mod orchestrator;
mod processor;
mod window;

pub use locks::{AccountSyncGuard, AccountSyncLocks};
pub use orchestrator::SyncOrchestrator;
pub use processor::{AccountOutcome, AccountProcessor, ProcessorPhase};
pub use window::{SyncWindow, WindowPlan};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::ingest::{NormalizedAccount, NormalizedRecord};
use crate::models::Id;

/// Errors from a provider client. Only `Auth` is connection-fatal; the rest
/// are scoped to the account whose fetch failed.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(std::time::Duration),
    #[error("provider reported an account error: {0}")]
    Account(String),
}

/// Errors from a mapper. Record-scoped when normalizing transactions,
/// account-scoped when normalizing accounts.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
    /// Providers may embed per-account error markers inside an otherwise
    /// successful response.
    #[error("provider embedded an account error: {0}")]
    Account(String),
}

/// Connection-level failures. Anything here aborts the run before (or
/// instead of) scheduling account tasks; per-account trouble never shows up
/// as a `SyncError`.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Expired or revoked credentials; the UI should prompt re-auth.
    #[error("connection requires reauthentication: {0}")]
    AuthRequired(String),
    #[error("invalid connection configuration: {0}")]
    Config(String),
    /// The provider could not even enumerate accounts; nothing to scope
    /// the failure to.
    #[error("provider request failed: {0}")]
    Provider(ProviderError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Fetches raw payloads from one provider. Implementations own all wire
/// concerns; the engine never inspects raw payloads itself.
#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    /// Longest date range one transactions request may span, when the
    /// provider imposes one.
    fn max_window_days(&self) -> Option<u32>;

    async fn list_accounts(&self) -> Result<Vec<serde_json::Value>, ProviderError>;

    /// Must honor the window bounds it is given. May embed per-record or
    /// per-account error markers in an otherwise-successful response.
    async fn list_transactions(
        &self,
        provider_account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<serde_json::Value>, ProviderError>;
}

/// Maps one provider's raw payloads into the normalized shapes the engine
/// consumes. Treated as a black box.
pub trait ProviderMapper: Send + Sync {
    fn normalize_account(&self, raw: &serde_json::Value) -> Result<NormalizedAccount, MapError>;

    fn normalize_transaction(
        &self,
        raw: &serde_json::Value,
        currency: &str,
    ) -> Result<NormalizedRecord, MapError>;
}

/// One account whose payload could not be processed during a run.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedAccount {
    pub provider_account_id: String,
    pub reason: String,
}

/// A composite match with more than one candidate; surfaced for a manual
/// merge, never auto-resolved.
#[derive(Debug, Clone, Serialize)]
pub struct AmbiguousMatch {
    pub account_id: Id,
    pub description: String,
    pub date: NaiveDate,
    pub candidates: Vec<Id>,
}

/// Aggregate result of one connection-level sync run. Partial success is
/// the expected steady state: skipped accounts do not fail the run.
#[derive(Debug, Default, Serialize)]
pub struct SyncSummary {
    pub accounts_processed: usize,
    pub entries_imported: usize,
    pub entries_upgraded: usize,
    pub duplicates_skipped: usize,
    pub malformed_records: usize,
    pub skipped_accounts: Vec<SkippedAccount>,
    pub needs_review: Vec<AmbiguousMatch>,
    /// True when the configured absolute cap shortened the requested
    /// lookback.
    pub lookback_truncated: bool,
    /// Raw response of the run's discovery fetch, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_chunk_snapshot: Option<serde_json::Value>,
}

/// Cooperative cancellation for a running sync. Cancelling stops new
/// account tasks from being scheduled; tasks already started finish (or
/// time out) on their own.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
