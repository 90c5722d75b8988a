//! Connection-level sync orchestration.
//!
//! Runs one [`AccountProcessor`] per linked account inside a bounded
//! concurrency pool, aggregates run statistics, and snapshots the first
//! raw response chunk for diagnostics. Accounts are independent write
//! domains; one account's failure never aborts its siblings.

use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::duration::duration_days;
use crate::enrich::EnrichmentLedger;
use crate::ingest::{IdentityMatcher, NormalizedAccount};
use crate::models::{
    Account, BalanceObservation, Connection, ConnectionStatus, LastSync, SyncStatus,
};
use crate::storage::Storage;

use super::{
    AccountOutcome, AccountProcessor, AccountSyncLocks, CancelToken, ProcessorPhase,
    ProviderClient, ProviderError, ProviderMapper, SkippedAccount, SyncError, SyncSummary,
    WindowPlan,
};

/// Coordinates a full sync run for one connection.
pub struct SyncOrchestrator {
    storage: Arc<dyn Storage>,
    config: Config,
    clock: Arc<dyn Clock>,
    locks: AccountSyncLocks,
    enrichment: tokio::sync::Mutex<EnrichmentLedger>,
    cancel: CancelToken,
}

enum AccountTask {
    Processed { index: usize, outcome: Box<AccountOutcome> },
    AlreadySyncing(Account),
    Cancelled(Account),
}

impl SyncOrchestrator {
    pub fn new(storage: Arc<dyn Storage>, config: Config) -> Self {
        Self {
            storage,
            config,
            clock: Arc::new(SystemClock),
            locks: AccountSyncLocks::new(),
            enrichment: tokio::sync::Mutex::new(EnrichmentLedger::new()),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_locks(mut self, locks: AccountSyncLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Handle for cooperative cancellation (e.g. credentials revoked
    /// mid-run). Cancelling stops new account tasks from being scheduled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The enrichment ledger shared by this orchestrator's runs. Rule and
    /// AI enrichers go through the same ledger so lock precedence holds
    /// across sources.
    pub fn enrichment_ledger(&self) -> &tokio::sync::Mutex<EnrichmentLedger> {
        &self.enrichment
    }

    /// Sync every account of `connection`, backfilling to the configured
    /// lookback cap.
    pub async fn run(
        &self,
        connection: &mut Connection,
        client: &dyn ProviderClient,
        mapper: &dyn ProviderMapper,
    ) -> Result<SyncSummary, SyncError> {
        self.run_with_lookback(connection, client, mapper, None).await
    }

    /// Sync with an explicit lookback start. A lookback earlier than the
    /// configured cap is truncated to it, and the truncation is reported in
    /// the summary rather than hidden.
    pub async fn run_with_lookback(
        &self,
        connection: &mut Connection,
        client: &dyn ProviderClient,
        mapper: &dyn ProviderMapper,
        lookback_start: Option<NaiveDate>,
    ) -> Result<SyncSummary, SyncError> {
        if connection.config.provider.trim().is_empty() {
            return Err(SyncError::Config("connection has no provider".to_string()));
        }

        let raw_accounts = match client.list_accounts().await {
            Ok(accounts) => accounts,
            Err(ProviderError::Auth(message)) => {
                connection.state.status = ConnectionStatus::PendingReauth;
                connection.state.last_sync = Some(LastSync {
                    at: self.clock.now(),
                    status: SyncStatus::Failed,
                    error: Some(message.clone()),
                });
                self.storage.save_connection(connection).await?;
                return Err(SyncError::AuthRequired(message));
            }
            Err(err) => {
                self.record_failure(connection, &err.to_string()).await?;
                return Err(SyncError::Provider(err));
            }
        };

        let mut summary = SyncSummary::default();
        let accounts = self
            .normalize_accounts(connection, &raw_accounts, mapper, &mut summary)
            .await?;

        let today = self.clock.today();
        let cap = today - chrono::Duration::days(duration_days(self.config.sync.max_lookback));
        let lookback = lookback_start.unwrap_or(cap);
        let window_days = client
            .max_window_days()
            .unwrap_or(self.config.sync.default_window_days);
        let plan = WindowPlan::new(today, lookback, window_days, cap);
        summary.lookback_truncated = plan.truncated();

        let fetch_timeout = connection
            .config
            .fetch_timeout
            .unwrap_or(self.config.sync.fetch_timeout);
        let concurrency = self.config.sync.max_concurrent_accounts.max(1);

        let tasks: Vec<AccountTask> = stream::iter(accounts.iter().enumerate())
            .map(|(index, (account, normalized))| {
                let plan = plan.clone();
                async move {
                    if self.cancel.is_cancelled() {
                        return AccountTask::Cancelled(account.clone());
                    }
                    let Some(_guard) = self.locks.try_acquire(&account.id) else {
                        return AccountTask::AlreadySyncing(account.clone());
                    };

                    let matcher = IdentityMatcher::new(client.name());
                    let processor = AccountProcessor::new(
                        account,
                        client,
                        mapper,
                        &matcher,
                        self.storage.as_ref(),
                        &self.enrichment,
                        self.clock.as_ref(),
                        fetch_timeout,
                    );
                    let outcome = processor.process(plan).await;

                    if outcome.auth_failure {
                        // Credentials died mid-run: stop scheduling further
                        // accounts; started siblings finish on their own.
                        self.cancel.cancel();
                    }
                    if outcome.phase == ProcessorPhase::Done {
                        self.record_balance(account, normalized).await;
                    }
                    AccountTask::Processed {
                        index,
                        outcome: Box::new(outcome),
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut auth_error: Option<String> = None;
        let mut discovery: Option<(usize, serde_json::Value)> = None;
        for task in tasks {
            match task {
                AccountTask::Processed { index, outcome } => {
                    if let Some(chunk) = &outcome.first_chunk {
                        // The snapshot is the discovery fetch of the first
                        // account in listing order.
                        if discovery.as_ref().map_or(true, |(i, _)| index < *i) {
                            discovery = Some((index, chunk.clone()));
                        }
                    }
                    summary.entries_imported += outcome.imported;
                    summary.entries_upgraded += outcome.upgraded;
                    summary.duplicates_skipped += outcome.duplicates;
                    summary.malformed_records += outcome.malformed;
                    summary.needs_review.extend(outcome.ambiguous.clone());
                    match outcome.phase {
                        ProcessorPhase::Done => summary.accounts_processed += 1,
                        _ => {
                            let reason = outcome
                                .skip_reason
                                .clone()
                                .unwrap_or_else(|| "unknown".to_string());
                            if outcome.auth_failure {
                                auth_error = Some(reason.clone());
                            }
                            summary.skipped_accounts.push(SkippedAccount {
                                provider_account_id: outcome.provider_account_id.clone(),
                                reason,
                            });
                        }
                    }
                }
                AccountTask::AlreadySyncing(account) => {
                    summary.skipped_accounts.push(SkippedAccount {
                        provider_account_id: account.provider_account_id,
                        reason: "sync already in progress".to_string(),
                    });
                }
                AccountTask::Cancelled(account) => {
                    summary.skipped_accounts.push(SkippedAccount {
                        provider_account_id: account.provider_account_id,
                        reason: "cancelled".to_string(),
                    });
                }
            }
        }

        summary.first_chunk_snapshot = discovery.map(|(_, chunk)| chunk);

        connection.state.account_ids =
            accounts.iter().map(|(account, _)| account.id.clone()).collect();
        if let Some(chunk) = &summary.first_chunk_snapshot {
            connection.state.discovery_snapshot = chunk.clone();
        }

        if let Some(message) = auth_error {
            connection.state.status = ConnectionStatus::PendingReauth;
            connection.state.last_sync = Some(LastSync {
                at: self.clock.now(),
                status: SyncStatus::Failed,
                error: Some(message.clone()),
            });
            self.storage.save_connection(connection).await?;
            return Err(SyncError::AuthRequired(message));
        }

        connection.state.status = ConnectionStatus::Active;
        connection.state.last_sync = Some(LastSync {
            at: self.clock.now(),
            status: if summary.skipped_accounts.is_empty() {
                SyncStatus::Success
            } else {
                SyncStatus::Partial
            },
            error: None,
        });
        self.storage.save_connection(connection).await?;

        tracing::info!(
            connection_id = %connection.id(),
            accounts_processed = summary.accounts_processed,
            entries_imported = summary.entries_imported,
            skipped = summary.skipped_accounts.len(),
            "Sync run finished",
        );

        Ok(summary)
    }

    /// Map raw account payloads into ledger accounts, preserving
    /// `created_at` for accounts seen before. Accounts whose payload fails
    /// to normalize (including embedded provider error markers) are
    /// skipped, never fatal.
    async fn normalize_accounts(
        &self,
        connection: &Connection,
        raw_accounts: &[serde_json::Value],
        mapper: &dyn ProviderMapper,
        summary: &mut SyncSummary,
    ) -> Result<Vec<(Account, NormalizedAccount)>, SyncError> {
        let mut accounts = Vec::new();
        for raw in raw_accounts {
            let normalized = match mapper.normalize_account(raw) {
                Ok(normalized) => normalized,
                Err(err) => {
                    let provider_account_id = raw
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string();
                    tracing::warn!(
                        provider_account_id = %provider_account_id,
                        error = %err,
                        "Skipping account whose payload could not be normalized",
                    );
                    summary.skipped_accounts.push(SkippedAccount {
                        provider_account_id,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let mut account = Account::new(
                connection.id().clone(),
                normalized.provider_account_id.clone(),
                normalized.name.clone(),
                normalized.currency.clone(),
                self.clock.now(),
            );
            if let Some(existing) = self.storage.get_account(&account.id).await? {
                account.created_at = existing.created_at;
                account.provider_data = existing.provider_data;
            }
            self.storage.save_account(&account).await?;
            accounts.push((account, normalized));
        }
        Ok(accounts)
    }

    async fn record_balance(&self, account: &Account, normalized: &NormalizedAccount) {
        let mut observation = BalanceObservation::new(
            self.clock.now(),
            normalized.currency.clone(),
            normalized.current_balance,
        );
        if let Some(available) = normalized.available_balance {
            observation = observation.with_available(available);
        }
        if let Err(err) = self.storage.append_balance(&account.id, &observation).await {
            tracing::warn!(
                account_id = %account.id,
                error = %err,
                "Failed to record balance observation",
            );
        }
    }

    async fn record_failure(
        &self,
        connection: &mut Connection,
        message: &str,
    ) -> Result<(), SyncError> {
        connection.state.status = ConnectionStatus::Error;
        connection.state.last_sync = Some(LastSync {
            at: self.clock.now(),
            status: SyncStatus::Failed,
            error: Some(message.to_string()),
        });
        self.storage.save_connection(connection).await?;
        Ok(())
    }
}
