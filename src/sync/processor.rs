//! Per-account sync processing.
//!
//! One processor run walks a single account through
//! `pending -> fetching -> mapping -> matching -> done`, landing in the
//! `skipped` terminal state on account-scoped trouble. Failures here never
//! abort sibling accounts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::anchor;
use crate::clock::Clock;
use crate::enrich::{EnrichmentLedger, Source};
use crate::ingest::{IdentityMatcher, MatchOutcome, NormalizedRecord};
use crate::models::{Account, Entry, EntryStatus, Id};
use crate::storage::Storage;

use super::{AmbiguousMatch, MapError, ProviderClient, ProviderError, ProviderMapper, WindowPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorPhase {
    Pending,
    Fetching,
    Mapping,
    Matching,
    Done,
    Skipped,
}

/// What happened to one account during a run.
#[derive(Debug)]
pub struct AccountOutcome {
    pub account_id: Id,
    pub provider_account_id: String,
    pub phase: ProcessorPhase,
    pub imported: usize,
    pub upgraded: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub ambiguous: Vec<AmbiguousMatch>,
    pub skip_reason: Option<String>,
    /// True when the skip was an auth failure; the orchestrator escalates
    /// this to connection level.
    pub auth_failure: bool,
    /// Raw response of this account's first window, verbatim.
    pub first_chunk: Option<serde_json::Value>,
}

impl AccountOutcome {
    fn new(account: &Account) -> Self {
        Self {
            account_id: account.id.clone(),
            provider_account_id: account.provider_account_id.clone(),
            phase: ProcessorPhase::Pending,
            imported: 0,
            upgraded: 0,
            duplicates: 0,
            malformed: 0,
            ambiguous: Vec::new(),
            skip_reason: None,
            auth_failure: false,
            first_chunk: None,
        }
    }

    fn skip(mut self, reason: impl Into<String>) -> Self {
        self.phase = ProcessorPhase::Skipped;
        self.skip_reason = Some(reason.into());
        self
    }
}

/// Processes one account's windows: fetch -> map -> match -> write-or-skip,
/// then enrichment and opening-anchor reconciliation.
pub struct AccountProcessor<'a> {
    account: &'a Account,
    client: &'a dyn ProviderClient,
    mapper: &'a dyn ProviderMapper,
    matcher: &'a IdentityMatcher,
    storage: &'a dyn Storage,
    enrichment: &'a tokio::sync::Mutex<EnrichmentLedger>,
    clock: &'a dyn Clock,
    fetch_timeout: std::time::Duration,
}

impl<'a> AccountProcessor<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: &'a Account,
        client: &'a dyn ProviderClient,
        mapper: &'a dyn ProviderMapper,
        matcher: &'a IdentityMatcher,
        storage: &'a dyn Storage,
        enrichment: &'a tokio::sync::Mutex<EnrichmentLedger>,
        clock: &'a dyn Clock,
        fetch_timeout: std::time::Duration,
    ) -> Self {
        Self {
            account,
            client,
            mapper,
            matcher,
            storage,
            enrichment,
            clock,
            fetch_timeout,
        }
    }

    pub async fn process(&self, windows: WindowPlan) -> AccountOutcome {
        let mut outcome = AccountOutcome::new(self.account);

        let mut entries = match self.storage.get_entries(&self.account.id).await {
            Ok(entries) => entries,
            Err(err) => return outcome.skip(format!("failed to load ledger: {err}")),
        };
        let mut imported_entries: Vec<Entry> = Vec::new();

        // Windows are consumed in planner order; the anchor manager and the
        // pending->posted upgrade path both rely on one fixed ordering.
        for window in windows {
            outcome.phase = ProcessorPhase::Fetching;
            let raw_records = match self.fetch(window.start, window.end).await {
                Ok(records) => records,
                Err(err) => {
                    tracing::warn!(
                        account_id = %self.account.id,
                        provider_account_id = %self.account.provider_account_id,
                        window_start = %window.start,
                        window_end = %window.end,
                        error = %err,
                        "Account fetch failed; skipping account",
                    );
                    outcome.auth_failure = matches!(err, ProviderError::Auth(_));
                    return outcome.skip(err.to_string());
                }
            };

            if outcome.first_chunk.is_none() {
                outcome.first_chunk = Some(serde_json::Value::Array(raw_records.clone()));
            }

            for raw in &raw_records {
                outcome.phase = ProcessorPhase::Mapping;
                let record = match self.mapper.normalize_transaction(raw, &self.account.currency)
                {
                    Ok(record) => record,
                    Err(MapError::Account(message)) => {
                        return outcome.skip(message);
                    }
                    Err(err) => {
                        // One malformed record inside an otherwise-valid
                        // payload is record-scoped: count and continue.
                        tracing::warn!(
                            account_id = %self.account.id,
                            window_start = %window.start,
                            window_end = %window.end,
                            error = %err,
                            raw = %truncate_for_log(raw),
                            "Skipping malformed transaction record",
                        );
                        outcome.malformed += 1;
                        continue;
                    }
                };

                outcome.phase = ProcessorPhase::Matching;
                if let Err(err) = self
                    .apply_record(&record, &mut entries, &mut imported_entries, &mut outcome)
                    .await
                {
                    return outcome.skip(format!("failed to write entry: {err}"));
                }
            }
        }

        if let Err(err) = anchor::reconcile(
            self.storage,
            &self.account.id,
            &imported_entries,
            None,
            self.clock.now(),
        )
        .await
        {
            return outcome.skip(format!("anchor reconciliation failed: {err}"));
        }

        outcome.phase = ProcessorPhase::Done;
        outcome
    }

    async fn fetch(
        &self,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Vec<serde_json::Value>, ProviderError> {
        match tokio::time::timeout(
            self.fetch_timeout,
            self.client
                .list_transactions(&self.account.provider_account_id, start, end),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.fetch_timeout)),
        }
    }

    async fn apply_record(
        &self,
        record: &NormalizedRecord,
        entries: &mut Vec<Entry>,
        imported_entries: &mut Vec<Entry>,
        outcome: &mut AccountOutcome,
    ) -> anyhow::Result<()> {
        let now = self.clock.now();
        match self.matcher.evaluate(entries, record) {
            MatchOutcome::New => {
                let mut entry = Entry::transaction(
                    self.account.id.clone(),
                    record.date,
                    record.amount,
                    record.currency.clone(),
                    record.description.clone(),
                    now,
                )
                .with_status(if record.pending {
                    EntryStatus::Pending
                } else {
                    EntryStatus::Posted
                });
                entry.external_identity = self.matcher.identity_for_new(record);

                self.enrich_from_record(&mut entry, record, now).await?;
                self.storage.upsert_entry(&self.account.id, &entry).await?;
                imported_entries.push(entry.clone());
                entries.push(entry);
                outcome.imported += 1;
            }
            MatchOutcome::Duplicate { entry_id } => {
                outcome.duplicates += 1;
                self.enrich_existing(&entry_id, record, entries, now).await?;
            }
            MatchOutcome::Upgrade { entry_id, identity } => {
                let entry = entries
                    .iter_mut()
                    .find(|e| e.id == entry_id)
                    .expect("matcher returned an entry id from this ledger");
                entry.external_identity = Some(identity);
                entry.updated_at = now;
                let snapshot = entry.clone();
                self.storage.upsert_entry(&self.account.id, &snapshot).await?;
                outcome.upgraded += 1;
                self.enrich_existing(&entry_id, record, entries, now).await?;
            }
            MatchOutcome::Ambiguous { candidates } => {
                tracing::warn!(
                    account_id = %self.account.id,
                    description = %record.description,
                    date = %record.date,
                    candidate_count = candidates.len(),
                    "Ambiguous composite match; leaving for manual merge",
                );
                outcome.ambiguous.push(AmbiguousMatch {
                    account_id: self.account.id.clone(),
                    description: record.description.clone(),
                    date: record.date,
                    candidates,
                });
            }
        }
        Ok(())
    }

    async fn enrich_existing(
        &self,
        entry_id: &Id,
        record: &NormalizedRecord,
        entries: &mut [Entry],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let entry = entries
            .iter_mut()
            .find(|e| e.id == *entry_id)
            .expect("matcher returned an entry id from this ledger");
        let before = entry.clone();
        self.enrich_from_record(entry, record, now).await?;
        if *entry != before {
            let snapshot = entry.clone();
            self.storage.upsert_entry(&self.account.id, &snapshot).await?;
        }
        Ok(())
    }

    /// Apply the attributes this provider is allowed to set. Lock
    /// rejections are silent; an unknown attribute is a mapper bug and
    /// fails the account.
    async fn enrich_from_record(
        &self,
        entry: &mut Entry,
        record: &NormalizedRecord,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut attrs: BTreeMap<String, serde_json::Value> = record.extra.clone();
        let status = if record.pending { "pending" } else { "posted" };
        attrs.insert("status".to_string(), serde_json::json!(status));

        let source = Source::Provider(self.client.name().to_string());
        let metadata = serde_json::json!({
            "provider_account_id": self.account.provider_account_id,
        });

        let mut enrichment = self.enrichment.lock().await;
        enrichment
            .enrich(entry, &attrs, &source, metadata, now)
            .map_err(anyhow::Error::from)?;
        Ok(())
    }
}

fn truncate_for_log(raw: &serde_json::Value) -> String {
    let mut text = raw.to_string();
    if text.len() > 256 {
        let mut idx = 256;
        while !text.is_char_boundary(idx) {
            idx -= 1;
        }
        text.truncate(idx);
        text.push_str("...");
    }
    text
}
