//! Batch import of pre-normalized records.
//!
//! File-format producers (QIF, CSV, ...) parse into [`NormalizedRecord`]s
//! and feed them through here, so flat-file imports deduplicate against
//! provider syncs with exactly the same matcher. The format grammars
//! themselves live with their producers, not in this crate.

use anyhow::Result;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::anchor;
use crate::clock::Clock;
use crate::ingest::{IdentityMatcher, MatchOutcome, NormalizedRecord};
use crate::models::{Account, Entry, EntryStatus};
use crate::storage::Storage;
use crate::sync::AmbiguousMatch;

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub duplicates: usize,
    pub upgraded: usize,
    pub needs_review: Vec<AmbiguousMatch>,
}

impl ImportSummary {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": true,
            "imported": self.imported,
            "duplicates": self.duplicates,
            "upgraded": self.upgraded,
            "needs_review": self.needs_review.len(),
        })
    }
}

/// Import a batch of records under the given identity namespace (e.g.
/// `"qif"`), then reconcile the account's opening anchor.
///
/// `opening_balance` is the explicit opening balance a format like QIF
/// supplies via its dedicated pseudo-transaction; pass `None` when the
/// source has none. Re-importing the same file is a no-op thanks to the
/// matcher's idempotence.
pub async fn import_records(
    storage: &dyn Storage,
    account: &Account,
    namespace: &str,
    records: &[NormalizedRecord],
    opening_balance: Option<Decimal>,
    clock: &dyn Clock,
) -> Result<ImportSummary> {
    let matcher = IdentityMatcher::new(namespace);
    let mut entries = storage.get_entries(&account.id).await?;
    let mut imported_entries: Vec<Entry> = Vec::new();
    let mut summary = ImportSummary::default();

    for record in records {
        let now = clock.now();
        match matcher.evaluate(&entries, record) {
            MatchOutcome::New => {
                let mut entry = Entry::transaction(
                    account.id.clone(),
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
                entry.external_identity = matcher.identity_for_new(record);
                storage.upsert_entry(&account.id, &entry).await?;
                imported_entries.push(entry.clone());
                entries.push(entry);
                summary.imported += 1;
            }
            MatchOutcome::Duplicate { .. } => summary.duplicates += 1,
            MatchOutcome::Upgrade { entry_id, identity } => {
                let entry = entries
                    .iter_mut()
                    .find(|e| e.id == entry_id)
                    .expect("matcher returned an entry id from this ledger");
                entry.external_identity = Some(identity);
                entry.updated_at = now;
                let snapshot = entry.clone();
                storage.upsert_entry(&account.id, &snapshot).await?;
                summary.upgraded += 1;
            }
            MatchOutcome::Ambiguous { candidates } => {
                summary.needs_review.push(AmbiguousMatch {
                    account_id: account.id.clone(),
                    description: record.description.clone(),
                    date: record.date,
                    candidates,
                });
            }
        }
    }

    anchor::reconcile(
        storage,
        &account.id,
        &imported_entries,
        opening_balance,
        clock.now(),
    )
    .await?;

    Ok(summary)
}
