//! Opening balance anchor reconciliation.
//!
//! The anchor is a synthetic zero-amount valuation entry marking the
//! account's balance immediately before its earliest tracked date. It is
//! created lazily on first import and only ever moves earlier; moving it
//! forward would silently drop historical balance information.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::models::{Entry, EntryPayload, Id, ValuationKind};
use crate::storage::Storage;

/// Reconcile the account's opening anchor against a batch of imported
/// entries. Invoked once after the batch completes.
///
/// `opening_balance` is an explicit balance supplied by the import source
/// (e.g. a QIF opening-balance pseudo-transaction); it only applies when
/// the anchor is first created.
pub async fn reconcile(
    storage: &dyn Storage,
    account_id: &Id,
    imported: &[Entry],
    opening_balance: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(earliest) = imported
        .iter()
        .filter(|entry| !entry.is_opening_anchor())
        .min_by_key(|entry| entry.date)
    else {
        return Ok(());
    };

    let entries = storage.get_entries(account_id).await?;
    let anchor = entries.iter().find(|entry| entry.is_opening_anchor());

    match anchor {
        None => {
            let anchor = Entry::valuation(
                account_id.clone(),
                earliest.date - Duration::days(1),
                ValuationKind::OpeningAnchor,
                opening_balance.unwrap_or(Decimal::ZERO),
                earliest.currency.clone(),
                "Opening balance",
                now,
            );
            tracing::debug!(
                account_id = %account_id,
                date = %anchor.date,
                "Creating opening balance anchor",
            );
            storage.upsert_entry(account_id, &anchor).await?;
        }
        Some(existing) if earliest.date <= existing.date => {
            let old_date = existing.date;
            let old_balance = existing.valuation_balance().unwrap_or(Decimal::ZERO);
            let new_date = earliest.date - Duration::days(1);

            // Keep the running balance unchanged for every date after the
            // old anchor: with positive = outflow, the balance at the old
            // anchor date equals new_balance - sum(amounts in
            // (new_date, old_date]), so the new balance absorbs that span.
            let span_total: Decimal = entries
                .iter()
                .filter(|entry| !entry.is_opening_anchor())
                .filter(|entry| entry.date > new_date && entry.date <= old_date)
                .map(|entry| entry.amount)
                .sum();

            let mut moved = existing.clone();
            moved.date = new_date;
            moved.payload = EntryPayload::Valuation {
                kind: ValuationKind::OpeningAnchor,
                balance: old_balance + span_total,
            };
            moved.updated_at = now;
            tracing::debug!(
                account_id = %account_id,
                old_date = %old_date,
                new_date = %new_date,
                "Moving opening balance anchor earlier",
            );
            storage.upsert_entry(account_id, &moved).await?;
        }
        // Earliest import postdates the anchor: untouched. The anchor
        // never moves forward.
        Some(_) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::{NaiveDate, TimeZone};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn tx(account_id: &Id, date: NaiveDate, amount: Decimal) -> Entry {
        Entry::transaction(account_id.clone(), date, amount, "USD", "TEST", now())
    }

    async fn anchor_of(storage: &MemoryStorage, account_id: &Id) -> Entry {
        storage
            .get_entries(account_id)
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.is_opening_anchor())
            .expect("anchor exists")
    }

    #[tokio::test]
    async fn creates_anchor_one_day_before_earliest_import() -> Result<()> {
        let storage = MemoryStorage::new();
        let account_id = Id::from_string("acct-1");

        let imported = vec![
            tx(&account_id, d(2025, 3, 10), Decimal::new(-1_000, 2)),
            tx(&account_id, d(2025, 3, 5), Decimal::new(2_000, 2)),
        ];
        for entry in &imported {
            storage.upsert_entry(&account_id, entry).await?;
        }

        reconcile(&storage, &account_id, &imported, None, now()).await?;

        let anchor = anchor_of(&storage, &account_id).await;
        assert_eq!(anchor.date, d(2025, 3, 4));
        assert_eq!(anchor.valuation_balance(), Some(Decimal::ZERO));
        assert_eq!(anchor.amount, Decimal::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn explicit_opening_balance_is_used_at_creation() -> Result<()> {
        let storage = MemoryStorage::new();
        let account_id = Id::from_string("acct-1");

        let imported = vec![tx(&account_id, d(2025, 3, 10), Decimal::new(-1_000, 2))];
        for entry in &imported {
            storage.upsert_entry(&account_id, entry).await?;
        }

        reconcile(
            &storage,
            &account_id,
            &imported,
            Some(Decimal::new(50_000, 2)),
            now(),
        )
        .await?;

        let anchor = anchor_of(&storage, &account_id).await;
        assert_eq!(anchor.valuation_balance(), Some(Decimal::new(50_000, 2)));
        Ok(())
    }

    #[tokio::test]
    async fn moves_anchor_earlier_and_preserves_balance_at_old_date() -> Result<()> {
        let storage = MemoryStorage::new();
        let account_id = Id::from_string("acct-1");

        // First import: one entry on 2025-03-10, anchor lands on 03-09 with
        // balance 100.00.
        let first = vec![tx(&account_id, d(2025, 3, 10), Decimal::new(-1_000, 2))];
        for entry in &first {
            storage.upsert_entry(&account_id, entry).await?;
        }
        reconcile(
            &storage,
            &account_id,
            &first,
            Some(Decimal::new(10_000, 2)),
            now(),
        )
        .await?;

        // Backfill discovers two older entries: an outflow of 30.00 on
        // 03-02 and an inflow of 5.00 on 03-08.
        let second = vec![
            tx(&account_id, d(2025, 3, 2), Decimal::new(3_000, 2)),
            tx(&account_id, d(2025, 3, 8), Decimal::new(-500, 2)),
        ];
        for entry in &second {
            storage.upsert_entry(&account_id, entry).await?;
        }
        reconcile(&storage, &account_id, &second, None, now()).await?;

        let anchor = anchor_of(&storage, &account_id).await;
        assert_eq!(anchor.date, d(2025, 3, 1));
        // Balance at the old anchor date (03-09) must still be 100.00:
        // new_balance - 30.00 + 5.00 = 100.00 => new_balance = 125.00.
        assert_eq!(anchor.valuation_balance(), Some(Decimal::new(12_500, 2)));
        Ok(())
    }

    #[tokio::test]
    async fn entry_on_anchor_date_moves_anchor() -> Result<()> {
        let storage = MemoryStorage::new();
        let account_id = Id::from_string("acct-1");

        let first = vec![tx(&account_id, d(2025, 3, 10), Decimal::new(-1_000, 2))];
        for entry in &first {
            storage.upsert_entry(&account_id, entry).await?;
        }
        reconcile(&storage, &account_id, &first, None, now()).await?;

        // New entry exactly on the anchor date (03-09).
        let second = vec![tx(&account_id, d(2025, 3, 9), Decimal::new(2_000, 2))];
        for entry in &second {
            storage.upsert_entry(&account_id, entry).await?;
        }
        reconcile(&storage, &account_id, &second, None, now()).await?;

        let anchor = anchor_of(&storage, &account_id).await;
        assert_eq!(anchor.date, d(2025, 3, 8));
        // Old balance 0.00 plus the 20.00 outflow now inside the span.
        assert_eq!(anchor.valuation_balance(), Some(Decimal::new(2_000, 2)));
        Ok(())
    }

    #[tokio::test]
    async fn later_imports_leave_anchor_untouched() -> Result<()> {
        let storage = MemoryStorage::new();
        let account_id = Id::from_string("acct-1");

        let first = vec![tx(&account_id, d(2025, 3, 10), Decimal::new(-1_000, 2))];
        for entry in &first {
            storage.upsert_entry(&account_id, entry).await?;
        }
        reconcile(&storage, &account_id, &first, None, now()).await?;
        let before = anchor_of(&storage, &account_id).await;

        let second = vec![tx(&account_id, d(2025, 4, 1), Decimal::new(-2_000, 2))];
        for entry in &second {
            storage.upsert_entry(&account_id, entry).await?;
        }
        reconcile(&storage, &account_id, &second, None, now()).await?;

        let after = anchor_of(&storage, &account_id).await;
        assert_eq!(after.date, before.date);
        assert_eq!(after.valuation_balance(), before.valuation_balance());
        Ok(())
    }

    #[tokio::test]
    async fn empty_import_is_a_no_op() -> Result<()> {
        let storage = MemoryStorage::new();
        let account_id = Id::from_string("acct-1");

        reconcile(&storage, &account_id, &[], None, now()).await?;
        assert!(storage.get_entries(&account_id).await?.is_empty());
        Ok(())
    }
}
