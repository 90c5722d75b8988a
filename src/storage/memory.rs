//! In-memory storage implementation for tests and demos.

use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::models::{Account, BalanceObservation, Connection, Entry, Id};

use super::Storage;

/// In-memory storage. Entries are kept in insertion order per account;
/// upserts replace in place so order stays stable across re-syncs.
pub struct MemoryStorage {
    connections: Mutex<HashMap<Id, Connection>>,
    accounts: Mutex<HashMap<Id, Account>>,
    entries: Mutex<HashMap<Id, Vec<Entry>>>,
    balances: Mutex<HashMap<Id, Vec<BalanceObservation>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn list_connections(&self) -> Result<Vec<Connection>> {
        let conns = self.connections.lock().await;
        Ok(conns.values().cloned().collect())
    }

    async fn get_connection(&self, id: &Id) -> Result<Option<Connection>> {
        let conns = self.connections.lock().await;
        Ok(conns.get(id).cloned())
    }

    async fn save_connection(&self, conn: &Connection) -> Result<()> {
        let mut conns = self.connections.lock().await;
        conns.insert(conn.id().clone(), conn.clone());
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts.values().cloned().collect())
    }

    async fn get_account(&self, id: &Id) -> Result<Option<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts.get(id).cloned())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_entries(&self, account_id: &Id) -> Result<Vec<Entry>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(account_id).cloned().unwrap_or_default())
    }

    async fn upsert_entry(&self, account_id: &Id, entry: &Entry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let account_entries = entries.entry(account_id.clone()).or_default();
        match account_entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => account_entries.push(entry.clone()),
        }
        Ok(())
    }

    async fn get_balances(&self, account_id: &Id) -> Result<Vec<BalanceObservation>> {
        let balances = self.balances.lock().await;
        Ok(balances.get(account_id).cloned().unwrap_or_default())
    }

    async fn append_balance(
        &self,
        account_id: &Id,
        observation: &BalanceObservation,
    ) -> Result<()> {
        let mut balances = self.balances.lock().await;
        balances
            .entry(account_id.clone())
            .or_default()
            .push(observation.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn upsert_replaces_in_place() -> Result<()> {
        let storage = MemoryStorage::new();
        let account_id = Id::from_string("acct-1");
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let entry = Entry::transaction(
            account_id.clone(),
            NaiveDate::from_ymd_opt(2025, 5, 20).unwrap(),
            Decimal::new(-2_500, 2),
            "USD",
            "COFFEE",
            now,
        );
        storage.upsert_entry(&account_id, &entry).await?;

        let updated = entry.clone().with_external_identity("simplefin_tx_1");
        storage.upsert_entry(&account_id, &updated).await?;

        let loaded = storage.get_entries(&account_id).await?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded[0].external_identity.as_deref(),
            Some("simplefin_tx_1")
        );
        Ok(())
    }
}
