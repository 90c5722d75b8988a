mod memory;

pub use memory::MemoryStorage;

use anyhow::Result;

use crate::models::{Account, BalanceObservation, Connection, Entry, Id};

/// Storage trait for the canonical ledger.
///
/// The engine is persistence-agnostic: any object store, relational
/// database, or file layout can sit behind this trait. Entry writes are
/// upserts keyed by entry id, which together with the matcher's idempotence
/// makes replay-on-retry safe.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    // Connections
    async fn list_connections(&self) -> Result<Vec<Connection>>;
    async fn get_connection(&self, id: &Id) -> Result<Option<Connection>>;
    async fn save_connection(&self, conn: &Connection) -> Result<()>;

    // Accounts
    async fn list_accounts(&self) -> Result<Vec<Account>>;
    async fn get_account(&self, id: &Id) -> Result<Option<Account>>;
    async fn save_account(&self, account: &Account) -> Result<()>;

    // Entries
    async fn get_entries(&self, account_id: &Id) -> Result<Vec<Entry>>;
    async fn upsert_entry(&self, account_id: &Id, entry: &Entry) -> Result<()>;

    // Balance observations
    async fn get_balances(&self, account_id: &Id) -> Result<Vec<BalanceObservation>>;
    async fn append_balance(&self, account_id: &Id, observation: &BalanceObservation)
        -> Result<()>;
}
