mod account;
mod connection;
mod entry;
mod id;

pub use account::Account;
pub use connection::{Connection, ConnectionConfig, ConnectionState, ConnectionStatus, LastSync, SyncStatus};
pub use entry::{
    fallback_identity, is_fallback_identity, stable_identity, BalanceObservation, Entry,
    EntryPayload, EntryStatus, ValuationKind,
};
pub use id::Id;
