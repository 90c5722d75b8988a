use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enrich::LockState;

use super::Id;

/// Provisional vs finalized state of a transaction as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Posted,
}

/// Kind tag for valuation entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationKind {
    /// Synthetic marker for the account balance immediately before its
    /// earliest tracked date.
    OpeningAnchor,
    /// A plain point-in-time balance statement.
    Reconciliation,
}

/// The polymorphic payload carried by an [`Entry`]. The ingestion core only
/// reads the common entry fields and passes the payload through, except where
/// an enrichable attribute (merchant, category, status) maps into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryPayload {
    Transaction {
        status: EntryStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        merchant: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    Trade {
        symbol: String,
        quantity: Decimal,
    },
    Valuation {
        kind: ValuationKind,
        balance: Decimal,
    },
}

/// A single dated, signed ledger line belonging to one account.
///
/// Sign convention: positive = outflow/debit, negative = inflow/credit.
/// At most one entry per account may hold a given external identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Id,
    pub account_id: Id,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    /// Raw description from the source. Never rewritten by enrichment;
    /// the cleaned-up name lives in `display_name`.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Dedup key correlating this entry to a specific upstream provider
    /// record. See [`stable_identity`] / [`fallback_identity`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_identity: Option<String>,
    pub payload: EntryPayload,
    /// Attributes closed to enrichment, with the source that locked them.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub locked_attributes: BTreeMap<String, LockState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    pub fn transaction(
        account_id: Id,
        date: NaiveDate,
        amount: Decimal,
        currency: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Id::new(),
            account_id,
            date,
            amount,
            currency: currency.into(),
            description: description.into(),
            display_name: None,
            notes: None,
            external_identity: None,
            payload: EntryPayload::Transaction {
                status: EntryStatus::Posted,
                merchant: None,
                category: None,
            },
            locked_attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn valuation(
        account_id: Id,
        date: NaiveDate,
        kind: ValuationKind,
        balance: Decimal,
        currency: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Id::new(),
            account_id,
            date,
            amount: Decimal::ZERO,
            currency: currency.into(),
            description: description.into(),
            display_name: None,
            notes: None,
            external_identity: None,
            payload: EntryPayload::Valuation { kind, balance },
            locked_attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }

    pub fn with_status(mut self, new_status: EntryStatus) -> Self {
        if let EntryPayload::Transaction { status, .. } = &mut self.payload {
            *status = new_status;
        }
        self
    }

    pub fn with_external_identity(mut self, identity: impl Into<String>) -> Self {
        self.external_identity = Some(identity.into());
        self
    }

    pub fn status(&self) -> Option<EntryStatus> {
        match &self.payload {
            EntryPayload::Transaction { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_opening_anchor(&self) -> bool {
        matches!(
            self.payload,
            EntryPayload::Valuation {
                kind: ValuationKind::OpeningAnchor,
                ..
            }
        )
    }

    /// Balance carried by a valuation payload, if any.
    pub fn valuation_balance(&self) -> Option<Decimal> {
        match &self.payload {
            EntryPayload::Valuation { balance, .. } => Some(*balance),
            _ => None,
        }
    }
}

/// External identity for a provider record with a stable upstream id.
pub fn stable_identity(provider: &str, external_id: &str) -> String {
    format!("{provider}_{external_id}")
}

/// External identity for a record that only carries a secondary identifier
/// (e.g. a bank FITID). Namespaced so the stable and fallback id spaces
/// never collide.
pub fn fallback_identity(provider: &str, fallback_id: &str) -> String {
    format!("{provider}_fitid_{fallback_id}")
}

/// True if `identity` sits in the fallback namespace for `provider`.
pub fn is_fallback_identity(provider: &str, identity: &str) -> bool {
    identity.starts_with(&format!("{provider}_fitid_"))
}

/// A point-in-time balance reported by a provider for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceObservation {
    pub timestamp: DateTime<Utc>,
    pub currency: String,
    pub current: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<Decimal>,
}

impl BalanceObservation {
    pub fn new(timestamp: DateTime<Utc>, currency: impl Into<String>, current: Decimal) -> Self {
        Self {
            timestamp,
            currency: currency.into(),
            current,
            available: None,
        }
    }

    pub fn with_available(mut self, available: Decimal) -> Self {
        self.available = Some(available);
        self
    }
}
