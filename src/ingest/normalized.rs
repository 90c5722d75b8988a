use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The provider-agnostic transaction shape every mapper must produce.
///
/// Sign convention matches [`crate::models::Entry`]: positive = outflow,
/// negative = inflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub provider_account_id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    /// Stable upstream id, when the provider supplies one. Pending records
    /// frequently arrive without it and gain it once posted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Secondary identifier (e.g. a bank FITID) used when no stable id
    /// exists. Kept in its own namespace by the matcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_id: Option<String>,
    #[serde(default)]
    pub pending: bool,
    /// Attributes the provider is allowed to enrich on the matched entry
    /// (merchant, category, ...). Applied through the enrichment ledger so
    /// user locks are honored.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl NormalizedRecord {
    pub fn new(
        provider_account_id: impl Into<String>,
        date: NaiveDate,
        amount: Decimal,
        currency: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            provider_account_id: provider_account_id.into(),
            date,
            amount,
            currency: currency.into(),
            description: description.into(),
            external_id: None,
            fallback_id: None,
            pending: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_fallback_id(mut self, id: impl Into<String>) -> Self {
        self.fallback_id = Some(id.into());
        self
    }

    pub fn with_pending(mut self, pending: bool) -> Self {
        self.pending = pending;
        self
    }

    pub fn with_extra(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }
}

/// The provider-agnostic account shape every mapper must produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedAccount {
    pub provider_account_id: String,
    pub name: String,
    pub currency: String,
    pub current_balance: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_balance: Option<Decimal>,
}
