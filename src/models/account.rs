use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// An individual financial account (checking, savings, credit card, brokerage)
/// linked through one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub connection_id: Id,
    /// The id the provider uses for this account.
    pub provider_account_id: String,
    pub name: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    /// Opaque data owned by the provider integration.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub provider_data: serde_json::Value,
}

impl Account {
    pub fn new(
        connection_id: Id,
        provider_account_id: impl Into<String>,
        name: impl Into<String>,
        currency: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let provider_account_id = provider_account_id.into();
        Self {
            // Deterministic so re-linking the same provider account maps to
            // the same ledger account.
            id: Id::from_external(&provider_account_id),
            connection_id,
            provider_account_id,
            name: name.into(),
            currency: currency.into(),
            created_at,
            active: true,
            provider_data: serde_json::Value::Null,
        }
    }

    pub fn with_provider_data(mut self, data: serde_json::Value) -> Self {
        self.provider_data = data;
        self
    }
}
