#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use ledgersync::ingest::{NormalizedAccount, NormalizedRecord};
use ledgersync::models::{Connection, ConnectionConfig};
use ledgersync::sync::{MapError, ProviderClient, ProviderError, ProviderMapper};

/// Scripted in-memory provider. Accounts are raw JSON payloads; each
/// account's transaction history is filtered to the requested window, so
/// tests can assert exactly which ranges were fetched.
pub struct MockProvider {
    pub accounts: Vec<serde_json::Value>,
    pub transactions: HashMap<String, Vec<serde_json::Value>>,
    pub max_window_days: Option<u32>,
    pub fail_auth: Option<String>,
    pub fetch_delay: Option<std::time::Duration>,
    pub fetch_log: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            accounts: Vec::new(),
            transactions: HashMap::new(),
            max_window_days: None,
            fail_auth: None,
            fetch_delay: None,
            fetch_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_account(mut self, raw: serde_json::Value) -> Self {
        self.accounts.push(raw);
        self
    }

    pub fn with_transactions(
        mut self,
        provider_account_id: &str,
        records: Vec<serde_json::Value>,
    ) -> Self {
        self.transactions
            .insert(provider_account_id.to_string(), records);
        self
    }

    pub fn with_max_window_days(mut self, days: u32) -> Self {
        self.max_window_days = Some(days);
        self
    }

    pub fn with_auth_failure(mut self, message: &str) -> Self {
        self.fail_auth = Some(message.to_string());
        self
    }

    pub fn with_fetch_delay(mut self, delay: std::time::Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn fetched_windows(&self) -> Vec<(String, NaiveDate, NaiveDate)> {
        self.fetch_log.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProviderClient for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn max_window_days(&self) -> Option<u32> {
        self.max_window_days
    }

    async fn list_accounts(&self) -> Result<Vec<serde_json::Value>, ProviderError> {
        if let Some(message) = &self.fail_auth {
            return Err(ProviderError::Auth(message.clone()));
        }
        Ok(self.accounts.clone())
    }

    async fn list_transactions(
        &self,
        provider_account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<serde_json::Value>, ProviderError> {
        self.fetch_log
            .lock()
            .unwrap()
            .push((provider_account_id.to_string(), start, end));

        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }

        let records = self
            .transactions
            .get(provider_account_id)
            .cloned()
            .unwrap_or_default();
        Ok(records
            .into_iter()
            .filter(|raw| {
                raw.get("date")
                    .and_then(|v| v.as_str())
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                    .map(|date| date >= start && date <= end)
                    .unwrap_or(true)
            })
            .collect())
    }
}

/// Mapper for the mock provider's plain JSON shape.
pub struct MockMapper;

impl ProviderMapper for MockMapper {
    fn normalize_account(&self, raw: &serde_json::Value) -> Result<NormalizedAccount, MapError> {
        if let Some(error) = raw.get("error").and_then(|v| v.as_str()) {
            return Err(MapError::Account(error.to_string()));
        }

        Ok(NormalizedAccount {
            provider_account_id: str_field(raw, "id")?,
            name: str_field(raw, "name")?,
            currency: raw
                .get("currency")
                .and_then(|v| v.as_str())
                .unwrap_or("USD")
                .to_string(),
            current_balance: decimal_field(raw, "balance")?,
            available_balance: None,
        })
    }

    fn normalize_transaction(
        &self,
        raw: &serde_json::Value,
        currency: &str,
    ) -> Result<NormalizedRecord, MapError> {
        let date = raw
            .get("date")
            .and_then(|v| v.as_str())
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .ok_or(MapError::MissingField("date"))?;

        let mut record = NormalizedRecord::new(
            raw.get("account_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default(),
            date,
            decimal_field(raw, "amount")?,
            currency,
            str_field(raw, "description")?,
        )
        .with_pending(
            raw.get("pending")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        );

        if let Some(id) = raw.get("id").and_then(|v| v.as_str()) {
            record = record.with_external_id(id);
        }
        if let Some(fitid) = raw.get("fitid").and_then(|v| v.as_str()) {
            record = record.with_fallback_id(fitid);
        }
        if let Some(merchant) = raw.get("merchant").and_then(|v| v.as_str()) {
            record = record.with_extra("merchant", serde_json::json!(merchant));
        }

        Ok(record)
    }
}

fn str_field(raw: &serde_json::Value, field: &'static str) -> Result<String, MapError> {
    raw.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or(MapError::MissingField(field))
}

fn decimal_field(raw: &serde_json::Value, field: &'static str) -> Result<Decimal, MapError> {
    let text = raw
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or(MapError::MissingField(field))?;
    Decimal::from_str(text).map_err(|err| MapError::Invalid {
        field,
        message: err.to_string(),
    })
}

pub fn mock_connection(name: &str) -> Connection {
    Connection::new(ConnectionConfig {
        name: name.to_string(),
        provider: "mock".to_string(),
        fetch_timeout: None,
    })
}

pub fn raw_account(id: &str, name: &str, balance: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "currency": "USD",
        "balance": balance,
    })
}

pub fn raw_tx(id: Option<&str>, date: &str, amount: &str, description: &str) -> serde_json::Value {
    let mut raw = serde_json::json!({
        "date": date,
        "amount": amount,
        "description": description,
    });
    if let Some(id) = id {
        raw["id"] = serde_json::json!(id);
    }
    raw
}
