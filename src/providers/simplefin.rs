//! SimpleFin-style bridge provider.
//!
//! Talks to a SimpleFin bridge over its claimed access URL. The protocol
//! returns every account in one `/accounts` document; transaction history
//! is requested per account with `start-date`/`end-date` bounds, and the
//! bridge may embed per-account `error` markers inside an otherwise-200
//! response.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};

use crate::ingest::{NormalizedAccount, NormalizedRecord};
use crate::sync::{MapError, ProviderClient, ProviderError, ProviderMapper};

const PROVIDER_NAME: &str = "simplefin";

/// HTTP client for a SimpleFin bridge. The access URL embeds its own
/// credentials, so it is held as a secret.
pub struct SimpleFinClient {
    access_url: SecretString,
    client: Client,
    max_window_days: Option<u32>,
}

impl SimpleFinClient {
    pub fn new(access_url: SecretString) -> Self {
        Self {
            access_url,
            client: Client::new(),
            max_window_days: None,
        }
    }

    /// Declare a per-request window cap for bridges that reject long
    /// ranges.
    pub fn with_max_window_days(mut self, days: u32) -> Self {
        self.max_window_days = Some(days);
        self
    }

    fn accounts_url(&self) -> String {
        format!(
            "{}/accounts",
            self.access_url.expose_secret().trim_end_matches('/')
        )
    }

    async fn fetch_accounts(
        &self,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, ProviderError> {
        let response = self
            .client
            .get(self.accounts_url())
            .query(query)
            .send()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Auth(format!(
                "bridge rejected the access url ({status})"
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Network(format!(
                "bridge returned {status}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ProviderError::Network(format!("invalid response body: {err}")))?;

        // Top-level errors mean the claim itself is no longer usable.
        if let Some(errors) = body.get("errors").and_then(|v| v.as_array()) {
            if !errors.is_empty() {
                let joined = errors
                    .iter()
                    .filter_map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ProviderError::Auth(joined));
            }
        }

        Ok(body)
    }
}

#[async_trait::async_trait]
impl ProviderClient for SimpleFinClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn max_window_days(&self) -> Option<u32> {
        self.max_window_days
    }

    async fn list_accounts(&self) -> Result<Vec<serde_json::Value>, ProviderError> {
        let body = self
            .fetch_accounts(&[("balances-only", "1".to_string())])
            .await?;
        Ok(body
            .get("accounts")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    async fn list_transactions(
        &self,
        provider_account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<serde_json::Value>, ProviderError> {
        let start_ts = start
            .and_hms_opt(0, 0, 0)
            .expect("valid time")
            .and_utc()
            .timestamp();
        let end_ts = end
            .and_hms_opt(23, 59, 59)
            .expect("valid time")
            .and_utc()
            .timestamp();

        let body = self
            .fetch_accounts(&[
                ("account", provider_account_id.to_string()),
                ("start-date", start_ts.to_string()),
                ("end-date", end_ts.to_string()),
            ])
            .await?;

        let account = body
            .get("accounts")
            .and_then(|v| v.as_array())
            .and_then(|accounts| {
                accounts.iter().find(|a| {
                    a.get("id").and_then(|v| v.as_str()) == Some(provider_account_id)
                })
            })
            .ok_or_else(|| {
                ProviderError::Account(format!(
                    "bridge response has no account {provider_account_id}"
                ))
            })?;

        if let Some(error) = account.get("error").and_then(|v| v.as_str()) {
            return Err(ProviderError::Account(error.to_string()));
        }

        Ok(account
            .get("transactions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }
}

/// Maps SimpleFin payloads into the normalized shapes.
///
/// SimpleFin amounts are signed from the account's point of view (positive
/// = money in), the opposite of the ledger convention, so the mapper
/// negates them.
pub struct SimpleFinMapper {
    default_currency: String,
}

impl SimpleFinMapper {
    pub fn new(default_currency: impl Into<String>) -> Self {
        Self {
            default_currency: default_currency.into(),
        }
    }
}

impl ProviderMapper for SimpleFinMapper {
    fn normalize_account(&self, raw: &serde_json::Value) -> Result<NormalizedAccount, MapError> {
        if let Some(error) = raw.get("error").and_then(|v| v.as_str()) {
            return Err(MapError::Account(error.to_string()));
        }

        let provider_account_id = required_str(raw, "id")?;
        let name = required_str(raw, "name")?;
        let currency = raw
            .get("currency")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.default_currency)
            .to_string();
        let current_balance = decimal_field(raw, "balance")?;
        let available_balance = match raw.get("available-balance") {
            Some(value) if !value.is_null() => Some(parse_decimal(value, "available-balance")?),
            _ => None,
        };

        Ok(NormalizedAccount {
            provider_account_id,
            name,
            currency,
            current_balance,
            available_balance,
        })
    }

    fn normalize_transaction(
        &self,
        raw: &serde_json::Value,
        currency: &str,
    ) -> Result<NormalizedRecord, MapError> {
        if let Some(error) = raw.get("error").and_then(|v| v.as_str()) {
            return Err(MapError::Account(error.to_string()));
        }

        let pending = raw
            .get("pending")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        // Pending transactions frequently carry `transacted_at` only.
        let timestamp = raw
            .get("posted")
            .and_then(|v| v.as_i64())
            .filter(|ts| *ts != 0)
            .or_else(|| raw.get("transacted_at").and_then(|v| v.as_i64()))
            .ok_or(MapError::MissingField("posted"))?;
        let date = DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| MapError::Invalid {
                field: "posted",
                message: format!("timestamp {timestamp} out of range"),
            })?
            .date_naive();

        let amount = decimal_field(raw, "amount")?;
        let description = required_str(raw, "description")?;

        // Transaction payloads sit inside their account document; the
        // account id is only present when a bridge inlines it.
        let provider_account_id = raw
            .get("account_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let mut record =
            NormalizedRecord::new(provider_account_id, date, -amount, currency, description)
                .with_pending(pending);

        // SimpleFin ids are stable; pending records that lack one fall
        // back to composite matching until the posted form arrives.
        if let Some(id) = raw.get("id").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
            record = record.with_external_id(id);
        }
        if let Some(payee) = raw.get("payee").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
            record = record.with_extra("merchant", serde_json::json!(payee));
        }
        if let Some(memo) = raw.get("memo").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
            record = record.with_extra("notes", serde_json::json!(memo));
        }

        Ok(record)
    }
}

fn required_str(raw: &serde_json::Value, field: &'static str) -> Result<String, MapError> {
    raw.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(MapError::MissingField(field))
}

fn decimal_field(raw: &serde_json::Value, field: &'static str) -> Result<Decimal, MapError> {
    let value = raw.get(field).ok_or(MapError::MissingField(field))?;
    parse_decimal(value, field)
}

fn parse_decimal(value: &serde_json::Value, field: &'static str) -> Result<Decimal, MapError> {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(MapError::Invalid {
                field,
                message: format!("expected a decimal string, got {other}"),
            })
        }
    };
    Decimal::from_str(&text).map_err(|err| MapError::Invalid {
        field,
        message: err.to_string(),
    })
}
