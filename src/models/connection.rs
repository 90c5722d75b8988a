use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::duration::deserialize_duration_opt;

use super::Id;

/// Human-declared connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Display name for this connection.
    pub name: String,
    /// Which provider integration to use (e.g., "simplefin").
    pub provider: String,
    /// Override the per-account fetch timeout for this connection.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_duration_opt"
    )]
    pub fetch_timeout: Option<std::time::Duration>,
}

/// Machine-managed connection state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub id: Id,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    /// Information about the last sync attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<LastSync>,
    /// Account IDs managed by this connection.
    #[serde(default)]
    pub account_ids: Vec<Id>,
    /// Raw response of the most recent discovery fetch, retained verbatim so
    /// operators can inspect exactly what the provider returned. Overwritten
    /// on every sync run.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub discovery_snapshot: serde_json::Value,
    /// Opaque data owned by the provider integration.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub provider_data: serde_json::Value,
}

impl ConnectionState {
    pub fn new_with(id: Id, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: ConnectionStatus::Active,
            created_at,
            last_sync: None,
            account_ids: Vec::new(),
            discovery_snapshot: serde_json::Value::Null,
            provider_data: serde_json::Value::Null,
        }
    }
}

/// A fully loaded connection (config + state).
#[derive(Debug, Clone)]
pub struct Connection {
    pub config: ConnectionConfig,
    pub state: ConnectionState,
}

impl Connection {
    /// Create a new connection from config, generating fresh state.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::new_with(Id::new(), Utc::now()),
        }
    }

    pub fn new_at(config: ConnectionConfig, created_at: DateTime<Utc>) -> Self {
        Self {
            config,
            state: ConnectionState::new_with(Id::new(), created_at),
        }
    }

    pub fn id(&self) -> &Id {
        &self.state.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Error,
    Disconnected,
    PendingReauth,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::PendingReauth => "pending_reauth",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastSync {
    pub at: DateTime<Utc>,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failed,
    /// Some accounts were skipped but the connection-level sync completed.
    Partial,
}
