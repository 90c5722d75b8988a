//! Attribute-level enrichment with per-source locking.
//!
//! Every non-user write to an entity attribute flows through
//! [`EnrichmentLedger::enrich`], is attributed to a [`Source`], and is
//! rejected silently when the attribute is locked by a different source.
//! User edits lock the attributes they touch, which gives them absolute
//! precedence over any automated source.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Entry, EntryPayload, EntryStatus, Id};

/// Attributes the enrichment path never writes, regardless of locks.
pub const IGNORED_ATTRIBUTES: &[&str] = &[
    "id",
    "account_id",
    "external_identity",
    "date",
    "amount",
    "currency",
    "description",
    "created_at",
    "updated_at",
];

/// Who (or what) wrote a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    User,
    Rule,
    Ai,
    /// A provider integration, by name.
    #[serde(untagged)]
    Provider(String),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::User => f.write_str("user"),
            Source::Rule => f.write_str("rule"),
            Source::Ai => f.write_str("ai"),
            Source::Provider(name) => f.write_str(name),
        }
    }
}

/// A lock on one attribute. Only the most recent locking source is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockState {
    pub locked_at: DateTime<Utc>,
    pub source: Source,
}

/// Audit record for one (entity, attribute, source) write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub entity_id: Id,
    pub attribute: String,
    pub source: Source,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnrichError {
    /// Enriching an attribute the entity does not expose is a programming
    /// error, not a lock rejection; it fails loudly.
    #[error("unknown enrichable attribute `{0}`")]
    UnknownAttribute(String),
}

/// An entity whose attributes can be enriched and locked.
///
/// Re-expresses the concern-mixin pattern as an explicit capability:
/// attribute access by name, plus ownership of the per-attribute lock map.
pub trait Enrichable {
    fn entity_id(&self) -> &Id;

    /// Attribute names this entity exposes to enrichment.
    fn enrichable_attributes(&self) -> Vec<&'static str>;

    fn attribute(&self, name: &str) -> Result<serde_json::Value, EnrichError>;

    fn set_attribute(&mut self, name: &str, value: &serde_json::Value)
        -> Result<(), EnrichError>;

    fn locked_attributes(&self) -> &BTreeMap<String, LockState>;

    fn locked_attributes_mut(&mut self) -> &mut BTreeMap<String, LockState>;

    fn locked_by(&self, name: &str) -> Option<&Source> {
        self.locked_attributes().get(name).map(|lock| &lock.source)
    }
}

/// Per-entity, per-attribute lock transitions plus the append-only audit
/// trail of who set each value. Pure state; persistence is the caller's
/// concern.
#[derive(Debug, Default)]
pub struct EnrichmentLedger {
    records: BTreeMap<(Id, String, String), EnrichmentRecord>,
}

impl EnrichmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `attrs` to `entity` on behalf of `source`.
    ///
    /// Returns the names actually applied, so callers can tell what changed
    /// from what a lock rejected. Skips (never errors): locked by another
    /// source, ignore-listed, or value unchanged. Each applied attribute is
    /// re-locked to `source` and upserts one audit record.
    pub fn enrich<E: Enrichable>(
        &mut self,
        entity: &mut E,
        attrs: &BTreeMap<String, serde_json::Value>,
        source: &Source,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, EnrichError> {
        // Validate every name up front so a bad attribute fails the whole
        // call instead of applying a partial set.
        let known = entity.enrichable_attributes();
        for name in attrs.keys() {
            if !known.contains(&name.as_str()) && !IGNORED_ATTRIBUTES.contains(&name.as_str()) {
                return Err(EnrichError::UnknownAttribute(name.clone()));
            }
        }

        let mut applied = Vec::new();
        for (name, value) in attrs {
            if IGNORED_ATTRIBUTES.contains(&name.as_str()) {
                continue;
            }
            if let Some(holder) = entity.locked_by(name) {
                if holder != source {
                    tracing::debug!(
                        entity = %entity.entity_id(),
                        attribute = %name,
                        locked_by = %holder,
                        requested_by = %source,
                        "Enrichment rejected by lock",
                    );
                    continue;
                }
            }
            if entity.attribute(name)? == *value {
                continue;
            }

            entity.set_attribute(name, value)?;
            entity.locked_attributes_mut().insert(
                name.clone(),
                LockState {
                    locked_at: now,
                    source: source.clone(),
                },
            );
            self.upsert_record(entity.entity_id(), name, source, value, &metadata, now);
            applied.push(name.clone());
        }

        Ok(applied)
    }

    /// Explicitly lock one attribute. Idempotent; re-locking updates the
    /// timestamp and the recorded source.
    pub fn lock_attribute<E: Enrichable>(
        &self,
        entity: &mut E,
        name: &str,
        source: Source,
        now: DateTime<Utc>,
    ) {
        entity.locked_attributes_mut().insert(
            name.to_string(),
            LockState {
                locked_at: now,
                source,
            },
        );
    }

    /// Explicitly unlock one attribute. Idempotent.
    pub fn unlock_attribute<E: Enrichable>(&self, entity: &mut E, name: &str) {
        entity.locked_attributes_mut().remove(name);
    }

    /// Lock every enrichable attribute whose value differs from `before`.
    ///
    /// Called after a direct (user-initiated) save with the pre-save
    /// snapshot; the changed attributes become un-enrichable by any
    /// automated source until explicitly unlocked.
    pub fn lock_saved_attributes<E: Enrichable>(
        &self,
        entity: &mut E,
        before: &E,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, EnrichError> {
        let mut locked = Vec::new();
        for name in entity.enrichable_attributes() {
            if IGNORED_ATTRIBUTES.contains(&name) {
                continue;
            }
            if entity.attribute(name)? != before.attribute(name)? {
                self.lock_attribute(entity, name, Source::User, now);
                locked.push(name.to_string());
            }
        }
        Ok(locked)
    }

    /// Drop everything `source` contributed to `entity`: its locks (never
    /// another source's) and its audit records.
    pub fn clear_source_cache<E: Enrichable>(&mut self, entity: &mut E, source: &Source) {
        let entity_id = entity.entity_id().clone();
        let source_key = source.to_string();

        let attributes: Vec<String> = self
            .records
            .range(
                (entity_id.clone(), String::new(), String::new())
                    ..(next_id(&entity_id), String::new(), String::new()),
            )
            .filter(|((_, _, src), _)| *src == source_key)
            .map(|((_, attr, _), _)| attr.clone())
            .collect();

        for attribute in &attributes {
            if entity.locked_by(attribute) == Some(source) {
                entity.locked_attributes_mut().remove(attribute);
            }
            self.records
                .remove(&(entity_id.clone(), attribute.clone(), source_key.clone()));
        }
    }

    /// Class-wide variant of [`Self::clear_source_cache`].
    pub fn clear_source_cache_all<E: Enrichable>(&mut self, entities: &mut [E], source: &Source) {
        for entity in entities {
            self.clear_source_cache(entity, source);
        }
    }

    pub fn record(&self, entity_id: &Id, attribute: &str, source: &Source) -> Option<&EnrichmentRecord> {
        self.records
            .get(&(entity_id.clone(), attribute.to_string(), source.to_string()))
    }

    pub fn records_for(&self, entity_id: &Id) -> Vec<&EnrichmentRecord> {
        self.records
            .range(
                (entity_id.clone(), String::new(), String::new())
                    ..(next_id(entity_id), String::new(), String::new()),
            )
            .map(|(_, record)| record)
            .collect()
    }

    fn upsert_record(
        &mut self,
        entity_id: &Id,
        attribute: &str,
        source: &Source,
        value: &serde_json::Value,
        metadata: &serde_json::Value,
        now: DateTime<Utc>,
    ) {
        let key = (entity_id.clone(), attribute.to_string(), source.to_string());
        match self.records.get_mut(&key) {
            Some(existing) => {
                existing.value = value.clone();
                existing.metadata = metadata.clone();
                existing.updated_at = now;
            }
            None => {
                self.records.insert(
                    key,
                    EnrichmentRecord {
                        entity_id: entity_id.clone(),
                        attribute: attribute.to_string(),
                        source: source.clone(),
                        value: value.clone(),
                        metadata: metadata.clone(),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }
}

// Upper bound for a half-open range scan over (Id, _, _) keys.
fn next_id(id: &Id) -> Id {
    Id::from_string(format!("{}\u{0}", id.as_str()))
}

impl Enrichable for Entry {
    fn entity_id(&self) -> &Id {
        &self.id
    }

    fn enrichable_attributes(&self) -> Vec<&'static str> {
        let mut attrs = vec!["display_name", "notes"];
        if matches!(self.payload, EntryPayload::Transaction { .. }) {
            attrs.extend(["merchant", "category", "status"]);
        }
        attrs
    }

    fn attribute(&self, name: &str) -> Result<serde_json::Value, EnrichError> {
        let value = match (name, &self.payload) {
            ("display_name", _) => opt_string(&self.display_name),
            ("notes", _) => opt_string(&self.notes),
            ("merchant", EntryPayload::Transaction { merchant, .. }) => opt_string(merchant),
            ("category", EntryPayload::Transaction { category, .. }) => opt_string(category),
            ("status", EntryPayload::Transaction { status, .. }) => {
                serde_json::to_value(status).expect("status serializes")
            }
            _ => return Err(EnrichError::UnknownAttribute(name.to_string())),
        };
        Ok(value)
    }

    fn set_attribute(
        &mut self,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<(), EnrichError> {
        match (name, &mut self.payload) {
            ("display_name", _) => self.display_name = as_opt_string(value),
            ("notes", _) => self.notes = as_opt_string(value),
            ("merchant", EntryPayload::Transaction { merchant, .. }) => {
                *merchant = as_opt_string(value)
            }
            ("category", EntryPayload::Transaction { category, .. }) => {
                *category = as_opt_string(value)
            }
            ("status", EntryPayload::Transaction { status, .. }) => {
                let parsed: EntryStatus = serde_json::from_value(value.clone())
                    .map_err(|_| EnrichError::UnknownAttribute(name.to_string()))?;
                *status = parsed;
            }
            _ => return Err(EnrichError::UnknownAttribute(name.to_string())),
        }
        Ok(())
    }

    fn locked_attributes(&self) -> &BTreeMap<String, LockState> {
        &self.locked_attributes
    }

    fn locked_attributes_mut(&mut self) -> &mut BTreeMap<String, LockState> {
        &mut self.locked_attributes
    }
}

fn opt_string(value: &Option<String>) -> serde_json::Value {
    match value {
        Some(v) => serde_json::Value::String(v.clone()),
        None => serde_json::Value::Null,
    }
}

fn as_opt_string(value: &serde_json::Value) -> Option<String> {
    value.as_str().map(str::to_string)
}
