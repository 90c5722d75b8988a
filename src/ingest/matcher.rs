//! Multi-strategy transaction identity matching.
//!
//! Given an account's existing ledger and one normalized provider record,
//! decides whether the record is new, an idempotent re-delivery, or the
//! posted form of a previously ingested pending record. Pure decision
//! logic; all writes happen in the caller.

use regex::Regex;

use crate::models::{
    fallback_identity, is_fallback_identity, stable_identity, Entry, EntryPayload, Id,
};

use super::NormalizedRecord;

/// Matcher verdict for one incoming record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No existing entry corresponds to this record; create exactly one.
    New,
    /// An entry already holds this record; write nothing.
    Duplicate { entry_id: Id },
    /// A pending entry without a stable identity matches this record, and
    /// the record now carries one: set the identity, touch nothing else.
    Upgrade { entry_id: Id, identity: String },
    /// More than one entry matches on the composite key. Never auto-merged;
    /// surfaced for an explicitly human-triggered merge workflow.
    Ambiguous { candidates: Vec<Id> },
}

/// Decides new / duplicate / upgrade for records from one provider.
pub struct IdentityMatcher {
    provider: String,
    whitespace: Regex,
}

impl IdentityMatcher {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            whitespace: Regex::new(r"\s+").expect("static regex"),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The external identity a newly created entry should carry for this
    /// record: the stable id when present, the namespaced fallback id
    /// otherwise, or none (composite-match dedup only).
    pub fn identity_for_new(&self, record: &NormalizedRecord) -> Option<String> {
        if let Some(id) = &record.external_id {
            Some(stable_identity(&self.provider, id))
        } else {
            record
                .fallback_id
                .as_ref()
                .map(|id| fallback_identity(&self.provider, id))
        }
    }

    /// Evaluate one record against the account's existing entries.
    ///
    /// Strategies run in strict order, first match wins:
    /// 1. stable-id lookup;
    /// 2. fallback-id lookup (own namespace);
    /// 3. composite: same date, exact signed decimal amount, same currency,
    ///    and normalized-description equality or containment.
    ///
    /// Safe to invoke repeatedly with the same input: re-running a full
    /// historical sync never changes the entry count.
    pub fn evaluate(&self, existing: &[Entry], record: &NormalizedRecord) -> MatchOutcome {
        if let Some(external_id) = &record.external_id {
            let identity = stable_identity(&self.provider, external_id);
            if let Some(entry) = find_by_identity(existing, &identity) {
                return MatchOutcome::Duplicate {
                    entry_id: entry.id.clone(),
                };
            }
        } else if let Some(fallback_id) = &record.fallback_id {
            let identity = fallback_identity(&self.provider, fallback_id);
            if let Some(entry) = find_by_identity(existing, &identity) {
                return MatchOutcome::Duplicate {
                    entry_id: entry.id.clone(),
                };
            }
        }

        let candidates: Vec<&Entry> = existing
            .iter()
            .filter(|entry| self.composite_matches(entry, record))
            .collect();

        match candidates.as_slice() {
            [] => MatchOutcome::New,
            [candidate] => self.resolve_single_candidate(candidate, record),
            _ => MatchOutcome::Ambiguous {
                candidates: candidates.iter().map(|e| e.id.clone()).collect(),
            },
        }
    }

    fn resolve_single_candidate(&self, candidate: &Entry, record: &NormalizedRecord) -> MatchOutcome {
        match (&record.external_id, &candidate.external_identity) {
            // Pending record gained a stable id: upgrade the entry in place.
            (Some(external_id), None) => MatchOutcome::Upgrade {
                entry_id: candidate.id.clone(),
                identity: stable_identity(&self.provider, external_id),
            },
            (Some(external_id), Some(identity)) => {
                if is_fallback_identity(&self.provider, identity) {
                    // Fallback identities may be upgraded to a stable one.
                    MatchOutcome::Upgrade {
                        entry_id: candidate.id.clone(),
                        identity: stable_identity(&self.provider, external_id),
                    }
                } else if *identity == stable_identity(&self.provider, external_id) {
                    MatchOutcome::Duplicate {
                        entry_id: candidate.id.clone(),
                    }
                } else {
                    // Same date/amount/description but a different stable
                    // upstream id: two genuinely distinct transactions.
                    MatchOutcome::New
                }
            }
            (None, _) => MatchOutcome::Duplicate {
                entry_id: candidate.id.clone(),
            },
        }
    }

    fn composite_matches(&self, entry: &Entry, record: &NormalizedRecord) -> bool {
        if matches!(entry.payload, EntryPayload::Valuation { .. }) {
            return false;
        }
        entry.date == record.date
            && entry.amount == record.amount
            && entry.currency.eq_ignore_ascii_case(&record.currency)
            && self.descriptions_match(&entry.description, &record.description)
    }

    /// Case-insensitive, whitespace-collapsed comparison. Two descriptions
    /// match if, after normalization, they are equal or one contains the
    /// other. Empty descriptions only match each other.
    fn descriptions_match(&self, a: &str, b: &str) -> bool {
        let a = self.normalize_description(a);
        let b = self.normalize_description(b);
        if a.is_empty() || b.is_empty() {
            return a == b;
        }
        a == b || a.contains(&b) || b.contains(&a)
    }

    fn normalize_description(&self, raw: &str) -> String {
        self.whitespace
            .replace_all(raw.trim(), " ")
            .to_lowercase()
    }
}

fn find_by_identity<'a>(existing: &'a [Entry], identity: &str) -> Option<&'a Entry> {
    existing
        .iter()
        .find(|entry| entry.external_identity.as_deref() == Some(identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entry(description: &str, amount: Decimal) -> Entry {
        Entry::transaction(
            Id::from_string("acct-1"),
            d(2025, 1, 1),
            amount,
            "USD",
            description,
            Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        )
    }

    fn record(description: &str, amount: Decimal) -> NormalizedRecord {
        NormalizedRecord::new("prov-acct", d(2025, 1, 1), amount, "USD", description)
    }

    #[test]
    fn composite_match_ignores_case_and_whitespace() {
        let existing = vec![entry("AMAZON MARKETPLACE", Decimal::new(-2_500, 2))];
        let incoming = record("amazon  marketplace", Decimal::new(-2_500, 2));

        match IdentityMatcher::new("simplefin").evaluate(&existing, &incoming) {
            MatchOutcome::Duplicate { entry_id } => assert_eq!(entry_id, existing[0].id),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn composite_match_accepts_substring_descriptions() {
        let existing = vec![entry("COFFEE", Decimal::new(-400, 2))];
        let incoming = record("Coffee Shop 42", Decimal::new(-400, 2));

        assert!(matches!(
            IdentityMatcher::new("simplefin").evaluate(&existing, &incoming),
            MatchOutcome::Duplicate { .. }
        ));
    }

    #[test]
    fn empty_descriptions_only_match_each_other() {
        let existing = vec![entry("", Decimal::new(-400, 2))];
        let incoming = record("Coffee Shop", Decimal::new(-400, 2));

        assert_eq!(
            IdentityMatcher::new("simplefin").evaluate(&existing, &incoming),
            MatchOutcome::New
        );
    }

    #[test]
    fn amount_comparison_is_exact() {
        let existing = vec![entry("COFFEE", Decimal::new(-400, 2))];
        let incoming = record("COFFEE", Decimal::new(-401, 2));

        assert_eq!(
            IdentityMatcher::new("simplefin").evaluate(&existing, &incoming),
            MatchOutcome::New
        );
    }

    #[test]
    fn stable_id_redelivery_is_duplicate() {
        let matcher = IdentityMatcher::new("simplefin");
        let existing =
            vec![entry("COFFEE", Decimal::new(-400, 2))
                .with_external_identity(stable_identity("simplefin", "tx_1"))];
        let incoming = record("something else entirely", Decimal::new(-400, 2))
            .with_external_id("tx_1");

        assert!(matches!(
            matcher.evaluate(&existing, &incoming),
            MatchOutcome::Duplicate { .. }
        ));
    }

    #[test]
    fn pending_record_upgrades_once_stable_id_arrives() {
        let matcher = IdentityMatcher::new("simplefin");
        let existing = vec![entry("COFFEE SHOP", Decimal::new(-400, 2))];
        let incoming = record("COFFEE SHOP", Decimal::new(-400, 2)).with_external_id("stable_123");

        match matcher.evaluate(&existing, &incoming) {
            MatchOutcome::Upgrade { entry_id, identity } => {
                assert_eq!(entry_id, existing[0].id);
                assert_eq!(identity, "simplefin_stable_123");
            }
            other => panic!("expected upgrade, got {other:?}"),
        }
    }

    #[test]
    fn fallback_identity_upgrades_to_stable() {
        let matcher = IdentityMatcher::new("simplefin");
        let existing = vec![entry("COFFEE SHOP", Decimal::new(-400, 2))
            .with_external_identity(fallback_identity("simplefin", "fit-9"))];
        let incoming = record("COFFEE SHOP", Decimal::new(-400, 2)).with_external_id("tx_9");

        assert!(matches!(
            matcher.evaluate(&existing, &incoming),
            MatchOutcome::Upgrade { .. }
        ));
    }

    #[test]
    fn different_stable_ids_are_distinct_transactions() {
        let matcher = IdentityMatcher::new("simplefin");
        let existing = vec![entry("COFFEE SHOP", Decimal::new(-400, 2))
            .with_external_identity(stable_identity("simplefin", "tx_1"))];
        let incoming = record("COFFEE SHOP", Decimal::new(-400, 2)).with_external_id("tx_2");

        assert_eq!(matcher.evaluate(&existing, &incoming), MatchOutcome::New);
    }

    #[test]
    fn fallback_id_lookup_uses_its_own_namespace() {
        let matcher = IdentityMatcher::new("simplefin");
        // An entry with stable identity "simplefin_f1" must not satisfy a
        // fallback lookup for fitid "f1".
        let existing = vec![
            entry("WIRE IN", Decimal::new(-100_000, 2))
                .with_external_identity(stable_identity("simplefin", "f1")),
        ];
        let incoming =
            record("totally different", Decimal::new(-5_000, 2)).with_fallback_id("f1");

        assert_eq!(matcher.evaluate(&existing, &incoming), MatchOutcome::New);
    }

    #[test]
    fn ambiguous_composite_match_is_reported_not_merged() {
        let matcher = IdentityMatcher::new("simplefin");
        let existing = vec![
            entry("COFFEE SHOP", Decimal::new(-400, 2)),
            entry("coffee shop", Decimal::new(-400, 2)),
        ];
        let incoming = record("Coffee Shop", Decimal::new(-400, 2));

        match matcher.evaluate(&existing, &incoming) {
            MatchOutcome::Ambiguous { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn opening_anchor_never_composite_matches() {
        let matcher = IdentityMatcher::new("simplefin");
        let anchor = Entry::valuation(
            Id::from_string("acct-1"),
            d(2025, 1, 1),
            crate::models::ValuationKind::OpeningAnchor,
            Decimal::ZERO,
            "USD",
            "Opening balance",
            Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        );
        let incoming = record("Opening balance", Decimal::ZERO);

        assert_eq!(matcher.evaluate(&[anchor], &incoming), MatchOutcome::New);
    }
}
