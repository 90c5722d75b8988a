//! Provider-agnostic record normalization and identity matching.

mod matcher;
mod normalized;

pub use matcher::{IdentityMatcher, MatchOutcome};
pub use normalized::{NormalizedAccount, NormalizedRecord};
