//! Provider integrations implementing the [`crate::sync::ProviderClient`]
//! and [`crate::sync::ProviderMapper`] contracts.

#[cfg(feature = "simplefin")]
mod simplefin;

#[cfg(feature = "simplefin")]
pub use simplefin::{SimpleFinClient, SimpleFinMapper};
