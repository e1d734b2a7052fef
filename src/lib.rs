//! Tier selection and budget accounting for metered external APIs.
//!
//! This crate routes requests against a paid, metered external API to one of
//! several cost/quality tiers based on remaining budget or time of day, while
//! tracking cumulative spend:
//! - An operator-managed catalog maps each tier to a cost and a threshold rule
//! - Selection walks the catalog in descending-cost order and returns the
//!   first eligible tier, falling back to the cheapest tier when nothing
//!   matches
//! - Spend is applied to a per-API ledger via an atomic increment that never
//!   loses updates under concurrency
//! - Budget enforcement is soft: as spend approaches the ceiling selection
//!   degrades to cheaper tiers, but a request is never rejected outright
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tierce::{Engine, InMemoryStore, SeedConfig};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let engine = Engine::new(store);
//!
//! engine.provision(&SeedConfig::load("tierce.yaml")?).await?;
//!
//! // per request: pick a tier, make the billed call, then record the spend
//! let tier = engine.select_tier("openai").await?;
//! // ... caller invokes the external API with tier.params ...
//! engine.record_usage("openai", prompt, &tier).await?;
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod recorder;
pub mod selector;
pub mod store;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ApiSeed, SeedConfig, TierSeed};
pub use engine::Engine;
pub use error::{Result, TierceError};
pub use recorder::SpendRecorder;
pub use selector::TierSelector;
pub use store::in_memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use store::postgres::PostgresStore;
pub use store::Store;
pub use types::*;
