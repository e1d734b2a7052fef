//! Seed configuration for provisioning APIs.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides (prefix `TIERCE_`, double underscores for nesting). It carries
//! the operator-managed catalog for each API: tiers with their costs and
//! opaque generation parameters, the initial budget, and optional threshold
//! rules.
//!
//! ```yaml
//! apis:
//!   openai:
//!     initial_budget: "0.2"
//!     tiers:
//!       A: { cost: "0.120", params: { model: dall-e-3, quality: hd, size: 1024x1792 } }
//!       F: { cost: "0.016", params: { model: dall-e-2, quality: standard, size: 256x256 } }
//!     thresholds:
//!       - { tier: A, budget_min: 80 }
//!       - { tier: F, budget_min: 0 }
//! ```

use std::collections::HashMap;
use std::path::Path;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ThresholdSpec;

/// Root of the seed configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub apis: HashMap<String, ApiSeed>,
}

/// Seed for one API: catalog, budget, and selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSeed {
    pub initial_budget: Decimal,
    pub tiers: HashMap<String, TierSeed>,
    #[serde(default)]
    pub thresholds: Vec<ThresholdSpec>,
    #[serde(default)]
    pub use_time_based_tier: bool,
}

/// Seed for one tier. `params` is passed through verbatim to the external
/// call and never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSeed {
    pub cost: Decimal,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl SeedConfig {
    /// Load configuration from a YAML file, with `TIERCE_`-prefixed
    /// environment variables taking precedence.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("TIERCE_").split("__"))
            .extract()?;
        Ok(config)
    }
}
