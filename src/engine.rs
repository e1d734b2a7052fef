//! Facade over the selector, recorder, and store.
//!
//! This is the surface the surrounding application talks to; everything
//! upstream only needs tier selection plus spend recording, with the
//! operator-facing budget and threshold operations alongside.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::SeedConfig;
use crate::error::{Result, TierceError};
use crate::recorder::SpendRecorder;
use crate::selector::TierSelector;
use crate::store::Store;
use crate::types::{
    BudgetStatus, SelectionMode, ThresholdRule, ThresholdSpec, Tier, UsageRecord,
};
use crate::validate::validate_thresholds;

/// Tier selection and budget accounting engine for one store backend.
///
/// Constructed once at startup with an injected store and shared across
/// request handlers; all per-API state lives in the store.
pub struct Engine<S, C = SystemClock> {
    store: Arc<S>,
    selector: TierSelector<S, C>,
    recorder: SpendRecorder<S>,
}

impl<S: Store> Engine<S, SystemClock> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: Store, C: Clock> Engine<S, C> {
    /// Build an engine with an explicit clock, for deterministic time-based
    /// selection in tests.
    pub fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self {
            selector: TierSelector::new(Arc::clone(&store), clock),
            recorder: SpendRecorder::new(Arc::clone(&store)),
            store,
        }
    }

    /// Select a tier using the API's stored selection settings
    /// (budget-based unless time-based selection was enabled).
    pub async fn select_tier(&self, api_name: &str) -> Result<Tier> {
        let settings = self.store.settings(api_name).await?;
        self.selector.select(api_name, settings.selection_mode()).await
    }

    /// Select a tier with an explicit mode, ignoring stored settings.
    pub async fn select_tier_with_mode(&self, api_name: &str, mode: SelectionMode) -> Result<Tier> {
        self.selector.select(api_name, mode).await
    }

    /// Record the spend for a completed billed call. See
    /// [`SpendRecorder::record_usage`] for the ordering contract.
    pub async fn record_usage(&self, api_name: &str, prompt: &str, tier: &Tier) -> Result<UsageRecord> {
        self.recorder.record_usage(api_name, prompt, tier).await
    }

    /// Current budget state for an API.
    pub async fn budget_status(&self, api_name: &str) -> Result<BudgetStatus> {
        let snapshot = self.store.read_ledger(api_name).await?;
        Ok(BudgetStatus {
            api_name: api_name.to_string(),
            budget: snapshot.budget,
            spent: snapshot.spent,
            total_spent: snapshot.total_spent,
            remaining_percentage: snapshot.remaining_percentage(),
        })
    }

    /// Overwrite the configured budget ceiling for the current cycle.
    pub async fn set_budget(&self, api_name: &str, new_budget: Decimal) -> Result<()> {
        self.store.set_budget(api_name, new_budget).await?;
        info!(api_name, %new_budget, "budget updated");
        Ok(())
    }

    /// Start a new billing cycle: zero `spent`, keep `total_spent`.
    pub async fn reset_spent(&self, api_name: &str) -> Result<()> {
        self.store.reset_spent(api_name).await?;
        info!(api_name, "cycle spend reset");
        Ok(())
    }

    /// Validate and apply a threshold update for the named tiers.
    ///
    /// Validation runs before any mutation; the store applies the update
    /// all-or-nothing, so a malformed or partially dangling update leaves the
    /// stored configuration unchanged.
    pub async fn upsert_thresholds(&self, api_name: &str, specs: Vec<ThresholdSpec>) -> Result<()> {
        let rules = validate_thresholds(api_name, &specs)?;
        self.store.upsert_thresholds(api_name, rules).await
    }

    /// Toggle time-based selection for an API.
    pub async fn set_time_based_selection(&self, api_name: &str, enabled: bool) -> Result<()> {
        self.store.set_time_based(api_name, enabled).await
    }

    /// Most recent usage records for an API, newest first.
    pub async fn recent_usage(&self, api_name: &str, limit: usize) -> Result<Vec<UsageRecord>> {
        self.store.recent_usage(api_name, limit).await
    }

    /// Provision APIs from seed configuration.
    ///
    /// Tiers are upserted (re-provisioning refreshes costs and rules) and the
    /// ledger is initialized insert-or-ignore, so an existing ledger keeps
    /// its spend across restarts.
    pub async fn provision(&self, config: &SeedConfig) -> Result<()> {
        for (api_name, seed) in &config.apis {
            let rules = validate_thresholds(api_name, &seed.thresholds)?;

            for (tier_name, _) in &rules {
                if !seed.tiers.contains_key(tier_name) {
                    return Err(TierceError::TierNotFound {
                        api: api_name.clone(),
                        tier: tier_name.clone(),
                    });
                }
            }

            for (tier_name, tier_seed) in &seed.tiers {
                let rule = rules
                    .iter()
                    .find(|(name, _)| name == tier_name)
                    .map(|(_, rule)| rule.clone())
                    .unwrap_or_else(ThresholdRule::default);

                self.store
                    .upsert_tier(
                        api_name,
                        Tier {
                            name: tier_name.clone(),
                            cost: tier_seed.cost,
                            params: tier_seed.params.clone(),
                        },
                        rule,
                    )
                    .await?;
            }

            self.store.init_ledger(api_name, seed.initial_budget).await?;
            if seed.use_time_based_tier {
                self.store.set_time_based(api_name, true).await?;
            }

            info!(
                api_name,
                tiers = seed.tiers.len(),
                initial_budget = %seed.initial_budget,
                "API provisioned"
            );
        }
        Ok(())
    }

    /// The underlying store, for callers that need direct ledger access.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
