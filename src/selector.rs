//! Tier selection orchestration.
//!
//! Reads the budget ledger fresh on every call, computes the selection value
//! for the requested mode, and hands the catalog to the evaluator. Selection
//! is read-only with respect to the ledger: two concurrent requests may
//! observe the same pre-update spend and pick the same tier. That staleness
//! is bounded and accepted; serializing selection with recording would put a
//! global per-API lock around the network-bound path.

use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::error::{Result, TierceError};
use crate::evaluator;
use crate::store::Store;
use crate::types::{SelectionMode, SelectionValue, Tier};

/// Picks a tier for a request given the current spend state.
pub struct TierSelector<S, C> {
    store: Arc<S>,
    clock: C,
}

impl<S: Store, C: Clock> TierSelector<S, C> {
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self { store, clock }
    }

    /// Select a tier for `api_name` using the given mode.
    ///
    /// # Errors
    /// - `ApiNotFound` if the API is unconfigured
    /// - `NoTiersAvailable` if the catalog is empty; this is a configuration
    ///   error, distinct from "no rule matched" which always resolves via the
    ///   fallback tier
    pub async fn select(&self, api_name: &str, mode: SelectionMode) -> Result<Tier> {
        let tiers = self.store.list_tiers(api_name).await?;
        if tiers.is_empty() {
            return Err(TierceError::NoTiersAvailable(api_name.to_string()));
        }

        let value = match mode {
            SelectionMode::Budget => {
                let ledger = self.store.read_ledger(api_name).await?;
                let percent = ledger.remaining_percentage();
                debug!(api_name, %percent, "budget-based tier selection");
                SelectionValue::RemainingPercent(percent)
            }
            SelectionMode::Time => {
                let minute = self.clock.minute_of_day();
                debug!(api_name, minute, "time-based tier selection");
                SelectionValue::MinuteOfDay(minute)
            }
        };

        let entry = evaluator::select_tier(&tiers, &value)
            .ok_or_else(|| TierceError::NoTiersAvailable(api_name.to_string()))?;

        debug!(api_name, tier = %entry.tier.name, "tier selected");
        Ok(entry.tier.clone())
    }
}
