//! Spend recording.
//!
//! Applies a tier's cost to the budget ledger and appends one immutable usage
//! record. The ordering is deliberate: spend first, then log. A crash between
//! the two steps leaves a usage-record-less spend, never a spend-less usage
//! record, so real external costs are never under-counted.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{Result, TierceError};
use crate::metrics;
use crate::store::Store;
use crate::types::{Tier, UsageRecord};

/// Records the spend for one billed external call.
pub struct SpendRecorder<S> {
    store: Arc<S>,
}

impl<S: Store> SpendRecorder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Apply the tier's cost to the ledger and append a usage record.
    ///
    /// Call this only after the billed external call succeeded; on external
    /// failure or timeout the request fails with no budget side effect simply
    /// by never reaching this method.
    ///
    /// # Errors
    /// - `ApiNotFound` if the ledger is uninitialized; nothing is recorded
    /// - `Record` if the usage append fails after the spend was applied. The
    ///   spend stays counted and the failure is not retried: a retry could
    ///   double-count if the original write partially succeeded.
    pub async fn record_usage(&self, api_name: &str, prompt: &str, tier: &Tier) -> Result<UsageRecord> {
        let snapshot = self.store.apply_cost(api_name, tier.cost).await?;

        metrics::record_spend(api_name, &tier.name, tier.cost);
        if snapshot.spent > snapshot.budget {
            // soft enforcement: degrade tier quality, never reject the request
            warn!(
                api_name,
                spent = %snapshot.spent,
                budget = %snapshot.budget,
                "ledger is over its configured budget"
            );
            metrics::record_ceiling_crossed(api_name);
        }

        let record = UsageRecord {
            id: Uuid::new_v4(),
            api_name: api_name.to_string(),
            prompt: prompt.to_string(),
            tier_name: tier.name.clone(),
            cost: tier.cost,
            created_at: Utc::now(),
        };

        if let Err(err) = self.store.append_usage(record.clone()).await {
            error!(
                api_name,
                tier = %tier.name,
                cost = %tier.cost,
                %err,
                "usage record append failed after spend was applied"
            );
            metrics::record_append_error();
            return Err(TierceError::Record(err.to_string()));
        }

        metrics::record_usage_appended(api_name, &tier.name);
        Ok(record)
    }
}
