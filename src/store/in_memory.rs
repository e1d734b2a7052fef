//! In-memory store implementation.
//!
//! State lives in a `parking_lot`-guarded map keyed by API name. Suitable for
//! tests and single-process deployments; everything is lost on restart.
//! `apply_cost` holds the write lock across the whole read-modify-write, which
//! makes the increment linearizable within the process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::error::{Result, TierceError};
use crate::types::{ApiSettings, BudgetSnapshot, ThresholdRule, Tier, TierEntry, UsageRecord};

use super::Store;

#[derive(Default)]
struct ApiState {
    tiers: Vec<TierEntry>,
    ledger: Option<BudgetSnapshot>,
    settings: Option<ApiSettings>,
    usage: Vec<UsageRecord>,
}

/// In-memory implementation of the [`Store`] trait.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    apis: Arc<RwLock<HashMap<String, ApiState>>>,
}

impl InMemoryStore {
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    async fn list_tiers(&self, api_name: &str) -> Result<Vec<TierEntry>> {
        let apis = self.apis.read();
        let state = apis
            .get(api_name)
            .ok_or_else(|| TierceError::ApiNotFound(api_name.to_string()))?;

        let mut tiers = state.tiers.clone();
        // same ordering as the postgres backend: cost descending, then name
        tiers.sort_by(|a, b| {
            b.tier
                .cost
                .cmp(&a.tier.cost)
                .then_with(|| a.tier.name.cmp(&b.tier.name))
        });
        Ok(tiers)
    }

    async fn upsert_tier(&self, api_name: &str, tier: Tier, rule: ThresholdRule) -> Result<()> {
        let mut apis = self.apis.write();
        let state = apis.entry(api_name.to_string()).or_default();

        match state.tiers.iter_mut().find(|e| e.tier.name == tier.name) {
            Some(existing) => *existing = TierEntry { tier, rule },
            None => state.tiers.push(TierEntry { tier, rule }),
        }
        Ok(())
    }

    async fn upsert_thresholds(
        &self,
        api_name: &str,
        rules: Vec<(String, ThresholdRule)>,
    ) -> Result<()> {
        let mut apis = self.apis.write();
        let state = apis
            .get_mut(api_name)
            .ok_or_else(|| TierceError::ApiNotFound(api_name.to_string()))?;

        // verify every referenced tier before mutating anything
        for (tier_name, _) in &rules {
            if !state.tiers.iter().any(|e| &e.tier.name == tier_name) {
                return Err(TierceError::TierNotFound {
                    api: api_name.to_string(),
                    tier: tier_name.clone(),
                });
            }
        }

        for (tier_name, rule) in rules {
            if let Some(entry) = state.tiers.iter_mut().find(|e| e.tier.name == tier_name) {
                entry.rule = rule;
            }
        }
        Ok(())
    }

    async fn read_ledger(&self, api_name: &str) -> Result<BudgetSnapshot> {
        let apis = self.apis.read();
        apis.get(api_name)
            .and_then(|state| state.ledger)
            .ok_or_else(|| TierceError::ApiNotFound(api_name.to_string()))
    }

    async fn init_ledger(&self, api_name: &str, budget: Decimal) -> Result<()> {
        let mut apis = self.apis.write();
        let state = apis.entry(api_name.to_string()).or_default();
        if state.ledger.is_none() {
            state.ledger = Some(BudgetSnapshot {
                budget,
                spent: Decimal::ZERO,
                total_spent: Decimal::ZERO,
            });
        }
        Ok(())
    }

    async fn apply_cost(&self, api_name: &str, cost: Decimal) -> Result<BudgetSnapshot> {
        let mut apis = self.apis.write();
        let ledger = apis
            .get_mut(api_name)
            .and_then(|state| state.ledger.as_mut())
            .ok_or_else(|| TierceError::ApiNotFound(api_name.to_string()))?;

        ledger.spent += cost;
        ledger.total_spent += cost;
        Ok(*ledger)
    }

    async fn set_budget(&self, api_name: &str, new_budget: Decimal) -> Result<()> {
        let mut apis = self.apis.write();
        let ledger = apis
            .get_mut(api_name)
            .and_then(|state| state.ledger.as_mut())
            .ok_or_else(|| TierceError::ApiNotFound(api_name.to_string()))?;

        ledger.budget = new_budget;
        Ok(())
    }

    async fn reset_spent(&self, api_name: &str) -> Result<()> {
        let mut apis = self.apis.write();
        let ledger = apis
            .get_mut(api_name)
            .and_then(|state| state.ledger.as_mut())
            .ok_or_else(|| TierceError::ApiNotFound(api_name.to_string()))?;

        ledger.spent = Decimal::ZERO;
        Ok(())
    }

    async fn append_usage(&self, record: UsageRecord) -> Result<()> {
        let mut apis = self.apis.write();
        let state = apis
            .get_mut(&record.api_name)
            .ok_or_else(|| TierceError::ApiNotFound(record.api_name.clone()))?;

        state.usage.push(record);
        Ok(())
    }

    async fn recent_usage(&self, api_name: &str, limit: usize) -> Result<Vec<UsageRecord>> {
        let apis = self.apis.read();
        let state = apis
            .get(api_name)
            .ok_or_else(|| TierceError::ApiNotFound(api_name.to_string()))?;

        Ok(state.usage.iter().rev().take(limit).cloned().collect())
    }

    async fn settings(&self, api_name: &str) -> Result<ApiSettings> {
        let mut apis = self.apis.write();
        let state = apis
            .get_mut(api_name)
            .ok_or_else(|| TierceError::ApiNotFound(api_name.to_string()))?;

        Ok(state
            .settings
            .get_or_insert_with(|| ApiSettings {
                api_name: api_name.to_string(),
                use_time_based_tier: false,
                updated_at: Utc::now(),
            })
            .clone())
    }

    async fn set_time_based(&self, api_name: &str, enabled: bool) -> Result<()> {
        let mut apis = self.apis.write();
        let state = apis
            .get_mut(api_name)
            .ok_or_else(|| TierceError::ApiNotFound(api_name.to_string()))?;

        state.settings = Some(ApiSettings {
            api_name: api_name.to_string(),
            use_time_based_tier: enabled,
            updated_at: Utc::now(),
        });
        Ok(())
    }
}
