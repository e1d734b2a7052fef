use std::future::Future;

use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::{ApiSettings, BudgetSnapshot, ThresholdRule, Tier, TierEntry, UsageRecord};

pub mod in_memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(test)]
mod tests;

/// Storage trait for tier catalogs, budget ledgers, and usage records.
///
/// One row of budget state exists per API name and is the only shared mutable
/// resource; `apply_cost` must be linearizable per API so concurrent callers
/// never lose an update. Everything else is read-mostly configuration or
/// append-only history.
pub trait Store: Send + Sync {
    /// List the catalog for an API, ordered by descending cost.
    ///
    /// # Errors
    /// - `ApiNotFound` if the API has never been provisioned. An empty
    ///   catalog for a provisioned API is not an error here; the selector
    ///   turns it into `NoTiersAvailable`.
    fn list_tiers(&self, api_name: &str) -> impl Future<Output = Result<Vec<TierEntry>>> + Send;

    /// Insert or replace one tier (and its rule) in an API's catalog,
    /// creating the API entry if needed. Used at provisioning time.
    fn upsert_tier(
        &self,
        api_name: &str,
        tier: Tier,
        rule: ThresholdRule,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Replace the threshold rules for the named tiers, all-or-nothing.
    ///
    /// # Errors
    /// - `TierNotFound` if any referenced tier is missing; no rule is
    ///   changed in that case.
    fn upsert_thresholds(
        &self,
        api_name: &str,
        rules: Vec<(String, ThresholdRule)>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Read the current budget ledger for an API.
    ///
    /// # Errors
    /// - `ApiNotFound` if the ledger was never initialized.
    fn read_ledger(&self, api_name: &str) -> impl Future<Output = Result<BudgetSnapshot>> + Send;

    /// Initialize the ledger with a configured budget if it does not exist
    /// yet. Idempotent: an existing ledger is left untouched.
    fn init_ledger(
        &self,
        api_name: &str,
        budget: Decimal,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Atomically add `cost` to both `spent` and `total_spent`, returning the
    /// post-update snapshot.
    ///
    /// This must be a single atomic read-modify-write per API name.
    /// Implementations may retry a small bounded number of times on transient
    /// conflicts; the increment itself is safe to retry, a read-then-write
    /// sequence is not.
    fn apply_cost(
        &self,
        api_name: &str,
        cost: Decimal,
    ) -> impl Future<Output = Result<BudgetSnapshot>> + Send;

    /// Overwrite the configured budget ceiling, independent of `spent`.
    fn set_budget(
        &self,
        api_name: &str,
        new_budget: Decimal,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Zero `spent` for a new billing cycle. `total_spent` is never reset.
    fn reset_spent(&self, api_name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Append one immutable usage record.
    fn append_usage(&self, record: UsageRecord) -> impl Future<Output = Result<()>> + Send;

    /// Most recent usage records for an API, newest first.
    fn recent_usage(
        &self,
        api_name: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<UsageRecord>>> + Send;

    /// Per-API selection settings, created with defaults (budget-based
    /// selection) on first read.
    fn settings(&self, api_name: &str) -> impl Future<Output = Result<ApiSettings>> + Send;

    /// Toggle time-based selection for an API.
    fn set_time_based(
        &self,
        api_name: &str,
        enabled: bool,
    ) -> impl Future<Output = Result<()>> + Send;
}
