//! Core data model for tier catalogs, budget ledgers, and usage records.
//!
//! Monetary values are [`rust_decimal::Decimal`] throughout; costs arrive from
//! operator configuration and must survive arithmetic without float drift.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TierceError};

/// Identifier for a usage record.
pub type UsageRecordId = Uuid;

/// A named cost/quality configuration for a billed external operation.
///
/// `params` is an opaque payload passed through verbatim to the external
/// call; the engine never interprets its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    pub cost: Decimal,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// A half-open time-of-day interval `[start, end)` in minutes since midnight.
///
/// `start > end` means the interval wraps past midnight (e.g. 22:00-06:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: u16,
    pub end: u16,
}

impl TimeWindow {
    /// Build a window from `HH:mm` strings, as stored in operator configuration.
    pub fn from_hhmm(start: &str, end: &str) -> Result<Self> {
        Ok(Self {
            start: parse_hhmm(start)?,
            end: parse_hhmm(end)?,
        })
    }

    /// Midnight-wrap-aware containment check for a minute of day.
    pub fn contains(&self, minute: u16) -> bool {
        if self.start <= self.end {
            minute >= self.start && minute < self.end
        } else {
            // range spans midnight (e.g. 22:00-06:00)
            minute >= self.start || minute < self.end
        }
    }
}

/// Parse an `HH:mm` string into minutes since midnight.
pub fn parse_hhmm(value: &str) -> Result<u16> {
    let time = chrono::NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| TierceError::Validation(format!("time '{value}' does not match HH:mm")))?;
    use chrono::Timelike;
    Ok((time.hour() * 60 + time.minute()) as u16)
}

/// Eligibility conditions attached to a tier. Both kinds may be present;
/// which one applies depends on the selection mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// Minimum remaining-budget percentage (0-100) required for eligibility.
    pub budget_min: Option<Decimal>,
    /// Time-of-day window during which the tier is eligible.
    pub time: Option<TimeWindow>,
}

/// One catalog entry: a tier together with its threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierEntry {
    pub tier: Tier,
    pub rule: ThresholdRule,
}

/// Which signal drives tier selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    Budget,
    Time,
}

/// The computed input handed to the threshold evaluator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionValue {
    /// Remaining-budget percentage; may be negative when spent exceeds budget.
    RemainingPercent(Decimal),
    /// Current minute of day in `[0, 1440)`.
    MinuteOfDay(u16),
}

/// Point-in-time view of one API's budget ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub budget: Decimal,
    pub spent: Decimal,
    pub total_spent: Decimal,
}

impl BudgetSnapshot {
    /// Remaining-budget percentage: `(budget - spent) / budget * 100`.
    ///
    /// A zero (or negative) budget means 0% remaining rather than a division
    /// error; overspend yields a negative percentage, which no positive
    /// threshold matches, so selection falls through to the fallback tier.
    pub fn remaining_percentage(&self) -> Decimal {
        if self.budget <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.budget - self.spent) / self.budget * Decimal::from(100)
    }
}

/// Budget state reported to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub api_name: String,
    pub budget: Decimal,
    pub spent: Decimal,
    pub total_spent: Decimal,
    pub remaining_percentage: Decimal,
}

/// Immutable log entry for one billed request. Created exactly once per
/// successful external call, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: UsageRecordId,
    pub api_name: String,
    pub prompt: String,
    pub tier_name: String,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Per-API selection settings, auto-created with defaults on first read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    pub api_name: String,
    pub use_time_based_tier: bool,
    pub updated_at: DateTime<Utc>,
}

impl ApiSettings {
    pub fn selection_mode(&self) -> SelectionMode {
        if self.use_time_based_tier {
            SelectionMode::Time
        } else {
            SelectionMode::Budget
        }
    }
}

/// Operator-supplied threshold update for one tier, prior to validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub tier: String,
    #[serde(default)]
    pub budget_min: Option<Decimal>,
    #[serde(default)]
    pub time: Option<TimeWindowSpec>,
}

/// Raw `HH:mm` window as it appears in configuration payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindowSpec {
    pub start: String,
    pub end: String,
}
