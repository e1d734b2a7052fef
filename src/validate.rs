//! Validation of operator-supplied threshold configuration.
//!
//! All checks run before any state mutation so a malformed update is rejected
//! as a whole and leaves the stored configuration untouched.

use rust_decimal::Decimal;
use tracing::warn;

use crate::error::{Result, TierceError};
use crate::types::{ThresholdRule, ThresholdSpec, TimeWindow};

/// Validate raw threshold specs and convert them into stored rules.
///
/// Rules:
/// - time fields must parse as `HH:mm`
/// - budget minimums must lie in `[0, 100]`
/// - duplicate tier names within one update are rejected
///
/// Budget minimums that do not sum to 100 only produce a warning: the
/// evaluator tolerates any values via first-match/fallback semantics, so a
/// non-partitioning table is suspicious but not invalid.
pub fn validate_thresholds(api_name: &str, specs: &[ThresholdSpec]) -> Result<Vec<(String, ThresholdRule)>> {
    let mut rules = Vec::with_capacity(specs.len());
    let mut budget_sum = Decimal::ZERO;
    let mut budget_rules = 0usize;

    for spec in specs {
        if rules.iter().any(|(name, _)| name == &spec.tier) {
            return Err(TierceError::Validation(format!(
                "duplicate threshold for tier '{}'",
                spec.tier
            )));
        }

        if let Some(min) = spec.budget_min {
            if min < Decimal::ZERO || min > Decimal::from(100) {
                return Err(TierceError::Validation(format!(
                    "budget threshold {min} for tier '{}' is outside [0, 100]",
                    spec.tier
                )));
            }
            budget_sum += min;
            budget_rules += 1;
        }

        let time = match &spec.time {
            Some(window) => Some(TimeWindow::from_hhmm(&window.start, &window.end)?),
            None => None,
        };

        rules.push((
            spec.tier.clone(),
            ThresholdRule {
                budget_min: spec.budget_min,
                time,
            },
        ));
    }

    if budget_rules > 0 && budget_sum != Decimal::from(100) {
        warn!(
            api_name,
            %budget_sum,
            "budget thresholds do not sum to 100; selection still resolves via first-match/fallback"
        );
    }

    Ok(rules)
}
