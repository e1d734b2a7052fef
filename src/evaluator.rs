//! Pure threshold evaluation.
//!
//! Given a catalog snapshot and a selection value, picks the tier whose
//! threshold rule matches first in descending-cost order, falling back to the
//! lowest-cost tier when nothing matches. The sort is performed here rather
//! than trusting the caller's ordering, so behavior is reproducible
//! regardless of how the catalog was populated.

use crate::types::{SelectionValue, TierEntry};

/// Select a tier from the catalog for the given selection value.
///
/// Returns `None` only when `entries` is empty; otherwise a tier is always
/// chosen. In budget mode the first tier (scanning from most expensive) whose
/// `budget_min` is at or below the remaining percentage wins; ties on cost are
/// broken by name, ascending, so the same catalog resolves identically no
/// matter which backend produced it. In time mode the first tier whose window contains the
/// current minute wins. The lowest-cost tier matches unconditionally as the
/// fallback; its own rule is ignored as a safety net.
pub fn select_tier<'a>(entries: &'a [TierEntry], value: &SelectionValue) -> Option<&'a TierEntry> {
    if entries.is_empty() {
        return None;
    }

    let mut ordered: Vec<&TierEntry> = entries.iter().collect();
    // tiebreak on name so cost ties resolve the same way on every backend
    ordered.sort_by(|a, b| {
        b.tier
            .cost
            .cmp(&a.tier.cost)
            .then_with(|| a.tier.name.cmp(&b.tier.name))
    });

    for entry in &ordered {
        match value {
            SelectionValue::RemainingPercent(percent) => {
                if let Some(min) = entry.rule.budget_min {
                    if *percent >= min {
                        return Some(entry);
                    }
                }
            }
            SelectionValue::MinuteOfDay(minute) => {
                if let Some(window) = entry.rule.time {
                    if window.contains(*minute) {
                        return Some(entry);
                    }
                }
            }
        }
    }

    // no threshold matched: the lowest-cost tier is the unconditional fallback
    ordered.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ThresholdRule, Tier, TimeWindow};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn tier(name: &str, cost: &str, rule: ThresholdRule) -> TierEntry {
        TierEntry {
            tier: Tier {
                name: name.to_string(),
                cost: Decimal::from_str(cost).unwrap(),
                params: serde_json::Map::new(),
            },
            rule,
        }
    }

    fn budget_rule(min: i64) -> ThresholdRule {
        ThresholdRule {
            budget_min: Some(Decimal::from(min)),
            time: None,
        }
    }

    fn sample_catalog() -> Vec<TierEntry> {
        vec![
            tier("A", "0.120", budget_rule(80)),
            tier("B", "0.080", budget_rule(50)),
            tier("F", "0.016", ThresholdRule::default()),
        ]
    }

    #[test]
    fn budget_mode_first_match_wins_descending() {
        let catalog = sample_catalog();

        let chosen = select_tier(
            &catalog,
            &SelectionValue::RemainingPercent(Decimal::from(90)),
        )
        .unwrap();
        assert_eq!(chosen.tier.name, "A");

        let chosen = select_tier(
            &catalog,
            &SelectionValue::RemainingPercent(Decimal::from(60)),
        )
        .unwrap();
        assert_eq!(chosen.tier.name, "B");
    }

    #[test]
    fn budget_mode_exact_threshold_is_eligible() {
        let catalog = sample_catalog();
        let chosen = select_tier(
            &catalog,
            &SelectionValue::RemainingPercent(Decimal::from(80)),
        )
        .unwrap();
        assert_eq!(chosen.tier.name, "A");
    }

    #[test]
    fn budget_mode_falls_back_to_lowest_cost() {
        let catalog = sample_catalog();
        let chosen = select_tier(
            &catalog,
            &SelectionValue::RemainingPercent(Decimal::from(15)),
        )
        .unwrap();
        assert_eq!(chosen.tier.name, "F");
    }

    #[test]
    fn negative_percentage_falls_through_to_fallback() {
        let catalog = sample_catalog();
        let chosen = select_tier(
            &catalog,
            &SelectionValue::RemainingPercent(Decimal::from(-50)),
        )
        .unwrap();
        assert_eq!(chosen.tier.name, "F");
    }

    #[test]
    fn unsorted_input_is_sorted_before_scanning() {
        // same catalog, shuffled: insertion order must not affect the result
        let mut catalog = sample_catalog();
        catalog.reverse();
        let chosen = select_tier(
            &catalog,
            &SelectionValue::RemainingPercent(Decimal::from(90)),
        )
        .unwrap();
        assert_eq!(chosen.tier.name, "A");
    }

    #[test]
    fn cost_ties_resolve_by_name_regardless_of_input_order() {
        // B and C cost the same and are both eligible at 60%; the
        // name-ascending tiebreak must pick B whichever way they arrive
        let mut catalog = vec![
            tier("C", "0.080", budget_rule(30)),
            tier("B", "0.080", budget_rule(50)),
            tier("F", "0.016", ThresholdRule::default()),
        ];

        for _ in 0..2 {
            let chosen = select_tier(
                &catalog,
                &SelectionValue::RemainingPercent(Decimal::from(60)),
            )
            .unwrap();
            assert_eq!(chosen.tier.name, "B");
            catalog.swap(0, 1);
        }
    }

    #[test]
    fn time_mode_matches_window() {
        let catalog = vec![
            tier(
                "C",
                "0.080",
                ThresholdRule {
                    budget_min: None,
                    time: Some(TimeWindow { start: 1320, end: 360 }), // 22:00-06:00
                },
            ),
            tier("F", "0.016", ThresholdRule::default()),
        ];

        let chosen = select_tier(&catalog, &SelectionValue::MinuteOfDay(1410)).unwrap();
        assert_eq!(chosen.tier.name, "C");

        let chosen = select_tier(&catalog, &SelectionValue::MinuteOfDay(720)).unwrap();
        assert_eq!(chosen.tier.name, "F");
    }

    #[test]
    fn time_rule_is_ignored_in_budget_mode() {
        let catalog = vec![
            tier(
                "C",
                "0.080",
                ThresholdRule {
                    budget_min: None,
                    time: Some(TimeWindow { start: 0, end: 1440 }),
                },
            ),
            tier("F", "0.016", budget_rule(0)),
        ];
        let chosen = select_tier(
            &catalog,
            &SelectionValue::RemainingPercent(Decimal::from(100)),
        )
        .unwrap();
        assert_eq!(chosen.tier.name, "F");
    }

    #[test]
    fn empty_catalog_yields_none() {
        assert!(select_tier(&[], &SelectionValue::MinuteOfDay(0)).is_none());
    }

    #[test]
    fn full_threshold_table_partition() {
        // the six-tier table from the reference deployment
        let catalog = vec![
            tier("A", "0.120", budget_rule(80)),
            tier("B", "0.080", budget_rule(50)),
            tier("C", "0.080", budget_rule(30)),
            tier("D", "0.040", budget_rule(10)),
            tier("E", "0.018", budget_rule(5)),
            tier("F", "0.016", budget_rule(0)),
        ];

        for (percent, expected) in [
            (100, "A"),
            (80, "A"),
            (79, "B"),
            (50, "B"),
            (49, "C"),
            (30, "C"),
            (10, "D"),
            (5, "E"),
            (0, "F"),
            (-1, "F"), // overspend still resolves via the fallback
        ] {
            let chosen = select_tier(
                &catalog,
                &SelectionValue::RemainingPercent(Decimal::from(percent)),
            )
            .unwrap();
            assert_eq!(chosen.tier.name, expected, "at {percent}%");
        }
    }
}
