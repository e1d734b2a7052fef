use std::str::FromStr;

use chrono::{Duration, Utc};
use rstest::{fixture, rstest};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::TierceError;
use crate::store::{in_memory::InMemoryStore, Store};
use crate::types::{ThresholdRule, Tier, TimeWindow, UsageRecord};

#[cfg(feature = "postgres")]
use crate::store::postgres::PostgresStore;

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn tier(name: &str, cost: &str) -> Tier {
    Tier {
        name: name.to_string(),
        cost: dec(cost),
        params: serde_json::Map::new(),
    }
}

fn budget_rule(min: i64) -> ThresholdRule {
    ThresholdRule {
        budget_min: Some(Decimal::from(min)),
        time: None,
    }
}

/// Seed one API with three tiers and a 100-unit budget.
async fn seed_api<S: Store>(store: &S, api_name: &str) {
    store
        .upsert_tier(api_name, tier("A", "0.120"), budget_rule(80))
        .await
        .unwrap();
    store
        .upsert_tier(api_name, tier("B", "0.080"), budget_rule(50))
        .await
        .unwrap();
    store
        .upsert_tier(api_name, tier("F", "0.016"), ThresholdRule::default())
        .await
        .unwrap();
    store
        .init_ledger(api_name, Decimal::from(100))
        .await
        .unwrap();
}

/// Fixture that returns an InMemoryStore
#[fixture]
fn in_memory_store() -> InMemoryStore {
    InMemoryStore::new()
}

async fn run_test_list_tiers_ordered_by_descending_cost<S: Store>(store: &S) {
    seed_api(store, "img").await;

    let tiers = store.list_tiers("img").await.unwrap();
    let names: Vec<&str> = tiers.iter().map(|e| e.tier.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B", "F"]);
}

#[rstest]
#[tokio::test]
async fn test_list_tiers_ordered_by_descending_cost(in_memory_store: InMemoryStore) {
    run_test_list_tiers_ordered_by_descending_cost(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_list_tiers_ordered_by_descending_cost_postgres(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool);
    run_test_list_tiers_ordered_by_descending_cost(&store).await;
}

async fn run_test_list_tiers_breaks_cost_ties_by_name<S: Store>(store: &S) {
    // insertion order deliberately disagrees with the name order
    store
        .upsert_tier("img", tier("Z", "0.080"), budget_rule(50))
        .await
        .unwrap();
    store
        .upsert_tier("img", tier("B", "0.080"), budget_rule(30))
        .await
        .unwrap();
    store
        .upsert_tier("img", tier("F", "0.016"), ThresholdRule::default())
        .await
        .unwrap();
    store
        .init_ledger("img", Decimal::from(100))
        .await
        .unwrap();

    let tiers = store.list_tiers("img").await.unwrap();
    let names: Vec<&str> = tiers.iter().map(|e| e.tier.name.as_str()).collect();
    assert_eq!(names, vec!["B", "Z", "F"]);
}

#[rstest]
#[tokio::test]
async fn test_list_tiers_breaks_cost_ties_by_name(in_memory_store: InMemoryStore) {
    run_test_list_tiers_breaks_cost_ties_by_name(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_list_tiers_breaks_cost_ties_by_name_postgres(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool);
    run_test_list_tiers_breaks_cost_ties_by_name(&store).await;
}

async fn run_test_unconfigured_api_is_not_found<S: Store>(store: &S) {
    let err = store.list_tiers("nope").await.unwrap_err();
    assert!(matches!(err, TierceError::ApiNotFound(_)));

    let err = store.read_ledger("nope").await.unwrap_err();
    assert!(matches!(err, TierceError::ApiNotFound(_)));

    let err = store.apply_cost("nope", dec("0.016")).await.unwrap_err();
    assert!(matches!(err, TierceError::ApiNotFound(_)));

    let err = store.set_budget("nope", Decimal::from(10)).await.unwrap_err();
    assert!(matches!(err, TierceError::ApiNotFound(_)));
}

#[rstest]
#[tokio::test]
async fn test_unconfigured_api_is_not_found(in_memory_store: InMemoryStore) {
    run_test_unconfigured_api_is_not_found(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_unconfigured_api_is_not_found_postgres(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool);
    run_test_unconfigured_api_is_not_found(&store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_corrupt_tier_params_surface_as_an_error(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool.clone());
    seed_api(&store, "img").await;

    // params must round-trip verbatim; a row that no longer decodes has to
    // fail the read rather than come back as an empty map
    sqlx::query("UPDATE tiers SET params = 'not json' WHERE api_name = 'img' AND tier_name = 'A'")
        .execute(&pool)
        .await
        .unwrap();

    let err = store.list_tiers("img").await.unwrap_err();
    assert!(matches!(err, TierceError::Other(_)));
}

async fn run_test_upsert_tier_replaces_existing<S: Store>(store: &S) {
    seed_api(store, "img").await;

    store
        .upsert_tier("img", tier("A", "0.200"), budget_rule(90))
        .await
        .unwrap();

    let tiers = store.list_tiers("img").await.unwrap();
    assert_eq!(tiers.len(), 3);
    let a = tiers.iter().find(|e| e.tier.name == "A").unwrap();
    assert_eq!(a.tier.cost, dec("0.200"));
    assert_eq!(a.rule.budget_min, Some(Decimal::from(90)));
}

#[rstest]
#[tokio::test]
async fn test_upsert_tier_replaces_existing(in_memory_store: InMemoryStore) {
    run_test_upsert_tier_replaces_existing(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_upsert_tier_replaces_existing_postgres(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool);
    run_test_upsert_tier_replaces_existing(&store).await;
}

async fn run_test_threshold_upsert_round_trip<S: Store>(store: &S) {
    seed_api(store, "img").await;

    let rules = vec![
        ("A".to_string(), budget_rule(70)),
        (
            "B".to_string(),
            ThresholdRule {
                budget_min: Some(Decimal::from(30)),
                time: Some(TimeWindow { start: 1320, end: 360 }),
            },
        ),
    ];
    store.upsert_thresholds("img", rules.clone()).await.unwrap();

    let tiers = store.list_tiers("img").await.unwrap();
    for (name, rule) in &rules {
        let entry = tiers.iter().find(|e| &e.tier.name == name).unwrap();
        assert_eq!(&entry.rule, rule);
    }
}

#[rstest]
#[tokio::test]
async fn test_threshold_upsert_round_trip(in_memory_store: InMemoryStore) {
    run_test_threshold_upsert_round_trip(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_threshold_upsert_round_trip_postgres(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool);
    run_test_threshold_upsert_round_trip(&store).await;
}

async fn run_test_threshold_upsert_is_all_or_nothing<S: Store>(store: &S) {
    seed_api(store, "img").await;
    let before = store.list_tiers("img").await.unwrap();

    let rules = vec![
        ("A".to_string(), budget_rule(70)),
        ("missing".to_string(), budget_rule(10)),
    ];
    let err = store.upsert_thresholds("img", rules).await.unwrap_err();
    assert!(matches!(err, TierceError::TierNotFound { .. }));

    // the valid half of the update must not have been applied
    let after = store.list_tiers("img").await.unwrap();
    assert_eq!(before, after);
}

#[rstest]
#[tokio::test]
async fn test_threshold_upsert_is_all_or_nothing(in_memory_store: InMemoryStore) {
    run_test_threshold_upsert_is_all_or_nothing(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_threshold_upsert_is_all_or_nothing_postgres(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool);
    run_test_threshold_upsert_is_all_or_nothing(&store).await;
}

async fn run_test_ledger_lifecycle<S: Store>(store: &S) {
    seed_api(store, "img").await;

    let ledger = store.read_ledger("img").await.unwrap();
    assert_eq!(ledger.budget, Decimal::from(100));
    assert_eq!(ledger.spent, Decimal::ZERO);

    let after = store.apply_cost("img", dec("0.016")).await.unwrap();
    assert_eq!(after.spent, dec("0.016"));
    assert_eq!(after.total_spent, dec("0.016"));

    store.set_budget("img", Decimal::from(50)).await.unwrap();
    let ledger = store.read_ledger("img").await.unwrap();
    assert_eq!(ledger.budget, Decimal::from(50));
    // spend is independent of the ceiling
    assert_eq!(ledger.spent, dec("0.016"));

    store.reset_spent("img").await.unwrap();
    let ledger = store.read_ledger("img").await.unwrap();
    assert_eq!(ledger.spent, Decimal::ZERO);
    // lifetime spend is never reset
    assert_eq!(ledger.total_spent, dec("0.016"));
}

#[rstest]
#[tokio::test]
async fn test_ledger_lifecycle(in_memory_store: InMemoryStore) {
    run_test_ledger_lifecycle(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_ledger_lifecycle_postgres(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool);
    run_test_ledger_lifecycle(&store).await;
}

async fn run_test_init_ledger_is_idempotent<S: Store>(store: &S) {
    seed_api(store, "img").await;
    store.apply_cost("img", dec("5")).await.unwrap();

    // re-provisioning must not wipe accumulated spend
    store.init_ledger("img", Decimal::from(200)).await.unwrap();

    let ledger = store.read_ledger("img").await.unwrap();
    assert_eq!(ledger.budget, Decimal::from(100));
    assert_eq!(ledger.spent, dec("5"));
}

#[rstest]
#[tokio::test]
async fn test_init_ledger_is_idempotent(in_memory_store: InMemoryStore) {
    run_test_init_ledger_is_idempotent(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_init_ledger_is_idempotent_postgres(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool);
    run_test_init_ledger_is_idempotent(&store).await;
}

async fn run_test_usage_append_and_recent<S: Store>(store: &S) {
    seed_api(store, "img").await;

    let base = Utc::now();
    for (i, prompt) in ["first", "second", "third"].iter().enumerate() {
        store
            .append_usage(UsageRecord {
                id: Uuid::new_v4(),
                api_name: "img".to_string(),
                prompt: prompt.to_string(),
                tier_name: "F".to_string(),
                cost: dec("0.016"),
                created_at: base + Duration::seconds(i as i64),
            })
            .await
            .unwrap();
    }

    let recent = store.recent_usage("img", 2).await.unwrap();
    let prompts: Vec<&str> = recent.iter().map(|r| r.prompt.as_str()).collect();
    assert_eq!(prompts, vec!["third", "second"]);
}

#[rstest]
#[tokio::test]
async fn test_usage_append_and_recent(in_memory_store: InMemoryStore) {
    run_test_usage_append_and_recent(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_usage_append_and_recent_postgres(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool);
    run_test_usage_append_and_recent(&store).await;
}

async fn run_test_settings_default_and_toggle<S: Store>(store: &S) {
    seed_api(store, "img").await;

    // first read auto-creates budget-based defaults
    let settings = store.settings("img").await.unwrap();
    assert!(!settings.use_time_based_tier);

    store.set_time_based("img", true).await.unwrap();
    let settings = store.settings("img").await.unwrap();
    assert!(settings.use_time_based_tier);
}

#[rstest]
#[tokio::test]
async fn test_settings_default_and_toggle(in_memory_store: InMemoryStore) {
    run_test_settings_default_and_toggle(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_settings_default_and_toggle_postgres(pool: sqlx::PgPool) {
    let store = PostgresStore::new(pool);
    run_test_settings_default_and_toggle(&store).await;
}

async fn run_test_apply_cost_concurrent<S>(store: S, callers: usize)
where
    S: Store + Clone + Send + 'static,
{
    seed_api(&store, "img").await;
    let cost = dec("0.016");

    let mut handles = Vec::with_capacity(callers);
    for _ in 0..callers {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.apply_cost("img", cost).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let ledger = store.read_ledger("img").await.unwrap();
    let expected = cost * Decimal::from(callers as i64);
    assert_eq!(ledger.spent, expected);
    assert_eq!(ledger.total_spent, expected);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_apply_cost_concurrent(in_memory_store: InMemoryStore) {
    run_test_apply_cost_concurrent(in_memory_store, 100).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_apply_cost_concurrent_postgres(pool: sqlx::PgPool) {
    // smaller than the in-memory stress run, bounded by the pool size
    run_test_apply_cost_concurrent(PostgresStore::new(pool), 20).await;
}
