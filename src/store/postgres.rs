//! PostgreSQL store implementation.
//!
//! Backed by a sqlx connection pool. The budget increment is a single
//! `UPDATE ... SET spent = spent + $n` statement so concurrent callers can
//! never lose an update; there is no read-then-write-back anywhere in the
//! ledger path. Threshold updates run inside one transaction so a partial
//! multi-tier update can never apply.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, TierceError};
use crate::types::{
    ApiSettings, BudgetSnapshot, ThresholdRule, Tier, TierEntry, TimeWindow, UsageRecord,
};

use super::Store;

/// How many times a transiently conflicting ledger increment is retried.
/// Retrying the atomic increment is safe; it is applied at most once per
/// successful statement.
const APPLY_COST_ATTEMPTS: u32 = 3;

/// PostgreSQL implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn api_exists(&self, api_name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM budgets WHERE api_name = $1) AS found")
            .bind(api_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("found")?)
    }
}

fn is_serialization_conflict(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db)
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
    )
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<TierEntry> {
    let tier_name: String = row.try_get("tier_name")?;

    // params is an opaque payload handed through verbatim; a row that no
    // longer decodes is a data problem the caller must see, not an empty map
    let params_text: String = row.try_get("params")?;
    let params = serde_json::from_str(&params_text).map_err(|err| {
        TierceError::Other(anyhow::anyhow!(
            "corrupt params for tier '{tier_name}': {err}"
        ))
    })?;

    let time = match (
        row.try_get::<Option<i16>, _>("time_start")?,
        row.try_get::<Option<i16>, _>("time_end")?,
    ) {
        (Some(start), Some(end)) => Some(TimeWindow {
            start: start as u16,
            end: end as u16,
        }),
        _ => None,
    };

    Ok(TierEntry {
        tier: Tier {
            name: tier_name,
            cost: row.try_get("cost")?,
            params,
        },
        rule: ThresholdRule {
            budget_min: row.try_get("budget_min")?,
            time,
        },
    })
}

impl Store for PostgresStore {
    async fn list_tiers(&self, api_name: &str) -> Result<Vec<TierEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT tier_name, cost, params, budget_min, time_start, time_end
            FROM tiers
            WHERE api_name = $1
            ORDER BY cost DESC, tier_name
            "#,
        )
        .bind(api_name)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() && !self.api_exists(api_name).await? {
            return Err(TierceError::ApiNotFound(api_name.to_string()));
        }

        rows.iter().map(entry_from_row).collect()
    }

    async fn upsert_tier(&self, api_name: &str, tier: Tier, rule: ThresholdRule) -> Result<()> {
        let params_text =
            serde_json::to_string(&tier.params).map_err(|e| TierceError::Other(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO tiers (api_name, tier_name, cost, params, budget_min, time_start, time_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (api_name, tier_name) DO UPDATE
            SET cost = EXCLUDED.cost,
                params = EXCLUDED.params,
                budget_min = EXCLUDED.budget_min,
                time_start = EXCLUDED.time_start,
                time_end = EXCLUDED.time_end
            "#,
        )
        .bind(api_name)
        .bind(&tier.name)
        .bind(tier.cost)
        .bind(params_text)
        .bind(rule.budget_min)
        .bind(rule.time.map(|w| w.start as i16))
        .bind(rule.time.map(|w| w.end as i16))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_thresholds(
        &self,
        api_name: &str,
        rules: Vec<(String, ThresholdRule)>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (tier_name, rule) in &rules {
            let result = sqlx::query(
                r#"
                UPDATE tiers
                SET budget_min = $3, time_start = $4, time_end = $5
                WHERE api_name = $1 AND tier_name = $2
                "#,
            )
            .bind(api_name)
            .bind(tier_name)
            .bind(rule.budget_min)
            .bind(rule.time.map(|w| w.start as i16))
            .bind(rule.time.map(|w| w.end as i16))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                // rollback happens on drop
                return Err(TierceError::TierNotFound {
                    api: api_name.to_string(),
                    tier: tier_name.clone(),
                });
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn read_ledger(&self, api_name: &str) -> Result<BudgetSnapshot> {
        let row = sqlx::query(
            "SELECT budget, spent, total_spent FROM budgets WHERE api_name = $1",
        )
        .bind(api_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| TierceError::ApiNotFound(api_name.to_string()))?;

        Ok(BudgetSnapshot {
            budget: row.try_get("budget")?,
            spent: row.try_get("spent")?,
            total_spent: row.try_get("total_spent")?,
        })
    }

    async fn init_ledger(&self, api_name: &str, budget: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO budgets (api_name, budget, spent, total_spent)
            VALUES ($1, $2, 0, 0)
            ON CONFLICT (api_name) DO NOTHING
            "#,
        )
        .bind(api_name)
        .bind(budget)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_cost(&self, api_name: &str, cost: Decimal) -> Result<BudgetSnapshot> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = sqlx::query(
                r#"
                UPDATE budgets
                SET spent = spent + $2, total_spent = total_spent + $2
                WHERE api_name = $1
                RETURNING budget, spent, total_spent
                "#,
            )
            .bind(api_name)
            .bind(cost)
            .fetch_optional(&self.pool)
            .await;

            match result {
                Ok(Some(row)) => {
                    return Ok(BudgetSnapshot {
                        budget: row.try_get("budget")?,
                        spent: row.try_get("spent")?,
                        total_spent: row.try_get("total_spent")?,
                    });
                }
                Ok(None) => return Err(TierceError::ApiNotFound(api_name.to_string())),
                Err(err) if is_serialization_conflict(&err) && attempt < APPLY_COST_ATTEMPTS => {
                    debug!(api_name, attempt, "retrying ledger increment after conflict");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn set_budget(&self, api_name: &str, new_budget: Decimal) -> Result<()> {
        let result = sqlx::query("UPDATE budgets SET budget = $2 WHERE api_name = $1")
            .bind(api_name)
            .bind(new_budget)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TierceError::ApiNotFound(api_name.to_string()));
        }
        Ok(())
    }

    async fn reset_spent(&self, api_name: &str) -> Result<()> {
        let result = sqlx::query("UPDATE budgets SET spent = 0 WHERE api_name = $1")
            .bind(api_name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TierceError::ApiNotFound(api_name.to_string()));
        }
        Ok(())
    }

    async fn append_usage(&self, record: UsageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (id, api_name, prompt, tier_name, cost, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(&record.api_name)
        .bind(&record.prompt)
        .bind(&record.tier_name)
        .bind(record.cost)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_usage(&self, api_name: &str, limit: usize) -> Result<Vec<UsageRecord>> {
        if !self.api_exists(api_name).await? {
            return Err(TierceError::ApiNotFound(api_name.to_string()));
        }

        let rows = sqlx::query(
            r#"
            SELECT id, api_name, prompt, tier_name, cost, created_at
            FROM usage_records
            WHERE api_name = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(api_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(UsageRecord {
                    id: row.try_get::<Uuid, _>("id")?,
                    api_name: row.try_get("api_name")?,
                    prompt: row.try_get("prompt")?,
                    tier_name: row.try_get("tier_name")?,
                    cost: row.try_get("cost")?,
                    created_at: row
                        .try_get::<DateTime<Utc>, _>("created_at")
                        ?,
                })
            })
            .collect()
    }

    async fn settings(&self, api_name: &str) -> Result<ApiSettings> {
        if !self.api_exists(api_name).await? {
            return Err(TierceError::ApiNotFound(api_name.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO api_settings (api_name, use_time_based_tier, updated_at)
            VALUES ($1, FALSE, now())
            ON CONFLICT (api_name) DO NOTHING
            "#,
        )
        .bind(api_name)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT api_name, use_time_based_tier, updated_at FROM api_settings WHERE api_name = $1",
        )
        .bind(api_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(ApiSettings {
            api_name: row.try_get("api_name")?,
            use_time_based_tier: row
                .try_get("use_time_based_tier")
                ?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn set_time_based(&self, api_name: &str, enabled: bool) -> Result<()> {
        if !self.api_exists(api_name).await? {
            return Err(TierceError::ApiNotFound(api_name.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO api_settings (api_name, use_time_based_tier, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (api_name) DO UPDATE
            SET use_time_based_tier = EXCLUDED.use_time_based_tier,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(api_name)
        .bind(enabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
