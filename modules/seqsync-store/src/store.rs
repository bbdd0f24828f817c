//! PgAttributeStore: conditional attribute writes backed by Postgres.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use seqsync_common::{Attribute, AttributeMap, AttributeSelector, Precondition, WriteOutcome};
use seqsync_reconcile::AttributeStore;

// ---------------------------------------------------------------------------
// PgAttributeStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgAttributeStore {
    pool: PgPool,
}

impl PgAttributeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to attribute store")?;
        info!("Connected to attribute store");
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run attribute store migrations")?;
        Ok(())
    }

    /// Open a transaction holding the per-item write lock, and report whether
    /// `expected` holds inside it.
    async fn guarded(
        &self,
        item: &str,
        expected: &Precondition,
    ) -> Result<(Transaction<'static, Postgres>, bool)> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(item)
            .execute(&mut *tx)
            .await?;

        let stored = sqlx::query_scalar::<_, String>(
            r#"
            SELECT value FROM record_attributes
            WHERE item_name = $1 AND name = $2
            "#,
        )
        .bind(item)
        .bind(&expected.name)
        .fetch_all(&mut *tx)
        .await?;

        let holds = expected.holds(Some(&stored));
        if !holds {
            debug!(item, precondition = %expected, ?stored, "Precondition failed");
        }
        Ok((tx, holds))
    }
}

#[async_trait]
impl AttributeStore for PgAttributeStore {
    async fn get_attributes(&self, item: &str, names: &[&str]) -> Result<AttributeMap> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT name, value FROM record_attributes
            WHERE item_name = $1 AND name = ANY($2)
            ORDER BY ordinal ASC
            "#,
        )
        .bind(item)
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        let mut map = AttributeMap::new();
        for (name, value) in rows {
            map.entry(name).or_default().push(value);
        }
        Ok(map)
    }

    async fn put_attributes(
        &self,
        item: &str,
        attributes: &[Attribute],
        expected: &Precondition,
    ) -> Result<WriteOutcome> {
        let (mut tx, holds) = self.guarded(item, expected).await?;
        if !holds {
            tx.rollback().await?;
            return Ok(WriteOutcome::ConditionFailed);
        }

        let mut replaced: Vec<String> = attributes
            .iter()
            .filter(|a| a.replace)
            .map(|a| a.name.clone())
            .collect();
        replaced.sort_unstable();
        replaced.dedup();

        if !replaced.is_empty() {
            sqlx::query(
                r#"
                DELETE FROM record_attributes
                WHERE item_name = $1 AND name = ANY($2)
                "#,
            )
            .bind(item)
            .bind(&replaced)
            .execute(&mut *tx)
            .await?;
        }

        for attribute in attributes {
            sqlx::query(
                r#"
                INSERT INTO record_attributes (item_name, name, value)
                VALUES ($1, $2, $3)
                ON CONFLICT (item_name, name, value) DO UPDATE SET updated_at = now()
                "#,
            )
            .bind(item)
            .bind(&attribute.name)
            .bind(&attribute.value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(WriteOutcome::Committed)
    }

    async fn delete_attributes(
        &self,
        item: &str,
        selectors: &[AttributeSelector],
        expected: &Precondition,
    ) -> Result<WriteOutcome> {
        let (mut tx, holds) = self.guarded(item, expected).await?;
        if !holds {
            tx.rollback().await?;
            return Ok(WriteOutcome::ConditionFailed);
        }

        if selectors.is_empty() {
            sqlx::query("DELETE FROM record_attributes WHERE item_name = $1")
                .bind(item)
                .execute(&mut *tx)
                .await?;
        }

        for selector in selectors {
            match &selector.value {
                None => {
                    sqlx::query(
                        "DELETE FROM record_attributes WHERE item_name = $1 AND name = $2",
                    )
                    .bind(item)
                    .bind(&selector.name)
                    .execute(&mut *tx)
                    .await?;
                }
                Some(value) => {
                    sqlx::query(
                        r#"
                        DELETE FROM record_attributes
                        WHERE item_name = $1 AND name = $2 AND value = $3
                        "#,
                    )
                    .bind(item)
                    .bind(&selector.name)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(WriteOutcome::Committed)
    }

    async fn select_items(&self, name: &str, value: &str) -> Result<Vec<String>> {
        let items = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT item_name FROM record_attributes
            WHERE name = $1 AND value = $2
            ORDER BY item_name ASC
            "#,
        )
        .bind(name)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }
}
