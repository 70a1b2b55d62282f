//! PostgreSQL node-source store implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::error::{StoreError, StoreResult};
use crate::traits::NodeSourceStore;
use crate::types::{NodeSourceData, SourceName};

/// PostgreSQL-backed node-source store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required table is created if it doesn't exist.
    pub async fn new(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Connect with explicit pool options.
    pub async fn with_options(
        url: &str,
        max_connections: u32,
        connect_timeout: std::time::Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required table exists.
    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS node_sources (
                name TEXT PRIMARY KEY,
                infrastructure_type TEXT NOT NULL,
                policy_type TEXT NOT NULL,
                infrastructure_variables JSONB NOT NULL,
                deploying_urls JSONB NOT NULL,
                lost_urls JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Parse a row into a NodeSourceData.
    fn row_to_record(row: &sqlx::postgres::PgRow) -> StoreResult<NodeSourceData> {
        let name: String = row.get("name");
        let infrastructure_type: String = row.get("infrastructure_type");
        let policy_type: String = row.get("policy_type");
        let variables_json: serde_json::Value = row.get("infrastructure_variables");
        let deploying_json: serde_json::Value = row.get("deploying_urls");
        let lost_json: serde_json::Value = row.get("lost_urls");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        let infrastructure_variables: HashMap<String, serde_json::Value> =
            serde_json::from_value(variables_json).map_err(|e| {
                StoreError::serialisation(format!("failed to deserialise variables: {e}"))
            })?;

        let deploying_urls: Vec<String> = serde_json::from_value(deploying_json).map_err(|e| {
            StoreError::serialisation(format!("failed to deserialise deploying URLs: {e}"))
        })?;

        let lost_urls: Vec<String> = serde_json::from_value(lost_json).map_err(|e| {
            StoreError::serialisation(format!("failed to deserialise lost URLs: {e}"))
        })?;

        Ok(NodeSourceData {
            name: SourceName::new(name),
            infrastructure_type,
            policy_type,
            infrastructure_variables,
            deploying_urls,
            lost_urls,
            created_at,
            updated_at,
        })
    }

    fn variables_json(data: &NodeSourceData) -> StoreResult<serde_json::Value> {
        serde_json::to_value(&data.infrastructure_variables)
            .map_err(|e| StoreError::serialisation(format!("failed to serialise variables: {e}")))
    }
}

#[async_trait]
impl NodeSourceStore for PostgresStore {
    async fn insert(&self, data: &NodeSourceData) -> StoreResult<()> {
        let variables = Self::variables_json(data)?;

        let result = sqlx::query(
            r#"
            INSERT INTO node_sources (
                name, infrastructure_type, policy_type,
                infrastructure_variables, deploying_urls, lost_urls,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(data.name.as_str())
        .bind(&data.infrastructure_type)
        .bind(&data.policy_type)
        .bind(&variables)
        .bind(serde_json::json!(data.deploying_urls))
        .bind(serde_json::json!(data.lost_urls))
        .bind(data.created_at)
        .bind(data.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(data.name.to_string()));
        }

        Ok(())
    }

    async fn get(&self, name: &SourceName) -> StoreResult<Option<NodeSourceData>> {
        let row = sqlx::query(
            r#"
            SELECT name, infrastructure_type, policy_type,
                   infrastructure_variables, deploying_urls, lost_urls,
                   created_at, updated_at
            FROM node_sources
            WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_record(&r)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, data: &NodeSourceData) -> StoreResult<bool> {
        let variables = Self::variables_json(data)?;

        let result = sqlx::query(
            r#"
            UPDATE node_sources
            SET infrastructure_type = $1, policy_type = $2,
                infrastructure_variables = $3, deploying_urls = $4,
                lost_urls = $5, updated_at = NOW()
            WHERE name = $6
            "#,
        )
        .bind(&data.infrastructure_type)
        .bind(&data.policy_type)
        .bind(&variables)
        .bind(serde_json::json!(data.deploying_urls))
        .bind(serde_json::json!(data.lost_urls))
        .bind(data.name.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> StoreResult<Vec<NodeSourceData>> {
        let rows = sqlx::query(
            r#"
            SELECT name, infrastructure_type, policy_type,
                   infrastructure_variables, deploying_urls, lost_urls,
                   created_at, updated_at
            FROM node_sources
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn remove(&self, name: &SourceName) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM node_sources WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NodeSourceNotFound(name.to_string()));
        }

        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}
