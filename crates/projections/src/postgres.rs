use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ProjectionName;
use event_store::config::validate_identifier;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::checkpoint::{Checkpoint, CheckpointStore, ProjectionDetails, empty_state};
use crate::{ProjectionError, ProjectionStatus, Result};

/// Default name of the projections table.
pub const DEFAULT_PROJECTIONS_TABLE: &str = "projections";

/// PostgreSQL-backed checkpoint store.
#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
    table: String,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_PROJECTIONS_TABLE.to_string(),
        }
    }

    /// Uses another table name. It is interpolated into SQL, so it must be
    /// a plain identifier.
    pub fn with_table(mut self, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table).map_err(|e| ProjectionError::InvalidArgument(e.to_string()))?;
        self.table = table;
        Ok(self)
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn positions_from(value: Option<Value>) -> Result<BTreeMap<String, i64>> {
        match value {
            Some(Value::Null) | None => Ok(BTreeMap::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    fn state_from(value: Option<Value>) -> Value {
        match value {
            Some(state @ Value::Object(_)) => state,
            _ => empty_state(),
        }
    }

    fn row_to_details(row: &PgRow) -> Result<ProjectionDetails> {
        let name: String = row.try_get("name")?;
        let status: String = row.try_get("status")?;

        Ok(ProjectionDetails {
            name: ProjectionName::new(name)?,
            status: status.parse()?,
            positions: Self::positions_from(row.try_get("position")?)?,
            state: Self::state_from(row.try_get("state")?),
            locked_until: row.try_get("locked_until")?,
        })
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn create_projection(
        &self,
        name: &ProjectionName,
        status: ProjectionStatus,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (name, position, state, status, locked_until) \
             VALUES ($1, '{{}}', '{{}}', $2, NULL) ON CONFLICT (name) DO NOTHING",
            self.table
        );
        sqlx::query(&sql)
            .bind(name.as_str())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_status(&self, name: &ProjectionName) -> Result<Option<ProjectionStatus>> {
        let sql = format!("SELECT status FROM {} WHERE name = $1 LIMIT 1", self.table);
        let status: Option<String> = sqlx::query_scalar(&sql)
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await?;

        status.map(|s| s.parse()).transpose()
    }

    async fn acquire_lock(
        &self,
        name: &ProjectionName,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET locked_until = $1, status = $2 \
             WHERE name = $3 AND (locked_until IS NULL OR locked_until < $4)",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(locked_until)
            .bind(ProjectionStatus::Running.as_str())
            .bind(name.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(&self, name: &ProjectionName) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET locked_until = NULL, status = $1 WHERE name = $2",
            self.table
        );
        sqlx::query(&sql)
            .bind(ProjectionStatus::Idle.as_str())
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn persist(
        &self,
        name: &ProjectionName,
        checkpoint: &Checkpoint,
        locked_until: DateTime<Utc>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET position = $1, state = $2, locked_until = $3 WHERE name = $4",
            self.table
        );
        sqlx::query(&sql)
            .bind(serde_json::to_value(&checkpoint.positions)?)
            .bind(&checkpoint.state)
            .bind(locked_until)
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load(&self, name: &ProjectionName) -> Result<Option<Checkpoint>> {
        let sql = format!(
            "SELECT position, state FROM {} WHERE name = $1 ORDER BY no DESC LIMIT 1",
            self.table
        );
        let Some(row) = sqlx::query(&sql)
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(Checkpoint {
            positions: Self::positions_from(row.try_get("position")?)?,
            state: Self::state_from(row.try_get("state")?),
        }))
    }

    async fn reset(
        &self,
        name: &ProjectionName,
        checkpoint: &Checkpoint,
        status: ProjectionStatus,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET position = $1, state = $2, status = $3 WHERE name = $4",
            self.table
        );
        sqlx::query(&sql)
            .bind(serde_json::to_value(&checkpoint.positions)?)
            .bind(&checkpoint.state)
            .bind(status.as_str())
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        name: &ProjectionName,
        status: ProjectionStatus,
    ) -> Result<bool> {
        let sql = format!("UPDATE {} SET status = $1 WHERE name = $2", self.table);
        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, name: &ProjectionName) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE name = $1", self.table);
        let result = sqlx::query(&sql)
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProjectionName>> {
        let sql = format!(
            "SELECT name FROM {} WHERE ($1::TEXT IS NULL OR name = $1) \
             ORDER BY no ASC LIMIT $2 OFFSET $3",
            self.table
        );
        let names: Vec<String> = sqlx::query_scalar(&sql)
            .bind(filter)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        names
            .into_iter()
            .map(|n| ProjectionName::new(n).map_err(ProjectionError::from))
            .collect()
    }

    async fn fetch_projection_details(
        &self,
        name: &ProjectionName,
    ) -> Result<Option<ProjectionDetails>> {
        let sql = format!(
            "SELECT name, position, state, status, locked_until FROM {} WHERE name = $1",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_details).transpose()
    }
}
