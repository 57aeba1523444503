//! Postgres adapter for the relational store.
//!
//! Tables touched:
//! - regions      (read)
//! - metrics      (insert)
//! - metric_data  (insert)
//! - files        (update status + metadata)
//!
//! Nothing here deletes rows.

use crate::commit::{MetricStore, NewDataPoint, NewMetric, PersistedMetric};
use crate::regions::{Region, RegionSource};
use crate::status::{FileStore, ProcessingStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// Nine binds per row; keeps each statement under the Postgres bind limit.
const DATA_POINT_CHUNK: usize = 1000;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(db_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RegionSource for PgStore {
    async fn fetch_regions(&self) -> Result<Vec<Region>> {
        let regions: Vec<Region> = sqlx::query_as("SELECT id, code, name FROM regions ORDER BY code")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query regions")?;
        Ok(regions)
    }
}

#[async_trait]
impl MetricStore for PgStore {
    async fn insert_metric(&self, metric: &NewMetric) -> Result<PersistedMetric> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let persisted: PersistedMetric = sqlx::query_as(
            r#"
            INSERT INTO metrics (id, name, unit, created_at, updated_at, metadata)
            VALUES ($1, $2, $3, $4, $4, $5)
            RETURNING id, name, unit, created_at, updated_at, metadata
            "#,
        )
        .bind(id)
        .bind(&metric.name)
        .bind(&metric.unit)
        .bind(now)
        .bind(&metric.metadata)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to insert metric '{}'", metric.name))?;
        Ok(persisted)
    }

    /// All chunks share one transaction: either every row lands or none does.
    async fn insert_data_points(&self, points: &[NewDataPoint]) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin metric_data transaction")?;
        let mut inserted = 0;
        for chunk in points.chunks(DATA_POINT_CHUNK) {
            let now = Utc::now();
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO metric_data (id, metric_id, region_id, date, value, status, created_at, updated_at, metadata) ",
            );
            builder.push_values(chunk, |mut row, point| {
                row.push_bind(Uuid::new_v4())
                    .push_bind(point.metric_id)
                    .push_bind(point.region_id)
                    .push_bind(point.date)
                    .push_bind(point.value)
                    .push_bind(point.status)
                    .push_bind(now)
                    .push_bind(now)
                    .push_bind(&point.metadata);
            });
            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .context("Failed to insert metric_data rows")?;
            inserted += result.rows_affected();
        }
        tx.commit()
            .await
            .context("Failed to commit metric_data rows")?;
        Ok(inserted)
    }
}

#[async_trait]
impl FileStore for PgStore {
    async fn update_status(
        &self,
        file_id: Uuid,
        status: ProcessingStatus,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET processing_status = $2, metadata = COALESCE(metadata, '{}'::jsonb) || $3
            WHERE id = $1
            "#,
        )
        .bind(file_id)
        .bind(status.as_str())
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .context("Failed to update file status")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("File record {} not found", file_id);
        }
        Ok(())
    }
}

// =============================================================================
// DRY RUN
// =============================================================================

/// Logs writes instead of persisting them. Used by `importer process --dry-run`.
#[derive(Default)]
pub struct DryRunStore;

#[async_trait]
impl MetricStore for DryRunStore {
    async fn insert_metric(&self, metric: &NewMetric) -> Result<PersistedMetric> {
        let now = Utc::now();
        tracing::info!(name = %metric.name, unit = %metric.unit, "dry run: would insert metric");
        Ok(PersistedMetric {
            id: Uuid::new_v4(),
            name: metric.name.clone(),
            unit: metric.unit.clone(),
            created_at: now,
            updated_at: now,
            metadata: metric.metadata.clone(),
        })
    }

    async fn insert_data_points(&self, points: &[NewDataPoint]) -> Result<u64> {
        tracing::info!(rows = points.len(), "dry run: would insert metric_data rows");
        Ok(points.len() as u64)
    }
}

#[async_trait]
impl FileStore for DryRunStore {
    async fn update_status(
        &self,
        file_id: Uuid,
        status: ProcessingStatus,
        metadata: serde_json::Value,
    ) -> Result<()> {
        tracing::info!(%file_id, status = status.as_str(), %metadata, "dry run: would update file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn point(metric_id: Uuid, value: f64) -> NewDataPoint {
        NewDataPoint {
            metric_id,
            region_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            value,
            status: "draft",
            metadata: serde_json::json!({}),
        }
    }

    /// Single-connection store whose `metric_data` is a temp table shadowing
    /// the real one, so nothing persists past the test.
    async fn scratch_store(db_url: &str) -> PgStore {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(db_url)
            .await
            .unwrap();
        sqlx::query(
            r#"
            CREATE TEMP TABLE metric_data (
                id UUID PRIMARY KEY,
                metric_id UUID NOT NULL,
                region_id UUID NOT NULL,
                date DATE NOT NULL,
                value DOUBLE PRECISION NOT NULL CHECK (value >= 0),
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                metadata JSONB
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        PgStore { pool }
    }

    #[tokio::test]
    #[ignore = "requires DB_URL pointing at a Postgres instance"]
    async fn test_failed_chunk_rolls_back_whole_batch() {
        let db_url = std::env::var("DB_URL").expect("DB_URL env var missing");
        let store = scratch_store(&db_url).await;
        let metric_id = Uuid::new_v4();

        // Second chunk violates the CHECK constraint
        let mut points: Vec<NewDataPoint> =
            (0..DATA_POINT_CHUNK + 500).map(|_| point(metric_id, 1.0)).collect();
        points[DATA_POINT_CHUNK + 200].value = -1.0;

        assert!(store.insert_data_points(&points).await.is_err());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metric_data")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        points[DATA_POINT_CHUNK + 200].value = 1.0;
        let inserted = store.insert_data_points(&points).await.unwrap();
        assert_eq!(inserted, (DATA_POINT_CHUNK + 500) as u64);
    }

    #[tokio::test]
    async fn test_dry_run_store_echoes_metric() {
        let store = DryRunStore;
        let metric = store
            .insert_metric(&NewMetric {
                name: "Pop".to_string(),
                unit: "hab".to_string(),
                metadata: serde_json::json!({ "sourceFileId": "f" }),
            })
            .await
            .unwrap();
        assert_eq!(metric.name, "Pop");
        assert_eq!(metric.created_at, metric.updated_at);

        let points = [point(metric.id, 1.0), point(metric.id, 2.0)];
        assert_eq!(store.insert_data_points(&points).await.unwrap(), 2);
    }
}
