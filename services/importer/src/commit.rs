//! Commit Engine - persists extracted metrics and their data points.
//!
//! Each metric is committed independently with no surrounding transaction:
//! a failed metric insert skips that metric, and a failed data-point insert
//! leaves the metric in place with no data. Imported points start as "draft".

use crate::extraction::ExtractionResult;
use crate::regions::RegionDirectory;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

pub const DRAFT_STATUS: &str = "draft";

#[derive(Debug, Clone, PartialEq)]
pub struct NewMetric {
    pub name: String,
    pub unit: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PersistedMetric {
    pub id: Uuid,
    pub name: String,
    pub unit: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDataPoint {
    pub metric_id: Uuid,
    pub region_id: Uuid,
    pub date: NaiveDate,
    pub value: f64,
    pub status: &'static str,
    pub metadata: serde_json::Value,
}

/// Write side of the relational store.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn insert_metric(&self, metric: &NewMetric) -> Result<PersistedMetric>;

    /// Bulk insert of one metric's points; all rows are written or none are.
    /// Returns the number of rows written.
    async fn insert_data_points(&self, points: &[NewDataPoint]) -> Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedDataPoint {
    pub region: String,
    pub region_id: Uuid,
    pub year: i64,
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommittedMetric {
    pub id: Uuid,
    pub name: String,
    pub unit: String,
    pub data: Vec<CommittedDataPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
    Metric,
    DataPoints,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitFailure {
    pub metric: String,
    pub stage: CommitStage,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitReport {
    pub metrics: Vec<CommittedMetric>,
    pub failures: Vec<CommitFailure>,
    pub unresolved_regions: usize,
    pub invalid_years: usize,
}

impl CommitReport {
    pub fn metrics_count(&self) -> usize {
        self.metrics.len()
    }

    pub fn data_points_count(&self) -> usize {
        self.metrics.iter().map(|m| m.data.len()).sum()
    }
}

/// Jan 1 of `year`, or `None` for years that are not positive or out of calendar range.
pub fn year_to_date(year: i64) -> Option<NaiveDate> {
    i32::try_from(year)
        .ok()
        .filter(|y| *y > 0)
        .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
}

pub struct CommitEngine {
    store: Arc<dyn MetricStore>,
}

impl CommitEngine {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    pub async fn commit(
        &self,
        result: &ExtractionResult,
        regions: &RegionDirectory,
        source_file_id: Uuid,
    ) -> CommitReport {
        let mut report = CommitReport::default();

        for extracted in &result.metrics {
            let new_metric = NewMetric {
                name: extracted.name.clone(),
                unit: extracted.unit.clone(),
                metadata: serde_json::json!({ "sourceFileId": source_file_id }),
            };

            let persisted = match self.store.insert_metric(&new_metric).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(metric = %extracted.name, error = %e, "metric insert failed, skipping");
                    report.failures.push(CommitFailure {
                        metric: extracted.name.clone(),
                        stage: CommitStage::Metric,
                        error: format!("{:#}", e),
                    });
                    continue;
                }
            };

            let mut committed = Vec::with_capacity(extracted.data.len());
            let mut rows = Vec::with_capacity(extracted.data.len());

            for point in &extracted.data {
                let Some(region_id) = regions.resolve(&point.region) else {
                    report.unresolved_regions += 1;
                    continue;
                };
                let Some(date) = year_to_date(point.year) else {
                    report.invalid_years += 1;
                    continue;
                };

                rows.push(NewDataPoint {
                    metric_id: persisted.id,
                    region_id,
                    date,
                    value: point.value,
                    status: DRAFT_STATUS,
                    metadata: serde_json::json!({
                        "sourceFileId": source_file_id,
                        "originalYear": point.year,
                    }),
                });
                committed.push(CommittedDataPoint {
                    region: point.region.clone(),
                    region_id,
                    year: point.year,
                    date,
                    value: point.value,
                });
            }

            let dropped = extracted.data.len() - rows.len();
            if dropped > 0 {
                tracing::warn!(metric = %extracted.name, dropped, "data points dropped during region/year resolution");
            }

            if !rows.is_empty() {
                if let Err(e) = self.store.insert_data_points(&rows).await {
                    tracing::warn!(metric = %extracted.name, error = %e, "data point insert failed, keeping empty metric");
                    report.failures.push(CommitFailure {
                        metric: extracted.name.clone(),
                        stage: CommitStage::DataPoints,
                        error: format!("{:#}", e),
                    });
                    committed.clear();
                }
            }

            tracing::info!(metric = %persisted.name, id = %persisted.id, points = committed.len(), "metric committed");
            report.metrics.push(CommittedMetric {
                id: persisted.id,
                name: persisted.name,
                unit: persisted.unit,
                data: committed,
            });
        }

        report
    }
}
