//! Import pipeline - one uploaded file from download to committed metrics
//!
//! Stages:
//! - Check the request and file extension
//! - Mark the file as processing
//! - Download and decode the workbook
//! - Load the region vocabulary
//! - Request extraction from the model, then validate/repair the response
//! - Optionally write `processed/{fileId}.json`
//! - Commit metrics and data points
//! - Mark the file completed (or error on any fatal failure)

use crate::commit::{CommitEngine, CommitReport, MetricStore};
use crate::config::PipelineConfig;
use crate::error::{ImportError, ImportResult};
use crate::extraction::ExtractionRequester;
use crate::llm::CompletionClient;
use crate::regions::{RegionDirectory, RegionSource};
use crate::repair::{validate_response, Validated};
use crate::status::{CompletionMetadata, FileStore, StatusReporter};
use crate::storage::ObjectStore;
use crate::workbook::{self, read_workbook, SpreadsheetFormat, ACCEPTED_EXTENSIONS};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Trigger payload: `{ fileId, filePath, fileName }`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub file_id: Option<String>,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
}

/// A request with its required fields present.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportJob {
    pub file_id: Uuid,
    pub file_path: String,
    pub file_name: String,
}

impl ImportRequest {
    pub fn into_job(self) -> ImportResult<ImportJob> {
        let file_id = non_empty(self.file_id).ok_or(ImportError::MissingField("fileId"))?;
        let file_path = non_empty(self.file_path).ok_or(ImportError::MissingField("filePath"))?;
        let file_id = Uuid::parse_str(&file_id).map_err(|e| ImportError::InvalidField {
            field: "fileId",
            reason: e.to_string(),
        })?;
        let file_name = non_empty(self.file_name).unwrap_or_else(|| file_path.clone());
        Ok(ImportJob {
            file_id,
            file_path,
            file_name,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ImportJob {
    /// Format from the file name's extension, falling back to the storage path.
    pub fn format(&self) -> ImportResult<SpreadsheetFormat> {
        let extension = workbook::file_extension(&self.file_name)
            .or_else(|| workbook::file_extension(&self.file_path))
            .unwrap_or_default();
        SpreadsheetFormat::from_extension(&extension).ok_or_else(|| ImportError::UnsupportedFormat {
            extension,
            accepted: ACCEPTED_EXTENSIONS.join(", "),
        })
    }
}

/// External collaborators, injected so the pipeline can run against fakes.
#[derive(Clone)]
pub struct Collaborators {
    pub objects: Arc<dyn ObjectStore>,
    pub regions: Arc<dyn RegionSource>,
    pub metrics: Arc<dyn MetricStore>,
    pub files: Arc<dyn FileStore>,
    pub completion: Arc<dyn CompletionClient>,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub report: CommitReport,
    pub metadata: CompletionMetadata,
}

pub struct ImportPipeline {
    deps: Collaborators,
    config: PipelineConfig,
    requester: ExtractionRequester,
    committer: CommitEngine,
}

impl ImportPipeline {
    pub fn new(deps: Collaborators, config: PipelineConfig) -> Self {
        let requester = ExtractionRequester::new(deps.completion.clone());
        let committer = CommitEngine::new(deps.metrics.clone());
        Self {
            deps,
            config,
            requester,
            committer,
        }
    }

    /// Run one import. Every fatal error after the request is validated leaves
    /// the file record in the `error` state before returning.
    #[instrument(skip(self, job), fields(file_id = %job.file_id, file = %job.file_name))]
    pub async fn run(&self, job: &ImportJob) -> ImportResult<ImportOutcome> {
        let mut status = StatusReporter::new(self.deps.files.clone(), job.file_id);

        let format = match job.format() {
            Ok(format) => format,
            Err(e) => {
                self.mark_error(&mut status, &e).await;
                return Err(e);
            }
        };

        if let Err(e) = status.processing().await {
            let err = ImportError::Status(ImportError::describe(&e));
            self.mark_error(&mut status, &err).await;
            return Err(err);
        }

        let outcome = match self.process(job, format).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "import failed");
                self.mark_error(&mut status, &e).await;
                return Err(e);
            }
        };

        if let Err(e) = status.completed(&outcome.metadata).await {
            let err = ImportError::Status(ImportError::describe(&e));
            self.mark_error(&mut status, &err).await;
            return Err(err);
        }

        tracing::info!(
            metrics = outcome.metadata.metrics_count,
            data_points = outcome.metadata.data_points_count,
            "import completed"
        );
        Ok(outcome)
    }

    async fn process(&self, job: &ImportJob, format: SpreadsheetFormat) -> ImportResult<ImportOutcome> {
        let bytes = self
            .deps
            .objects
            .download(&job.file_path)
            .await
            .map_err(|e| ImportError::Download(ImportError::describe(&e)))?;
        let content_hash = format!("sha256:{:x}", Sha256::digest(&bytes));
        tracing::info!(bytes = bytes.len(), hash = %content_hash, "downloaded upload");

        let workbook = read_workbook(&bytes, format, &job.file_name)
            .map_err(|e| ImportError::UnreadableWorkbook(ImportError::describe(&e)))?;
        tracing::info!(sheets = workbook.sheets.len(), rows = workbook.row_count(), "workbook decoded");

        let regions = RegionDirectory::load(self.deps.regions.as_ref())
            .await
            .map_err(|e| ImportError::RegionFetch(ImportError::describe(&e)))?;
        if regions.is_empty() {
            tracing::warn!("region table is empty, every data point will be dropped");
        }

        let response = self
            .requester
            .request(&workbook, &regions)
            .await
            .map_err(|e| ImportError::Completion(ImportError::describe(&e)))?;

        let Validated {
            result,
            outcome,
            dropped,
        } = validate_response(&response);
        tracing::info!(
            outcome = outcome.as_str(),
            metrics = result.metrics.len(),
            data_points = result.data_point_count(),
            dropped,
            "extraction validated"
        );

        let processed_path = if self.config.write_processed_artifact {
            let path = format!("processed/{}.json", job.file_id);
            let body = serde_json::to_vec_pretty(&result)
                .map_err(|e| ImportError::ArtifactWrite(e.to_string()))?;
            self.deps
                .objects
                .upload(&path, body, "application/json")
                .await
                .map_err(|e| ImportError::ArtifactWrite(ImportError::describe(&e)))?;
            Some(path)
        } else {
            None
        };

        let report = self.committer.commit(&result, &regions, job.file_id).await;

        let metadata = CompletionMetadata {
            metrics_count: report.metrics_count(),
            data_points_count: report.data_points_count(),
            extraction: outcome.as_str().to_string(),
            dropped_data_points: dropped + report.unresolved_regions + report.invalid_years,
            failed_metrics: report.failures.len(),
            content_hash,
            processed_path,
        };

        Ok(ImportOutcome { report, metadata })
    }

    async fn mark_error(&self, status: &mut StatusReporter, err: &ImportError) {
        if let Err(status_err) = status.error(&err.to_string()).await {
            tracing::error!(error = %status_err, "failed to record error status");
        }
    }
}
