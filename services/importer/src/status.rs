//! Status Reporter - writes the file record's processing status and
//! diagnostic metadata at each stage of one import run.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// pending -> processing -> {completed, error}; pending may fail straight to error.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Self::Pending, Self::Processing | Self::Error) => true,
            (Self::Processing, Self::Processing | Self::Completed | Self::Error) => true,
            _ => false,
        }
    }
}

/// Update side of the `files` table.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Set `processing_status` and merge `metadata` into the existing metadata.
    async fn update_status(
        &self,
        file_id: Uuid,
        status: ProcessingStatus,
        metadata: serde_json::Value,
    ) -> Result<()>;
}

/// Final counts attached to a completed file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompletionMetadata {
    pub metrics_count: usize,
    pub data_points_count: usize,
    pub extraction: String,
    pub dropped_data_points: usize,
    pub failed_metrics: usize,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_path: Option<String>,
}

pub struct StatusReporter {
    store: Arc<dyn FileStore>,
    file_id: Uuid,
    current: ProcessingStatus,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn FileStore>, file_id: Uuid) -> Self {
        Self {
            store,
            file_id,
            current: ProcessingStatus::Pending,
        }
    }

    pub fn current(&self) -> ProcessingStatus {
        self.current
    }

    pub async fn processing(&mut self) -> Result<()> {
        self.transition(ProcessingStatus::Processing, serde_json::json!({}))
            .await
    }

    pub async fn error(&mut self, message: &str) -> Result<()> {
        self.transition(ProcessingStatus::Error, serde_json::json!({ "error": message }))
            .await
    }

    pub async fn completed(&mut self, metadata: &CompletionMetadata) -> Result<()> {
        self.transition(ProcessingStatus::Completed, serde_json::to_value(metadata)?)
            .await
    }

    async fn transition(&mut self, next: ProcessingStatus, metadata: serde_json::Value) -> Result<()> {
        if !self.current.can_transition_to(next) {
            tracing::warn!(
                file_id = %self.file_id,
                from = self.current.as_str(),
                to = next.as_str(),
                "ignoring status transition"
            );
            return Ok(());
        }

        self.store.update_status(self.file_id, next, metadata).await?;
        tracing::info!(file_id = %self.file_id, status = next.as_str(), "file status updated");
        self.current = next;
        Ok(())
    }
}
