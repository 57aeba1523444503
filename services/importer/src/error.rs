//! Fatal error taxonomy for one import run.
//!
//! Only errors that abort the import live here. Data-quality problems in the
//! model response are absorbed by `repair`, and per-metric insert failures are
//! reported through `commit::CommitReport`.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("Unsupported file type '{extension}'. Accepted: {accepted}")]
    UnsupportedFormat { extension: String, accepted: String },
    #[error("Failed to download file: {0}")]
    Download(String),
    #[error("Failed to read workbook: {0}")]
    UnreadableWorkbook(String),
    #[error("Failed to load regions: {0}")]
    RegionFetch(String),
    #[error("Extraction request failed: {0}")]
    Completion(String),
    #[error("Failed to write processed artifact: {0}")]
    ArtifactWrite(String),
    #[error("Failed to update file status: {0}")]
    Status(String),
}

impl ImportError {
    /// HTTP status reported to the caller that triggered the import.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingField(_) | Self::InvalidField { .. } | Self::UnsupportedFormat { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Adapters return `anyhow` errors; keep the whole context chain in the message.
    pub(crate) fn describe(err: &anyhow::Error) -> String {
        format!("{:#}", err)
    }
}

pub type ImportResult<T> = Result<T, ImportError>;
