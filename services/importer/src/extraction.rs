//! Extraction Requester - turns raw sheets plus the region vocabulary into a
//! single completion request, and defines the structured result shape.
//!
//! Output contract sent to the model:
//! `{"metrics":[{"name","unit","data":[{"region","year","value"}]}]}`

use crate::llm::{CompletionClient, CompletionRequest};
use crate::regions::RegionDirectory;
use crate::workbook::Workbook;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDataPoint {
    pub region: String,
    pub year: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetric {
    pub name: String,
    pub unit: String,
    pub data: Vec<ExtractedDataPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub metrics: Vec<ExtractedMetric>,
}

impl ExtractionResult {
    pub fn data_point_count(&self) -> usize {
        self.metrics.iter().map(|m| m.data.len()).sum()
    }
}

const INSTRUCTIONS: &str = r#"You extract time-series metrics from raw spreadsheet data.

The user message is JSON: an object mapping each sheet name to its rows, where each row maps a column header to the raw cell value.

Rules:
- A single sheet may contain several distinct metrics. Emit one metric entry per distinct measure (for example, separate metrics for population and GDP even when they share a sheet).
- Every data point must name its region using one of the region codes listed below, exactly as written. Match region labels in the sheet to the closest listed region. Never invent a code; skip rows whose region matches none of the listed regions.
- "year" must be an integer (e.g. 2021), never a string or a date.
- "value" must be a number, never a string. Strip thousands separators, currency symbols and percent signs.
- Wide layouts with one column per year produce one data point per (region, year) cell.
- "unit" is the unit of measure if stated or obvious (e.g. "inhabitants", "EUR", "%"); otherwise use an empty string.

Respond with a single JSON object and nothing else, exactly in this shape:
{"metrics":[{"name":"string","unit":"string","data":[{"region":"CODE","year":2021,"value":0.0}]}]}
If no metric can be extracted, respond with {"metrics":[]}."#;

/// Build the system + user messages for one workbook.
pub fn build_request(workbook: &Workbook, regions: &RegionDirectory) -> Result<CompletionRequest> {
    let system = format!(
        "{}\n\nAllowed region codes (CODE: Name):\n{}",
        INSTRUCTIONS,
        regions.vocabulary()
    );
    let user = serde_json::to_string(workbook).context("Failed to serialize workbook")?;
    Ok(CompletionRequest { system, user })
}

pub struct ExtractionRequester {
    client: Arc<dyn CompletionClient>,
}

impl ExtractionRequester {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// One completion call; failures propagate untouched.
    pub async fn request(&self, workbook: &Workbook, regions: &RegionDirectory) -> Result<String> {
        let request = build_request(workbook, regions)?;
        tracing::info!(
            sheets = workbook.sheets.len(),
            rows = workbook.row_count(),
            regions = regions.len(),
            "requesting extraction"
        );
        let response = self.client.complete(&request).await?;
        tracing::debug!(response_chars = response.len(), "extraction response received");
        Ok(response)
    }
}
