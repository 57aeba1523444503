//! In-memory fakes for the pipeline's external collaborators.

use crate::commit::{MetricStore, NewDataPoint, NewMetric, PersistedMetric};
use crate::llm::{CompletionClient, CompletionRequest};
use crate::regions::{Region, RegionSource};
use crate::status::{FileStore, ProcessingStatus};
use crate::storage::ObjectStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

// =============================================================================
// REGIONS
// =============================================================================

pub struct FakeRegions {
    regions: Vec<Region>,
    error: Option<String>,
    fetches: AtomicUsize,
}

impl FakeRegions {
    pub fn new(regions: Vec<Region>) -> Self {
        Self {
            regions,
            error: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            regions: Vec::new(),
            error: Some(message.to_string()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegionSource for FakeRegions {
    async fn fetch_regions(&self) -> Result<Vec<Region>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(message) => anyhow::bail!("{}", message),
            None => Ok(self.regions.clone()),
        }
    }
}

// =============================================================================
// COMPLETION
// =============================================================================

pub struct FakeCompletion {
    reply: Result<String, String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeCompletion {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for FakeCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(message) => anyhow::bail!("{}", message),
        }
    }
}

// =============================================================================
// RELATIONAL STORE
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct FileRecord {
    pub status: Option<ProcessingStatus>,
    pub history: Vec<ProcessingStatus>,
    pub metadata: serde_json::Value,
}

#[derive(Default)]
struct Tables {
    metrics: Vec<PersistedMetric>,
    data_points: Vec<NewDataPoint>,
    batches: usize,
    files: HashMap<Uuid, FileRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_metric: Option<String>,
    fail_data_points: bool,
    fail_status: bool,
}

impl MemoryStore {
    pub fn fail_metric(mut self, name: &str) -> Self {
        self.fail_metric = Some(name.to_string());
        self
    }

    pub fn fail_data_points(mut self) -> Self {
        self.fail_data_points = true;
        self
    }

    pub fn fail_status(mut self) -> Self {
        self.fail_status = true;
        self
    }

    pub fn seed_file(&self, file_id: Uuid, metadata: serde_json::Value) {
        self.tables.lock().unwrap().files.insert(
            file_id,
            FileRecord {
                status: Some(ProcessingStatus::Pending),
                history: Vec::new(),
                metadata,
            },
        );
    }

    pub fn metrics(&self) -> Vec<PersistedMetric> {
        self.tables.lock().unwrap().metrics.clone()
    }

    pub fn data_points(&self) -> Vec<NewDataPoint> {
        self.tables.lock().unwrap().data_points.clone()
    }

    pub fn data_point_batches(&self) -> usize {
        self.tables.lock().unwrap().batches
    }

    pub fn file(&self, file_id: Uuid) -> Option<FileRecord> {
        self.tables.lock().unwrap().files.get(&file_id).cloned()
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn insert_metric(&self, metric: &NewMetric) -> Result<PersistedMetric> {
        if self.fail_metric.as_deref() == Some(metric.name.as_str()) {
            anyhow::bail!("insert into metrics failed for '{}'", metric.name);
        }
        let now = Utc::now();
        let persisted = PersistedMetric {
            id: Uuid::new_v4(),
            name: metric.name.clone(),
            unit: metric.unit.clone(),
            created_at: now,
            updated_at: now,
            metadata: metric.metadata.clone(),
        };
        self.tables.lock().unwrap().metrics.push(persisted.clone());
        Ok(persisted)
    }

    async fn insert_data_points(&self, points: &[NewDataPoint]) -> Result<u64> {
        if self.fail_data_points {
            anyhow::bail!("insert into metric_data failed");
        }
        let mut tables = self.tables.lock().unwrap();
        tables.batches += 1;
        tables.data_points.extend_from_slice(points);
        Ok(points.len() as u64)
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn update_status(
        &self,
        file_id: Uuid,
        status: ProcessingStatus,
        metadata: serde_json::Value,
    ) -> Result<()> {
        if self.fail_status {
            anyhow::bail!("update files failed");
        }
        let mut tables = self.tables.lock().unwrap();
        let record = tables.files.entry(file_id).or_default();
        record.status = Some(status);
        record.history.push(status);

        // Same semantics as `metadata || $2` in Postgres
        if !record.metadata.is_object() {
            record.metadata = serde_json::json!({});
        }
        if let (Some(existing), Some(update)) = (record.metadata.as_object_mut(), metadata.as_object()) {
            for (k, v) in update {
                existing.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }
}

// =============================================================================
// OBJECT STORE
// =============================================================================

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: bool,
}

impl MemoryObjectStore {
    pub fn with(self, path: &str, bytes: Vec<u8>) -> Self {
        self.objects.lock().unwrap().insert(path.to_string(), bytes);
        self
    }

    pub fn fail_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        match self.get(path) {
            Some(bytes) => Ok(bytes),
            None => anyhow::bail!("Object not found: {}", path),
        }
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        if self.fail_uploads {
            anyhow::bail!("upload rejected: {}", path);
        }
        self.objects.lock().unwrap().insert(path.to_string(), bytes);
        Ok(())
    }
}
