//! Region Directory - the controlled vocabulary of region codes.
//!
//! Loaded fresh for every import; codes may change between uploads.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Region {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

/// Source of the canonical region list (the `regions` table in production).
#[async_trait]
pub trait RegionSource: Send + Sync {
    async fn fetch_regions(&self) -> Result<Vec<Region>>;
}

/// Snapshot of the region vocabulary for one import.
#[derive(Debug, Clone, Default)]
pub struct RegionDirectory {
    regions: Vec<Region>,
    by_code: HashMap<String, Uuid>,
}

impl RegionDirectory {
    pub async fn load(source: &dyn RegionSource) -> Result<Self> {
        let regions = source.fetch_regions().await?;
        Ok(Self::new(regions))
    }

    pub fn new(mut regions: Vec<Region>) -> Self {
        regions.sort_by(|a, b| a.code.cmp(&b.code));
        let by_code = regions.iter().map(|r| (r.code.clone(), r.id)).collect();
        Self { regions, by_code }
    }

    /// Exact-match lookup; the model is instructed to emit codes verbatim.
    pub fn resolve(&self, code: &str) -> Option<Uuid> {
        self.by_code.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// `CODE: Name` lines for the extraction prompt, sorted by code.
    pub fn vocabulary(&self) -> String {
        self.regions
            .iter()
            .map(|r| format!("{}: {}", r.code, r.name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
