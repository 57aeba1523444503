//! Object store for uploaded workbooks and derived artifacts.
//!
//! Two backends:
//! - `fs`: paths resolved under a local root directory
//! - `http`: Supabase-style storage REST API (`/storage/v1/object/{bucket}/{path}`)

use crate::config::{StorageConfig, StoreKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, path: &str) -> Result<Vec<u8>>;
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;
}

pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.kind {
        StoreKind::Fs => Ok(Arc::new(FsObjectStore::new(config.fs_dir.clone()))),
        StoreKind::Http => {
            let base_url = config
                .url
                .clone()
                .context("STORAGE_URL env var missing")?;
            Ok(Arc::new(HttpObjectStore::new(
                base_url,
                config.bucket.clone(),
                config.service_key.clone(),
            )?))
        }
    }
}

// =============================================================================
// FILESYSTEM
// =============================================================================

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Rejects absolute paths and `..` so keys can't escape the root.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            anyhow::bail!("Invalid storage path '{}'", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full)
            .await
            .with_context(|| format!("Failed to read {}", full.display()))
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, bytes)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))
    }
}

// =============================================================================
// HTTP (storage REST API)
// =============================================================================

pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    service_key: Option<String>,
}

impl HttpObjectStore {
    pub fn new(base_url: String, bucket: String, service_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket,
            service_key,
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.service_key {
            Some(key) => req.bearer_auth(key).header("apikey", key),
            None => req,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.object_url(path);
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .context("Storage download rejected")?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let url = self.object_url(path);
        self.authorize(self.client.post(&url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?
            .error_for_status()
            .context("Storage upload rejected")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_roundtrip_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());

        store
            .upload("processed/abc.json", b"{}".to_vec(), "application/json")
            .await
            .unwrap();
        let bytes = store.download("processed/abc.json").await.unwrap();
        assert_eq!(bytes, b"{}");
    }

    #[tokio::test]
    async fn test_fs_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());
        assert!(store.download("nope.xlsx").await.is_err());
    }

    #[test]
    fn test_fs_rejects_traversal() {
        let store = FsObjectStore::new(PathBuf::from("/srv/uploads"));
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("a/../../b").is_err());
        assert_eq!(
            store.resolve("/user/file.xlsx").unwrap(),
            PathBuf::from("/srv/uploads/user/file.xlsx")
        );
    }

    #[test]
    fn test_http_object_url() {
        let store = HttpObjectStore::new(
            "https://project.supabase.co/".to_string(),
            "uploads".to_string(),
            None,
        )
        .unwrap();
        assert_eq!(
            store.object_url("/user-1/data.xlsx"),
            "https://project.supabase.co/storage/v1/object/uploads/user-1/data.xlsx"
        );
    }
}
