use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ArchiveOutcome, Artifact, StorageKey, compute_hash};
use crate::traits::ObjectStore;

/// Uploads artifacts to the object store under a date-partitioned key.
///
/// Without a store (no storage credentials configured) every artifact is
/// skipped.
pub struct Archiver<S: ObjectStore> {
    store: Option<S>,
    category: String,
    origin: String,
    clock: fn() -> DateTime<Utc>,
}

impl<S: ObjectStore> Archiver<S> {
    /// Create an archiver that skips every upload.
    pub fn disabled(category: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            store: None,
            category: category.into(),
            origin: origin.into(),
            clock: Utc::now,
        }
    }

    /// Create an archiver backed by `store`.
    pub fn with_store(store: S, category: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            store: Some(store),
            category: category.into(),
            origin: origin.into(),
            clock: Utc::now,
        }
    }

    /// Override the clock used to date storage keys.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Key an artifact named `file_name` would get right now.
    pub fn key_for(&self, file_name: &str) -> StorageKey {
        StorageKey::new(&self.category, (self.clock)().date_naive(), file_name)
    }

    /// Upload `artifact`, consuming it.
    pub async fn archive(
        &self,
        artifact: Artifact,
        run_id: Option<Uuid>,
    ) -> Result<ArchiveOutcome, AppError> {
        let Some(store) = &self.store else {
            tracing::info!(
                file_name = %artifact.file_name,
                "Storage credentials not configured, skipping upload"
            );
            return Ok(ArchiveOutcome::Skipped);
        };

        let key = self.key_for(&artifact.file_name);
        let content_type = artifact.content_type();
        let size = artifact.size();
        let metadata = self.metadata(&artifact, run_id);

        tracing::info!(%key, size, content_type, "Uploading artifact");
        store
            .put(&key, artifact.bytes, content_type, &metadata)
            .await
            .map_err(|e| match e {
                AppError::UploadError(msg) => AppError::UploadError(msg),
                other => AppError::UploadError(other.to_string()),
            })?;
        tracing::info!(%key, "Upload complete");

        Ok(ArchiveOutcome::Uploaded { key, size })
    }

    fn metadata(&self, artifact: &Artifact, run_id: Option<Uuid>) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        metadata.insert("origin".to_string(), self.origin.clone());
        metadata.insert("captured_at".to_string(), artifact.discovered_at.to_rfc3339());
        metadata.insert("size_bytes".to_string(), artifact.size().to_string());
        metadata.insert("content_type".to_string(), artifact.content_type().to_string());
        metadata.insert("sha256".to_string(), compute_hash(&artifact.bytes));
        if let Some(id) = run_id {
            metadata.insert("run_id".to_string(), id.to_string());
        }
        metadata
    }
}
