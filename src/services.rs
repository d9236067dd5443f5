use crate::admission::AdmissionController;
use crate::allocator::{sanitize_filename, IdAllocator};
use crate::blob::BlobStore;
use crate::constants::{DOWNLOAD_PREFIX, MAX_ID_ATTEMPTS};
use crate::error::{AppError, Result};
use crate::store::{ObjectRecord, ObjectStore};
use axum::body::Bytes;
use chrono::Utc;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Public path of a stored object, served by the static download route
pub fn download_path(record: &ObjectRecord) -> String {
    format!("{}/{}/{}", DOWNLOAD_PREFIX, record.id, record.filename)
}

pub struct UploadService {
    store: Arc<ObjectStore>,
    blobs: Arc<dyn BlobStore>,
    admission: AdmissionController,
    allocator: IdAllocator,
    ttl: Duration,
}

impl UploadService {
    pub fn new(
        store: Arc<ObjectStore>,
        blobs: Arc<dyn BlobStore>,
        admission: AdmissionController,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            blobs,
            admission,
            allocator: IdAllocator,
            ttl,
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Admits, persists and indexes one upload.
    ///
    /// Size and quota are decided before any I/O. The record only enters
    /// the index once the payload is durably written, so a failed or
    /// abandoned upload never counts against the quota.
    pub async fn store_file(&self, data: Bytes, filename: &str) -> Result<ObjectRecord> {
        let filename = sanitize_filename(filename);
        let mut reservation = self.admission.admit(&self.store, data.len() as u64)?;

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let Some(location) = self.claim_location().await? else {
                tracing::debug!(attempt, "Storage location already taken, retrying");
                continue;
            };

            self.blobs
                .write(location.id(), &filename, &data)
                .await
                .map_err(AppError::Persist)?;

            match reservation.commit(location.id(), filename.as_str(), Utc::now().timestamp()) {
                Ok(record) => {
                    location.keep();
                    tracing::info!(
                        id = %record.id,
                        size_bytes = record.size_bytes,
                        expires_at = record.expires_at(self.ttl),
                        "Stored upload"
                    );
                    return Ok(record);
                }
                Err((err, returned)) => {
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "Identifier collided in the index, retrying"
                    );
                    reservation = returned;
                }
            }
        }

        Err(AppError::Internal(anyhow::anyhow!(
            "no free storage identifier after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }

    /// Claims a fresh location, or `None` if the allocated one was taken.
    async fn claim_location(&self) -> Result<Option<PendingLocation>> {
        let id = self.allocator.allocate();
        match self.blobs.create(&id).await {
            Ok(()) => Ok(Some(PendingLocation {
                blobs: Arc::clone(&self.blobs),
                id: Some(id),
            })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(AppError::Persist(e)),
        }
    }
}

/// A claimed storage location that is deleted again unless kept. Covers
/// write failures, index collisions and requests dropped mid-upload.
struct PendingLocation {
    blobs: Arc<dyn BlobStore>,
    id: Option<String>,
}

impl PendingLocation {
    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    fn keep(mut self) {
        self.id = None;
    }
}

impl Drop for PendingLocation {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(id = %id, "No runtime to discard abandoned upload");
            return;
        };

        let blobs = Arc::clone(&self.blobs);
        runtime.spawn(async move {
            if let Err(e) = blobs.delete_all(&id).await {
                tracing::warn!(id = %id, error = %e, "Failed to discard abandoned upload");
            }
        });
    }
}
