//! Size and quota checks that run before any payload byte is persisted.

use crate::error::{AppError, Result};
use crate::store::{AdmitError, ObjectStore, Reservation};
use axum::body::Bytes;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct AdmissionController {
    max_object_size: u64,
    /// Hint returned with quota rejections; space frees up on the next sweep
    retry_after: Duration,
}

impl AdmissionController {
    pub fn new(max_object_size: u64, retry_after: Duration) -> Self {
        Self {
            max_object_size,
            retry_after,
        }
    }

    pub fn max_object_size(&self) -> u64 {
        self.max_object_size
    }

    /// Fails fast on a declared length that cannot fit, before reading the
    /// body. `overhead` covers multipart framing around the payload.
    pub fn check_declared(&self, declared: u64, overhead: u64) -> Result<()> {
        if declared > self.max_object_size.saturating_add(overhead) {
            return Err(AppError::TooLarge {
                max_bytes: self.max_object_size,
            });
        }
        Ok(())
    }

    pub fn buffer(&self) -> CappedBuffer {
        CappedBuffer::new(self.max_object_size)
    }

    /// Accepts a measured upload of `size_bytes` and reserves its quota.
    pub fn admit<'a>(&self, store: &'a ObjectStore, size_bytes: u64) -> Result<Reservation<'a>> {
        if size_bytes > self.max_object_size {
            return Err(AppError::TooLarge {
                max_bytes: self.max_object_size,
            });
        }
        store.reserve(size_bytes).map_err(|e| match e {
            AdmitError::QuotaExceeded {
                requested,
                available,
            } => AppError::QuotaExceeded {
                requested,
                available,
                retry_after_secs: self.retry_after.as_secs(),
            },
            other => AppError::Internal(other.into()),
        })
    }
}

/// Accumulates an upload body and refuses to grow past the per-object cap.
/// The chunk that would cross the cap is rejected, not buffered.
#[derive(Debug)]
pub struct CappedBuffer {
    cap: u64,
    data: Vec<u8>,
}

impl CappedBuffer {
    pub fn new(cap: u64) -> Self {
        Self {
            cap,
            data: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        let len = (self.data.len() + chunk.len()) as u64;
        if len > self.cap {
            return Err(AppError::TooLarge { max_bytes: self.cap });
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.data)
    }
}
