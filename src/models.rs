use crate::services::download_path;
use crate::store::{ObjectRecord, StoreStats};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// Multipart form accepted by the upload endpoint
#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadForm {
    /// Id returned by `/api/captcha`; sent before `file`
    #[schema(example = "3f0c7bd2a4e94c5e8f6f1a2b3c4d5e6f")]
    pub captcha_id: Option<String>,

    /// Digits shown in the captcha image; sent before `file`
    #[schema(example = "482913")]
    pub captcha_solution: Option<String>,

    /// File payload; its filename becomes the public filename
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Storage identifier
    #[schema(example = "q2N0Zl9hX3JhbmRvbV9pZA")]
    pub id: String,

    /// Sanitized public filename
    #[schema(example = "notes.txt")]
    pub filename: String,

    /// Download link
    #[schema(example = "/d/q2N0Zl9hX3JhbmRvbV9pZA/notes.txt")]
    pub url: String,

    pub size_bytes: u64,

    /// Earliest time the file may be reclaimed
    pub expires_at: DateTime<Utc>,
}

impl UploadResponse {
    pub fn new(record: &ObjectRecord, ttl: Duration) -> Self {
        let expires_at = Utc
            .timestamp_opt(record.expires_at(ttl), 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            id: record.id.clone(),
            filename: record.filename.clone(),
            url: download_path(record),
            size_bytes: record.size_bytes,
            expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CaptchaResponse {
    pub captcha_id: String,
    /// Where the challenge can be fetched
    #[schema(example = "/c/3f0c7bd2a4e94c5e8f6f1a2b3c4d5e6f.png")]
    pub challenge_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub captcha_enabled: bool,
    /// Maximum upload size in bytes
    pub max_object_size: u64,
    /// Seconds an upload stays available
    pub ttl_secs: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub store: StoreStats,
    pub disk_total_gb: f64,
    pub disk_free_gb: f64,
}
