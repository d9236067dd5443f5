use crate::constants::MULTIPART_OVERHEAD;
use crate::error::{AppError, Result};
use crate::models::*;
use crate::state::AppState;
use crate::store::StoreStats;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use chrono::Utc;
use utoipa::OpenApi;

const INDEX_TEMPLATE: &str = include_str!("../static/index.html");

#[derive(OpenApi)]
#[openapi(
    paths(health, stats, new_captcha, captcha_challenge, upload),
    components(schemas(
        HealthResponse,
        StatsResponse,
        StoreStats,
        CaptchaResponse,
        UploadForm,
        UploadResponse
    )),
    tags(
        (name = "fup", description = "Temporary file uploader")
    ),
    info(
        title = "fup API",
        version = "0.1.0",
        description = "Ephemeral file sharing.\n\n\
                      - Uploads are gated by a captcha\n\
                      - Each file lives under an unguessable link\n\
                      - Files are deleted once their time-to-live has passed\n\
                      - A global quota bounds total storage; uploads beyond it are refused",
        license(name = "MIT"),
    )
)]
pub struct ApiDoc;

/// Upload form with a fresh captcha
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let captcha_id = if state.captcha.is_enabled() {
        state.captcha.issue(Utc::now().timestamp())
    } else {
        String::new()
    };

    let max_mb = state.config.max_object_size as f64 / (1024.0 * 1024.0);
    let ttl_hours = state.config.ttl.as_secs() as f64 / 3600.0;

    Html(
        INDEX_TEMPLATE
            .replace("{{captcha_id}}", &captcha_id)
            .replace("{{max_mb}}", &format!("{max_mb:.1}"))
            .replace("{{ttl_hours}}", &format!("{ttl_hours:.0}")),
    )
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "fup",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        captcha_enabled: state.captcha.is_enabled(),
        max_object_size: state.config.max_object_size,
        ttl_secs: state.config.ttl.as_secs(),
    })
}

/// Store occupancy and free space on the storage volume
#[utoipa::path(
    get,
    path = "/api/stats",
    tag = "fup",
    responses(
        (status = 200, description = "Storage statistics", body = StatsResponse)
    )
)]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let (disk_total_gb, disk_free_gb) =
        match nix::sys::statvfs::statvfs(state.config.storage_root.as_path()) {
            Ok(stats) => {
                let block_size = stats.fragment_size() as f64;
                let gb = 1024.0 * 1024.0 * 1024.0;
                (
                    stats.blocks() as f64 * block_size / gb,
                    stats.blocks_available() as f64 * block_size / gb,
                )
            }
            Err(_) => (0.0, 0.0),
        };

    Json(StatsResponse {
        store: state.store.stats(),
        disk_total_gb,
        disk_free_gb,
    })
}

/// Issue a captcha challenge
#[utoipa::path(
    get,
    path = "/api/captcha",
    tag = "fup",
    responses(
        (status = 200, description = "New challenge", body = CaptchaResponse)
    )
)]
pub async fn new_captcha(State(state): State<AppState>) -> Json<CaptchaResponse> {
    let captcha_id = state.captcha.issue(Utc::now().timestamp());
    Json(CaptchaResponse {
        challenge_url: format!("/c/{}.png", captcha_id),
        captcha_id,
    })
}

/// Render a live challenge
#[utoipa::path(
    get,
    path = "/c/{image}",
    tag = "fup",
    params(
        ("image" = String, Path, description = "Captcha id followed by `.png`")
    ),
    responses(
        (status = 200, description = "Challenge image", body = Vec<u8>, content_type = "image/png"),
        (status = 404, description = "Unknown or expired challenge")
    )
)]
pub async fn captcha_challenge(
    State(state): State<AppState>,
    Path(image): Path<String>,
) -> Result<impl IntoResponse> {
    let id = image.strip_suffix(".png").ok_or(AppError::NotFound)?;
    let solution = state
        .captcha
        .solution(id, Utc::now().timestamp())
        .ok_or(AppError::NotFound)?;

    let png = tokio::task::spawn_blocking(move || crate::captcha::render(&solution))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to render captcha")))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        png,
    ))
}

/// Upload a file
///
/// The captcha fields must come before the file field. The file is kept for
/// the configured time-to-live and then deleted.
#[utoipa::path(
    post,
    path = "/api/upload",
    tag = "fup",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "Malformed form"),
        (status = 403, description = "Bad or missing captcha before the file"),
        (status = 413, description = "File too large"),
        (status = 429, description = "Storage quota full, retry later"),
        (status = 500, description = "Upload failed")
    )
)]
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let admission = state.uploads.admission();

    // Reject declared oversize bodies before reading anything
    if let Some(length) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        admission.check_declared(length, MULTIPART_OVERHEAD)?;
    }

    let mut file: Option<(String, Bytes)> = None;
    let mut captcha_id: Option<String> = None;
    let mut captcha_solution: Option<String> = None;

    let to_app_error = |e: MultipartError| multipart_error(e, admission.max_object_size());

    while let Some(mut field) = multipart.next_field().await.map_err(to_app_error)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                if file.is_some() {
                    return Err(AppError::BadRequest("Only one file per upload".to_string()));
                }
                // Nothing of the payload is read for an unverified request
                let verified = state.captcha.verify(
                    captcha_id.as_deref().unwrap_or(""),
                    captcha_solution.as_deref().unwrap_or(""),
                    Utc::now().timestamp(),
                );
                if !verified {
                    return Err(AppError::BadCaptcha);
                }

                let filename = field.file_name().unwrap_or("").to_string();
                let mut buffer = admission.buffer();
                while let Some(chunk) = field.chunk().await.map_err(to_app_error)? {
                    buffer.push(&chunk)?;
                }
                file = Some((filename, buffer.into_bytes()));
            }
            "captcha_id" => {
                captcha_id = Some(field.text().await.map_err(to_app_error)?);
            }
            "captcha_solution" => {
                captcha_solution = Some(field.text().await.map_err(to_app_error)?);
            }
            _ => {}
        }
    }

    let (filename, data) =
        file.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;

    let record = state.uploads.store_file(data, &filename).await?;

    Ok(Json(UploadResponse::new(&record, state.uploads.ttl())))
}

fn multipart_error(e: MultipartError, max_bytes: u64) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::TooLarge { max_bytes }
    } else {
        AppError::BadRequest(format!("Failed to parse multipart: {}", e.body_text()))
    }
}
