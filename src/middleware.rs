use axum::{
    body::Body,
    http::{header, HeaderValue, Request, Response},
    middleware::Next,
};

/// Security headers middleware
/// Adds the same hardening headers to every response
pub async fn security_headers(request: Request<Body>, next: Next) -> Response<Body> {
    let is_download = request
        .uri()
        .path()
        .strip_prefix(crate::constants::DOWNLOAD_PREFIX)
        .is_some_and(|rest| rest.starts_with('/'));

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );

    // The upload form uses inline styles
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; \
             style-src 'self' 'unsafe-inline'; \
             object-src 'none'; \
             frame-ancestors 'self';",
        ),
    );

    // Uploaded files are arbitrary user content: never render them inline
    if is_download {
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment"),
        );
    }

    response
}
