/**
 * Upload Routes
 * Thumbnail image uploads for the content manager. Files land on local disk
 * under uploads/thumbnails/ and are served back via the /uploads static
 * mount, so the returned URL is usable as-is in a thumbnail field.
 */
use axum::{
    extract::{Multipart, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::routes::auth::require_admin;
use crate::routes::ErrorResponse;

const UPLOAD_DIR: &str = "uploads/thumbnails";
const MAX_FILE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub filename: String,
    pub size: usize,
    pub mime_type: String,
}

/// Sniff the real image type from the leading bytes. The declared extension
/// alone is not trusted.
fn validate_image_magic_bytes(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    match bytes {
        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        // GIF: 47 49 46 38
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        // WebP: RIFF....WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn is_safe_filename(filename: &str) -> bool {
    // Reject path traversal and separator characters
    !filename.is_empty()
        && !filename.contains("..")
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains('\0')
}

/// POST /api/uploads - Store a thumbnail image (auth)
pub async fn upload_thumbnail(headers: HeaderMap, mut multipart: Multipart) -> impl IntoResponse {
    if let Err(err_response) = require_admin(&headers) {
        return err_response.into_response();
    }

    let upload_path = PathBuf::from(UPLOAD_DIR);
    if let Err(e) = tokio::fs::create_dir_all(&upload_path).await {
        tracing::error!("Failed to create upload directory: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::with_message(
                "Failed to initialize upload directory",
                "Check that the uploads directory exists and is writable.",
            )),
        )
            .into_response();
    }

    let field = match multipart.next_field().await {
        Ok(Some(field)) => field,
        Ok(None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("No file provided")),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!("Multipart error: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Invalid multipart data")),
            )
                .into_response();
        }
    };

    let original_name = field.file_name().unwrap_or("unknown").to_string();
    let original_ext = original_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_lowercase();

    if !ALLOWED_EXTENSIONS.contains(&original_ext.as_str()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "Unsupported file type. Allowed: JPEG, PNG, WebP, GIF.",
            )),
        )
            .into_response();
    }

    let bytes = match field.bytes().await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("Failed to read upload bytes: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Failed to read file data")),
            )
                .into_response();
        }
    };

    if bytes.len() > MAX_FILE_SIZE {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("File too large. Maximum size is 5MB.")),
        )
            .into_response();
    }

    if bytes.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Empty file")),
        )
            .into_response();
    }

    let mime_type = match validate_image_magic_bytes(&bytes) {
        Some(mime) => mime,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "File content does not match an allowed image type.",
                )),
            )
                .into_response();
        }
    };

    let filename = format!("{}.{}", Uuid::new_v4(), extension_for_mime(mime_type));
    let file_path = upload_path.join(&filename);

    if let Err(e) = tokio::fs::write(&file_path, &bytes).await {
        tracing::error!("Failed to write upload file: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::with_message(
                "Failed to save file",
                "Check that the uploads directory is writable.",
            )),
        )
            .into_response();
    }

    tracing::info!("Thumbnail uploaded: {} ({} bytes)", filename, bytes.len());

    (
        StatusCode::CREATED,
        Json(UploadResponse {
            url: format!("/uploads/thumbnails/{}", filename),
            filename,
            size: bytes.len(),
            mime_type: mime_type.to_string(),
        }),
    )
        .into_response()
}

/// DELETE /api/uploads/:filename - Remove a stored thumbnail (auth)
pub async fn delete_thumbnail(headers: HeaderMap, Path(filename): Path<String>) -> impl IntoResponse {
    if let Err(err_response) = require_admin(&headers) {
        return err_response.into_response();
    }

    if !is_safe_filename(&filename) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invalid filename")),
        )
            .into_response();
    }

    let file_path = PathBuf::from(UPLOAD_DIR).join(&filename);

    if !file_path.exists() {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("File not found")),
        )
            .into_response();
    }

    if let Err(e) = tokio::fs::remove_file(&file_path).await {
        tracing::error!("Failed to delete file {}: {}", filename, e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to delete file")),
        )
            .into_response();
    }

    tracing::info!("Thumbnail deleted: {}", filename);
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::auth::create_access_token;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    fn multipart_body(boundary: &str, filename: &str, mime: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"{filename}\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    async fn post_upload(boundary: &str, body: Vec<u8>) -> axum::response::Response {
        let token = create_access_token("some-profile", "admin@example.com", true).unwrap();
        let app = Router::new().route("/api/uploads", post(upload_thumbnail));
        let req = Request::post("/api/uploads")
            .header("authorization", format!("Bearer {}", token))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        app.oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn test_upload_rejects_oversized_jpeg() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.resize(6 * 1024 * 1024, 0);
        let body = multipart_body("XBOUNDARY", "big.jpg", "image/jpeg", &jpeg);
        let res = post_upload("XBOUNDARY", body).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_accepts_png_and_returns_url() {
        let mut png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        png.resize(2048, 0);
        let body = multipart_body("XBOUNDARY", "thumb.png", "image/png", &png);
        let res = post_upload("XBOUNDARY", body).await;
        assert_eq!(res.status(), StatusCode::CREATED);

        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let parsed: UploadResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!parsed.url.is_empty());
        assert!(parsed.url.starts_with("/uploads/thumbnails/"));
        assert_eq!(parsed.mime_type, "image/png");

        let _ = std::fs::remove_file(PathBuf::from(UPLOAD_DIR).join(&parsed.filename));
    }

    #[tokio::test]
    async fn test_upload_requires_auth() {
        let app = Router::new().route("/api/uploads", post(upload_thumbnail));
        let body = multipart_body("XBOUNDARY", "thumb.png", "image/png", &[0x89, 0x50]);
        let req = Request::post("/api/uploads")
            .header(
                "content-type",
                "multipart/form-data; boundary=XBOUNDARY".to_string(),
            )
            .body(Body::from(body))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_magic_bytes_jpeg() {
        let bytes = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        assert_eq!(validate_image_magic_bytes(&bytes), Some("image/jpeg"));
    }

    #[test]
    fn test_magic_bytes_png() {
        let bytes = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(validate_image_magic_bytes(&bytes), Some("image/png"));
    }

    #[test]
    fn test_magic_bytes_gif() {
        let bytes = [0x47, 0x49, 0x46, 0x38, 0x39, 0x61];
        assert_eq!(validate_image_magic_bytes(&bytes), Some("image/gif"));
    }

    #[test]
    fn test_magic_bytes_webp() {
        let mut bytes = vec![0x52, 0x49, 0x46, 0x46, 0x24, 0x00, 0x00, 0x00];
        bytes.extend_from_slice(&[0x57, 0x45, 0x42, 0x50]);
        assert_eq!(validate_image_magic_bytes(&bytes), Some("image/webp"));
    }

    #[test]
    fn test_magic_bytes_rejects_disguised_payload() {
        // A script renamed to .png still fails the content sniff.
        let bytes = b"<?php echo 'not an image'; ?>";
        assert_eq!(validate_image_magic_bytes(bytes), None);
    }

    #[test]
    fn test_magic_bytes_rejects_truncated_input() {
        assert_eq!(validate_image_magic_bytes(&[0xFF, 0xD8]), None);
        assert_eq!(validate_image_magic_bytes(&[]), None);
    }

    #[test]
    fn test_is_safe_filename() {
        assert!(is_safe_filename("abc-123.png"));
        assert!(!is_safe_filename("../etc/passwd"));
        assert!(!is_safe_filename("a/b.png"));
        assert!(!is_safe_filename("a\\b.png"));
        assert!(!is_safe_filename(""));
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("image/webp"), "webp");
        assert_eq!(extension_for_mime("application/zip"), "bin");
    }
}
