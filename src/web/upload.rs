use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use tracing::debug;

use crate::constants::ALLOWED_CONTENT_TYPES;
use crate::error::PixtaleError;
use crate::storage::UploadedImage;

/// Multipart field names that carry the picture.
const FILE_FIELDS: [&str; 2] = ["image", "file"];

const MB: usize = 1024 * 1024;

/// Human-readable upload limit, e.g. `5MB`, `1.5MB` or `300KB`.
fn size_label(bytes: usize) -> String {
    if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= 1024 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{bytes} bytes")
    }
}

fn too_large(max_bytes: usize) -> PixtaleError {
    let limit = size_label(max_bytes);
    PixtaleError::BadRequest(format!("File too large. Max size is {limit}"))
}

fn multipart_error(err: &MultipartError, max_bytes: usize) -> PixtaleError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return too_large(max_bytes);
    }
    debug!("Multipart error: {}", err);
    PixtaleError::BadRequest(format!("Error uploading file: {}", err.body_text()))
}

/// Pulls the single image out of a multipart body, enforcing type and size.
pub(crate) async fn read_image_upload(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<UploadedImage, PixtaleError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(&err, max_bytes))?
    {
        let field_name = field.name().unwrap_or_default();
        if !FILE_FIELDS.contains(&field_name) {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(PixtaleError::BadRequest(
                "Only JPG and PNG image files are allowed".to_string(),
            ));
        }
        let original_name = field.file_name().map(str::to_string);

        let bytes = field
            .bytes()
            .await
            .map_err(|err| multipart_error(&err, max_bytes))?;
        if bytes.len() > max_bytes {
            return Err(too_large(max_bytes));
        }
        debug!(
            "Received upload {:?} ({}, {} bytes)",
            original_name,
            content_type,
            bytes.len()
        );
        return Ok(UploadedImage {
            bytes: bytes.to_vec(),
            original_name,
            content_type,
        });
    }
    Err(PixtaleError::BadRequest(
        "No image file provided".to_string(),
    ))
}
