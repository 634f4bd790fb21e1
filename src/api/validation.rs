//! Upload validation: extension allowlist, content sniffing, size limits

use super::error::ApiError;

/// Extensions accepted by `POST /v1/upload`, with the MIME type each maps
/// to.
const ALLOWED_EXTENSIONS: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("pdf", "application/pdf"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
];

/// Validate the filename extension against the allowlist; returns the
/// canonical extension.
pub fn validate_extension(filename: &str) -> Result<&'static str, ApiError> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    ALLOWED_EXTENSIONS
        .iter()
        .find(|(allowed, _)| *allowed == extension)
        .map(|(allowed, _)| *allowed)
        .ok_or_else(|| {
            ApiError::UnsupportedMedia(format!(
                "file extension of '{filename}' is not allowed; accepted: .txt, .pdf, .docx"
            ))
        })
}

/// Sniff the content against the extension's expected magic numbers;
/// returns the MIME type to record. A mismatch is rejected so a renamed
/// binary cannot smuggle through the allowlist.
pub fn sniff_content(extension: &str, data: &[u8]) -> Result<&'static str, ApiError> {
    if data.is_empty() {
        return Err(ApiError::InvalidArgument("uploaded file is empty".into()));
    }

    let matches = match extension {
        "pdf" => data.starts_with(b"%PDF-"),
        // DOCX is a zip container.
        "docx" => data.starts_with(b"PK\x03\x04"),
        "txt" => std::str::from_utf8(data).is_ok_and(|text| !text.contains('\0')),
        _ => false,
    };
    if !matches {
        return Err(ApiError::UnsupportedMedia(format!(
            "file content does not match its .{extension} extension"
        )));
    }

    ALLOWED_EXTENSIONS
        .iter()
        .find(|(allowed, _)| *allowed == extension)
        .map(|(_, mime)| *mime)
        .ok_or_else(|| ApiError::UnsupportedMedia(format!("unknown extension {extension}")))
}

/// Per-file size limit.
pub fn validate_upload_size(len: usize, max_bytes: u64) -> Result<(), ApiError> {
    if len as u64 > max_bytes {
        return Err(ApiError::PayloadTooLarge(len));
    }
    Ok(())
}

/// Check the Content-Type a multipart part declared against the sniffed
/// MIME type. `application/octet-stream` is let through (generic clients
/// declare it for everything); anything else must agree with the content.
pub fn check_declared_mime(declared: &str, detected: &str) -> Result<(), ApiError> {
    let parsed: mime::Mime = declared
        .parse()
        .map_err(|_| ApiError::InvalidArgument(format!("invalid part Content-Type: {declared}")))?;
    if parsed == mime::APPLICATION_OCTET_STREAM {
        return Ok(());
    }
    if parsed.essence_str() != detected {
        return Err(ApiError::UnsupportedMedia(format!(
            "declared Content-Type {declared} does not match detected {detected}"
        )));
    }
    Ok(())
}
