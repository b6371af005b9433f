use anyhow::Context;
use std::path::Path;

use crate::core::error::PipelineError;
use crate::core::state::{ContentKind, SourceContent};
use crate::utils::data_uri;

const DOCUMENT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

pub fn content_kind_for(mime_type: &str) -> Option<ContentKind> {
    if mime_type == "text/plain" {
        Some(ContentKind::Text)
    } else if mime_type.starts_with("image/") {
        Some(ContentKind::Image)
    } else if DOCUMENT_MIME_TYPES.contains(&mime_type) {
        Some(ContentKind::Document)
    } else {
        None
    }
}

/// Turns raw upload bytes into a [`SourceContent`].
pub fn normalize(name: &str, mime_type: &str, bytes: &[u8]) -> Result<SourceContent, PipelineError> {
    let kind = content_kind_for(mime_type).ok_or_else(|| PipelineError::UnsupportedMediaType {
        mime_type: mime_type.to_string(),
    })?;

    match kind {
        ContentKind::Text => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| PipelineError::InvalidSource(format!("{} is not valid UTF-8: {}", name, e)))?;
            Ok(SourceContent::text(name, text))
        }
        ContentKind::Image | ContentKind::Document => SourceContent::new(
            name,
            data_uri::encode(mime_type, bytes),
            kind,
            Some(mime_type.to_string()),
        ),
    }
}

/// MIME type for the file extensions the upload flow accepts.
pub fn mime_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" => "text/plain",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => return None,
    };
    Some(mime)
}

/// Reads a file from disk and normalizes it.
pub async fn load_file(path: &Path) -> Result<SourceContent, PipelineError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let mime_type = mime_type_for_path(path).ok_or_else(|| PipelineError::UnsupportedMediaType {
        mime_type: path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| "unknown".to_string()),
    })?;

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    normalize(&name, mime_type, &bytes)
}
