//! Storage helpers for document content on disk.

use std::path::{Path, PathBuf};

/// Characters allowed to pass through filename sanitization.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Construct the storage path for document content.
///
/// Uses a two-level directory structure based on hash prefix for filesystem
/// efficiency: `{documents_dir}/{hash[0..2]}/{basename}-{hash[0..8]}.{ext}`
pub fn content_storage_path(
    documents_dir: &Path,
    content_hash: &str,
    basename: &str,
    extension: &str,
) -> PathBuf {
    let filename = format!(
        "{}-{}.{}",
        sanitize_filename(basename),
        &content_hash[..8],
        extension
    );
    documents_dir.join(&content_hash[..2]).join(filename)
}

/// Map MIME type to file extension.
pub fn mime_to_extension(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "application/json" => "json",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/tiff" => "tiff",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.oasis.opendocument.text" => "odt",
        _ => "bin",
    }
}

/// Split an original filename into (basename, extension), falling back to
/// the MIME-derived extension when the name has none.
pub fn filename_parts(original_name: &str, mime_type: &str) -> (String, String) {
    let path = Path::new(original_name);
    let basename = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document")
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| mime_to_extension(mime_type).to_string());
    (basename, extension)
}
