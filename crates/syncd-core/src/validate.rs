// SPDX-License-Identifier: Apache-2.0
//! Path & content validator.

use crate::error::AppError;

/// Maximum path length in characters.
pub const MAX_PATH_LEN: usize = 1000;
/// Maximum stored-content size in bytes (UTF-8 byte length of the stored
/// representation — plaintext for text files, base64 for binary ones).
pub const MAX_CONTENT_BYTES: usize = 10 * 1024 * 1024;

/// Extensions that classify a file as binary.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "ico", "svg", "tiff", "tif", "pdf", "doc", "docx",
    "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "zip", "rar", "7z", "tar", "gz", "bz2",
    "xz", "mp3", "wav", "ogg", "flac", "aac", "wma", "m4a", "mp4", "avi", "mkv", "mov", "wmv",
    "flv", "webm", "exe", "dll", "so", "dylib", "bin", "ttf", "otf", "woff", "woff2", "eot", "db",
    "sqlite", "sqlite3",
];

/// Validate a path against the path grammar: 1–1000 characters, excluding
/// `<`, `>`, `:`, `"`, `|`, `?`, `*`, and control characters (0x00–0x1F).
pub fn validate_path(path: &str) -> Result<(), AppError> {
    if path.is_empty() || path.chars().count() > MAX_PATH_LEN {
        return Err(AppError::Validation(format!(
            "path must be 1-{MAX_PATH_LEN} characters"
        )));
    }
    if path.chars().any(|c| matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') || (c as u32) <= 0x1f)
    {
        return Err(AppError::Validation(
            "path contains a forbidden character".to_string(),
        ));
    }
    Ok(())
}

/// Validate stored-content size: at most 10 MiB, measured as UTF-8 byte
/// length of the stored representation (uniformly — never string length).
pub fn validate_content_size(content: &str) -> Result<(), AppError> {
    if content.len() > MAX_CONTENT_BYTES {
        return Err(AppError::Validation(format!(
            "content exceeds {MAX_CONTENT_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Extract the lowercase extension (without leading dot) from the final
/// path segment, or `None` for an absent/dotfile/trailing-dot extension.
#[must_use]
pub fn extract_extension(path: &str) -> Option<String> {
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    let dot_index = last_segment.rfind('.')?;
    if dot_index == 0 {
        // Dotfile like `.gitignore` — no extension.
        return None;
    }
    let suffix = &last_segment[dot_index + 1..];
    if suffix.is_empty() {
        return None;
    }
    Some(suffix.to_lowercase())
}

/// Whether `extension` (already lowercased, no leading dot) is a member
/// of the binary-extension set.
#[must_use]
pub fn is_binary_extension(extension: Option<&str>) -> bool {
    extension.is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext))
}

/// Derive `(extension, is_binary)` from a path. Never accepted
/// from clients — always recomputed server-side.
#[must_use]
pub fn derive_metadata(path: &str) -> (Option<String>, bool) {
    let extension = extract_extension(path);
    let is_binary = is_binary_extension(extension.as_deref());
    (extension, is_binary)
}
