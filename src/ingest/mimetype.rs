use std::path::Path;
use anyhow::{Result, Context};

const COVER_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn detect_mimetype(path: &Path) -> Result<String> {
    let kind = infer::get_from_path(path)
        .context("Failed to read file for mimetype detection")?;

    match kind {
        Some(k) => Ok(k.mime_type().to_string()),
        None => Ok("application/octet-stream".to_string()),
    }
}

/// A usable cover: a jpg/jpeg/png file name whose content sniffs as an image.
pub fn is_cover_candidate(path: &Path) -> bool {
    let has_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| COVER_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    if !has_extension {
        return false;
    }
    match detect_mimetype(path) {
        Ok(mime) => mime.starts_with("image/"),
        Err(_) => false,
    }
}
