//! Upload validation: allowed extensions and the size limit.

use crate::error::{Result, ServiceError};

pub const ALLOWED_EXTENSIONS: [&str; 3] = [".txt", ".pdf", ".docx"];

/// Check the filename has a supported extension (case-insensitive).
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(ServiceError::FileValidation(
            "Uploaded file has no filename".to_string(),
        ));
    }
    let lower = filename.to_lowercase();
    if !ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return Err(ServiceError::FileValidation(format!(
            "Only {} files are supported",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    Ok(())
}

/// Running byte counter for a streamed upload.
#[derive(Debug, Clone, Copy)]
pub struct SizeLimit {
    max_bytes: usize,
    seen: usize,
}

impl SizeLimit {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes, seen: 0 }
    }

    /// Account for `len` more bytes, failing once the total exceeds the limit.
    pub fn add(&mut self, len: usize) -> Result<()> {
        self.seen = self.seen.saturating_add(len);
        if self.seen > self.max_bytes {
            return Err(size_error(self.max_bytes));
        }
        Ok(())
    }
}

pub fn size_error(max_bytes: usize) -> ServiceError {
    ServiceError::FileValidation(format!(
        "File size exceeds {} MB limit",
        max_bytes / (1024 * 1024)
    ))
}
