//! Staging of uploaded media on disk.
//!
//! Multipart file fields are streamed chunk by chunk into the upload
//! directory rather than buffered in memory. The resulting
//! [`StagedUpload`] removes its file on drop until ownership is handed to
//! the executor with [`StagedUpload::into_path`], so a rejected or aborted
//! request never leaves media behind.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, AppResult};

/// Extension used when the client filename has none we can trust.
const DEFAULT_EXTENSION: &str = "mp4";

/// Longest extension accepted from a client filename.
const MAX_EXTENSION_LEN: usize = 8;

/// A media file written to the upload directory.
#[derive(Debug)]
pub struct StagedUpload {
    path: Option<PathBuf>,
    size_bytes: u64,
}

impl StagedUpload {
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Give up ownership of the file; the caller becomes responsible for
    /// deleting it.
    pub fn into_path(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            // A single blocking unlink; Drop cannot await.
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged upload");
            }
        }
    }
}

/// Stream a multipart file field into `dir`.
///
/// Client-side framing errors map to `400` (`413` past the body limit);
/// failures writing to disk map to [`AppError::Upload`]. A partially
/// written file is removed either way.
pub async fn stage_field(mut field: Field<'_>, dir: &Path) -> AppResult<StagedUpload> {
    let extension = extension_for(field.file_name());
    let path = dir.join(format!("media-{}.{extension}", uuid::Uuid::new_v4()));

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(AppError::Upload)?;

    // From here on the guard owns the file.
    let mut staged = StagedUpload {
        path: Some(path),
        size_bytes: 0,
    };

    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await.map_err(AppError::Upload)?;
        staged.size_bytes += chunk.len() as u64;
    }
    file.flush().await.map_err(AppError::Upload)?;

    Ok(staged)
}

/// Pick a safe file extension from the client-supplied filename.
fn extension_for(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
