use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::error::FileServerError;

/// Name of the multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

#[derive(Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The file was written to this path.
    Stored(PathBuf),
    /// The request carried no file in its `file` field; nothing was written.
    Missing,
}

/// Reduce a client-supplied filename to its base name.
///
/// Both `/` and `\` count as separators since browsers on either family of
/// hosts may send full paths. Control characters are dropped.
pub fn upload_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let base: String = base.chars().filter(|c| !c.is_control()).collect();

    match base.as_str() {
        "" | "." | ".." => None,
        _ => Some(base),
    }
}

/// Store the `file` field of `multipart` into `target_dir`, streaming it to
/// disk chunk by chunk.
pub async fn accept(
    mut multipart: Multipart,
    target_dir: &Path,
    max_size: Option<u64>,
) -> Result<UploadOutcome, FileServerError> {
    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        error!("Multipart error: {}", e);
        FileServerError::Multipart(e.body_text())
    })? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        // Browsers send an empty filename when no file was chosen
        let raw_filename = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                debug!("Upload field {:?} carried no file", UPLOAD_FIELD);
                return Ok(UploadOutcome::Missing);
            }
        };
        let file_name = upload_file_name(&raw_filename).ok_or_else(|| {
            warn!("Rejected upload file name: {:?}", raw_filename);
            FileServerError::InvalidFileName(raw_filename.clone())
        })?;
        let dest = target_dir.join(&file_name);

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&dest).await?;

        let mut written: u64 = 0;
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read upload data for {:?}: {}", dest, e);
                    return Err(FileServerError::Multipart(e.body_text()));
                }
            };

            written += chunk.len() as u64;
            if let Some(limit) = max_size {
                if written > limit {
                    drop(file);
                    if let Err(e) = fs::remove_file(&dest).await {
                        warn!("Failed to remove oversized upload {:?}: {}", dest, e);
                    }
                    return Err(FileServerError::FileTooLarge {
                        size: written,
                        limit,
                    });
                }
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!("Stored upload {:?} ({} bytes)", dest, written);
        return Ok(UploadOutcome::Stored(dest));
    }

    Ok(UploadOutcome::Missing)
}
