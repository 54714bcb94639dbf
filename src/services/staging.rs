use crate::services::cleanup;
use crate::utils::validation::{MAX_FILENAME_LEN, sanitize_filename};
use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Timestamp prefix of staged file names (second granularity).
pub const STAGED_NAME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Length of `{YYYYMMDD_HHMMSS}_`.
const STAGED_PREFIX_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("No file part in request")]
    NoFileProvided,

    #[error("No selected file")]
    EmptyFilename,

    #[error("{0}")]
    WriteFailed(String),
}

/// An uploaded file persisted under the staging directory.
///
/// The file is deleted when the artifact is dropped, so an abandoned request cannot
/// leave it behind. Call [`cleanup::remove`] first when the outcome must be reported.
#[derive(Debug)]
pub struct StagedArtifact {
    pub local_path: PathBuf,
    /// Sanitized client file name.
    pub original_name: String,
    /// `{timestamp}_{original_name}`, also the remote file name.
    pub staged_name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Local>,
    _guard: TempPath,
}

pub struct StagingStore {
    root: PathBuf,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the staging directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// Streams `reader` into a new staged file named after `original_name`.
    pub async fn stage<R>(
        &self,
        mut reader: R,
        original_name: &str,
    ) -> Result<StagedArtifact, StagingError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let sanitized =
            sanitize_filename(original_name, MAX_FILENAME_LEN - STAGED_PREFIX_LEN)
                .ok_or(StagingError::EmptyFilename)?;
        let created_at = Local::now();
        let staged_name = staged_file_name(&sanitized, created_at);
        let local_path = self.root.join(&staged_name);

        let mut file = self.create_new(&local_path).await?;
        let guard = TempPath::from_path(local_path.clone());
        let copied = tokio::io::copy(&mut reader, &mut file).await;
        let flushed = match copied {
            Ok(_) => file.sync_all().await,
            Err(e) => Err(e),
        };
        drop(file);

        if let Err(e) = flushed {
            tracing::error!("Failed to write staged file {}: {}", local_path.display(), e);
            cleanup::remove(&local_path).await;
            return Err(StagingError::WriteFailed(e.to_string()));
        }

        self.verify(local_path, guard, sanitized, staged_name, created_at)
            .await
    }

    /// Stages an in-memory payload, such as a rendered job script.
    pub async fn stage_bytes(
        &self,
        contents: &[u8],
        original_name: &str,
    ) -> Result<StagedArtifact, StagingError> {
        self.stage(contents, original_name).await
    }

    async fn create_new(&self, local_path: &Path) -> Result<fs::File, StagingError> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(local_path)
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    tracing::warn!(
                        "Staged name collision (same-second upload): {}",
                        local_path.display()
                    );
                    StagingError::WriteFailed(format!(
                        "staged file already exists: {}",
                        local_path.display()
                    ))
                } else {
                    tracing::error!(
                        "Failed to create staged file {}: {}",
                        local_path.display(),
                        e
                    );
                    StagingError::WriteFailed(e.to_string())
                }
            })
    }

    async fn verify(
        &self,
        local_path: PathBuf,
        guard: TempPath,
        original_name: String,
        staged_name: String,
        created_at: DateTime<Local>,
    ) -> Result<StagedArtifact, StagingError> {
        let size_bytes = match fs::metadata(&local_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                tracing::error!("Staged file missing after write {}: {}", local_path.display(), e);
                return Err(StagingError::WriteFailed("Failed to save file".to_string()));
            }
        };

        if size_bytes == 0 {
            tracing::error!("Staged file is empty: {}", local_path.display());
            cleanup::remove(&local_path).await;
            return Err(StagingError::WriteFailed("uploaded file is empty".to_string()));
        }

        tracing::info!(
            "📦 File saved to temporary location: {}, Size: {} bytes",
            local_path.display(),
            size_bytes
        );

        Ok(StagedArtifact {
            local_path,
            original_name,
            staged_name,
            size_bytes,
            created_at,
            _guard: guard,
        })
    }
}

/// `{YYYYMMDD_HHMMSS}_{name}`.
pub fn staged_file_name(sanitized: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", at.format(STAGED_NAME_FORMAT), sanitized)
}
