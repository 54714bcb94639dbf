use std::io::ErrorKind;
use std::path::Path;

/// Removes a staged file.
///
/// Returns `true` only when a file existed and was deleted. A missing file or any OS
/// failure yields `false`; failures are logged and never propagated.
pub async fn remove(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!("🧹 Removed staged file: {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("Staged file already gone: {}", path.display());
            false
        }
        Err(e) => {
            tracing::error!("Failed to remove staged file {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20250101_000000_data.json");
        tokio::fs::write(&path, b"{}").await.unwrap();

        assert!(remove(&path).await);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove(&dir.path().join("never-staged.json")).await);
    }

    #[tokio::test]
    async fn test_remove_directory_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        tokio::fs::create_dir(&nested).await.unwrap();

        assert!(!remove(&nested).await);
        assert!(nested.exists());
    }
}
