use crate::config::{RemoteConfig, StageTimeouts};
use crate::services::manifest::{self, ManifestError, ManifestUpdate};
use crate::utils::path_lock::PathLocks;
use crate::utils::validation::sh_quote;
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("File not found: {}", .0.display())]
    LocalFileNotFound(PathBuf),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Remote command `{command}` exited with status {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: u32,
        stderr: String,
    },

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("{0} cancelled")]
    Cancelled(&'static str),
}

/// Where and as whom to connect. Built once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    pub remote_host: String,
    pub remote_port: u16,
    pub username: String,
    pub private_key_path: PathBuf,
}

impl From<&RemoteConfig> for TransferTarget {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            remote_host: config.host.clone(),
            remote_port: config.port,
            username: config.username.clone(),
            private_key_path: config.private_key_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: u32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// One authenticated connection with file access and command execution.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Uploads a whole local file, replacing any remote file. Returns bytes written.
    async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<u64, TransferError>;

    /// Reads a remote file; `Ok(None)` when it does not exist.
    async fn read_file(&self, remote_path: &str) -> Result<Option<Vec<u8>>, TransferError>;

    /// Creates or truncates a remote file with `contents`.
    async fn write_file(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransferError>;

    async fn exec(&self, command: &str) -> Result<ExecOutput, TransferError>;

    /// Tears the connection down. Errors while closing are logged by implementations.
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, target: &TransferTarget)
    -> Result<Box<dyn RemoteSession>, TransferError>;

    /// Short name reported by the health endpoint.
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOutcome {
    NotRequested,
    Updated,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TransferReport {
    pub remote_path: String,
    pub bytes: u64,
    pub manifest: ManifestOutcome,
}

pub struct SecureTransferClient {
    connector: Arc<dyn RemoteConnector>,
    target: TransferTarget,
    timeouts: StageTimeouts,
    manifest_locks: Option<PathLocks>,
    cancel: CancellationToken,
}

impl SecureTransferClient {
    pub fn new(
        connector: Arc<dyn RemoteConnector>,
        target: TransferTarget,
        timeouts: StageTimeouts,
    ) -> Self {
        Self {
            connector,
            target,
            timeouts,
            manifest_locks: Some(PathLocks::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Serialize manifest read-modify-write cycles per remote path (on by default).
    pub fn with_manifest_lock(mut self, enabled: bool) -> Self {
        self.manifest_locks = enabled.then(PathLocks::new);
        self
    }

    /// Abort in-flight stages when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.connector.backend_name()
    }

    pub fn target(&self) -> &TransferTarget {
        &self.target
    }

    /// Pushes `local_path` to `remote_path`, then merges `manifest` if given.
    ///
    /// A failed manifest merge is reported in the returned report, never as an error.
    #[tracing::instrument(
        name = "transfer",
        skip(self, manifest),
        fields(host = %self.target.remote_host, user = %self.target.username)
    )]
    pub async fn transfer(
        &self,
        local_path: &Path,
        remote_path: &str,
        manifest: Option<&ManifestUpdate>,
    ) -> Result<TransferReport, TransferError> {
        ensure_local_file(local_path).await?;
        let session = self.open_session().await?;

        let outcome = self
            .push_and_record(session.as_ref(), local_path, remote_path, manifest)
            .await;

        session.close().await;
        outcome
    }

    /// Pushes a script and marks it with `mode` over the same session.
    #[tracing::instrument(
        name = "deploy",
        skip(self),
        fields(host = %self.target.remote_host, user = %self.target.username)
    )]
    pub async fn deploy_executable(
        &self,
        local_path: &Path,
        remote_path: &str,
        mode: u32,
    ) -> Result<String, TransferError> {
        ensure_local_file(local_path).await?;
        let session = self.open_session().await?;

        let outcome = self
            .push_and_chmod(session.as_ref(), local_path, remote_path, mode)
            .await;

        session.close().await;
        outcome
    }

    async fn open_session(&self) -> Result<Box<dyn RemoteSession>, TransferError> {
        let session = self
            .guarded(
                "connect",
                self.timeouts.connect,
                self.connector.connect(&self.target),
            )
            .await
            .inspect_err(|e| tracing::error!("❌ Remote session failed: {}", e))?;
        tracing::debug!(
            "Connected to {}@{}:{}",
            self.target.username,
            self.target.remote_host,
            self.target.remote_port
        );
        Ok(session)
    }

    async fn push_and_record(
        &self,
        session: &dyn RemoteSession,
        local_path: &Path,
        remote_path: &str,
        manifest: Option<&ManifestUpdate>,
    ) -> Result<TransferReport, TransferError> {
        let bytes = self
            .guarded(
                "transfer",
                self.timeouts.transfer,
                session.put_file(local_path, remote_path),
            )
            .await
            .inspect_err(|e| tracing::error!("❌ Upload to {} failed: {}", remote_path, e))?;
        tracing::info!("📤 File uploaded to cluster: {} ({} bytes)", remote_path, bytes);

        let manifest = match manifest {
            None => ManifestOutcome::NotRequested,
            Some(update) => match self.update_manifest(session, update).await {
                Ok(()) => {
                    tracing::info!(
                        "📝 Updated {} with dataset: {}",
                        update.manifest_path,
                        update.entry.key
                    );
                    ManifestOutcome::Updated
                }
                Err(e) => {
                    tracing::warn!(
                        "Manifest update for {} failed (upload kept): {}",
                        update.manifest_path,
                        e
                    );
                    ManifestOutcome::Failed(e.to_string())
                }
            },
        };

        Ok(TransferReport {
            remote_path: remote_path.to_string(),
            bytes,
            manifest,
        })
    }

    async fn update_manifest(
        &self,
        session: &dyn RemoteSession,
        update: &ManifestUpdate,
    ) -> Result<(), ManifestError> {
        let guard = match &self.manifest_locks {
            Some(locks) => Some(locks.lock(&update.manifest_path).await),
            None => None,
        };
        let merged = self
            .guarded(
                "manifest",
                self.timeouts.manifest,
                manifest::merge_remote(session, &update.manifest_path, &update.entry),
            )
            .await;

        drop(guard);
        if let Some(locks) = &self.manifest_locks {
            locks.prune();
        }
        merged
    }

    async fn push_and_chmod(
        &self,
        session: &dyn RemoteSession,
        local_path: &Path,
        remote_path: &str,
        mode: u32,
    ) -> Result<String, TransferError> {
        self.guarded(
            "transfer",
            self.timeouts.transfer,
            session.put_file(local_path, remote_path),
        )
        .await?;

        let command = format!("chmod {:o} {}", mode, sh_quote(remote_path));
        let output = self
            .guarded("exec", self.timeouts.exec, session.exec(&command))
            .await?;
        if output.exit_code != 0 {
            return Err(TransferError::CommandFailed {
                command,
                exit_code: output.exit_code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::info!("📜 Deployed executable {} (mode {:o})", remote_path, mode);
        Ok(remote_path.to_string())
    }

    /// Runs one stage under its timeout and the shared cancellation token.
    async fn guarded<T, E, F>(&self, stage: &'static str, limit: Duration, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<TransferError>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled(stage).into()),
            res = tokio::time::timeout(limit, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(TransferError::Timeout { stage, after: limit }.into()),
            },
        }
    }
}

async fn ensure_local_file(local_path: &Path) -> Result<(), TransferError> {
    match tokio::fs::metadata(local_path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(TransferError::LocalFileNotFound(local_path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_remote::{FailureMode, InMemoryRemote};
    use crate::services::manifest::ManifestEntry;

    fn target() -> TransferTarget {
        TransferTarget {
            remote_host: "login.cluster.test".to_string(),
            remote_port: 22,
            username: "trainer".to_string(),
            private_key_path: PathBuf::from("/keys/id_rsa"),
        }
    }

    fn client(remote: &InMemoryRemote) -> SecureTransferClient {
        SecureTransferClient::new(Arc::new(remote.clone()), target(), StageTimeouts::default())
    }

    async fn local_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_local_file_fails_before_connecting() {
        let remote = InMemoryRemote::new();
        let err = client(&remote)
            .transfer(Path::new("/nope/data.json"), "/remote/data.json", None)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::LocalFileNotFound(_)));
        assert_eq!(remote.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_transfer_puts_file_and_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(dir.path(), "data.json", b"[1,2,3]").await;
        let remote = InMemoryRemote::new();

        let report = client(&remote)
            .transfer(&local, "/remote/data.json", None)
            .await
            .unwrap();

        assert_eq!(report.bytes, 7);
        assert_eq!(report.manifest, ManifestOutcome::NotRequested);
        assert_eq!(remote.file("/remote/data.json").unwrap(), b"[1,2,3]");
        assert_eq!(remote.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_failed_put_still_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(dir.path(), "data.json", b"[]").await;
        let remote = InMemoryRemote::new();
        remote.fail_with(FailureMode::Put);

        let err = client(&remote)
            .transfer(&local, "/remote/data.json", None)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::TransferFailed(_)));
        assert_eq!(remote.connect_count(), 1);
        assert_eq!(remote.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_rejected_key_is_authentication_failure() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(dir.path(), "data.json", b"[]").await;
        let remote = InMemoryRemote::new();
        remote.fail_with(FailureMode::Authentication);

        let err = client(&remote)
            .transfer(&local, "/remote/data.json", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_manifest_failure_does_not_fail_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(dir.path(), "data.json", b"[]").await;
        let remote = InMemoryRemote::new();
        remote.fail_with(FailureMode::Write);

        let update = ManifestUpdate {
            manifest_path: "/remote/dataset_info.json".to_string(),
            entry: ManifestEntry::new("data", "20250101_000000_data.json"),
        };
        let report = client(&remote)
            .transfer(&local, "/remote/20250101_000000_data.json", Some(&update))
            .await
            .unwrap();

        assert!(matches!(report.manifest, ManifestOutcome::Failed(_)));
        assert!(remote.file("/remote/20250101_000000_data.json").is_some());
        assert_eq!(remote.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_deploy_executable_runs_chmod() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(dir.path(), "job.sh", b"#!/bin/bash\n").await;
        let remote = InMemoryRemote::new();

        let path = client(&remote)
            .deploy_executable(&local, "/remote/scripts/job.sh", 0o755)
            .await
            .unwrap();

        assert_eq!(path, "/remote/scripts/job.sh");
        assert_eq!(remote.commands(), vec!["chmod 755 '/remote/scripts/job.sh'"]);
        assert_eq!(remote.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_deploy_reports_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(dir.path(), "job.sh", b"#!/bin/bash\n").await;
        let remote = InMemoryRemote::new();
        remote.fail_with(FailureMode::Exec);

        let err = client(&remote)
            .deploy_executable(&local, "/remote/scripts/job.sh", 0o755)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::CommandFailed { .. }));
        assert_eq!(remote.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_client_aborts_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(dir.path(), "data.json", b"[]").await;
        let remote = InMemoryRemote::new();
        remote.fail_with(FailureMode::HangOnPut);

        let token = CancellationToken::new();
        let client = client(&remote).with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let err = client
            .transfer(&local, "/remote/data.json", None)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, TransferError::Cancelled("transfer")));
        assert_eq!(remote.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_file(dir.path(), "data.json", b"[]").await;
        let remote = InMemoryRemote::new();
        remote.fail_with(FailureMode::HangOnPut);

        let timeouts = StageTimeouts {
            transfer: Duration::from_millis(50),
            ..StageTimeouts::default()
        };
        let client = SecureTransferClient::new(Arc::new(remote.clone()), target(), timeouts);

        let err = client
            .transfer(&local, "/remote/data.json", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout { stage: "transfer", .. }));
        assert_eq!(remote.open_sessions(), 0);
    }
}
