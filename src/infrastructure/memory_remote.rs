use crate::services::transfer::{
    ExecOutput, RemoteConnector, RemoteSession, TransferError, TransferTarget,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Injected fault for the in-memory backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Authentication,
    Connect,
    Put,
    Read,
    Write,
    Exec,
    /// `put_file` never completes.
    HangOnPut,
}

#[derive(Debug, Default)]
struct RemoteState {
    files: HashMap<String, Vec<u8>>,
    commands: Vec<String>,
    connect_count: usize,
    open_sessions: usize,
    failure: Option<FailureMode>,
}

/// Remote cluster kept entirely in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, contents: &[u8]) -> Self {
        self.state().files.insert(path.to_string(), contents.to_vec());
        self
    }

    pub fn fail_with(&self, mode: FailureMode) {
        self.state().failure = Some(mode);
    }

    pub fn clear_failure(&self) {
        self.state().failure = None;
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().files.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state().connect_count
    }

    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RemoteConnector for InMemoryRemote {
    async fn connect(
        &self,
        target: &TransferTarget,
    ) -> Result<Box<dyn RemoteSession>, TransferError> {
        let mut state = self.state();
        state.connect_count += 1;
        match state.failure {
            Some(FailureMode::Authentication) => {
                return Err(TransferError::AuthenticationFailed(format!(
                    "public key rejected for {}",
                    target.username
                )));
            }
            Some(FailureMode::Connect) => {
                return Err(TransferError::ConnectFailed(format!(
                    "{}:{} unreachable",
                    target.remote_host, target.remote_port
                )));
            }
            _ => {}
        }
        state.open_sessions += 1;
        drop(state);

        Ok(Box::new(MemorySession {
            remote: self.clone(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemorySession {
    remote: InMemoryRemote,
}

impl MemorySession {
    fn failure(&self) -> Option<FailureMode> {
        self.remote.state().failure
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<u64, TransferError> {
        match self.failure() {
            Some(FailureMode::Put) => {
                return Err(TransferError::TransferFailed(format!(
                    "{}: permission denied",
                    remote_path
                )));
            }
            Some(FailureMode::HangOnPut) => std::future::pending::<()>().await,
            _ => {}
        }

        let contents = tokio::fs::read(local_path)
            .await
            .map_err(|_| TransferError::LocalFileNotFound(local_path.to_path_buf()))?;
        let bytes = contents.len() as u64;
        self.remote
            .state()
            .files
            .insert(remote_path.to_string(), contents);
        Ok(bytes)
    }

    async fn read_file(&self, remote_path: &str) -> Result<Option<Vec<u8>>, TransferError> {
        if self.failure() == Some(FailureMode::Read) {
            return Err(TransferError::TransferFailed(format!(
                "{}: permission denied",
                remote_path
            )));
        }
        Ok(self.remote.file(remote_path))
    }

    async fn write_file(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransferError> {
        if self.failure() == Some(FailureMode::Write) {
            return Err(TransferError::TransferFailed(format!(
                "{}: permission denied",
                remote_path
            )));
        }
        self.remote
            .state()
            .files
            .insert(remote_path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, TransferError> {
        self.remote.state().commands.push(command.to_string());
        if self.failure() == Some(FailureMode::Exec) {
            return Ok(ExecOutput {
                exit_code: 1,
                stdout: Vec::new(),
                stderr: b"Operation not permitted\n".to_vec(),
            });
        }
        Ok(ExecOutput::default())
    }

    async fn close(self: Box<Self>) {
        let mut state = self.remote.state();
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}
