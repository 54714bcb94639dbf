pub mod memory_remote;
pub mod ssh;

use crate::config::RemoteConfig;
use crate::services::transfer::RemoteConnector;
use std::sync::Arc;

/// Builds the remote backend named by `REMOTE_BACKEND`.
pub fn setup_remote(config: &RemoteConfig) -> Arc<dyn RemoteConnector> {
    match config.backend.to_lowercase().as_str() {
        "sftp" | "ssh" => Arc::new(ssh::SshConnector::new(config)),
        "memory" => {
            tracing::warn!("⚠️ Using in-memory remote backend, nothing reaches the cluster");
            Arc::new(memory_remote::InMemoryRemote::new())
        }
        other => {
            tracing::warn!("Unknown remote backend '{}', using sftp", other);
            Arc::new(ssh::SshConnector::new(config))
        }
    }
}
