use crate::config::RemoteConfig;
use crate::services::cleanup;
use crate::services::job_script::{
    JobScriptGenerator, JobScriptSpec, ParameterError, script_file_name,
};
use crate::services::manifest::{ManifestEntry, ManifestUpdate};
use crate::services::port_allocator::{AllocationError, find_free_port};
use crate::services::staging::{StagedArtifact, StagingError, StagingStore};
use crate::services::transfer::{SecureTransferClient, TransferError, TransferReport};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

/// Permission bits applied to deployed job scripts.
pub const SCRIPT_MODE: u32 = 0o755;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("Failed to save job script: {0}")]
    Staging(#[from] StagingError),

    #[error("Failed to deploy job script: {0}")]
    Transfer(#[from] TransferError),
}

/// Outcome of pushing one staged dataset. Cleanup is reported even when the transfer fails.
#[derive(Debug)]
pub struct DatasetDelivery {
    pub transfer: Result<TransferReport, TransferError>,
    pub cleanup_success: bool,
}

/// Raw job-script form fields.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct JobScriptParams {
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_gpus")]
    pub gpus: String,
    #[serde(default = "default_time")]
    pub time: String,
    #[serde(default = "default_nodes")]
    pub nodes: String,
}

fn default_memory() -> String {
    "16".to_string()
}

fn default_gpus() -> String {
    "1".to_string()
}

fn default_time() -> String {
    "00:30:00".to_string()
}

fn default_nodes() -> String {
    "1".to_string()
}

impl Default for JobScriptParams {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            gpus: default_gpus(),
            time: default_time(),
            nodes: default_nodes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedScript {
    pub remote_path: String,
    pub port: u16,
}

/// Stage, push and clean up: the two upload workflows.
pub struct FineTunePipeline {
    staging: Arc<StagingStore>,
    transfer: SecureTransferClient,
    generator: JobScriptGenerator,
    remote: RemoteConfig,
}

impl FineTunePipeline {
    pub fn new(
        staging: Arc<StagingStore>,
        transfer: SecureTransferClient,
        generator: JobScriptGenerator,
        remote: RemoteConfig,
    ) -> Self {
        Self {
            staging,
            transfer,
            generator,
            remote,
        }
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    pub fn remote_backend(&self) -> &'static str {
        self.transfer.backend_name()
    }

    /// Pushes a staged dataset into the dataset directory and registers it in the manifest.
    pub async fn deliver_dataset(&self, staged: StagedArtifact) -> DatasetDelivery {
        let remote_path = remote_join(&self.remote.dataset_dir, &staged.staged_name);
        let update = ManifestUpdate {
            manifest_path: self.remote.manifest_path.clone(),
            entry: ManifestEntry::for_upload(&staged.original_name, &staged.staged_name),
        };

        let transfer = self
            .transfer
            .transfer(&staged.local_path, &remote_path, Some(&update))
            .await;

        let cleanup_success = cleanup::remove(&staged.local_path).await;

        DatasetDelivery {
            transfer,
            cleanup_success,
        }
    }

    /// Renders a job script on a free port and deploys it as an executable.
    pub async fn deploy_job_script(
        &self,
        params: &JobScriptParams,
    ) -> Result<DeployedScript, PipelineError> {
        let (start, end) = self.generator.port_range();
        let port = find_free_port(start, end)?;
        let spec = JobScriptSpec::from_form(
            &params.nodes,
            &params.memory,
            &params.gpus,
            &params.time,
            port,
        )?;

        let script = self.generator.render(&spec);
        let file_name = script_file_name(spec.generated_at);
        let staged = self
            .staging
            .stage_bytes(script.as_bytes(), &file_name)
            .await?;

        let remote_path = remote_join(&self.remote.script_dir, &file_name);
        let deployed = self
            .transfer
            .deploy_executable(&staged.local_path, &remote_path, SCRIPT_MODE)
            .await;

        cleanup::remove(&staged.local_path).await;

        let remote_path = deployed?;
        tracing::info!("🚀 Job script ready at {} on port {}", remote_path, port);
        Ok(DeployedScript { remote_path, port })
    }
}

/// Joins a remote POSIX directory and a file name.
pub fn remote_join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}
