use crate::AppState;
use crate::api::error::AppError;
use crate::services::cleanup;
use crate::services::staging::{StagedArtifact, StagingError};
use crate::services::transfer::ManifestOutcome;
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

/// Multipart body of a fine-tune upload.
#[allow(dead_code)]
#[derive(Deserialize, ToSchema)]
pub struct FineTuneUpload {
    /// Training dataset
    #[schema(format = Binary)]
    pub file: String,
    pub model: Option<String>,
    /// Defaults to "full"
    pub tuning: Option<String>,
    /// Defaults to "0.001"
    #[serde(rename = "learningRate")]
    pub learning_rate: Option<String>,
    /// Defaults to "10"
    pub epoch: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FineTuneDetails {
    pub model: String,
    pub tuning: String,
    pub learning_rate: String,
    pub epoch: String,
}

impl Default for FineTuneDetails {
    fn default() -> Self {
        Self {
            model: String::new(),
            tuning: "full".to_string(),
            learning_rate: "0.001".to_string(),
            epoch: "10".to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct FineTuneResponse {
    pub success: bool,
    pub message: String,
    pub cleanup_success: bool,
    pub manifest_updated: bool,
    pub remote_path: String,
    pub details: FineTuneDetails,
}

#[derive(Default)]
struct FineTuneForm {
    staged: Option<StagedArtifact>,
    details: FineTuneDetails,
}

#[utoipa::path(
    post,
    path = "/AutomateFineTune",
    request_body(content = FineTuneUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Dataset delivered to the cluster", body = FineTuneResponse),
        (status = 400, description = "No file in the request"),
        (status = 500, description = "Staging or cluster upload failed")
    ),
    tag = "finetune"
)]
pub async fn automate_fine_tune(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<FineTuneResponse>, AppError> {
    fine_tune(state, multipart).await
}

#[utoipa::path(
    post,
    path = "/ManualFineTune",
    request_body(content = FineTuneUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Dataset delivered to the cluster", body = FineTuneResponse),
        (status = 400, description = "No file in the request"),
        (status = 500, description = "Staging or cluster upload failed")
    ),
    tag = "finetune"
)]
pub async fn manual_fine_tune(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<FineTuneResponse>, AppError> {
    fine_tune(state, multipart).await
}

async fn fine_tune(
    state: AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<FineTuneResponse>, AppError> {
    let mut multipart = multipart.map_err(|e| {
        tracing::debug!("Not a multipart upload: {}", e.body_text());
        StagingError::NoFileProvided
    })?;
    let mut form = FineTuneForm::default();

    if let Err(e) = read_form(&state, &mut multipart, &mut form).await {
        if let Some(staged) = form.staged.take() {
            cleanup::remove(&staged.local_path).await;
        }
        return Err(e);
    }

    let staged = form.staged.ok_or(StagingError::NoFileProvided)?;
    let details = form.details;
    tracing::info!(
        "🎯 Fine-tune request: model={:?} tuning={} learning_rate={} epoch={}",
        details.model,
        details.tuning,
        details.learning_rate,
        details.epoch
    );

    let delivery = state.pipeline.deliver_dataset(staged).await;
    let report = delivery
        .transfer
        .map_err(|e| AppError::upload_failed(&e))?;

    Ok(Json(FineTuneResponse {
        success: true,
        message: "File uploaded and processed successfully".to_string(),
        cleanup_success: delivery.cleanup_success,
        manifest_updated: report.manifest == ManifestOutcome::Updated,
        remote_path: report.remote_path,
        details,
    }))
}

async fn read_form(
    state: &AppState,
    multipart: &mut Multipart,
    form: &mut FineTuneForm,
) -> Result<(), AppError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        let err_msg = e.to_string();
        if err_msg.contains("length limit exceeded") {
            AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
        } else {
            AppError::BadRequest(err_msg)
        }
    })? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" if form.staged.is_some() => {
                tracing::debug!("Ignoring additional file part");
            }
            "file" => {
                let original_filename = match field.file_name() {
                    None => return Err(StagingError::NoFileProvided.into()),
                    Some("") => return Err(StagingError::EmptyFilename.into()),
                    Some(name) => name.to_string(),
                };
                tracing::info!("📥 Receiving dataset: {}", original_filename);

                let reader = StreamReader::new(field.map_err(std::io::Error::other));
                form.staged = Some(
                    state
                        .pipeline
                        .staging()
                        .stage(reader, &original_filename)
                        .await?,
                );
            }
            _ => {
                let slot = match name.as_str() {
                    "model" => &mut form.details.model,
                    "tuning" => &mut form.details.tuning,
                    "learningRate" => &mut form.details.learning_rate,
                    "epoch" => &mut form.details.epoch,
                    _ => continue,
                };
                *slot = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
            }
        }
    }
    Ok(())
}
