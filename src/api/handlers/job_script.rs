use crate::AppState;
use crate::api::error::AppError;
use crate::services::pipeline::JobScriptParams;
use axum::{
    Form, Json,
    extract::{FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobScriptResponse {
    pub message: String,
    pub script_path: String,
    pub port: u16,
}

#[utoipa::path(
    post,
    path = "/UploadJobScript",
    request_body(content = JobScriptParams, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Job script deployed", body = JobScriptResponse),
        (status = 400, description = "Invalid job parameters"),
        (status = 500, description = "No free port or deployment failed")
    ),
    tag = "jobs"
)]
pub async fn upload_job_script(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<JobScriptResponse>, AppError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let params = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        params_from_multipart(multipart).await?
    } else if content_type.is_empty() {
        JobScriptParams::default()
    } else {
        let Form(params) = Form::<JobScriptParams>::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        params
    };

    tracing::info!(
        "🧾 Job script request: nodes={} gpus={} memory={} time={}",
        params.nodes,
        params.gpus,
        params.memory,
        params.time
    );

    let deployed = state.pipeline.deploy_job_script(&params).await?;

    Ok(Json(JobScriptResponse {
        message: "Script uploaded successfully".to_string(),
        script_path: deployed.remote_path,
        port: deployed.port,
    }))
}

async fn params_from_multipart(mut multipart: Multipart) -> Result<JobScriptParams, AppError> {
    let mut params = JobScriptParams::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let slot = match name.as_str() {
            "memory" => &mut params.memory,
            "gpus" => &mut params.gpus,
            "time" => &mut params.time,
            "nodes" => &mut params.nodes,
            _ => continue,
        };
        *slot = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
    }
    Ok(params)
}
