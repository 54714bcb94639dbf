use crate::AppState;
use crate::services::notification::{ModelRequest, model_request_id, render_model_request_email};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::Local;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ModelRequestResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ModelRequestResponse {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
            request_id: None,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/request-model",
    request_body = ModelRequest,
    responses(
        (status = 200, description = "Administrator notified", body = ModelRequestResponse),
        (status = 400, description = "Malformed request body", body = ModelRequestResponse),
        (status = 500, description = "Notification failed", body = ModelRequestResponse)
    ),
    tag = "models"
)]
pub async fn request_model(
    State(state): State<AppState>,
    payload: Result<Json<ModelRequest>, JsonRejection>,
) -> (StatusCode, Json<ModelRequestResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!("Rejected model request: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(ModelRequestResponse::failed(format!(
                    "Invalid request body: {}",
                    rejection.body_text()
                ))),
            );
        }
    };

    let now = Local::now();
    let request_id = model_request_id(now);
    let body = render_model_request_email(&request, &request_id, now);
    let admin = &state.config.mail.admin_email;

    match state.notifier.notify(&request.subject(), admin, &body).await {
        Ok(()) => {
            tracing::info!("📨 Model request {} forwarded to {}", request_id, admin);
            (
                StatusCode::OK,
                Json(ModelRequestResponse {
                    success: true,
                    message: "Request submitted successfully".to_string(),
                    request_id: Some(request_id),
                }),
            )
        }
        Err(e) => {
            tracing::error!("Model request {} not delivered: {}", request_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ModelRequestResponse::failed(format!(
                    "Failed to send request: {}",
                    e
                ))),
            )
        }
    }
}
