pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::api::handlers;
use crate::api::middleware::{metrics::metrics_middleware, request_id::request_id_middleware};
use crate::config::GatewayConfig;
use crate::services::job_script::JobScriptGenerator;
use crate::services::notification::Notifier;
use crate::services::pipeline::FineTunePipeline;
use crate::services::staging::StagingStore;
use crate::services::transfer::{RemoteConnector, SecureTransferClient, TransferTarget};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::finetune::automate_fine_tune,
        handlers::finetune::manual_fine_tune,
        handlers::job_script::upload_job_script,
        handlers::model_request::request_model,
        handlers::health::health_check,
    ),
    components(
        schemas(
            handlers::finetune::FineTuneUpload,
            handlers::finetune::FineTuneResponse,
            handlers::finetune::FineTuneDetails,
            handlers::job_script::JobScriptResponse,
            handlers::model_request::ModelRequestResponse,
            handlers::health::HealthResponse,
            services::pipeline::JobScriptParams,
            services::notification::ModelRequest,
            services::notification::UserInfo,
        )
    ),
    tags(
        (name = "finetune", description = "Dataset delivery to the cluster"),
        (name = "jobs", description = "Batch job script generation"),
        (name = "models", description = "Model requests"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub pipeline: Arc<FineTunePipeline>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    /// Wires the pipeline from configuration and the chosen backends.
    pub fn new(
        config: GatewayConfig,
        connector: Arc<dyn RemoteConnector>,
        notifier: Arc<dyn Notifier>,
        cancel: CancellationToken,
    ) -> Self {
        let transfer = SecureTransferClient::new(
            connector,
            TransferTarget::from(&config.remote),
            config.timeouts,
        )
        .with_manifest_lock(config.manifest_lock)
        .with_cancellation(cancel);

        let pipeline = FineTunePipeline::new(
            Arc::new(StagingStore::new(config.staging_dir.clone())),
            transfer,
            JobScriptGenerator::new(config.job.clone()),
            config.remote.clone(),
        );

        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            notifier,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_size;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/AutomateFineTune", post(handlers::finetune::automate_fine_tune))
        .route("/ManualFineTune", post(handlers::finetune::manual_fine_tune))
        .route("/UploadJobScript", post(handlers::job_script::upload_job_script))
        .route("/api/request-model", post(handlers::model_request::request_model))
        .route("/health", get(handlers::health::health_check))
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    tracing::info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            "📤 Finished in {:?} with status {}",
                            latency,
                            response.status()
                        );
                    },
                ),
        )
        .layer(from_fn(request_id_middleware))
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
