pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::RelayConfig;
use crate::models::UploadOutcome;
use crate::services::broadcast::SessionRegistry;
use crate::services::upload_store::UploadStore;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_file,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::upload::UploadForm,
            api::handlers::upload::UploadResponse,
            api::handlers::health::HealthResponse,
            models::ClientResult,
        )
    ),
    tags(
        (name = "upload", description = "File upload into the OCR pipeline"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub uploads: mpsc::UnboundedSender<UploadOutcome>,
    pub sessions: SessionRegistry,
    pub store: Arc<UploadStore>,
    pub config: RelayConfig,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        uploads: mpsc::UnboundedSender<UploadOutcome>,
        sessions: SessionRegistry,
        config: RelayConfig,
    ) -> Self {
        Self {
            uploads,
            sessions,
            store: Arc::new(UploadStore::new(config.upload_dir.clone())),
            config,
            started_at: Utc::now(),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.config.body_limit());

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/upload", post(api::handlers::upload::upload_file))
        .route("/ws", get(api::handlers::ws::ws_handler))
        .route("/health", get(api::handlers::health::health_check))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(body_limit)
        .layer(cors)
        .with_state(state)
}
