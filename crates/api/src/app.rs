use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use domain::services::{BroadcastStatusNotifier, ExportQueryService, ExportRequestHandler};
use shared::jwt::{JwtConfig, JwtError};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id, ExportRateLimiterState};
use crate::routes::{exports, health};
use crate::services::ExportPipeline;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` with the in-memory backend.
    pub pool: Option<PgPool>,
    pub jwt: Arc<JwtConfig>,
    pub requests: ExportRequestHandler,
    pub queries: ExportQueryService,
    pub notifier: Arc<BroadcastStatusNotifier>,
    pub export_rate_limiter: Option<Arc<ExportRateLimiterState>>,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: Option<PgPool>,
        pipeline: &ExportPipeline,
    ) -> Result<Self, JwtError> {
        let jwt = config.jwt.build()?;
        let export_rate_limiter =
            ExportRateLimiterState::new(config.security.export_rate_limit_per_hour).map(Arc::new);

        Ok(Self {
            config: Arc::new(config),
            pool,
            jwt: Arc::new(jwt),
            requests: pipeline.request_handler(),
            queries: pipeline.query_service(),
            notifier: pipeline.notifier.clone(),
            export_rate_limiter,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Export routes authenticate through the UserAuth extractor.
    let export_routes = Router::new()
        .route(
            "/api/v1/inventory/export/jobs",
            get(exports::list_export_jobs),
        )
        .route(
            "/api/v1/inventory/export/status/:job_id",
            get(exports::get_export_status),
        )
        .route(
            "/api/v1/inventory/export/status/:job_id/events",
            get(exports::stream_export_events),
        )
        .route(
            "/api/v1/inventory/export/download/:job_id",
            get(exports::download_export),
        )
        .route(
            "/api/v1/inventory/export/:category",
            post(exports::initiate_export),
        );

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(export_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
