//! Router configuration for the study API.
//!
//! # Route Structure
//!
//! ```text
//! /health                                              - Health check
//! /stats                                               - Cache statistics
//! /studies                                             - List (GET) / upload (POST)
//! /studies/{study_id}                                  - Detail (GET) / delete (DELETE)
//! /studies/{study_id}/rebuild                          - Background rebuild (POST)
//! /studies/{study_id}/export                           - Export study
//! /studies/{study_id}/volume/{orientation}             - Slice count
//! /studies/{study_id}/volume/{orientation}/{index}     - Reconstructed slice
//! /studies/{study_id}/series/{series_key}/export       - Export series
//! /studies/{study_id}/series/{series_key}/images/{image_key}[/annotation|/export]
//! /tasks/{task_id}                                     - Ingestion progress
//! ```

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    delete_study_handler, export_image_handler, export_series_handler, export_study_handler,
    get_annotation_handler, health_handler, image_handler, list_studies_handler,
    put_annotation_handler, rebuild_handler, stats_handler, study_handler, task_handler,
    upload_handler, volume_info_handler, volume_slice_handler, AppState, DEFAULT_CACHE_MAX_AGE,
};
use crate::catalog::SliceDecoder;
use crate::render::StudyService;

/// Default upload body limit (1 GiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Maximum request body size for uploads
    pub max_upload_bytes: usize,

    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Any CORS origin, 1 hour max-age, 1 GiB uploads, tracing on.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router around a shared study service.
pub fn create_router<D: SliceDecoder>(
    service: std::sync::Arc<StudyService<D>>,
    config: RouterConfig,
) -> Router {
    let app_state = AppState::with_cache_max_age(service, config.cache_max_age);
    let cors = build_cors_layer(&config);

    let image = "/studies/{study_id}/series/{series_key}/images/{image_key}";

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler::<D>))
        .route(
            "/studies",
            get(list_studies_handler::<D>).post(upload_handler::<D>),
        )
        .route(
            "/studies/{study_id}",
            get(study_handler::<D>).delete(delete_study_handler::<D>),
        )
        .route("/studies/{study_id}/rebuild", post(rebuild_handler::<D>))
        .route("/studies/{study_id}/export", get(export_study_handler::<D>))
        .route(
            "/studies/{study_id}/volume/{orientation}",
            get(volume_info_handler::<D>),
        )
        .route(
            "/studies/{study_id}/volume/{orientation}/{index}",
            get(volume_slice_handler::<D>),
        )
        .route(
            "/studies/{study_id}/series/{series_key}/export",
            get(export_series_handler::<D>),
        )
        .route(image, get(image_handler::<D>))
        .route(
            &format!("{}/annotation", image),
            get(get_annotation_handler::<D>).put(put_annotation_handler::<D>),
        )
        .route(
            &format!("{}/export", image),
            get(export_image_handler::<D>),
        )
        .route("/tasks/{task_id}", get(task_handler::<D>))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
