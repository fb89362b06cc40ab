//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   /studies, /studies/{id}/series/{s}/images/{i}, /volume, ...   │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (requests, error mapping)│  │ (router, CORS, tracing)     │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └────────────────────────────────┬────────────────────────────────┘
//!                                  │
//!                                  ▼
//!                           StudyService
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, AnnotationResponse, AppState, ErrorResponse, ExportQueryParams,
    HealthResponse, ImagePathParams, ImageQueryParams, IngestResponse, SeriesPathParams,
    StudiesResponse, VolumeInfoResponse, CACHE_HIT_HEADER, DEFAULT_CACHE_MAX_AGE,
};
pub use routes::{create_router, RouterConfig, DEFAULT_MAX_UPLOAD_BYTES};
