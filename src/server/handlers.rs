//! HTTP request handlers for the study API.
//!
//! Handlers are thin: they parse path and query parameters, call the
//! [`StudyService`], and turn the result into a response. All error mapping
//! lives in the `IntoResponse` impl for [`StudyError`].

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::catalog::SliceDecoder;
use crate::error::StudyError;
use crate::export::{ExportFormat, ExportTarget};
use crate::index::{Annotation, StudyIndex, StudySummary, UploadedFile};
use crate::render::{
    requested_window, ImageFormat, ImageRequest, Orientation, ServiceStats, StudyService,
    TaskStatus, PREVIEW_CONTENT_TYPE,
};

/// Default Cache-Control max-age for image responses.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Header reporting whether an image came from an in-memory cache.
pub const CACHE_HIT_HEADER: &str = "x-cache-hit";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the study service.
pub struct AppState<D: SliceDecoder> {
    pub service: Arc<StudyService<D>>,

    /// Cache-Control max-age in seconds for image and slice responses
    pub cache_max_age: u32,
}

impl<D: SliceDecoder> AppState<D> {
    pub fn new(service: Arc<StudyService<D>>) -> Self {
        Self::with_cache_max_age(service, DEFAULT_CACHE_MAX_AGE)
    }

    pub fn with_cache_max_age(service: Arc<StudyService<D>>, cache_max_age: u32) -> Self {
        Self {
            service,
            cache_max_age,
        }
    }
}

impl<D: SliceDecoder> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters addressing a single image.
#[derive(Debug, Deserialize)]
pub struct ImagePathParams {
    pub study_id: String,
    pub series_key: String,
    pub image_key: String,
}

/// Path parameters addressing a series.
#[derive(Debug, Deserialize)]
pub struct SeriesPathParams {
    pub study_id: String,
    pub series_key: String,
}

/// Query parameters for image requests.
///
/// `preset` wins over `level`/`width`; either selects an uncached render.
#[derive(Debug, Default, Deserialize)]
pub struct ImageQueryParams {
    /// `original` or `preview` (default)
    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub preset: Option<String>,

    #[serde(default)]
    pub level: Option<f64>,

    #[serde(default)]
    pub width: Option<f64>,
}

impl ImageQueryParams {
    fn into_request(self, path: ImagePathParams) -> Result<ImageRequest, StudyError> {
        let format = match self.format.as_deref() {
            Some(format) => format.parse::<ImageFormat>()?,
            None => ImageFormat::default(),
        };
        let window = requested_window(self.preset.as_deref(), self.level, self.width)?;

        Ok(ImageRequest::preview(path.study_id, path.series_key, path.image_key)
            .with_format(format)
            .with_window(window))
    }
}

/// Query parameters for export requests.
#[derive(Debug, Default, Deserialize)]
pub struct ExportQueryParams {
    /// `original` (default), `preview` or `sequence`
    #[serde(default)]
    pub format: Option<String>,
}

impl ExportQueryParams {
    fn format(&self) -> Result<ExportFormat, StudyError> {
        match self.format.as_deref() {
            Some(format) => format.parse(),
            None => Ok(ExportFormat::Original),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response from the study list endpoint.
#[derive(Debug, Serialize)]
pub struct StudiesResponse {
    pub studies: Vec<StudySummary>,
}

/// Response for accepted ingestion work.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub study_id: String,
    pub task_id: String,
}

/// Response from the orientation info endpoint.
#[derive(Debug, Serialize)]
pub struct VolumeInfoResponse {
    pub study_id: String,
    pub orientation: Orientation,
    pub slice_count: usize,
}

/// Annotation of one image; `annotation` is null when none is set.
#[derive(Debug, Serialize)]
pub struct AnnotationResponse {
    pub series_key: String,
    pub image_key: String,
    pub annotation: Option<Annotation>,
}

// =============================================================================
// Error Mapping
// =============================================================================

fn error_kind(err: &StudyError) -> (StatusCode, &'static str) {
    match err {
        StudyError::StudyNotFound { .. }
        | StudyError::SeriesNotFound { .. }
        | StudyError::ImageNotFound { .. }
        | StudyError::ArtifactNotFound { .. }
        | StudyError::TaskNotFound { .. }
        | StudyError::NothingToExport { .. } => (StatusCode::NOT_FOUND, "not_found"),

        StudyError::InvalidStudyId { .. } => (StatusCode::BAD_REQUEST, "invalid_study_id"),
        StudyError::UnknownOrientation { .. } => (StatusCode::BAD_REQUEST, "invalid_orientation"),
        StudyError::SliceOutOfRange { .. } => (StatusCode::BAD_REQUEST, "slice_out_of_range"),
        StudyError::InvalidSliceIndex { .. } => (StatusCode::BAD_REQUEST, "invalid_slice_index"),
        StudyError::UnsupportedFormat { .. } => (StatusCode::BAD_REQUEST, "unsupported_format"),
        StudyError::InvalidWindow { .. } => (StatusCode::BAD_REQUEST, "invalid_window"),
        StudyError::InvalidUpload { .. } => (StatusCode::BAD_REQUEST, "invalid_upload"),

        StudyError::Decode(_) => (StatusCode::UNPROCESSABLE_ENTITY, "decode_error"),
        StudyError::NoDecodableSlices { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "no_decodable_slices")
        }

        StudyError::EncoderUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "encoder_unavailable")
        }

        StudyError::Encode { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
        StudyError::TaskFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "task_failed"),
        StudyError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
    }
}

/// Convert StudyError to an HTTP response.
///
/// 5xx are logged at ERROR, 404 at DEBUG, other 4xx at WARN.
impl IntoResponse for StudyError {
    fn into_response(self) -> Response {
        let (status, error_type) = error_kind(&self);
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Response Helpers
// =============================================================================

fn image_response(
    data: Bytes,
    content_type: &'static str,
    cache_hit: bool,
    cache_max_age: u32,
) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", cache_max_age),
            ),
            (
                header::HeaderName::from_static(CACHE_HIT_HEADER),
                cache_hit.to_string(),
            ),
        ],
        Body::from(data),
    )
        .into_response()
}

fn attachment_response(file_name: &str, content_type: &'static str, data: Bytes) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        Body::from(data),
    )
        .into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /stats`
pub async fn stats_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
) -> Json<ServiceStats> {
    Json(state.service.stats().await)
}

/// `GET /studies`
pub async fn list_studies_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
) -> Result<Json<StudiesResponse>, StudyError> {
    let studies = state.service.list_studies().await?;
    Ok(Json(StudiesResponse { studies }))
}

/// `POST /studies`
///
/// Multipart upload; every part with a file name becomes one study file.
/// Responds `202 Accepted` with the new study id and the ingestion task id.
pub async fn upload_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestResponse>), StudyError> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(invalid_upload)? {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field.bytes().await.map_err(invalid_upload)?;
        files.push(UploadedFile { name, data });
    }

    let (study_id, task_id) = state.service.create_study(files).await?;
    info!(study_id = %study_id, task_id = %task_id, "Study uploaded");

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse { study_id, task_id }),
    ))
}

fn invalid_upload(err: axum::extract::multipart::MultipartError) -> StudyError {
    StudyError::InvalidUpload {
        message: err.body_text(),
    }
}

/// `GET /studies/{study_id}`
pub async fn study_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path(study_id): Path<String>,
) -> Result<Json<StudyIndex>, StudyError> {
    let index = state.service.study(&study_id).await?;
    Ok(Json(StudyIndex::clone(&index)))
}

/// `DELETE /studies/{study_id}`
pub async fn delete_study_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path(study_id): Path<String>,
) -> Result<StatusCode, StudyError> {
    state.service.delete_study(&study_id).await?;
    info!(study_id = %study_id, "Study deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /studies/{study_id}/rebuild`
pub async fn rebuild_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path(study_id): Path<String>,
) -> Result<(StatusCode, Json<IngestResponse>), StudyError> {
    let task_id = state.service.start_rebuild(&study_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse { study_id, task_id }),
    ))
}

/// `GET /tasks/{task_id}`
pub async fn task_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatus>, StudyError> {
    Ok(Json(state.service.task(&task_id).await?))
}

/// `GET /studies/{study_id}/series/{series_key}/images/{image_key}`
///
/// # Query Parameters
///
/// - `format`: `preview` (default) or `original`
/// - `preset`: `bone`, `lung`, `brain` or `abdomen`
/// - `level`, `width`: explicit window, given together
///
/// # Headers
///
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Cache-Hit: true|false`
pub async fn image_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path(path): Path<ImagePathParams>,
    Query(query): Query<ImageQueryParams>,
) -> Result<Response, StudyError> {
    let request = query.into_request(path)?;
    let response = state.service.image(&request).await?;

    Ok(image_response(
        response.data,
        response.content_type,
        response.cache_hit,
        state.cache_max_age,
    ))
}

/// `GET /studies/{study_id}/series/{series_key}/images/{image_key}/annotation`
pub async fn get_annotation_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path(path): Path<ImagePathParams>,
) -> Result<Json<AnnotationResponse>, StudyError> {
    let annotation = state
        .service
        .annotation(&path.study_id, &path.series_key, &path.image_key)
        .await?;

    Ok(Json(AnnotationResponse {
        series_key: path.series_key,
        image_key: path.image_key,
        annotation,
    }))
}

/// `PUT /studies/{study_id}/series/{series_key}/images/{image_key}/annotation`
///
/// A `null` body clears the annotation.
pub async fn put_annotation_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path(path): Path<ImagePathParams>,
    Json(annotation): Json<Option<Annotation>>,
) -> Result<Json<AnnotationResponse>, StudyError> {
    let annotation = state
        .service
        .set_annotation(&path.study_id, &path.series_key, &path.image_key, annotation)
        .await?;

    Ok(Json(AnnotationResponse {
        series_key: path.series_key,
        image_key: path.image_key,
        annotation,
    }))
}

/// `GET /studies/{study_id}/volume/{orientation}`
pub async fn volume_info_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path((study_id, orientation)): Path<(String, String)>,
) -> Result<Json<VolumeInfoResponse>, StudyError> {
    let orientation: Orientation = orientation.parse()?;
    let slice_count = state
        .service
        .orientation_info(&study_id, orientation)
        .await?;

    Ok(Json(VolumeInfoResponse {
        study_id,
        orientation,
        slice_count,
    }))
}

/// `GET /studies/{study_id}/volume/{orientation}/{index}`
///
/// Index strings that are not non-negative integers are rejected with the
/// valid range for the orientation.
pub async fn volume_slice_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path((study_id, orientation, raw_index)): Path<(String, String, String)>,
) -> Result<Response, StudyError> {
    let orientation: Orientation = orientation.parse()?;
    let parsed = raw_index
        .strip_suffix(".jpg")
        .unwrap_or(&raw_index)
        .parse::<usize>();
    let Ok(index) = parsed else {
        let extent = state
            .service
            .orientation_info(&study_id, orientation)
            .await?;
        return Err(StudyError::InvalidSliceIndex {
            orientation: orientation.name(),
            index: raw_index,
            extent,
        });
    };

    let response = state
        .service
        .volume_slice(&study_id, orientation, index)
        .await?;

    Ok(image_response(
        response.data,
        PREVIEW_CONTENT_TYPE,
        response.cache_hit,
        state.cache_max_age,
    ))
}

/// `GET /studies/{study_id}/export`
pub async fn export_study_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path(study_id): Path<String>,
    Query(query): Query<ExportQueryParams>,
) -> Result<Response, StudyError> {
    export(&state, &study_id, ExportTarget::Study, &query).await
}

/// `GET /studies/{study_id}/series/{series_key}/export`
pub async fn export_series_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path(path): Path<SeriesPathParams>,
    Query(query): Query<ExportQueryParams>,
) -> Result<Response, StudyError> {
    let target = ExportTarget::Series {
        series_key: path.series_key,
    };
    export(&state, &path.study_id, target, &query).await
}

/// `GET /studies/{study_id}/series/{series_key}/images/{image_key}/export`
pub async fn export_image_handler<D: SliceDecoder>(
    State(state): State<AppState<D>>,
    Path(path): Path<ImagePathParams>,
    Query(query): Query<ExportQueryParams>,
) -> Result<Response, StudyError> {
    let target = ExportTarget::Image {
        series_key: path.series_key,
        image_key: path.image_key,
    };
    export(&state, &path.study_id, target, &query).await
}

async fn export<D: SliceDecoder>(
    state: &AppState<D>,
    study_id: &str,
    target: ExportTarget,
    query: &ExportQueryParams,
) -> Result<Response, StudyError> {
    let format = query.format()?;
    let bundle = state.service.export(study_id, target, format).await?;
    Ok(attachment_response(
        &bundle.file_name,
        bundle.content_type,
        bundle.data,
    ))
}

// =============================================================================
// Tests
// =============================================================================
