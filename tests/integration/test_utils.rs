//! Test utilities for integration tests.
//!
//! Slices are small JSON documents with a `.dcm` extension, decoded by
//! [`FixtureDecoder`]. That keeps the scan, conversion, reconstruction and
//! export paths real while avoiding DICOM fixtures on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tower::ServiceExt;

use study_streamer::catalog::{PixelGrid, SliceDecoder, SliceHeader};
use study_streamer::error::DecodeError;
use study_streamer::{
    create_router, RouterConfig, ServiceOptions, StudyService, StudyStore, Window,
};

// =============================================================================
// Fixture Decoder
// =============================================================================

/// Contents of one fixture slice file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureSlice {
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub number: Option<i64>,
    pub rows: u32,
    pub columns: u32,

    /// Pixel `[r, c]` is `base + r * columns + c`
    #[serde(default)]
    pub base: f32,

    #[serde(default)]
    pub window: Option<[f64; 2]>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub patient: Option<String>,

    /// Header parses but pixel decoding fails
    #[serde(default)]
    pub broken_pixels: bool,
}

impl FixtureSlice {
    /// A 4x6 slice of `series` with instance `instance` at position `number`.
    pub fn new(series: &str, instance: &str, number: i64) -> Self {
        Self {
            series: Some(series.to_string()),
            instance: Some(instance.to_string()),
            number: Some(number),
            rows: 4,
            columns: 6,
            base: number as f32 * 10.0,
            patient: Some("DOE^JANE".to_string()),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, rows: u32, columns: u32) -> Self {
        self.rows = rows;
        self.columns = columns;
        self
    }

    pub fn with_broken_pixels(mut self) -> Self {
        self.broken_pixels = true;
        self
    }

    pub fn without_identity(mut self) -> Self {
        self.series = None;
        self.instance = None;
        self
    }
}

/// [`SliceDecoder`] over JSON fixture files.
pub struct FixtureDecoder;

impl FixtureDecoder {
    fn read(path: &Path) -> Result<FixtureSlice, DecodeError> {
        let text = std::fs::read_to_string(path).map_err(|e| DecodeError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| DecodeError::Dicom(e.to_string()))
    }
}

impl SliceDecoder for FixtureDecoder {
    fn read_header(&self, path: &Path) -> Result<SliceHeader, DecodeError> {
        let slice = Self::read(path)?;
        Ok(SliceHeader {
            series_uid: slice.series,
            instance_uid: slice.instance,
            instance_number: slice.number,
            pixel_spacing: Some([0.7, 0.7]),
            rows: Some(slice.rows),
            columns: Some(slice.columns),
            series_description: slice.description,
            patient_name: slice.patient,
            study_date: Some("20240101".to_string()),
            study_description: Some("CHEST CT".to_string()),
            window: slice.window.map(|[level, width]| Window::new(level, width)),
        })
    }

    fn read_pixels(&self, path: &Path) -> Result<PixelGrid, DecodeError> {
        let slice = Self::read(path)?;
        if slice.broken_pixels {
            return Err(DecodeError::UnsupportedPixelFormat(
                "fixture marked broken".to_string(),
            ));
        }
        let columns = slice.columns as usize;
        Ok(PixelGrid::from_shape_fn(
            (slice.rows as usize, columns),
            |(r, c)| slice.base + (r * columns + c) as f32,
        ))
    }
}

// =============================================================================
// Fixture Studies
// =============================================================================

/// A temporary data directory with fixture studies.
pub struct TestData {
    pub dir: TempDir,
    pub store: Arc<StudyStore>,
}

impl TestData {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StudyStore::new(dir.path()));
        std::fs::create_dir_all(store.studies_dir()).unwrap();
        Self { dir, store }
    }

    pub fn study_root(&self, study_id: &str) -> PathBuf {
        self.store.study_root(study_id)
    }

    /// Write a fixture slice at `relative_path` inside a study.
    pub fn slice(&self, study_id: &str, relative_path: &str, slice: &FixtureSlice) -> &Self {
        self.write(study_id, relative_path, &serde_json::to_vec(slice).unwrap())
    }

    /// Write a file that fails header parsing.
    pub fn corrupt(&self, study_id: &str, relative_path: &str) -> &Self {
        self.write(study_id, relative_path, b"\x00\x01 not a slice")
    }

    pub fn write(&self, study_id: &str, relative_path: &str, data: &[u8]) -> &Self {
        let path = self.study_root(study_id).join(relative_path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
        self
    }

    /// A study with one series of `count` 4x6 slices, written in reverse order.
    pub fn series(&self, study_id: &str, series: &str, count: i64) -> &Self {
        for number in (1..=count).rev() {
            self.slice(
                study_id,
                &format!("{}/slice_{:03}.dcm", series, count - number),
                &FixtureSlice::new(series, &format!("{}.{}", series, number), number),
            );
        }
        self
    }

    pub fn service(&self) -> Arc<StudyService<FixtureDecoder>> {
        self.service_with(ServiceOptions::default())
    }

    pub fn service_with(&self, options: ServiceOptions) -> Arc<StudyService<FixtureDecoder>> {
        Arc::new(StudyService::with_options(
            Arc::new(FixtureDecoder),
            Arc::clone(&self.store),
            options,
        ))
    }

    pub fn router(&self) -> Router {
        router_for(self.service())
    }
}

pub fn router_for(service: Arc<StudyService<FixtureDecoder>>) -> Router {
    create_router(service, RouterConfig::new().with_tracing(false))
}

// =============================================================================
// HTTP Helpers
// =============================================================================

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).unwrap().to_str().unwrap()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(router: &Router, uri: &str) -> TestResponse {
    send(
        router,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

pub async fn request(router: &Router, method: Method, uri: &str, json: Option<&str>) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match json {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    send(router, builder.body(body).unwrap()).await
}

/// Build a multipart/form-data upload body.
pub fn multipart_upload(files: &[(&str, Vec<u8>)]) -> Request<Body> {
    let boundary = "study-streamer-test-boundary";
    let mut body = Vec::new();
    for (name, data) in files {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/dicom\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/studies")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Poll a task until it reaches a terminal state and return its final status.
pub async fn wait_for_task(router: &Router, task_id: &str) -> serde_json::Value {
    for _ in 0..500 {
        let status = get(router, &format!("/tasks/{}", task_id)).await.json();
        if status["state"] == "completed" || status["state"] == "failed" {
            return status;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("task {} did not finish", task_id);
}

/// Check if data is a JPEG (SOI marker).
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

/// Decode a JPEG response and return its dimensions.
pub fn jpeg_dimensions(data: &[u8]) -> (u32, u32) {
    image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .unwrap()
        .to_luma8()
        .dimensions()
}

/// Entry names of a zip archive, sorted.
pub fn zip_entries(data: &[u8]) -> Vec<String> {
    let archive = zip::ZipArchive::new(std::io::Cursor::new(data.to_vec())).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}
