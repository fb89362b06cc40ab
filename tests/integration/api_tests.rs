//! API integration tests for studies, images, annotations and ingestion tasks.

use axum::http::{Method, StatusCode};

use super::test_utils::{
    get, is_valid_jpeg, multipart_upload, request, send, wait_for_task, FixtureSlice, TestData,
};

// =============================================================================
// Health / Listing
// =============================================================================

#[tokio::test]
async fn test_health() {
    let data = TestData::new();
    let response = get(&data.router(), "/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "healthy");
}

#[tokio::test]
async fn test_list_flags_unindexed_studies() {
    let data = TestData::new();
    data.series("alpha", "S1", 3);
    data.series("beta", "S1", 2);
    let router = data.router();

    let listing = get(&router, "/studies").await.json();
    let studies = listing["studies"].as_array().unwrap();
    assert_eq!(studies.len(), 2);
    assert_eq!(studies[0]["study_id"], "alpha");
    assert_eq!(studies[0]["indexed"], false);
    assert_eq!(studies[0]["patient_name"], "Unknown");

    // Detail access builds the index
    assert_eq!(get(&router, "/studies/alpha").await.status, StatusCode::OK);

    let listing = get(&router, "/studies").await.json();
    let alpha = &listing["studies"][0];
    assert_eq!(alpha["indexed"], true);
    assert_eq!(alpha["image_count"], 3);
    assert_eq!(alpha["patient_name"], "DOE^JANE");
    assert_eq!(listing["studies"][1]["indexed"], false);
}

// =============================================================================
// Study Detail
// =============================================================================

#[tokio::test]
async fn test_study_detail_orders_images() {
    let data = TestData::new();
    data.series("s", "S1", 4);
    data.corrupt("s", "S1/garbage.dcm");
    data.write("s", "notes.txt", b"not a slice");

    let response = get(&data.router(), "/studies/s").await;
    assert_eq!(response.status, StatusCode::OK);

    let index = response.json();
    assert_eq!(index["study_id"], "s");
    assert_eq!(index["study_date"], "20240101");
    assert_eq!(index["description"], "CHEST CT");

    let images = index["series"][0]["images"].as_array().unwrap();
    let orders: Vec<i64> = images
        .iter()
        .map(|i| i["order_index"].as_i64().unwrap())
        .collect();
    assert_eq!(orders, vec![1, 2, 3, 4]);
    assert_eq!(images[0]["image_key"], "S1.1");
    assert_eq!(images[0]["rows"], 4);
    assert_eq!(images[0]["columns"], 6);
}

#[tokio::test]
async fn test_study_not_found() {
    let data = TestData::new();
    let response = get(&data.router(), "/studies/missing").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let body = response.json();
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_invalid_study_id() {
    let data = TestData::new();
    let response = get(&data.router(), "/studies/bad$id").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_study_id");
}

#[tokio::test]
async fn test_study_without_decodable_slices() {
    let data = TestData::new();
    data.corrupt("s", "a.dcm");
    data.corrupt("s", "b.dcm");

    let response = get(&data.router(), "/studies/s").await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json()["error"], "no_decodable_slices");
}

// =============================================================================
// Images
// =============================================================================

#[tokio::test]
async fn test_preview_image() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    let router = data.router();

    let response = get(&router, "/studies/s/series/S1/images/S1.2").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), "image/jpeg");
    assert_eq!(response.header("cache-control"), "public, max-age=3600");
    // Ingestion already published the preview
    assert_eq!(response.header("x-cache-hit"), "true");
    assert!(is_valid_jpeg(&response.body));

    let again = get(&router, "/studies/s/series/S1/images/S1.2?format=preview").await;
    assert_eq!(again.body, response.body);
}

#[tokio::test]
async fn test_preview_after_cache_clear_reads_artifact() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    let service = data.service();
    let router = super::test_utils::router_for(service.clone());

    let first = get(&router, "/studies/s/series/S1/images/S1.1").await;
    service.preview_cache().clear().await;

    let second = get(&router, "/studies/s/series/S1/images/S1.1").await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header("x-cache-hit"), "false");
    assert_eq!(second.body, first.body);

    let third = get(&router, "/studies/s/series/S1/images/S1.1").await;
    assert_eq!(third.header("x-cache-hit"), "true");
}

#[tokio::test]
async fn test_windowed_image_is_not_cached() {
    let data = TestData::new();
    data.series("s", "S1", 1);
    let router = data.router();

    let preset = get(&router, "/studies/s/series/S1/images/S1.1?preset=bone").await;
    assert_eq!(preset.status, StatusCode::OK);
    assert_eq!(preset.header("x-cache-hit"), "false");
    assert!(is_valid_jpeg(&preset.body));

    let custom = get(&router, "/studies/s/series/S1/images/S1.1?level=15&width=4").await;
    assert_eq!(custom.status, StatusCode::OK);
    assert_eq!(custom.header("x-cache-hit"), "false");

    let default = get(&router, "/studies/s/series/S1/images/S1.1").await;
    assert_ne!(default.body, custom.body);
}

#[tokio::test]
async fn test_invalid_window_parameters() {
    let data = TestData::new();
    data.series("s", "S1", 1);
    let router = data.router();

    let response = get(&router, "/studies/s/series/S1/images/S1.1?preset=liver").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = get(&router, "/studies/s/series/S1/images/S1.1?level=40").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_window");
}

#[tokio::test]
async fn test_original_image() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    let original = std::fs::read(data.study_root("s").join("S1/slice_000.dcm")).unwrap();

    // slice_000 holds the highest instance number
    let response = get(&data.router(), "/studies/s/series/S1/images/S1.2?format=original").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), "application/dicom");
    assert_eq!(response.body.as_ref(), original.as_slice());
}

#[tokio::test]
async fn test_unsupported_image_format() {
    let data = TestData::new();
    data.series("s", "S1", 1);

    let response = get(&data.router(), "/studies/s/series/S1/images/S1.1?format=png").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let message = response.json()["message"].as_str().unwrap().to_string();
    assert!(message.contains("original, preview"), "{}", message);
}

#[tokio::test]
async fn test_missing_series_and_image() {
    let data = TestData::new();
    data.series("s", "S1", 1);
    let router = data.router();

    let response = get(&router, "/studies/s/series/S9/images/S1.1").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = get(&router, "/studies/s/series/S1/images/nope").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pixel_failures_are_excluded() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    data.slice(
        "s",
        "S1/broken.dcm",
        &FixtureSlice::new("S1", "S1.9", 9).with_broken_pixels(),
    );
    let router = data.router();

    let index = get(&router, "/studies/s").await.json();
    assert_eq!(index["series"][0]["images"].as_array().unwrap().len(), 2);

    let response = get(&router, "/studies/s/series/S1/images/S1.9").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Annotations
// =============================================================================

#[tokio::test]
async fn test_annotation_round_trip() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    let router = data.router();
    let uri = "/studies/s/series/S1/images/S1.1/annotation";

    let empty = get(&router, uri).await;
    assert_eq!(empty.status, StatusCode::OK);
    assert!(empty.json()["annotation"].is_null());

    let body = r#"{"label": "nodule", "note": "8mm", "points": [[1.0, 2.0]]}"#;
    let stored = request(&router, Method::PUT, uri, Some(body)).await;
    assert_eq!(stored.status, StatusCode::OK);
    assert_eq!(stored.json()["annotation"]["label"], "nodule");

    let fetched = get(&router, uri).await.json();
    assert_eq!(fetched["annotation"]["note"], "8mm");
    assert_eq!(fetched["annotation"]["points"][0][1], 2.0);

    let index = get(&router, "/studies/s").await.json();
    assert_eq!(index["annotations"]["S1"]["S1.1"]["label"], "nodule");

    let cleared = request(&router, Method::PUT, uri, Some("null")).await;
    assert!(cleared.json()["annotation"].is_null());
}

#[tokio::test]
async fn test_annotation_on_missing_image() {
    let data = TestData::new();
    data.series("s", "S1", 1);

    let response = request(
        &data.router(),
        Method::PUT,
        "/studies/s/series/S1/images/missing/annotation",
        Some(r#"{"label": "x"}"#),
    )
    .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rebuild_preserves_annotations() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    let router = data.router();

    request(
        &router,
        Method::PUT,
        "/studies/s/series/S1/images/S1.2/annotation",
        Some(r#"{"label": "keep"}"#),
    )
    .await;

    let accepted = request(&router, Method::POST, "/studies/s/rebuild", None).await;
    assert_eq!(accepted.status, StatusCode::ACCEPTED);
    let task_id = accepted.json()["task_id"].as_str().unwrap().to_string();

    let status = wait_for_task(&router, &task_id).await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["study_id"], "s");
    assert_eq!(status["completed"], 2);

    let fetched = get(&router, "/studies/s/series/S1/images/S1.2/annotation").await;
    assert_eq!(fetched.json()["annotation"]["label"], "keep");
}

// =============================================================================
// Upload / Tasks / Delete
// =============================================================================

#[tokio::test]
async fn test_upload_ingests_in_background() {
    let data = TestData::new();
    let router = data.router();

    let files: Vec<(String, Vec<u8>)> = (1..=3)
        .map(|n| {
            let slice = FixtureSlice::new("UP", &format!("UP.{}", n), n);
            (format!("{}.dcm", n), serde_json::to_vec(&slice).unwrap())
        })
        .collect();
    let parts: Vec<(&str, Vec<u8>)> = files
        .iter()
        .map(|(name, data)| (name.as_str(), data.clone()))
        .collect();

    let response = send(&router, multipart_upload(&parts)).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    let body = response.json();
    let study_id = body["study_id"].as_str().unwrap().to_string();
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let status = wait_for_task(&router, &task_id).await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["total"], 3);
    assert_eq!(status["failed"], 0);

    let index = get(&router, &format!("/studies/{}", study_id)).await.json();
    assert_eq!(index["series"][0]["series_key"], "UP");
    assert_eq!(index["series"][0]["images"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_upload_without_files() {
    let data = TestData::new();
    let response = send(&data.router(), multipart_upload(&[])).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_upload");
}

#[tokio::test]
async fn test_failed_ingestion_task() {
    let data = TestData::new();
    data.corrupt("s", "only.dcm");
    let router = data.router();

    let accepted = request(&router, Method::POST, "/studies/s/rebuild", None).await;
    let task_id = accepted.json()["task_id"].as_str().unwrap().to_string();

    let status = wait_for_task(&router, &task_id).await;
    assert_eq!(status["state"], "failed");
    assert!(status["message"]
        .as_str()
        .unwrap()
        .contains("No decodable slices"));
}

#[tokio::test]
async fn test_unknown_task() {
    let data = TestData::new();
    let response = get(&data.router(), "/tasks/does-not-exist").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rebuild_missing_study() {
    let data = TestData::new();
    let response = request(&data.router(), Method::POST, "/studies/nope/rebuild", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_study() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    let router = data.router();

    assert_eq!(get(&router, "/studies/s").await.status, StatusCode::OK);
    assert!(data.store.derived_dir("s").exists());

    let response = request(&router, Method::DELETE, "/studies/s", None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(!data.study_root("s").exists());
    assert!(!data.store.derived_dir("s").exists());

    assert_eq!(get(&router, "/studies/s").await.status, StatusCode::NOT_FOUND);
    let response = request(&router, Method::DELETE, "/studies/s", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
