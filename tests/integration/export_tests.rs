//! Export tests: archive layout, sequence encoding and failure modes.

use std::io::Cursor;

use axum::http::StatusCode;
use image::AnimationDecoder;

use study_streamer::ServiceOptions;

use super::test_utils::{get, router_for, zip_entries, TestData};

#[tokio::test]
async fn test_study_original_export() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    data.series("s", "S2", 1);
    data.corrupt("s", "S1/zz_corrupt.dcm");

    let response = get(&data.router(), "/studies/s/export?format=original").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), "application/zip");
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"s_original.zip\""
    );

    assert_eq!(
        zip_entries(&response.body),
        vec!["S1/slice_000.dcm", "S1/slice_001.dcm", "S2/slice_000.dcm"]
    );
}

#[tokio::test]
async fn test_export_defaults_to_original() {
    let data = TestData::new();
    data.series("s", "S1", 1);

    let response = get(&data.router(), "/studies/s/export").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(zip_entries(&response.body), vec!["S1/slice_000.dcm"]);
}

#[tokio::test]
async fn test_series_preview_export() {
    let data = TestData::new();
    data.series("s", "S1", 3);
    data.series("s", "S2", 1);

    let response = get(&data.router(), "/studies/s/series/S1/export?format=preview").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response
        .header("content-disposition")
        .starts_with("attachment;"));

    assert_eq!(
        zip_entries(&response.body),
        vec![
            "S1/0000_S1.1.jpg",
            "S1/0001_S1.2.jpg",
            "S1/0002_S1.3.jpg"
        ]
    );
}

#[tokio::test]
async fn test_image_export() {
    let data = TestData::new();
    data.series("s", "S1", 2);

    let response = get(
        &data.router(),
        "/studies/s/series/S1/images/S1.2/export?format=preview",
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(zip_entries(&response.body), vec!["S1/0001_S1.2.jpg"]);
}

#[tokio::test]
async fn test_sequence_export() {
    let data = TestData::new();
    data.series("s", "S1", 4);

    let response = get(&data.router(), "/studies/s/series/S1/export?format=sequence").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), "image/gif");
    assert!(response.header("content-disposition").ends_with(".gif\""));

    let decoder =
        image::codecs::gif::GifDecoder::new(Cursor::new(response.body.to_vec())).unwrap();
    let frames = decoder.into_frames().collect_frames().unwrap();
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0].buffer().dimensions(), (6, 4));
}

#[tokio::test]
async fn test_sequence_export_disabled() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    let router = router_for(data.service_with(ServiceOptions {
        sequence_export: false,
        ..Default::default()
    }));

    let response = get(&router, "/studies/s/export?format=sequence").await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json()["error"], "encoder_unavailable");

    // Other formats are unaffected
    let response = get(&router, "/studies/s/export?format=preview").await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_unsupported_export_format() {
    let data = TestData::new();
    data.series("s", "S1", 1);

    let response = get(&data.router(), "/studies/s/export?format=mp4").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let message = response.json()["message"].as_str().unwrap().to_string();
    assert!(message.contains("original, preview, sequence"), "{}", message);
}

#[tokio::test]
async fn test_export_with_missing_previews() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    let router = data.router();

    // Build the index, then remove every preview artifact
    assert_eq!(get(&router, "/studies/s").await.status, StatusCode::OK);
    std::fs::remove_dir_all(data.store.preview_dir("s")).unwrap();

    let response = get(&router, "/studies/s/export?format=preview").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = get(&router, "/studies/s/export?format=sequence").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_export_unknown_series() {
    let data = TestData::new();
    data.series("s", "S1", 1);

    let response = get(&data.router(), "/studies/s/series/S9/export").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
