//! Volume reconstruction tests: orientation info, slicing, bounds and caching.

use axum::http::StatusCode;

use super::test_utils::{get, is_valid_jpeg, jpeg_dimensions, FixtureSlice, TestData};

#[tokio::test]
async fn test_orientation_info() {
    let data = TestData::new();
    data.series("s", "S1", 5);
    let router = data.router();

    for (orientation, expected) in [("axial", 5), ("coronal", 4), ("sagittal", 6)] {
        let response = get(&router, &format!("/studies/s/volume/{}", orientation)).await;
        assert_eq!(response.status, StatusCode::OK);
        let body = response.json();
        assert_eq!(body["orientation"], orientation);
        assert_eq!(body["slice_count"], expected, "{}", orientation);
    }
}

#[tokio::test]
async fn test_orientation_is_case_insensitive() {
    let data = TestData::new();
    data.series("s", "S1", 2);

    let response = get(&data.router(), "/studies/s/volume/AXIAL").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["orientation"], "axial");
}

#[tokio::test]
async fn test_unknown_orientation() {
    let data = TestData::new();
    data.series("s", "S1", 2);

    let response = get(&data.router(), "/studies/s/volume/oblique/0").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let message = response.json()["message"].as_str().unwrap().to_string();
    assert!(message.contains("axial, coronal, sagittal"), "{}", message);
}

#[tokio::test]
async fn test_slice_dimensions_per_orientation() {
    let data = TestData::new();
    data.series("s", "S1", 5);
    let router = data.router();

    // Volume shape is [5, 4, 6]
    let axial = get(&router, "/studies/s/volume/axial/2").await;
    assert_eq!(axial.status, StatusCode::OK);
    assert_eq!(axial.header("content-type"), "image/jpeg");
    assert!(is_valid_jpeg(&axial.body));
    assert_eq!(jpeg_dimensions(&axial.body), (6, 4));

    let coronal = get(&router, "/studies/s/volume/coronal/3").await;
    assert_eq!(jpeg_dimensions(&coronal.body), (6, 5));

    let sagittal = get(&router, "/studies/s/volume/sagittal/5").await;
    assert_eq!(jpeg_dimensions(&sagittal.body), (4, 5));
}

#[tokio::test]
async fn test_slice_out_of_range_reports_valid_range() {
    let data = TestData::new();
    data.series("s", "S1", 3);
    let router = data.router();

    let response = get(&router, "/studies/s/volume/axial/3").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let body = response.json();
    assert_eq!(body["error"], "slice_out_of_range");
    assert!(body["message"].as_str().unwrap().contains("0-2"));

    let response = get(&router, "/studies/s/volume/sagittal/6").await;
    assert!(response.json()["message"]
        .as_str()
        .unwrap()
        .contains("0-5"));

    let response = get(&router, "/studies/s/volume/coronal/-1").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let body = response.json();
    assert_eq!(body["error"], "invalid_slice_index");
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("\"-1\""), "{}", message);
    assert!(message.contains("0-3"), "{}", message);
    assert!(!message.contains(&usize::MAX.to_string()), "{}", message);
}

#[tokio::test]
async fn test_volume_slices_are_cached() {
    let data = TestData::new();
    data.series("s", "S1", 3);
    let service = data.service();
    let router = super::test_utils::router_for(service.clone());

    let first = get(&router, "/studies/s/volume/coronal/1").await;
    assert_eq!(first.header("x-cache-hit"), "false");
    assert!(first.header("cache-control").starts_with("public, max-age="));

    let second = get(&router, "/studies/s/volume/coronal/1").await;
    assert_eq!(second.header("x-cache-hit"), "true");
    assert_eq!(first.body, second.body);

    let stats = get(&router, "/stats").await.json();
    assert_eq!(stats["volume_cache"]["entries"], 1);
    assert_eq!(stats["reconstruction_permits"], 2);
    assert_eq!(stats["reconstruction_permits_available"], 2);
}

#[tokio::test]
async fn test_mismatched_slices_are_skipped() {
    let data = TestData::new();
    data.series("s", "S1", 3);
    data.slice(
        "s",
        "S1/odd.dcm",
        &FixtureSlice::new("S1", "S1.9", 9).with_size(8, 8),
    );
    let router = data.router();

    let axial = get(&router, "/studies/s/volume/axial").await.json();
    assert_eq!(axial["slice_count"], 3);

    let coronal = get(&router, "/studies/s/volume/coronal/0").await;
    assert_eq!(coronal.status, StatusCode::OK);
    assert_eq!(jpeg_dimensions(&coronal.body), (6, 3));
}

#[tokio::test]
async fn test_primary_series_is_first_discovered() {
    let data = TestData::new();
    data.series("s", "A", 2);
    for n in 1..=4 {
        data.slice(
            "s",
            &format!("B/{}.dcm", n),
            &FixtureSlice::new("B", &format!("B.{}", n), n).with_size(2, 2),
        );
    }

    let response = get(&data.router(), "/studies/s/volume/axial").await;
    assert_eq!(response.json()["slice_count"], 2);
}

#[tokio::test]
async fn test_volume_for_missing_study() {
    let data = TestData::new();
    let response = get(&data.router(), "/studies/none/volume/axial/0").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
