//! Ingestion tests driving the library API directly: scan resilience,
//! series grouping, idempotent conversion and progress reporting.

use std::sync::Arc;

use study_streamer::catalog::{fallback_key, SliceCatalog};
use study_streamer::render::{progress_channel, IngestState};
use study_streamer::{ServiceOptions, StudyError};

use super::test_utils::{FixtureDecoder, FixtureSlice, TestData};

#[test]
fn test_scan_skips_corrupt_files() {
    let data = TestData::new();
    for n in 1..=10 {
        data.slice(
            "s",
            &format!("{:02}.dcm", n),
            &FixtureSlice::new("S1", &format!("I{}", n), n),
        );
    }
    data.corrupt("s", "bad1.dcm");
    data.corrupt("s", "bad2.dicom");
    data.write("s", "readme.md", b"ignored");

    let outcome = SliceCatalog::new(Arc::new(FixtureDecoder)).scan("s", &data.study_root("s"));
    assert_eq!(outcome.slice_count(), 10);
    assert_eq!(outcome.skipped, 2);
    assert_eq!(outcome.series.len(), 1);
    assert_eq!(outcome.metadata.patient_name, "DOE^JANE");
}

#[test]
fn test_scan_orders_with_stable_ties() {
    let data = TestData::new();
    // Discovery order: a, b, c, d
    data.slice("s", "a.dcm", &FixtureSlice::new("S", "A", 3));
    data.slice("s", "b.dcm", &FixtureSlice::new("S", "B", 1));
    data.slice("s", "c.dcm", &FixtureSlice::new("S", "C", 1));
    data.slice("s", "d.dcm", &FixtureSlice::new("S", "D", 2));

    let outcome = SliceCatalog::new(Arc::new(FixtureDecoder)).scan("s", &data.study_root("s"));
    let keys: Vec<&str> = outcome.series[0]
        .slices
        .iter()
        .map(|s| s.image_key.as_str())
        .collect();
    assert_eq!(keys, vec!["B", "C", "D", "A"]);
}

#[test]
fn test_fallback_identity_is_path_qualified() {
    let data = TestData::new();
    let anonymous = FixtureSlice::new("ignored", "ignored", 1).without_identity();
    data.slice("s", "one/img.dcm", &anonymous);
    data.slice("s", "two/img.dcm", &anonymous);

    let outcome = SliceCatalog::new(Arc::new(FixtureDecoder)).scan("s", &data.study_root("s"));
    assert_eq!(outcome.series.len(), 2);

    let slices: Vec<_> = outcome.slices().collect();
    assert_eq!(slices[0].series_key, fallback_key("SERIES_", "one/img.dcm"));
    assert_eq!(slices[1].image_key, fallback_key("IMG_", "two/img.dcm"));
    assert_ne!(slices[0].image_key, slices[1].image_key);
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let data = TestData::new();
    data.series("s", "S1", 3);
    let service = data.service();

    let first = service.rebuild("s", None).await.unwrap();
    let preview_dir = data.store.preview_dir("s");
    let mut artifacts: Vec<_> = std::fs::read_dir(&preview_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    artifacts.sort();
    assert_eq!(artifacts.len(), 3);
    let before: Vec<Vec<u8>> = artifacts
        .iter()
        .map(|name| std::fs::read(preview_dir.join(name)).unwrap())
        .collect();

    let second = service.rebuild("s", None).await.unwrap();
    assert_eq!(*first, *second);

    let after: Vec<Vec<u8>> = artifacts
        .iter()
        .map(|name| std::fs::read(preview_dir.join(name)).unwrap())
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_progress_counts_failures() {
    let data = TestData::new();
    data.series("s", "S1", 3);
    data.slice(
        "s",
        "S1/broken.dcm",
        &FixtureSlice::new("S1", "X", 7).with_broken_pixels(),
    );
    let service = data.service_with(ServiceOptions {
        conversion_workers: 1,
        ..Default::default()
    });

    let (tx, rx) = progress_channel();
    let index = service.rebuild("s", Some(&tx)).await.unwrap();
    assert_eq!(index.image_count(), 3);

    let progress = rx.borrow().clone();
    assert_eq!(progress.state, IngestState::Completed);
    assert_eq!(progress.total, 4);
    assert_eq!(progress.completed, 3);
    assert_eq!(progress.failed, 1);
}

#[tokio::test]
async fn test_series_with_only_failures_is_dropped() {
    let data = TestData::new();
    data.series("s", "GOOD", 2);
    data.slice(
        "s",
        "BAD/1.dcm",
        &FixtureSlice::new("BAD", "B1", 1).with_broken_pixels(),
    );

    let index = data.service().rebuild("s", None).await.unwrap();
    let keys: Vec<&str> = index.series.iter().map(|s| s.series_key.as_str()).collect();
    assert_eq!(keys, vec!["GOOD"]);
}

#[tokio::test]
async fn test_corrupt_index_is_rebuilt() {
    let data = TestData::new();
    data.series("s", "S1", 2);
    let service = data.service();
    service.rebuild("s", None).await.unwrap();

    std::fs::write(data.store.index_path("s"), b"{ truncated").unwrap();
    data.store.invalidate("s").await;

    let index = service.study("s").await.unwrap();
    assert_eq!(index.image_count(), 2);
}

#[tokio::test]
async fn test_rebuild_missing_study() {
    let data = TestData::new();
    let err = data.service().rebuild("ghost", None).await.unwrap_err();
    assert!(matches!(err, StudyError::StudyNotFound { .. }));
}
