//! # Study Streamer
//!
//! Derived-artifact pipeline for volumetric imaging studies.
//!
//! A study is a directory of raw slice files. The library scans it into
//! ordered series, converts every slice into a windowed JPEG preview, persists
//! a per-study index, reconstructs the primary series into a 3-D volume for
//! axial/coronal/sagittal slicing, and assembles zip or animated exports.
//!
//! ## Architecture
//!
//! - [`catalog`] - Decoder seam, DICOM decoder, directory scan and series grouping
//! - [`index`] - Study index model, on-disk store and index builder
//! - [`render`] - Windowing, preview conversion, caches, volume reconstruction
//!   and the [`StudyService`] that ties them together
//! - [`export`] - Zip and animated-sequence export assembly
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use study_streamer::{create_router, DicomSliceDecoder, RouterConfig, StudyService, StudyStore};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let store = Arc::new(StudyStore::new("data"));
//!     let service = Arc::new(StudyService::new(Arc::new(DicomSliceDecoder::new()), store));
//!     let router = create_router(service, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod export;
pub mod index;
pub mod render;
pub mod server;

// Re-export commonly used types
pub use catalog::{
    DicomSliceDecoder, ScanOutcome, Series, Slice, SliceCatalog, SliceDecoder, SliceHeader,
    StudyMetadata,
};
pub use config::{CheckConfig, Cli, Command, IngestConfig, PipelineArgs, ServeConfig};
pub use error::{DecodeError, StorageError, StudyError};
pub use export::{ExportAssembler, ExportBundle, ExportFormat, ExportTarget};
pub use index::{
    Annotation, ImageEntry, IndexBuilder, SeriesEntry, StudyIndex, StudyStore, StudySummary,
    UploadedFile,
};
pub use render::{
    ConversionScheduler, ImageFormat, ImageRequest, IngestProgress, IngestState, Orientation,
    PreviewCache, PreviewConverter, ServiceOptions, StudyService, VolumeCache,
    VolumeReconstructor, Window, WindowPreset,
};
pub use server::{create_router, AppState, RouterConfig};
