//! Derived-artifact pipeline.
//!
//! This module turns raw slices into display-ready artifacts and serves them
//! through bounded caches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      HTTP Handlers                      │
//! └────────────────────────────┬────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                      StudyService                       │
//! │  ┌──────────────┐ ┌──────────────┐ ┌─────────────────┐  │
//! │  │ PreviewCache │ │ VolumeCache  │ │  TaskRegistry   │  │
//! │  └──────────────┘ └──────────────┘ └─────────────────┘  │
//! └───────┬──────────────────┬───────────────────┬──────────┘
//!         │                  │                   │
//!         ▼                  ▼                   ▼
//! ┌───────────────┐ ┌─────────────────────┐ ┌────────────────┐
//! │ IndexBuilder  │ │ VolumeReconstructor │ │ ExportAssembler│
//! │  └ Scheduler  │ │   (permit-gated)    │ └────────────────┘
//! │   └ Converter │ └─────────────────────┘
//! └───────────────┘
//! ```
//!
//! # Components
//!
//! - [`Window`]: linear windowing from physical values to 8-bit intensities
//! - [`JpegPreviewEncoder`]: deterministic grayscale JPEG encoding
//! - [`PreviewConverter`]: build-once slice to preview conversion
//! - [`ConversionScheduler`]: bounded-parallel batch conversion with progress
//! - [`VolumeReconstructor`]: volume assembly and orthogonal reslicing
//! - [`PreviewCache`] / [`VolumeCache`]: entry-bounded LRU caches
//! - [`StudyService`]: entry point used by the HTTP layer and the CLI

mod cache;
mod converter;
mod encoder;
mod scheduler;
mod service;
mod tasks;
mod volume;
mod window;

pub use cache::{
    ArtifactCache, CacheStats, PreviewCache, PreviewKey, StudyScoped, VolumeCache, VolumeKey,
    DEFAULT_PREVIEW_CACHE_CAPACITY, DEFAULT_VOLUME_CACHE_CAPACITY,
};
pub use converter::{preview_artifact_name, PreviewArtifact, PreviewConverter};
pub use encoder::{
    clamp_quality, is_jpeg, is_valid_quality, JpegPreviewEncoder, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY, PREVIEW_CONTENT_TYPE, PREVIEW_EXTENSION,
};
pub use scheduler::{
    progress_channel, ConversionOutcome, ConversionScheduler, IngestProgress, IngestState,
    ProgressReceiver, ProgressSender, DEFAULT_CONVERSION_WORKERS,
};
pub use service::{
    ImageFormat, ImageRequest, ImageResponse, ServiceOptions, ServiceStats, SliceResponse,
    StudyService, ORIGINAL_CONTENT_TYPE,
};
pub use tasks::{TaskRegistry, TaskStatus, DEFAULT_TASK_HISTORY};
pub use volume::{Orientation, Volume, VolumeReconstructor, DEFAULT_RECONSTRUCTION_PERMITS};
pub use window::{default_window, requested_window, Window, WindowPreset};
