//! Study service: the entry point for every study operation.
//!
//! The service is constructed once at startup and shared by reference with
//! the HTTP handlers and the CLI. It owns the caches, the task registry and
//! the gated reconstructor; nothing here is a process-wide global.
//!
//! # Request flow
//!
//! ```text
//! image(preview)       ─► PreviewCache ─► preview file ─► convert on demand
//! image(custom window) ─► decode + window + encode (never cached)
//! volume_slice         ─► VolumeCache ─► index bounds ─► permit ─► load ─► cut
//! export               ─► index ─► ExportAssembler (blocking pool)
//! ```

use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{SliceCatalog, SliceDecoder};
use crate::error::{StorageError, StudyError};
use crate::export::{ExportAssembler, ExportBundle, ExportFormat, ExportTarget, SequenceEncoder};
use crate::index::{
    validate_study_id, Annotation, IndexBuilder, StudyIndex, StudyStore, StudySummary,
    UploadedFile,
};

use super::cache::{CacheStats, PreviewCache, PreviewKey, VolumeCache, VolumeKey};
use super::converter::PreviewConverter;
use super::encoder::{JpegPreviewEncoder, DEFAULT_JPEG_QUALITY, PREVIEW_CONTENT_TYPE};
use super::scheduler::{ConversionScheduler, ProgressSender, DEFAULT_CONVERSION_WORKERS};
use super::tasks::{TaskRegistry, TaskStatus};
use super::volume::{Orientation, VolumeReconstructor, DEFAULT_RECONSTRUCTION_PERMITS};
use super::window::Window;
use super::{DEFAULT_PREVIEW_CACHE_CAPACITY, DEFAULT_VOLUME_CACHE_CAPACITY};

/// MIME type of original slice downloads.
pub const ORIGINAL_CONTENT_TYPE: &str = "application/dicom";

// =============================================================================
// Options
// =============================================================================

/// Tunables for a [`StudyService`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub preview_cache_capacity: usize,
    pub volume_cache_capacity: usize,
    pub conversion_workers: usize,
    pub reconstruction_permits: usize,
    pub jpeg_quality: u8,
    pub frame_rate: u32,

    /// Whether sequence exports are available
    pub sequence_export: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            preview_cache_capacity: DEFAULT_PREVIEW_CACHE_CAPACITY,
            volume_cache_capacity: DEFAULT_VOLUME_CACHE_CAPACITY,
            conversion_workers: DEFAULT_CONVERSION_WORKERS,
            reconstruction_permits: DEFAULT_RECONSTRUCTION_PERMITS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_rate: crate::export::DEFAULT_FRAME_RATE,
            sequence_export: true,
        }
    }
}

// =============================================================================
// Requests / Responses
// =============================================================================

/// Representation of a single image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    Original,
    #[default]
    Preview,
}

impl FromStr for ImageFormat {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("original") {
            Ok(ImageFormat::Original)
        } else if s.eq_ignore_ascii_case("preview") {
            Ok(ImageFormat::Preview)
        } else {
            Err(StudyError::UnsupportedFormat {
                format: s.to_string(),
                expected: "original, preview",
            })
        }
    }
}

/// A request for one image.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub study_id: String,
    pub series_key: String,
    pub image_key: String,
    pub format: ImageFormat,

    /// Custom window; only valid with the preview format
    pub window: Option<Window>,
}

impl ImageRequest {
    /// Request the cached default preview of an image.
    pub fn preview(
        study_id: impl Into<String>,
        series_key: impl Into<String>,
        image_key: impl Into<String>,
    ) -> Self {
        Self {
            study_id: study_id.into(),
            series_key: series_key.into(),
            image_key: image_key.into(),
            format: ImageFormat::Preview,
            window: None,
        }
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_window(mut self, window: Option<Window>) -> Self {
        self.window = window;
        self
    }
}

/// Response for one image.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub data: Bytes,
    pub content_type: &'static str,

    /// Whether the bytes came from the preview cache
    pub cache_hit: bool,
}

/// Response for one reconstructed slice.
#[derive(Debug, Clone)]
pub struct SliceResponse {
    pub data: Bytes,
    pub cache_hit: bool,
}

/// Cache and limiter statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub preview_cache: CacheStats,
    pub volume_cache: CacheStats,
    pub cached_indexes: usize,
    pub reconstruction_permits: usize,
    pub reconstruction_permits_available: usize,
    pub tracked_tasks: usize,
}

// =============================================================================
// Study Service
// =============================================================================

/// Orchestrates indexing, previews, reconstruction and export.
///
/// # Type Parameters
///
/// * `D` - The slice decoder (DICOM in production, fixtures in tests)
pub struct StudyService<D: SliceDecoder> {
    store: Arc<StudyStore>,
    builder: Arc<IndexBuilder<D>>,
    converter: Arc<PreviewConverter<D>>,
    reconstructor: VolumeReconstructor<D>,
    assembler: Arc<ExportAssembler>,
    previews: Arc<PreviewCache>,
    volumes: VolumeCache,
    tasks: TaskRegistry,
    encoder: JpegPreviewEncoder,
}

impl<D: SliceDecoder> StudyService<D> {
    /// Create a service with default options.
    pub fn new(decoder: Arc<D>, store: Arc<StudyStore>) -> Self {
        Self::with_options(decoder, store, ServiceOptions::default())
    }

    pub fn with_options(decoder: Arc<D>, store: Arc<StudyStore>, options: ServiceOptions) -> Self {
        let encoder = JpegPreviewEncoder::new(options.jpeg_quality);
        let previews = Arc::new(PreviewCache::with_capacity(options.preview_cache_capacity));
        let converter = Arc::new(PreviewConverter::new(Arc::clone(&decoder), encoder));
        let scheduler = ConversionScheduler::new(Arc::clone(&converter), options.conversion_workers)
            .with_cache(Arc::clone(&previews));
        let builder = IndexBuilder::new(
            SliceCatalog::new(Arc::clone(&decoder)),
            scheduler,
            Arc::clone(&store),
        );
        let sequence = options
            .sequence_export
            .then(|| SequenceEncoder::new(options.frame_rate));

        Self {
            reconstructor: VolumeReconstructor::new(decoder, options.reconstruction_permits),
            assembler: Arc::new(ExportAssembler::new(Arc::clone(&store), sequence)),
            builder: Arc::new(builder),
            volumes: VolumeCache::with_capacity(options.volume_cache_capacity),
            tasks: TaskRegistry::new(),
            store,
            converter,
            previews,
            encoder,
        }
    }

    pub fn store(&self) -> &Arc<StudyStore> {
        &self.store
    }

    pub fn preview_cache(&self) -> &PreviewCache {
        &self.previews
    }

    pub fn volume_cache(&self) -> &VolumeCache {
        &self.volumes
    }

    pub fn sequence_enabled(&self) -> bool {
        self.assembler.sequence_enabled()
    }

    // -------------------------------------------------------------------------
    // Studies
    // -------------------------------------------------------------------------

    /// Summaries of every study directory; unindexed studies are flagged.
    pub async fn list_studies(&self) -> Result<Vec<StudySummary>, StudyError> {
        let mut summaries = Vec::new();
        for study_id in self.store.list_study_ids().await? {
            let summary = match self.store.load_index(&study_id).await {
                Some(index) => index.summary(),
                None => StudySummary::unindexed(study_id),
            };
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// The index of a study, building it when absent or unreadable.
    pub async fn study(&self, study_id: &str) -> Result<Arc<StudyIndex>, StudyError> {
        validate_study_id(study_id)?;
        if let Some(index) = self.store.load_index(study_id).await {
            return Ok(index);
        }
        if !self.store.study_exists(study_id).await {
            return Err(StudyError::StudyNotFound {
                study_id: study_id.to_string(),
            });
        }

        info!(study_id = %study_id, "No usable index, building");
        self.builder.build(study_id, None).await
    }

    /// Rebuild a study's index in the foreground.
    pub async fn rebuild(
        &self,
        study_id: &str,
        progress: Option<&ProgressSender>,
    ) -> Result<Arc<StudyIndex>, StudyError> {
        validate_study_id(study_id)?;
        self.store.invalidate(study_id).await;
        // The primary series may change; previews are keyed by identity and stay valid
        self.volumes.invalidate_study(study_id).await;
        self.builder.build(study_id, progress).await
    }

    /// Start a background rebuild and return its task id.
    pub async fn start_rebuild(self: &Arc<Self>, study_id: &str) -> Result<String, StudyError> {
        validate_study_id(study_id)?;
        if !self.store.study_exists(study_id).await {
            return Err(StudyError::StudyNotFound {
                study_id: study_id.to_string(),
            });
        }

        let (task_id, tx) = self.tasks.register(study_id).await;
        let service = Arc::clone(self);
        let study_id = study_id.to_string();
        let task = task_id.clone();

        tokio::spawn(async move {
            match service.rebuild(&study_id, Some(&tx)).await {
                Ok(index) => {
                    debug!(task_id = %task, images = index.image_count(), "Ingestion task finished")
                }
                Err(err) => warn!(task_id = %task, study_id = %study_id, error = %err, "Ingestion task failed"),
            }
        });

        Ok(task_id)
    }

    /// Store an uploaded study and start ingesting it.
    ///
    /// Returns `(study_id, task_id)`.
    pub async fn create_study(
        self: &Arc<Self>,
        files: Vec<UploadedFile>,
    ) -> Result<(String, String), StudyError> {
        let study_id = self.store.create_study(files).await?;
        let task_id = self.start_rebuild(&study_id).await?;
        Ok((study_id, task_id))
    }

    /// Latest progress of an ingestion task.
    pub async fn task(&self, task_id: &str) -> Result<TaskStatus, StudyError> {
        self.tasks.status(task_id).await
    }

    /// Delete a study, its derived artifacts and every cached entry.
    pub async fn delete_study(&self, study_id: &str) -> Result<(), StudyError> {
        validate_study_id(study_id)?;
        let removed = self.store.delete_study(study_id).await?;
        let previews = self.previews.invalidate_study(study_id).await;
        let volumes = self.volumes.invalidate_study(study_id).await;
        debug!(study_id = %study_id, previews, volumes, "Evicted cached artifacts");

        if removed {
            Ok(())
        } else {
            Err(StudyError::StudyNotFound {
                study_id: study_id.to_string(),
            })
        }
    }

    // -------------------------------------------------------------------------
    // Images
    // -------------------------------------------------------------------------

    /// Fetch one image as original bytes, the cached preview, or a custom render.
    pub async fn image(&self, request: &ImageRequest) -> Result<ImageResponse, StudyError> {
        let index = self.study(&request.study_id).await?;
        let series = index.series(&request.series_key)?;
        let entry = index.image(&request.series_key, &request.image_key)?;

        match (request.format, request.window) {
            (ImageFormat::Original, Some(_)) => Err(StudyError::InvalidWindow {
                message: "windowing only applies to the preview format".to_string(),
            }),
            (ImageFormat::Original, None) => {
                let path = self
                    .store
                    .study_root(&index.study_id)
                    .join(&entry.relative_path);
                let data = read_artifact(&path).await?;
                Ok(ImageResponse {
                    data,
                    content_type: ORIGINAL_CONTENT_TYPE,
                    cache_hit: false,
                })
            }
            (ImageFormat::Preview, Some(window)) => {
                let converter = Arc::clone(&self.converter);
                let source = self
                    .store
                    .study_root(&index.study_id)
                    .join(&entry.relative_path);
                let embedded = entry.window;
                let data = tokio::task::spawn_blocking(move || {
                    converter.render(&source, Some(window), embedded)
                })
                .await
                .map_err(StudyError::task_failed)??;
                Ok(ImageResponse {
                    data,
                    content_type: PREVIEW_CONTENT_TYPE,
                    cache_hit: false,
                })
            }
            (ImageFormat::Preview, None) => {
                let key = PreviewKey::new(
                    index.study_id.as_str(),
                    series.series_key.as_str(),
                    entry.image_key.as_str(),
                );
                if let Some(data) = self.previews.get(&key).await {
                    return Ok(ImageResponse {
                        data,
                        content_type: PREVIEW_CONTENT_TYPE,
                        cache_hit: true,
                    });
                }

                let slice = entry.to_slice(&index.study_id, series);
                let converter = Arc::clone(&self.converter);
                let study_root = self.store.study_root(&index.study_id);
                let preview_dir = self.store.preview_dir(&index.study_id);
                let artifact = tokio::task::spawn_blocking(move || {
                    converter.convert(&slice, &study_root, &preview_dir)
                })
                .await
                .map_err(StudyError::task_failed)??;

                self.previews.put(key, artifact.data.clone()).await;
                Ok(ImageResponse {
                    data: artifact.data,
                    content_type: PREVIEW_CONTENT_TYPE,
                    cache_hit: false,
                })
            }
        }
    }

    /// Annotation of one image, if any.
    pub async fn annotation(
        &self,
        study_id: &str,
        series_key: &str,
        image_key: &str,
    ) -> Result<Option<Annotation>, StudyError> {
        let index = self.study(study_id).await?;
        index.image(series_key, image_key)?;
        Ok(index.annotation(series_key, image_key).cloned())
    }

    /// Set (or clear, with `None`) the annotation of one image.
    pub async fn set_annotation(
        &self,
        study_id: &str,
        series_key: &str,
        image_key: &str,
        annotation: Option<Annotation>,
    ) -> Result<Option<Annotation>, StudyError> {
        // Make sure an index exists before updating it
        self.study(study_id).await?;
        let index = self
            .store
            .update_index(study_id, |index| {
                index.set_annotation(series_key, image_key, annotation)
            })
            .await?;
        Ok(index.annotation(series_key, image_key).cloned())
    }

    // -------------------------------------------------------------------------
    // Volume
    // -------------------------------------------------------------------------

    /// Number of slices along `orientation`, without decoding pixels.
    pub async fn orientation_info(
        &self,
        study_id: &str,
        orientation: Orientation,
    ) -> Result<usize, StudyError> {
        let index = self.study(study_id).await?;
        self.reconstructor.info_for_orientation(&index, orientation)
    }

    /// One reconstructed slice, windowed with the volume's default window.
    pub async fn volume_slice(
        &self,
        study_id: &str,
        orientation: Orientation,
        slice_index: usize,
    ) -> Result<SliceResponse, StudyError> {
        validate_study_id(study_id)?;
        let key = VolumeKey::new(study_id, orientation, slice_index);
        if let Some(data) = self.volumes.get(&key).await {
            return Ok(SliceResponse {
                data,
                cache_hit: true,
            });
        }

        let index = self.study(study_id).await?;

        // Reject obviously out-of-range requests before loading the volume
        let extent = self.reconstructor.info_for_orientation(&index, orientation)?;
        if slice_index >= extent {
            return Err(StudyError::SliceOutOfRange {
                orientation: orientation.name(),
                index: slice_index,
                extent,
            });
        }

        let volume = self
            .reconstructor
            .load_volume(self.store.study_root(study_id), &index)
            .await?;
        let encoder = self.encoder;
        let data = tokio::task::spawn_blocking(move || {
            let image = volume.render_slice(orientation, slice_index)?;
            encoder.encode(&image)
        })
        .await
        .map_err(StudyError::task_failed)??;

        self.volumes.put(key, data.clone()).await;
        Ok(SliceResponse {
            data,
            cache_hit: false,
        })
    }

    // -------------------------------------------------------------------------
    // Export
    // -------------------------------------------------------------------------

    /// Export an image, series or study.
    pub async fn export(
        &self,
        study_id: &str,
        target: ExportTarget,
        format: ExportFormat,
    ) -> Result<ExportBundle, StudyError> {
        let index = self.study(study_id).await?;
        let assembler = Arc::clone(&self.assembler);
        tokio::task::spawn_blocking(move || assembler.export(&index, &target, format))
            .await
            .map_err(StudyError::task_failed)?
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            preview_cache: self.previews.stats().await,
            volume_cache: self.volumes.stats().await,
            cached_indexes: self.store.cached_index_count().await,
            reconstruction_permits: self.reconstructor.max_concurrent(),
            reconstruction_permits_available: self.reconstructor.available_permits(),
            tracked_tasks: self.tasks.len().await,
        }
    }
}

async fn read_artifact(path: &std::path::Path) -> Result<Bytes, StudyError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StudyError::ArtifactNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(StorageError::new(path, e).into()),
    }
}
