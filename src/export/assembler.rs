//! Export assembly.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use image::GrayImage;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StudyError};
use crate::index::{StudyIndex, StudyStore};
use crate::render::{JpegPreviewEncoder, PREVIEW_EXTENSION};

use super::archive::ArchiveEncoder;
use super::sequence::SequenceEncoder;
use super::{sanitize, ExportBundle, ExportFormat, ExportTarget, Selected};

/// Assembles export bundles from materialized study files.
///
/// All methods are blocking; call them from `spawn_blocking`.
pub struct ExportAssembler {
    store: Arc<StudyStore>,
    originals: ArchiveEncoder,
    preview_archive: ArchiveEncoder,

    /// `None` when sequence export is disabled in this deployment
    sequence: Option<SequenceEncoder>,

    previews: JpegPreviewEncoder,
}

impl ExportAssembler {
    pub fn new(store: Arc<StudyStore>, sequence: Option<SequenceEncoder>) -> Self {
        Self {
            store,
            originals: ArchiveEncoder::new(),
            preview_archive: ArchiveEncoder::stored(),
            sequence,
            previews: JpegPreviewEncoder::default(),
        }
    }

    pub fn sequence_enabled(&self) -> bool {
        self.sequence.is_some()
    }

    /// Export `target` of a study in `format`.
    pub fn export(
        &self,
        index: &StudyIndex,
        target: &ExportTarget,
        format: ExportFormat,
    ) -> Result<ExportBundle, StudyError> {
        let selected = target.select(index)?;
        let description = target.describe(&index.study_id);

        let data = match format {
            ExportFormat::Original => {
                let sources = self.original_sources(index, &selected);
                self.stage_and_bundle(&self.originals, sources, &description)?
            }
            ExportFormat::Preview => {
                let sources = self.preview_sources(index, &selected);
                self.stage_and_bundle(&self.preview_archive, sources, &description)?
            }
            ExportFormat::Sequence => {
                let encoder = self.sequence.ok_or(StudyError::EncoderUnavailable {
                    encoder: "sequence",
                })?;
                let frames = self.load_frames(index, &selected)?;
                if frames.is_empty() {
                    return Err(StudyError::NothingToExport {
                        target: description,
                    });
                }
                encoder.encode(frames)?
            }
        };

        info!(
            study_id = %index.study_id,
            target = %description,
            format = %format,
            bytes = data.len(),
            "Export assembled"
        );

        Ok(ExportBundle {
            file_name: target.file_name(&index.study_id, format),
            content_type: format.content_type(),
            data,
        })
    }

    fn original_sources(
        &self,
        index: &StudyIndex,
        selected: &[Selected<'_>],
    ) -> Vec<(PathBuf, String)> {
        let root = self.store.study_root(&index.study_id);
        selected
            .iter()
            .map(|s| {
                (
                    root.join(&s.image.relative_path),
                    s.image.relative_path.clone(),
                )
            })
            .collect()
    }

    fn preview_sources(
        &self,
        index: &StudyIndex,
        selected: &[Selected<'_>],
    ) -> Vec<(PathBuf, String)> {
        selected
            .iter()
            .map(|s| {
                (
                    self.store.preview_path(&index.study_id, &s.image.preview),
                    format!(
                        "{}/{:04}_{}.{}",
                        sanitize(&s.series.series_key),
                        s.position,
                        sanitize(&s.image.image_key),
                        PREVIEW_EXTENSION
                    ),
                )
            })
            .collect()
    }

    /// Copy present sources into a fresh staging directory and zip them.
    ///
    /// Missing sources are skipped. The staging directory is removed when
    /// this returns, on success or failure.
    fn stage_and_bundle(
        &self,
        archive: &ArchiveEncoder,
        sources: Vec<(PathBuf, String)>,
        description: &str,
    ) -> Result<Bytes, StudyError> {
        let staging = TempDir::with_prefix("study-export-")
            .map_err(|e| StorageError::new(std::env::temp_dir(), e))?;

        let mut staged = Vec::with_capacity(sources.len());
        for (position, (source, entry_name)) in sources.into_iter().enumerate() {
            if !source.is_file() {
                debug!(path = %source.display(), "Skipping missing export source");
                continue;
            }
            let copy = staging.path().join(format!("{:06}", position));
            std::fs::copy(&source, &copy).map_err(|e| StorageError::new(&source, e))?;
            staged.push((copy, entry_name));
        }

        if staged.is_empty() {
            return Err(StudyError::NothingToExport {
                target: description.to_string(),
            });
        }

        archive.bundle(&staged)
    }

    /// Decode preview frames in order, skipping missing, unreadable or mismatched ones.
    fn load_frames(
        &self,
        index: &StudyIndex,
        selected: &[Selected<'_>],
    ) -> Result<Vec<GrayImage>, StudyError> {
        let mut frames: Vec<GrayImage> = Vec::with_capacity(selected.len());

        for s in selected {
            let path = self.store.preview_path(&index.study_id, &s.image.preview);
            let data = match std::fs::read(&path) {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Skipping missing frame");
                    continue;
                }
                Err(e) => return Err(StorageError::new(&path, e).into()),
            };
            let frame = match self.previews.decode(&data) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable frame");
                    continue;
                }
            };
            if let Some(first) = frames.first() {
                if first.dimensions() != frame.dimensions() {
                    debug!(
                        path = %path.display(),
                        expected = ?first.dimensions(),
                        actual = ?frame.dimensions(),
                        "Skipping frame with mismatched size"
                    );
                    continue;
                }
            }
            frames.push(frame);
        }

        Ok(frames)
    }
}
