//! Slice to preview conversion.
//!
//! A preview is the slice's pixel grid windowed with its fixed default window
//! and encoded as JPEG. Conversion is "build once": when the artifact file
//! already exists it is reused as-is, without decoding the slice.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::catalog::{Slice, SliceDecoder};
use crate::error::{StorageError, StudyError};

use super::encoder::{JpegPreviewEncoder, PREVIEW_EXTENSION};
use super::window::{default_window, Window};

/// Deterministic preview file name for `(series_key, image_key)`.
///
/// Keys come from slice headers and may contain characters that are not
/// safe in file names, so the name is a digest of both keys.
pub fn preview_artifact_name(series_key: &str, image_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(series_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(image_key.as_bytes());
    let hex = hex::encode(hasher.finalize());
    format!("{}.{}", &hex[..32], PREVIEW_EXTENSION)
}

/// A materialized preview.
#[derive(Debug, Clone)]
pub struct PreviewArtifact {
    /// File name within the study's preview directory
    pub file_name: String,

    /// Absolute path of the artifact
    pub path: PathBuf,

    /// Encoded JPEG bytes
    pub data: Bytes,

    /// `true` if this call produced the artifact, `false` if it already existed
    pub converted: bool,
}

// =============================================================================
// Preview Converter
// =============================================================================

/// Converts slices to preview JPEGs.
///
/// All methods are blocking.
pub struct PreviewConverter<D: SliceDecoder> {
    decoder: Arc<D>,
    encoder: JpegPreviewEncoder,
}

impl<D: SliceDecoder> PreviewConverter<D> {
    pub fn new(decoder: Arc<D>, encoder: JpegPreviewEncoder) -> Self {
        Self { decoder, encoder }
    }

    pub fn encoder(&self) -> &JpegPreviewEncoder {
        &self.encoder
    }

    /// Convert a slice into its preview artifact under `preview_dir`.
    ///
    /// Skips decoding when the artifact already exists. New artifacts are
    /// written to a temporary file in the same directory and renamed into
    /// place, so readers never observe a partial file.
    pub fn convert(
        &self,
        slice: &Slice,
        study_root: &Path,
        preview_dir: &Path,
    ) -> Result<PreviewArtifact, StudyError> {
        let file_name = preview_artifact_name(&slice.series_key, &slice.image_key);
        let path = preview_dir.join(&file_name);

        if path.is_file() {
            let data = std::fs::read(&path).map_err(|e| StorageError::new(&path, e))?;
            return Ok(PreviewArtifact {
                file_name,
                path,
                data: Bytes::from(data),
                converted: false,
            });
        }

        let data = self.render(&study_root.join(&slice.relative_path), None, slice.window)?;

        std::fs::create_dir_all(preview_dir).map_err(|e| StorageError::new(preview_dir, e))?;
        let mut temp =
            NamedTempFile::new_in(preview_dir).map_err(|e| StorageError::new(preview_dir, e))?;
        temp.write_all(&data)
            .map_err(|e| StorageError::new(temp.path(), e))?;
        temp.persist(&path)
            .map_err(|e| StorageError::new(&path, e.error))?;

        Ok(PreviewArtifact {
            file_name,
            path,
            data,
            converted: true,
        })
    }

    /// Decode, window and encode a slice without touching the artifact store.
    ///
    /// `window` overrides the default window (embedded, else pixel range).
    pub fn render(
        &self,
        source: &Path,
        window: Option<Window>,
        embedded: Option<Window>,
    ) -> Result<Bytes, StudyError> {
        let grid = self.decoder.read_pixels(source)?;
        let window = window.unwrap_or_else(|| default_window(embedded, grid.iter()));
        self.encoder.encode(&window.render(grid.view()))
    }
}
