use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while decoding a raw slice file.
///
/// These are recovered locally during scans and batch conversion: the
/// offending slice is skipped and the batch continues.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The file could not be read
    #[error("I/O error reading {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The file is not a parsable DICOM object
    #[error("DICOM error: {0}")]
    Dicom(String),

    /// Pixel data is present but in a layout we do not render
    #[error("Unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    /// A required attribute is absent
    #[error("Missing attribute: {0}")]
    MissingAttribute(&'static str),
}

/// Disk read/write failure.
#[derive(Debug, Clone, Error)]
#[error("Storage error at {path}: {message}")]
pub struct StorageError {
    /// Path involved in the failed operation
    pub path: PathBuf,

    /// Underlying error message
    pub message: String,
}

impl StorageError {
    /// Create a storage error for `path` from any displayable cause.
    pub fn new(path: impl Into<PathBuf>, cause: impl Display) -> Self {
        Self {
            path: path.into(),
            message: cause.to_string(),
        }
    }
}

/// Errors surfaced by study operations.
///
/// The variants group into five classes: not found (404), invalid input (400),
/// decode failure, dependency unavailable (503) and storage failure (500).
#[derive(Debug, Clone, Error)]
pub enum StudyError {
    // -------------------------------------------------------------------------
    // Not found
    // -------------------------------------------------------------------------
    /// Study directory or index does not exist
    #[error("Study not found: {study_id}")]
    StudyNotFound { study_id: String },

    /// Series key is not part of the study
    #[error("Series not found: {series_key} in study {study_id}")]
    SeriesNotFound {
        study_id: String,
        series_key: String,
    },

    /// Image key is not part of the series
    #[error("Image not found: {image_key} in series {series_key} of study {study_id}")]
    ImageNotFound {
        study_id: String,
        series_key: String,
        image_key: String,
    },

    /// A derived or original file referenced by the index is missing on disk
    #[error("Artifact not found: {path}")]
    ArtifactNotFound { path: PathBuf },

    /// Ingestion task id is unknown
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    // -------------------------------------------------------------------------
    // Invalid input
    // -------------------------------------------------------------------------
    /// Study id contains characters that are not allowed in a directory name
    #[error("Invalid study id: {study_id:?} (allowed: letters, digits, '.', '_', '-')")]
    InvalidStudyId { study_id: String },

    /// Orientation name is not one of the three supported axes
    #[error("Unknown orientation: {name} (expected one of: axial, coronal, sagittal)")]
    UnknownOrientation { name: String },

    /// Slice index is outside the volume extent along the requested axis
    #[error(
        "Slice index {index} out of range for {orientation} (valid range: 0-{})",
        extent.saturating_sub(1)
    )]
    SliceOutOfRange {
        orientation: &'static str,
        index: usize,
        extent: usize,
    },

    /// Slice index is not a non-negative integer
    #[error(
        "Invalid slice index {index:?} for {orientation} (valid range: 0-{})",
        extent.saturating_sub(1)
    )]
    InvalidSliceIndex {
        orientation: &'static str,
        index: String,
        extent: usize,
    },

    /// Requested format is not supported by the operation
    #[error("Unsupported format: {format} (expected one of: {expected})")]
    UnsupportedFormat {
        format: String,
        expected: &'static str,
    },

    /// Window parameters are incomplete or unknown
    #[error("Invalid window: {message}")]
    InvalidWindow { message: String },

    /// Upload contained no usable files
    #[error("Invalid upload: {message}")]
    InvalidUpload { message: String },

    // -------------------------------------------------------------------------
    // Decode failure
    // -------------------------------------------------------------------------
    /// A single slice could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Every slice of the study failed to decode (or there were none)
    #[error("No decodable slices in study {study_id}")]
    NoDecodableSlices { study_id: String },

    // -------------------------------------------------------------------------
    // Dependency unavailable
    // -------------------------------------------------------------------------
    /// The sequence encoder is disabled in this deployment
    #[error("Encoder unavailable: {encoder}")]
    EncoderUnavailable { encoder: &'static str },

    // -------------------------------------------------------------------------
    // Export / processing
    // -------------------------------------------------------------------------
    /// Every file selected for export was missing
    #[error("Nothing to export for {target}")]
    NothingToExport { target: String },

    /// Image, archive or sequence encoding failed
    #[error("Encode error: {message}")]
    Encode { message: String },

    /// A background job panicked or was cancelled
    #[error("Task failed: {message}")]
    TaskFailed { message: String },

    // -------------------------------------------------------------------------
    // Storage
    // -------------------------------------------------------------------------
    /// Disk read/write failure
    #[error("{0}")]
    Storage(#[from] StorageError),
}

impl StudyError {
    /// Wrap a `spawn_blocking` join failure.
    pub fn task_failed(err: impl Display) -> Self {
        StudyError::TaskFailed {
            message: err.to_string(),
        }
    }

    /// Wrap an encoder failure.
    pub fn encode(err: impl Display) -> Self {
        StudyError::Encode {
            message: err.to_string(),
        }
    }
}
