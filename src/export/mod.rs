//! Study export.
//!
//! Bundles one image, one series or a whole study into a downloadable file:
//!
//! | Format     | Contents                               | Output            |
//! |------------|----------------------------------------|-------------------|
//! | `original` | raw slice files                        | `application/zip` |
//! | `preview`  | preview JPEGs                          | `application/zip` |
//! | `sequence` | preview frames as an animated sequence | `image/gif`       |
//!
//! Files are copied into a private staging directory before bundling; the
//! live artifact directories are only ever read. Staging is removed on every
//! exit path.

mod archive;
mod assembler;
mod sequence;

pub use archive::ArchiveEncoder;
pub use assembler::ExportAssembler;
pub use sequence::{SequenceEncoder, DEFAULT_FRAME_RATE, MAX_FRAME_RATE, MIN_FRAME_RATE};

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::StudyError;
use crate::index::{ImageEntry, SeriesEntry, StudyIndex};

/// MIME type of archive exports.
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// MIME type of sequence exports.
pub const SEQUENCE_CONTENT_TYPE: &str = "image/gif";

// =============================================================================
// Export Format
// =============================================================================

/// What to put in an export bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Original,
    Preview,
    Sequence,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [
        ExportFormat::Original,
        ExportFormat::Preview,
        ExportFormat::Sequence,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExportFormat::Original => "original",
            ExportFormat::Preview => "preview",
            ExportFormat::Sequence => "sequence",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Original | ExportFormat::Preview => ZIP_CONTENT_TYPE,
            ExportFormat::Sequence => SEQUENCE_CONTENT_TYPE,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Original | ExportFormat::Preview => "zip",
            ExportFormat::Sequence => "gif",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExportFormat::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| StudyError::UnsupportedFormat {
                format: s.to_string(),
                expected: "original, preview, sequence",
            })
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Export Target
// =============================================================================

/// The subset of a study to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    Study,
    Series {
        series_key: String,
    },
    Image {
        series_key: String,
        image_key: String,
    },
}

/// One image selected for export, with its position in its series.
#[derive(Debug, Clone, Copy)]
pub struct Selected<'a> {
    pub series: &'a SeriesEntry,
    pub position: usize,
    pub image: &'a ImageEntry,
}

impl ExportTarget {
    /// Resolve the target against an index, in series order then image order.
    pub fn select<'a>(&self, index: &'a StudyIndex) -> Result<Vec<Selected<'a>>, StudyError> {
        let in_series = |series: &'a SeriesEntry| {
            series
                .images
                .iter()
                .enumerate()
                .map(move |(position, image)| Selected {
                    series,
                    position,
                    image,
                })
        };

        match self {
            ExportTarget::Study => Ok(index.series.iter().flat_map(in_series).collect()),
            ExportTarget::Series { series_key } => {
                Ok(in_series(index.series(series_key)?).collect())
            }
            ExportTarget::Image {
                series_key,
                image_key,
            } => {
                let series = index.series(series_key)?;
                index.image(series_key, image_key)?;
                Ok(in_series(series)
                    .filter(|s| s.image.image_key == *image_key)
                    .collect())
            }
        }
    }

    /// Human-readable description used in errors.
    pub fn describe(&self, study_id: &str) -> String {
        match self {
            ExportTarget::Study => format!("study {}", study_id),
            ExportTarget::Series { series_key } => {
                format!("series {} of study {}", series_key, study_id)
            }
            ExportTarget::Image {
                series_key,
                image_key,
            } => format!(
                "image {} in series {} of study {}",
                image_key, series_key, study_id
            ),
        }
    }

    /// Download file name for this target.
    pub fn file_name(&self, study_id: &str, format: ExportFormat) -> String {
        let stem = match self {
            ExportTarget::Study => sanitize(study_id),
            ExportTarget::Series { series_key } => {
                format!("{}_{}", sanitize(study_id), sanitize(series_key))
            }
            ExportTarget::Image {
                series_key,
                image_key,
            } => format!(
                "{}_{}_{}",
                sanitize(study_id),
                sanitize(series_key),
                sanitize(image_key)
            ),
        };
        format!("{}_{}.{}", stem, format.name(), format.extension())
    }
}

/// Replace characters that are unsafe in file and entry names.
pub fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// A finished export.
#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub file_name: String,
    pub content_type: &'static str,
    pub data: Bytes,
}
