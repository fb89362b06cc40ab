//! Slice catalog.
//!
//! Discovers the raw slices of a study, derives their identity and ordering,
//! and groups them into series.
//!
//! # Architecture
//!
//! ```text
//! study root ──► walk (sorted) ──► extension filter ──► SliceDecoder::read_header
//!                                                              │
//!                                      parse failure ◄─────────┤
//!                                      (warn + skip)           ▼
//!                                                     SliceHeader::resolve
//!                                                              │
//!                                                              ▼
//!                                          group by series key, stable sort by order
//! ```
//!
//! Identity and ordering come from the slice header; anything absent is
//! resolved exactly once against a fixed default table, so downstream code
//! never sees an optional identity field.

mod decoder;
mod scan;

pub use decoder::{
    is_raw_slice, DicomSliceDecoder, PixelGrid, SliceDecoder, SliceHeader, RAW_EXTENSIONS,
};
pub use scan::{fallback_key, ScanOutcome, SliceCatalog};

use serde::{Deserialize, Serialize};

use crate::render::Window;

/// Sentinel for absent descriptive metadata.
pub const UNKNOWN: &str = "Unknown";

/// Description of series without one.
pub const DEFAULT_SERIES_DESCRIPTION: &str = "Series";

// =============================================================================
// Slice / Series
// =============================================================================

/// One raw image file with resolved identity and geometry.
///
/// Slices are created by a scan and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub study_id: String,

    /// Grouping identity, never empty
    pub series_key: String,

    /// Per-image identity, never empty
    pub image_key: String,

    /// Position within the series; not guaranteed unique
    pub order_index: i64,

    /// Row and column spacing
    pub pixel_spacing: [f64; 2],

    /// (rows, columns)
    pub dimensions: (u32, u32),

    /// Path relative to the study root, `/`-separated
    pub relative_path: String,

    /// Window embedded in the source
    pub window: Option<Window>,

    pub series_description: String,
}

/// Slices sharing one series key, sorted by `order_index`.
///
/// Ties keep scan-discovery order.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub series_key: String,
    pub description: String,
    pub slices: Vec<Slice>,
}

/// Best-effort study description, taken from the first parsed slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyMetadata {
    pub patient_name: String,
    pub study_date: String,
    pub description: String,
}

impl Default for StudyMetadata {
    fn default() -> Self {
        Self {
            patient_name: UNKNOWN.to_string(),
            study_date: UNKNOWN.to_string(),
            description: UNKNOWN.to_string(),
        }
    }
}
