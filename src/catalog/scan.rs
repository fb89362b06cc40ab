//! Directory scan and series grouping.

use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::decoder::{is_raw_slice, SliceDecoder, SliceHeader};
use super::{Series, Slice, StudyMetadata, DEFAULT_SERIES_DESCRIPTION, UNKNOWN};

/// Number of hex characters kept from the path digest.
const FALLBACK_KEY_LEN: usize = 32;

/// Deterministic identity for a slice without an embedded one.
///
/// Hashes the study-relative path, so files that share a name in different
/// directories never collide.
pub fn fallback_key(prefix: &str, relative_path: &str) -> String {
    let digest = Sha256::digest(relative_path.as_bytes());
    let hex = hex::encode(digest);
    format!("{}{}", prefix, &hex[..FALLBACK_KEY_LEN])
}

impl SliceHeader {
    /// Apply the default table and produce an immutable [`Slice`].
    pub fn resolve(&self, study_id: &str, relative_path: &str) -> Slice {
        Slice {
            study_id: study_id.to_string(),
            series_key: self
                .series_uid
                .clone()
                .unwrap_or_else(|| fallback_key("SERIES_", relative_path)),
            image_key: self
                .instance_uid
                .clone()
                .unwrap_or_else(|| fallback_key("IMG_", relative_path)),
            order_index: self.instance_number.unwrap_or(0),
            pixel_spacing: self.pixel_spacing.unwrap_or([1.0, 1.0]),
            dimensions: (self.rows.unwrap_or(0), self.columns.unwrap_or(0)),
            relative_path: relative_path.to_string(),
            window: self.window,
            series_description: self
                .series_description
                .clone()
                .unwrap_or_else(|| DEFAULT_SERIES_DESCRIPTION.to_string()),
        }
    }

    /// Descriptive study metadata, `Unknown` where absent.
    pub fn study_metadata(&self) -> StudyMetadata {
        let or_unknown = |value: &Option<String>| value.clone().unwrap_or_else(|| UNKNOWN.into());
        StudyMetadata {
            patient_name: or_unknown(&self.patient_name),
            study_date: or_unknown(&self.study_date),
            description: or_unknown(&self.study_description),
        }
    }
}

/// Result of scanning one study root.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Series in discovery order of their first slice
    pub series: Vec<Series>,

    /// Metadata of the first successfully parsed slice
    pub metadata: StudyMetadata,

    /// Number of candidate files that failed to parse
    pub skipped: usize,
}

impl ScanOutcome {
    /// Total number of slices across all series.
    pub fn slice_count(&self) -> usize {
        self.series.iter().map(|s| s.slices.len()).sum()
    }

    /// Iterate all slices in series order, then image order.
    pub fn slices(&self) -> impl Iterator<Item = &Slice> {
        self.series.iter().flat_map(|s| s.slices.iter())
    }
}

// =============================================================================
// Slice Catalog
// =============================================================================

/// Scans study directories through a [`SliceDecoder`].
pub struct SliceCatalog<D: SliceDecoder> {
    decoder: Arc<D>,
}

impl<D: SliceDecoder> Clone for SliceCatalog<D> {
    fn clone(&self) -> Self {
        Self {
            decoder: Arc::clone(&self.decoder),
        }
    }
}

impl<D: SliceDecoder> SliceCatalog<D> {
    pub fn new(decoder: Arc<D>) -> Self {
        Self { decoder }
    }

    /// Scan a study root.
    ///
    /// Files are visited in lexicographic path order so discovery order (and
    /// therefore the order-index tie-break) is stable across runs. A file that
    /// fails to parse is logged and skipped; the scan itself never fails.
    ///
    /// This is blocking; call it from `spawn_blocking`.
    pub fn scan(&self, study_id: &str, root: &Path) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let mut metadata: Option<StudyMetadata> = None;
        let mut positions: HashMap<String, usize> = HashMap::new();

        let entries = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(error = %err, root = %root.display(), "Skipping unreadable path");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_raw_slice(entry.path()));

        for entry in entries {
            let path = entry.path();
            let Some(relative_path) = relative_path(root, path) else {
                continue;
            };

            let header = match self.decoder.read_header(path) {
                Ok(header) => header,
                Err(err) => {
                    warn!(
                        study_id = %study_id,
                        path = %relative_path,
                        error = %err,
                        "Skipping unparsable slice"
                    );
                    outcome.skipped += 1;
                    continue;
                }
            };

            if metadata.is_none() {
                metadata = Some(header.study_metadata());
            }

            let slice = header.resolve(study_id, &relative_path);
            match positions.get(&slice.series_key) {
                Some(&position) => outcome.series[position].slices.push(slice),
                None => {
                    positions.insert(slice.series_key.clone(), outcome.series.len());
                    outcome.series.push(Series {
                        series_key: slice.series_key.clone(),
                        description: slice.series_description.clone(),
                        slices: vec![slice],
                    });
                }
            }
        }

        // Stable: equal order indexes keep discovery order
        for series in &mut outcome.series {
            series.slices.sort_by_key(|slice| slice.order_index);
        }

        outcome.metadata = metadata.unwrap_or_default();
        debug!(
            study_id = %study_id,
            series = outcome.series.len(),
            slices = outcome.slice_count(),
            skipped = outcome.skipped,
            "Scanned study"
        );
        outcome
    }
}

/// `/`-separated path of `path` relative to `root`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
