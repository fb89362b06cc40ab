//! Volume reconstruction.
//!
//! The primary series of a study is stacked into a dense `[slices, rows, cols]`
//! grid and resliced along one of three orthogonal axes:
//!
//! | Orientation | Axis | Output shape      |
//! |-------------|------|-------------------|
//! | axial       | 0    | `[rows, cols]`    |
//! | coronal     | 1    | `[slices, cols]`  |
//! | sagittal    | 2    | `[slices, rows]`  |
//!
//! Loading a volume reads every slice of the series, so loads are gated by a
//! process-wide counting semaphore. Waiters are served in FIFO order.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use image::GrayImage;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::catalog::SliceDecoder;
use crate::error::StudyError;
use crate::index::StudyIndex;

use super::window::{default_window, Window};

/// Default number of concurrent volume loads.
pub const DEFAULT_RECONSTRUCTION_PERMITS: usize = 2;

// =============================================================================
// Orientation
// =============================================================================

/// Axis along which a volume is resliced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Coronal,
        Orientation::Sagittal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Orientation::Axial => "axial",
            Orientation::Coronal => "coronal",
            Orientation::Sagittal => "sagittal",
        }
    }

    /// Volume axis indexed by this orientation.
    pub fn axis(self) -> Axis {
        match self {
            Orientation::Axial => Axis(0),
            Orientation::Coronal => Axis(1),
            Orientation::Sagittal => Axis(2),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Orientation {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Orientation::ALL
            .into_iter()
            .find(|o| o.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| StudyError::UnknownOrientation {
                name: s.to_string(),
            })
    }
}

// =============================================================================
// Volume
// =============================================================================

/// A dense voxel grid with its fixed default window.
#[derive(Debug, Clone)]
pub struct Volume {
    voxels: Array3<f32>,
    window: Window,
}

impl Volume {
    pub fn new(voxels: Array3<f32>, window: Window) -> Self {
        Self { voxels, window }
    }

    /// `[slices, rows, cols]`
    pub fn shape(&self) -> [usize; 3] {
        let (slices, rows, cols) = self.voxels.dim();
        [slices, rows, cols]
    }

    /// Number of slices along an orientation.
    pub fn extent(&self, orientation: Orientation) -> usize {
        self.voxels.len_of(orientation.axis())
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// Borrow one cross-section.
    ///
    /// Fails with [`StudyError::SliceOutOfRange`] unless `index < extent`.
    pub fn slice_view(
        &self,
        orientation: Orientation,
        index: usize,
    ) -> Result<ArrayView2<'_, f32>, StudyError> {
        let extent = self.extent(orientation);
        if index >= extent {
            return Err(StudyError::SliceOutOfRange {
                orientation: orientation.name(),
                index,
                extent,
            });
        }
        Ok(self.voxels.index_axis(orientation.axis(), index))
    }

    /// Copy one cross-section out of the volume.
    pub fn extract_slice(
        &self,
        orientation: Orientation,
        index: usize,
    ) -> Result<Array2<f32>, StudyError> {
        Ok(self.slice_view(orientation, index)?.to_owned())
    }

    /// Window one cross-section with the volume's default window.
    pub fn render_slice(
        &self,
        orientation: Orientation,
        index: usize,
    ) -> Result<GrayImage, StudyError> {
        Ok(self.window.render(self.slice_view(orientation, index)?))
    }
}

// =============================================================================
// Volume Reconstructor
// =============================================================================

/// Loads study volumes under a bounded concurrency limit.
pub struct VolumeReconstructor<D: SliceDecoder> {
    decoder: Arc<D>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl<D: SliceDecoder> VolumeReconstructor<D> {
    /// Create a reconstructor allowing `max_concurrent` loads at once (minimum 1).
    pub fn new(decoder: Arc<D>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            decoder,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of loads that could start right now without waiting.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Assemble the primary series of a study into a volume.
    ///
    /// Waits for a reconstruction permit, then decodes every slice on the
    /// blocking pool. Slices that fail to decode, or whose shape differs from
    /// the first decoded slice, are skipped.
    pub async fn load_volume(
        &self,
        study_root: PathBuf,
        index: &StudyIndex,
    ) -> Result<Volume, StudyError> {
        let series = index
            .primary_series()
            .ok_or_else(|| StudyError::NoDecodableSlices {
                study_id: index.study_id.clone(),
            })?;

        let paths: Vec<PathBuf> = series
            .images
            .iter()
            .map(|image| study_root.join(&image.relative_path))
            .collect();
        let embedded = series.images.first().and_then(|image| image.window);
        let study_id = index.study_id.clone();

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(StudyError::task_failed)?;

        debug!(study_id = %study_id, slices = paths.len(), "Loading volume");

        let decoder = Arc::clone(&self.decoder);
        tokio::task::spawn_blocking(move || assemble(&*decoder, &study_id, &paths, embedded))
            .await
            .map_err(StudyError::task_failed)?
    }

    /// Number of slices along `orientation`, computed from the index alone.
    ///
    /// Axial counts the primary-series images whose dimensions match the
    /// first image; coronal and sagittal are the row and column counts.
    pub fn info_for_orientation(
        &self,
        index: &StudyIndex,
        orientation: Orientation,
    ) -> Result<usize, StudyError> {
        let series = index
            .primary_series()
            .ok_or_else(|| StudyError::NoDecodableSlices {
                study_id: index.study_id.clone(),
            })?;
        let Some(first) = series.images.first() else {
            return Ok(0);
        };

        Ok(match orientation {
            Orientation::Axial => series
                .images
                .iter()
                .filter(|image| image.rows == first.rows && image.columns == first.columns)
                .count(),
            Orientation::Coronal => first.rows as usize,
            Orientation::Sagittal => first.columns as usize,
        })
    }
}

fn assemble<D: SliceDecoder>(
    decoder: &D,
    study_id: &str,
    paths: &[PathBuf],
    embedded: Option<Window>,
) -> Result<Volume, StudyError> {
    let mut grids: Vec<Array2<f32>> = Vec::with_capacity(paths.len());

    for path in paths {
        let grid = match decoder.read_pixels(path) {
            Ok(grid) => grid,
            Err(err) => {
                warn!(study_id = %study_id, path = %path.display(), error = %err, "Skipping undecodable slice");
                continue;
            }
        };
        if let Some(first) = grids.first() {
            if first.dim() != grid.dim() {
                warn!(
                    study_id = %study_id,
                    path = %path.display(),
                    expected = ?first.dim(),
                    actual = ?grid.dim(),
                    "Skipping slice with mismatched shape"
                );
                continue;
            }
        }
        grids.push(grid);
    }

    if grids.is_empty() {
        return Err(StudyError::NoDecodableSlices {
            study_id: study_id.to_string(),
        });
    }

    let views: Vec<ArrayView2<'_, f32>> = grids.iter().map(|g| g.view()).collect();
    let voxels = ndarray::stack(Axis(0), &views).map_err(StudyError::encode)?;
    let window = default_window(embedded, voxels.iter());

    Ok(Volume::new(voxels, window))
}
