//! Linear intensity windowing.
//!
//! Maps physical pixel values to 8-bit display intensities:
//!
//! ```text
//! out = clip((v - (level - 0.5)) / (width - 1) + 0.5, 0, 1) * 255
//! ```
//!
//! The result is truncated to `u8`. Cached previews always use the default
//! window ([`default_window`]); presets and custom windows are only used for
//! uncached on-the-fly renders.

use std::str::FromStr;

use image::{GrayImage, Luma};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::StudyError;

/// A window (center/level and width) in physical pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Window center (level)
    pub level: f64,

    /// Window width
    pub width: f64,
}

impl Window {
    /// Create a window from level and width.
    pub fn new(level: f64, width: f64) -> Self {
        Self { level, width }
    }

    /// Map one pixel value to an 8-bit intensity.
    #[inline]
    pub fn apply(&self, value: f64) -> u8 {
        let lower = self.level - 0.5;
        if self.width <= 1.0 {
            return if value > lower { u8::MAX } else { 0 };
        }
        let normalized = ((value - lower) / (self.width - 1.0) + 0.5).clamp(0.0, 1.0);
        (normalized * 255.0) as u8
    }

    /// Window a 2-D grid of pixel values into a grayscale image.
    ///
    /// The grid is indexed `[row, column]`.
    pub fn render(&self, grid: ArrayView2<'_, f32>) -> GrayImage {
        let (rows, cols) = grid.dim();
        GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([self.apply(grid[[y as usize, x as usize]] as f64)])
        })
    }
}

/// Named window presets for common CT tissue classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPreset {
    Bone,
    Lung,
    Brain,
    Abdomen,
}

impl WindowPreset {
    /// All presets, in display order.
    pub const ALL: [WindowPreset; 4] = [
        WindowPreset::Bone,
        WindowPreset::Lung,
        WindowPreset::Brain,
        WindowPreset::Abdomen,
    ];

    /// The preset's window.
    pub fn window(self) -> Window {
        match self {
            WindowPreset::Bone => Window::new(500.0, 2000.0),
            WindowPreset::Lung => Window::new(-600.0, 1500.0),
            WindowPreset::Brain => Window::new(40.0, 80.0),
            WindowPreset::Abdomen => Window::new(50.0, 400.0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WindowPreset::Bone => "bone",
            WindowPreset::Lung => "lung",
            WindowPreset::Brain => "brain",
            WindowPreset::Abdomen => "abdomen",
        }
    }
}

impl FromStr for WindowPreset {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WindowPreset::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| StudyError::InvalidWindow {
                message: format!(
                    "unknown preset '{}' (expected one of: bone, lung, brain, abdomen)",
                    s
                ),
            })
    }
}

/// Resolve an optional per-request window from a preset name or level/width.
///
/// Returns `Ok(None)` when no window was requested. A preset takes precedence
/// over explicit values; level and width must be given together.
pub fn requested_window(
    preset: Option<&str>,
    level: Option<f64>,
    width: Option<f64>,
) -> Result<Option<Window>, StudyError> {
    if let Some(name) = preset {
        return Ok(Some(name.parse::<WindowPreset>()?.window()));
    }
    match (level, width) {
        (None, None) => Ok(None),
        (Some(level), Some(width)) if width > 0.0 && level.is_finite() && width.is_finite() => {
            Ok(Some(Window::new(level, width)))
        }
        (Some(_), Some(width)) => Err(StudyError::InvalidWindow {
            message: format!("width must be a positive number, got {}", width),
        }),
        _ => Err(StudyError::InvalidWindow {
            message: "level and width must be provided together".to_string(),
        }),
    }
}

/// The fixed default window for a grid.
///
/// Uses the window embedded in the source when present, otherwise spans the
/// full value range of the grid.
pub fn default_window<'a>(
    embedded: Option<Window>,
    values: impl IntoIterator<Item = &'a f32>,
) -> Window {
    if let Some(window) = embedded {
        if window.width > 0.0 {
            return window;
        }
    }

    let (min, max) = values
        .into_iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() || !max.is_finite() {
        return Window::new(0.0, 1.0);
    }

    let (min, max) = (min as f64, max as f64);
    Window::new((min + max) / 2.0, max - min + 1.0)
}
