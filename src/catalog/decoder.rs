//! Raw slice decoding.
//!
//! The [`SliceDecoder`] trait is the seam between the catalog and the
//! library that understands the on-disk slice format. The catalog only needs
//! identity, ordering, geometry and a pixel grid; every header field is
//! optional and defaults are applied once, at scan time, by
//! [`SliceHeader::resolve`](super::scan::SliceHeader).

use std::path::Path;

use dicom::dictionary_std::tags;
use dicom::object::{open_file, DefaultDicomObject, OpenFileOptions};
use dicom::pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption};
use ndarray::Array2;

use crate::error::DecodeError;
use crate::render::Window;

/// File extensions recognized as raw slices (compared case-insensitively).
pub const RAW_EXTENSIONS: &[&str] = &["dcm", "dicom"];

/// Decoded pixel values of one slice, indexed `[row, column]`.
pub type PixelGrid = Array2<f32>;

/// Check if a path has a recognized raw slice extension.
pub fn is_raw_slice(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| RAW_EXTENSIONS.iter().any(|r| ext.eq_ignore_ascii_case(r)))
}

// =============================================================================
// Slice Header
// =============================================================================

/// Metadata extracted from a slice without decoding its pixels.
///
/// Every field is optional; absence is resolved against the default table
/// when the header is turned into a [`Slice`](super::Slice).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceHeader {
    pub series_uid: Option<String>,
    pub instance_uid: Option<String>,
    pub instance_number: Option<i64>,
    /// Row and column spacing in millimetres
    pub pixel_spacing: Option<[f64; 2]>,
    pub rows: Option<u32>,
    pub columns: Option<u32>,
    pub series_description: Option<String>,
    pub patient_name: Option<String>,
    pub study_date: Option<String>,
    pub study_description: Option<String>,
    /// Window embedded in the slice, if any
    pub window: Option<Window>,
}

// =============================================================================
// SliceDecoder Trait
// =============================================================================

/// Decodes raw slice files.
///
/// Implementations are blocking and are always driven from
/// `spawn_blocking` or other dedicated threads.
pub trait SliceDecoder: Send + Sync + 'static {
    /// Read identity, ordering and geometry without decoding pixel data.
    fn read_header(&self, path: &Path) -> Result<SliceHeader, DecodeError>;

    /// Decode the first frame of pixel data.
    fn read_pixels(&self, path: &Path) -> Result<PixelGrid, DecodeError>;
}

// =============================================================================
// DICOM Decoder
// =============================================================================

/// [`SliceDecoder`] backed by the `dicom` crate.
///
/// Pixel values are returned with the modality LUT (rescale slope/intercept)
/// applied and no VOI LUT, so windowing operates on physical units. Only
/// single-sample (grayscale) images are supported; for multi-frame objects the
/// first frame is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomSliceDecoder;

impl DicomSliceDecoder {
    pub fn new() -> Self {
        Self
    }

    fn read_object(path: &Path, with_pixels: bool) -> Result<DefaultDicomObject, DecodeError> {
        let result = if with_pixels {
            open_file(path)
        } else {
            OpenFileOptions::new()
                .read_until(tags::PIXEL_DATA)
                .open_file(path)
        };
        result.map_err(|e| DecodeError::Dicom(format!("{}: {}", path.display(), e)))
    }
}

impl SliceDecoder for DicomSliceDecoder {
    fn read_header(&self, path: &Path) -> Result<SliceHeader, DecodeError> {
        let obj = Self::read_object(path, false)?;

        let pixel_spacing = multi_float(&obj, tags::PIXEL_SPACING)
            .or_else(|| multi_float(&obj, tags::IMAGER_PIXEL_SPACING))
            .and_then(|values| match values.as_slice() {
                [row, col, ..] => Some([*row, *col]),
                _ => None,
            });

        let window = match (
            multi_float(&obj, tags::WINDOW_CENTER),
            multi_float(&obj, tags::WINDOW_WIDTH),
        ) {
            (Some(centers), Some(widths)) => centers
                .first()
                .zip(widths.first())
                .map(|(center, width)| Window::new(*center, *width)),
            _ => None,
        };

        Ok(SliceHeader {
            series_uid: string(&obj, tags::SERIES_INSTANCE_UID),
            instance_uid: string(&obj, tags::SOP_INSTANCE_UID),
            instance_number: obj
                .element(tags::INSTANCE_NUMBER)
                .ok()
                .and_then(|e| e.to_int::<i64>().ok()),
            pixel_spacing,
            rows: obj
                .element(tags::ROWS)
                .ok()
                .and_then(|e| e.to_int::<u32>().ok()),
            columns: obj
                .element(tags::COLUMNS)
                .ok()
                .and_then(|e| e.to_int::<u32>().ok()),
            series_description: string(&obj, tags::SERIES_DESCRIPTION),
            patient_name: string(&obj, tags::PATIENT_NAME),
            study_date: string(&obj, tags::STUDY_DATE),
            study_description: string(&obj, tags::STUDY_DESCRIPTION),
            window,
        })
    }

    fn read_pixels(&self, path: &Path) -> Result<PixelGrid, DecodeError> {
        let obj = Self::read_object(path, true)?;

        let rows = obj
            .element(tags::ROWS)
            .ok()
            .and_then(|e| e.to_int::<usize>().ok())
            .ok_or(DecodeError::MissingAttribute("Rows"))?;
        let cols = obj
            .element(tags::COLUMNS)
            .ok()
            .and_then(|e| e.to_int::<usize>().ok())
            .ok_or(DecodeError::MissingAttribute("Columns"))?;
        let samples = obj
            .element(tags::SAMPLES_PER_PIXEL)
            .ok()
            .and_then(|e| e.to_int::<u16>().ok())
            .unwrap_or(1);
        if samples != 1 {
            return Err(DecodeError::UnsupportedPixelFormat(format!(
                "{} samples per pixel",
                samples
            )));
        }

        let pixel_data = obj
            .decode_pixel_data()
            .map_err(|e| DecodeError::Dicom(e.to_string()))?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::Default)
            .with_voi_lut(VoiLutOption::Identity);
        let mut values: Vec<f32> = pixel_data
            .to_vec_frame_with_options::<f32>(0, &options)
            .map_err(|e| DecodeError::UnsupportedPixelFormat(e.to_string()))?;
        values.truncate(rows * cols);

        if values.len() != rows * cols {
            return Err(DecodeError::UnsupportedPixelFormat(format!(
                "expected {}x{} pixels, got {}",
                rows,
                cols,
                values.len()
            )));
        }

        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| DecodeError::UnsupportedPixelFormat(e.to_string()))
    }
}

fn string(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).trim().to_string())
        .filter(|s| !s.is_empty())
}

fn multi_float(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<Vec<f64>> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_multi_float64().ok())
        .filter(|values| !values.is_empty())
}
