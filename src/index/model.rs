//! Persisted study index.
//!
//! One JSON document per study. It is written wholesale on every rebuild and
//! read wholesale on every load; only the annotation map supports point
//! updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{Slice, StudyMetadata};
use crate::error::StudyError;
use crate::render::Window;

/// An external annotation attached to one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub note: String,

    /// Points in image pixel coordinates (`[x, y]`)
    #[serde(default)]
    pub points: Vec<[f64; 2]>,
}

/// `series_key -> image_key -> annotation`
pub type AnnotationMap = BTreeMap<String, BTreeMap<String, Annotation>>;

/// One image of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub image_key: String,
    pub order_index: i64,

    /// Path of the raw slice relative to the study root
    pub relative_path: String,

    pub pixel_spacing: [f64; 2],
    pub rows: u32,
    pub columns: u32,

    /// File name of the preview artifact
    pub preview: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<Window>,
}

impl ImageEntry {
    pub fn from_slice(slice: &Slice, preview: impl Into<String>) -> Self {
        Self {
            image_key: slice.image_key.clone(),
            order_index: slice.order_index,
            relative_path: slice.relative_path.clone(),
            pixel_spacing: slice.pixel_spacing,
            rows: slice.dimensions.0,
            columns: slice.dimensions.1,
            preview: preview.into(),
            window: slice.window,
        }
    }

    /// Rebuild the scan-time slice this entry was indexed from.
    pub fn to_slice(&self, study_id: &str, series: &SeriesEntry) -> Slice {
        Slice {
            study_id: study_id.to_string(),
            series_key: series.series_key.clone(),
            image_key: self.image_key.clone(),
            order_index: self.order_index,
            pixel_spacing: self.pixel_spacing,
            dimensions: (self.rows, self.columns),
            relative_path: self.relative_path.clone(),
            window: self.window,
            series_description: series.description.clone(),
        }
    }
}

/// An ordered series of images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub series_key: String,
    pub description: String,

    /// Sorted by `order_index`, ties in discovery order
    pub images: Vec<ImageEntry>,
}

impl SeriesEntry {
    pub fn image(&self, image_key: &str) -> Option<&ImageEntry> {
        self.images.iter().find(|i| i.image_key == image_key)
    }

    /// Position of an image within the series.
    pub fn position(&self, image_key: &str) -> Option<usize> {
        self.images.iter().position(|i| i.image_key == image_key)
    }
}

/// The durable record of a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyIndex {
    pub study_id: String,
    pub patient_name: String,
    pub study_date: String,
    pub description: String,

    /// Series in discovery order; the first is the primary series
    pub series: Vec<SeriesEntry>,

    #[serde(default)]
    pub annotations: AnnotationMap,
}

impl StudyIndex {
    pub fn new(study_id: impl Into<String>, metadata: StudyMetadata) -> Self {
        Self {
            study_id: study_id.into(),
            patient_name: metadata.patient_name,
            study_date: metadata.study_date,
            description: metadata.description,
            series: Vec::new(),
            annotations: AnnotationMap::new(),
        }
    }

    /// The series used for volume reconstruction.
    pub fn primary_series(&self) -> Option<&SeriesEntry> {
        self.series.first()
    }

    pub fn image_count(&self) -> usize {
        self.series.iter().map(|s| s.images.len()).sum()
    }

    /// Look up a series.
    pub fn series(&self, series_key: &str) -> Result<&SeriesEntry, StudyError> {
        self.series
            .iter()
            .find(|s| s.series_key == series_key)
            .ok_or_else(|| StudyError::SeriesNotFound {
                study_id: self.study_id.clone(),
                series_key: series_key.to_string(),
            })
    }

    /// Look up an image.
    pub fn image(&self, series_key: &str, image_key: &str) -> Result<&ImageEntry, StudyError> {
        self.series(series_key)?
            .image(image_key)
            .ok_or_else(|| StudyError::ImageNotFound {
                study_id: self.study_id.clone(),
                series_key: series_key.to_string(),
                image_key: image_key.to_string(),
            })
    }

    pub fn annotation(&self, series_key: &str, image_key: &str) -> Option<&Annotation> {
        self.annotations.get(series_key)?.get(image_key)
    }

    /// Set or clear the annotation of an existing image.
    pub fn set_annotation(
        &mut self,
        series_key: &str,
        image_key: &str,
        annotation: Option<Annotation>,
    ) -> Result<(), StudyError> {
        self.image(series_key, image_key)?;

        match annotation {
            Some(annotation) => {
                self.annotations
                    .entry(series_key.to_string())
                    .or_default()
                    .insert(image_key.to_string(), annotation);
            }
            None => {
                if let Some(images) = self.annotations.get_mut(series_key) {
                    images.remove(image_key);
                    if images.is_empty() {
                        self.annotations.remove(series_key);
                    }
                }
            }
        }
        Ok(())
    }

    /// Carry over annotations from a previous index for images that still exist.
    pub fn retain_annotations_from(&mut self, previous: &StudyIndex) {
        for (series_key, images) in &previous.annotations {
            for (image_key, annotation) in images {
                if self.image(series_key, image_key).is_ok() {
                    self.annotations
                        .entry(series_key.clone())
                        .or_default()
                        .insert(image_key.clone(), annotation.clone());
                }
            }
        }
    }

    pub fn summary(&self) -> StudySummary {
        StudySummary {
            study_id: self.study_id.clone(),
            patient_name: self.patient_name.clone(),
            study_date: self.study_date.clone(),
            description: self.description.clone(),
            series_count: self.series.len(),
            image_count: self.image_count(),
            indexed: true,
        }
    }
}

/// Listing entry for a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySummary {
    pub study_id: String,
    pub patient_name: String,
    pub study_date: String,
    pub description: String,
    pub series_count: usize,
    pub image_count: usize,

    /// `false` when no index has been built yet
    pub indexed: bool,
}

impl StudySummary {
    /// Summary of a study directory without an index.
    pub fn unindexed(study_id: impl Into<String>) -> Self {
        let metadata = StudyMetadata::default();
        Self {
            study_id: study_id.into(),
            patient_name: metadata.patient_name,
            study_date: metadata.study_date,
            description: metadata.description,
            series_count: 0,
            image_count: 0,
            indexed: false,
        }
    }
}
