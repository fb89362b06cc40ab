//! Study index construction.
//!
//! A build scans the study root, converts every slice to a preview, and
//! assembles the persisted [`StudyIndex`] from the slices that converted
//! successfully. Builds always overwrite the previous index; annotations of
//! images that survive the rebuild are carried over.

use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::{SliceCatalog, SliceDecoder};
use crate::error::StudyError;
use crate::render::{ConversionScheduler, IngestState, ProgressSender};

use super::model::{ImageEntry, SeriesEntry, StudyIndex};
use super::store::{validate_study_id, StudyStore};

/// Builds and persists study indexes.
pub struct IndexBuilder<D: SliceDecoder> {
    catalog: SliceCatalog<D>,
    scheduler: ConversionScheduler<D>,
    store: Arc<StudyStore>,
}

impl<D: SliceDecoder> IndexBuilder<D> {
    pub fn new(
        catalog: SliceCatalog<D>,
        scheduler: ConversionScheduler<D>,
        store: Arc<StudyStore>,
    ) -> Self {
        Self {
            catalog,
            scheduler,
            store,
        }
    }

    pub fn store(&self) -> &Arc<StudyStore> {
        &self.store
    }

    /// Build (or rebuild) the index of a study.
    ///
    /// Reports phase changes and per-slice counts through `progress`. Fails
    /// with [`StudyError::NoDecodableSlices`] when no slice survives scanning
    /// and conversion.
    pub async fn build(
        &self,
        study_id: &str,
        progress: Option<&ProgressSender>,
    ) -> Result<Arc<StudyIndex>, StudyError> {
        let result = self.build_inner(study_id, progress).await;

        if let Some(tx) = progress {
            match &result {
                Ok(_) => tx.send_modify(|p| p.state = IngestState::Completed),
                Err(err) => {
                    let message = err.to_string();
                    tx.send_modify(|p| {
                        p.state = IngestState::Failed;
                        p.message = Some(message);
                    });
                }
            }
        }

        result
    }

    async fn build_inner(
        &self,
        study_id: &str,
        progress: Option<&ProgressSender>,
    ) -> Result<Arc<StudyIndex>, StudyError> {
        validate_study_id(study_id)?;
        if !self.store.study_exists(study_id).await {
            return Err(StudyError::StudyNotFound {
                study_id: study_id.to_string(),
            });
        }

        if let Some(tx) = progress {
            tx.send_modify(|p| p.state = IngestState::Scanning);
        }

        let study_root = self.store.study_root(study_id);
        let catalog = self.catalog.clone();
        let scan_root = study_root.clone();
        let scan_id = study_id.to_string();
        let scanned = tokio::task::spawn_blocking(move || catalog.scan(&scan_id, &scan_root))
            .await
            .map_err(StudyError::task_failed)?;

        if scanned.slice_count() == 0 {
            warn!(study_id = %study_id, skipped = scanned.skipped, "No parsable slices");
            return Err(StudyError::NoDecodableSlices {
                study_id: study_id.to_string(),
            });
        }

        let slices: Vec<_> = scanned.slices().cloned().collect();
        let outcomes = self
            .scheduler
            .run_all(
                slices,
                study_root,
                self.store.preview_dir(study_id),
                progress,
            )
            .await;

        if let Some(tx) = progress {
            tx.send_modify(|p| p.state = IngestState::Indexing);
        }

        // Outcomes are in the same order as the scanned slices
        let mut outcomes = outcomes.into_iter();
        let mut index = StudyIndex::new(study_id, scanned.metadata.clone());
        let mut failed = 0usize;

        for series in &scanned.series {
            let mut images = Vec::with_capacity(series.slices.len());
            for _ in &series.slices {
                let Some(outcome) = outcomes.next() else {
                    break;
                };
                match outcome.result {
                    Ok(artifact) => {
                        images.push(ImageEntry::from_slice(&outcome.slice, artifact.file_name))
                    }
                    Err(_) => failed += 1,
                }
            }
            if !images.is_empty() {
                index.series.push(SeriesEntry {
                    series_key: series.series_key.clone(),
                    description: series.description.clone(),
                    images,
                });
            }
        }

        if index.image_count() == 0 {
            return Err(StudyError::NoDecodableSlices {
                study_id: study_id.to_string(),
            });
        }

        let index = self.store.replace_index(index).await?;
        info!(
            study_id = %study_id,
            series = index.series.len(),
            images = index.image_count(),
            skipped = scanned.skipped,
            failed,
            "Built study index"
        );
        Ok(index)
    }
}
