//! Bounded-parallel batch conversion.
//!
//! Runs [`PreviewConverter::convert`] over every slice of a study on the
//! blocking thread pool, with at most `workers` conversions in flight. Each
//! worker holds an owned semaphore permit for the duration of its blocking
//! job. Completion order is unspecified; results are returned in input order.
//!
//! Progress is pushed through a `tokio::sync::watch` channel so observers
//! always see the latest counts without polling the scheduler.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::catalog::{Slice, SliceDecoder};
use crate::error::StudyError;

use super::cache::{PreviewCache, PreviewKey};
use super::converter::{PreviewArtifact, PreviewConverter};

/// Default number of concurrent conversions.
pub const DEFAULT_CONVERSION_WORKERS: usize = 2;

// =============================================================================
// Progress
// =============================================================================

/// Phase of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestState {
    Scanning,
    Converting,
    Indexing,
    Completed,
    Failed,
}

impl IngestState {
    /// `true` once the run can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, IngestState::Completed | IngestState::Failed)
    }
}

/// Latest known progress of an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestProgress {
    pub state: IngestState,

    /// Slices scheduled for conversion
    pub total: usize,

    /// Slices converted (or already converted)
    pub completed: usize,

    /// Slices that failed to convert
    pub failed: usize,

    /// Failure reason, when `state` is `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Default for IngestProgress {
    fn default() -> Self {
        Self {
            state: IngestState::Scanning,
            total: 0,
            completed: 0,
            failed: 0,
            message: None,
        }
    }
}

/// Sending half of a progress channel.
pub type ProgressSender = watch::Sender<IngestProgress>;

/// Receiving half of a progress channel.
pub type ProgressReceiver = watch::Receiver<IngestProgress>;

/// Create a progress channel starting in the `Scanning` state.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    watch::channel(IngestProgress::default())
}

// =============================================================================
// Conversion Scheduler
// =============================================================================

/// Result of converting one slice.
#[derive(Debug)]
pub struct ConversionOutcome {
    pub slice: Slice,
    pub result: Result<PreviewArtifact, StudyError>,
}

/// Runs preview conversion over a batch of slices with a fixed worker count.
pub struct ConversionScheduler<D: SliceDecoder> {
    converter: Arc<PreviewConverter<D>>,
    workers: usize,
    cache: Option<Arc<PreviewCache>>,
}

impl<D: SliceDecoder> Clone for ConversionScheduler<D> {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
            workers: self.workers,
            cache: self.cache.clone(),
        }
    }
}

impl<D: SliceDecoder> ConversionScheduler<D> {
    /// Create a scheduler with `workers` concurrent conversions (minimum 1).
    pub fn new(converter: Arc<PreviewConverter<D>>, workers: usize) -> Self {
        Self {
            converter,
            workers: workers.max(1),
            cache: None,
        }
    }

    /// Publish newly converted previews into `cache`.
    pub fn with_cache(mut self, cache: Arc<PreviewCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Convert every slice, recording per-slice failures.
    ///
    /// A failing slice never aborts its siblings. Outcomes are returned in
    /// the order of `slices`.
    pub async fn run_all(
        &self,
        slices: Vec<Slice>,
        study_root: PathBuf,
        preview_dir: PathBuf,
        progress: Option<&ProgressSender>,
    ) -> Vec<ConversionOutcome> {
        let total = slices.len();
        if let Some(tx) = progress {
            tx.send_modify(|p| {
                p.state = IngestState::Converting;
                p.total = total;
                p.completed = 0;
                p.failed = 0;
            });
        }

        let permits = Arc::new(Semaphore::new(self.workers));
        let study_root = Arc::new(study_root);
        let preview_dir = Arc::new(preview_dir);
        let mut tasks = JoinSet::new();
        let mut outcomes: Vec<Option<ConversionOutcome>> = Vec::with_capacity(total);
        outcomes.resize_with(total, || None);

        for (position, slice) in slices.iter().cloned().enumerate() {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let converter = Arc::clone(&self.converter);
            let study_root = Arc::clone(&study_root);
            let preview_dir = Arc::clone(&preview_dir);

            tasks.spawn_blocking(move || {
                let _permit = permit;
                let result = converter.convert(&slice, &study_root, &preview_dir);
                (position, slice, result)
            });

            // Drain finished jobs while scheduling so progress stays current
            while let Some(joined) = tasks.try_join_next() {
                if let Some((position, outcome)) = self.record(joined, progress).await {
                    outcomes[position] = Some(outcome);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Some((position, outcome)) = self.record(joined, progress).await {
                outcomes[position] = Some(outcome);
            }
        }

        // A job that panicked leaves its slot empty; report it as failed
        outcomes
            .into_iter()
            .zip(slices)
            .map(|(outcome, slice)| {
                outcome.unwrap_or_else(|| ConversionOutcome {
                    slice,
                    result: Err(StudyError::task_failed("conversion task aborted")),
                })
            })
            .collect()
    }

    async fn record(
        &self,
        joined: Result<(usize, Slice, Result<PreviewArtifact, StudyError>), JoinError>,
        progress: Option<&ProgressSender>,
    ) -> Option<(usize, ConversionOutcome)> {
        let (position, slice, result) = match joined {
            Ok(done) => done,
            Err(err) => {
                warn!(error = %err, "Conversion task failed to complete");
                if let Some(tx) = progress {
                    tx.send_modify(|p| p.failed += 1);
                }
                return None;
            }
        };

        match &result {
            Ok(artifact) => {
                if artifact.converted {
                    if let Some(cache) = &self.cache {
                        let key =
                            PreviewKey::new(&*slice.study_id, &*slice.series_key, &*slice.image_key);
                        cache.put(key, artifact.data.clone()).await;
                    }
                }
                debug!(
                    study_id = %slice.study_id,
                    image_key = %slice.image_key,
                    converted = artifact.converted,
                    "Preview ready"
                );
                if let Some(tx) = progress {
                    tx.send_modify(|p| p.completed += 1);
                }
            }
            Err(err) => {
                warn!(
                    study_id = %slice.study_id,
                    path = %slice.relative_path,
                    error = %err,
                    "Preview conversion failed"
                );
                if let Some(tx) = progress {
                    tx.send_modify(|p| p.failed += 1);
                }
            }
        }

        Some((position, ConversionOutcome { slice, result }))
    }
}
