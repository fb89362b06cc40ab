//! Study index: the durable, browsable record of a study.
//!
//! - [`StudyIndex`]: series, images and annotations of one study
//! - [`StudyStore`]: raw/derived directory layout, JSON persistence and an
//!   in-memory LRU of loaded indexes
//! - [`IndexBuilder`]: scan, convert and persist in one pass

mod builder;
mod model;
mod store;

pub use builder::IndexBuilder;
pub use model::{
    Annotation, AnnotationMap, ImageEntry, SeriesEntry, StudyIndex, StudySummary,
};
pub use store::{
    validate_study_id, StudyStore, UploadedFile, DEFAULT_INDEX_CACHE_CAPACITY, MAX_STUDY_ID_LEN,
};
