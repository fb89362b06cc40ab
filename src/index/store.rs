//! On-disk study store.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data-dir>/
//! ├── studies/<study_id>/...             raw slices (any nesting)
//! └── derived/<study_id>/
//!     ├── index.json                     persisted StudyIndex
//!     └── previews/<artifact>.jpg        preview artifacts
//! ```
//!
//! Loaded indexes are kept in a small LRU in front of the disk. The in-memory
//! copy is a cache of the durable JSON and is dropped whenever the JSON
//! changes.

use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StudyError};

use super::model::StudyIndex;

/// Default number of loaded indexes kept in memory.
pub const DEFAULT_INDEX_CACHE_CAPACITY: usize = 32;

/// Maximum length of a study id.
pub const MAX_STUDY_ID_LEN: usize = 128;

const STUDIES_DIR: &str = "studies";
const DERIVED_DIR: &str = "derived";
const PREVIEWS_DIR: &str = "previews";
const INDEX_FILE: &str = "index.json";

/// Check that a study id is safe to use as a directory name.
pub fn validate_study_id(study_id: &str) -> Result<(), StudyError> {
    let valid = !study_id.is_empty()
        && study_id.len() <= MAX_STUDY_ID_LEN
        && study_id != "."
        && study_id != ".."
        && study_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(StudyError::InvalidStudyId {
            study_id: study_id.to_string(),
        })
    }
}

/// A file received for a new study.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client-supplied file name; only the final component is used
    pub name: String,
    pub data: Bytes,
}

// =============================================================================
// Study Store
// =============================================================================

/// Raw and derived study storage rooted at a data directory.
pub struct StudyStore {
    data_dir: PathBuf,
    index_cache: Mutex<LruCache<String, Arc<StudyIndex>>>,

    /// Serializes index writes so annotation updates never interleave
    write_lock: Mutex<()>,
}

impl StudyStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_index_capacity(data_dir, DEFAULT_INDEX_CACHE_CAPACITY)
    }

    pub fn with_index_capacity(data_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            data_dir: data_dir.into(),
            index_cache: Mutex::new(LruCache::new(capacity)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Create the top-level directories.
    pub async fn ensure_layout(&self) -> Result<(), StudyError> {
        for dir in [self.studies_dir(), self.data_dir.join(DERIVED_DIR)] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::new(&dir, e))?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Paths
    // -------------------------------------------------------------------------

    pub fn studies_dir(&self) -> PathBuf {
        self.data_dir.join(STUDIES_DIR)
    }

    /// Root directory of a study's raw slices.
    pub fn study_root(&self, study_id: &str) -> PathBuf {
        self.studies_dir().join(study_id)
    }

    pub fn derived_dir(&self, study_id: &str) -> PathBuf {
        self.data_dir.join(DERIVED_DIR).join(study_id)
    }

    pub fn preview_dir(&self, study_id: &str) -> PathBuf {
        self.derived_dir(study_id).join(PREVIEWS_DIR)
    }

    pub fn preview_path(&self, study_id: &str, artifact: &str) -> PathBuf {
        self.preview_dir(study_id).join(artifact)
    }

    pub fn index_path(&self, study_id: &str) -> PathBuf {
        self.derived_dir(study_id).join(INDEX_FILE)
    }

    // -------------------------------------------------------------------------
    // Studies
    // -------------------------------------------------------------------------

    /// Ids of all study directories, sorted.
    pub async fn list_study_ids(&self) -> Result<Vec<String>, StudyError> {
        let dir = self.studies_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::new(&dir, e).into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::new(&dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(id) = entry.file_name().to_str() {
                if validate_study_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Whether the raw study directory exists.
    pub async fn study_exists(&self, study_id: &str) -> bool {
        if validate_study_id(study_id).is_err() {
            return false;
        }
        fs::metadata(self.study_root(study_id))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Write uploaded files into a freshly allocated study directory.
    ///
    /// Returns the new study id.
    pub async fn create_study(&self, files: Vec<UploadedFile>) -> Result<String, StudyError> {
        if files.is_empty() {
            return Err(StudyError::InvalidUpload {
                message: "no files in upload".to_string(),
            });
        }

        let study_id = uuid::Uuid::new_v4().simple().to_string();
        let root = self.study_root(&study_id);
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::new(&root, e))?;

        for (position, file) in files.iter().enumerate() {
            let Some(name) = Path::new(&file.name)
                .file_name()
                .and_then(|n| n.to_str())
                .filter(|n| !n.is_empty())
            else {
                let _ = fs::remove_dir_all(&root).await;
                return Err(StudyError::InvalidUpload {
                    message: format!("invalid file name {:?}", file.name),
                });
            };

            let mut path = root.join(name);
            if fs::try_exists(&path).await.unwrap_or(false) {
                path = root.join(format!("{:04}_{}", position, name));
            }
            if let Err(e) = fs::write(&path, &file.data).await {
                let _ = fs::remove_dir_all(&root).await;
                return Err(StorageError::new(&path, e).into());
            }
        }

        info!(study_id = %study_id, files = files.len(), "Created study");
        Ok(study_id)
    }

    /// Remove a study's raw and derived trees and its cached index.
    ///
    /// Returns `false` if there was nothing to delete.
    pub async fn delete_study(&self, study_id: &str) -> Result<bool, StudyError> {
        validate_study_id(study_id)?;
        let _guard = self.write_lock.lock().await;
        self.invalidate(study_id).await;

        let mut removed = false;
        for dir in [self.study_root(study_id), self.derived_dir(study_id)] {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::new(&dir, e).into()),
            }
        }
        if removed {
            info!(study_id = %study_id, "Deleted study");
        }
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Index persistence
    // -------------------------------------------------------------------------

    /// Load a study's index, from memory if cached.
    ///
    /// A missing or unparsable index is `None`; callers rebuild.
    pub async fn load_index(&self, study_id: &str) -> Option<Arc<StudyIndex>> {
        validate_study_id(study_id).ok()?;

        if let Some(index) = self.index_cache.lock().await.get(study_id) {
            return Some(Arc::clone(index));
        }

        let path = self.index_path(study_id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(study_id = %study_id, error = %e, "Failed to read study index");
                return None;
            }
        };

        let index: StudyIndex = match serde_json::from_slice(&raw) {
            Ok(index) => index,
            Err(e) => {
                warn!(study_id = %study_id, error = %e, "Discarding corrupt study index");
                return None;
            }
        };

        let index = Arc::new(index);
        self.index_cache
            .lock()
            .await
            .put(study_id.to_string(), Arc::clone(&index));
        Some(index)
    }

    /// Persist an index, replacing any previous one.
    ///
    /// The JSON is written to a temporary file and renamed into place.
    pub async fn save_index(&self, index: StudyIndex) -> Result<Arc<StudyIndex>, StudyError> {
        let _guard = self.write_lock.lock().await;
        self.write_index(index).await
    }

    /// Persist a rebuilt index, carrying over annotations of the current one.
    ///
    /// The current index is read under the write lock, so annotation updates
    /// that land while a rebuild is running are not lost.
    pub async fn replace_index(
        &self,
        mut index: StudyIndex,
    ) -> Result<Arc<StudyIndex>, StudyError> {
        let _guard = self.write_lock.lock().await;
        if let Some(previous) = self.load_index(&index.study_id).await {
            index.retain_annotations_from(&previous);
        }
        self.write_index(index).await
    }

    /// Apply `update` to the current index and persist the result.
    pub async fn update_index<F>(
        &self,
        study_id: &str,
        update: F,
    ) -> Result<Arc<StudyIndex>, StudyError>
    where
        F: FnOnce(&mut StudyIndex) -> Result<(), StudyError>,
    {
        let _guard = self.write_lock.lock().await;
        let current = self
            .load_index(study_id)
            .await
            .ok_or_else(|| StudyError::StudyNotFound {
                study_id: study_id.to_string(),
            })?;

        let mut index = (*current).clone();
        update(&mut index)?;
        self.write_index(index).await
    }

    /// Drop a study's cached index.
    pub async fn invalidate(&self, study_id: &str) {
        self.index_cache.lock().await.pop(study_id);
    }

    pub async fn cached_index_count(&self) -> usize {
        self.index_cache.lock().await.len()
    }

    async fn write_index(&self, index: StudyIndex) -> Result<Arc<StudyIndex>, StudyError> {
        validate_study_id(&index.study_id)?;
        let study_id = index.study_id.clone();
        let dir = self.derived_dir(&study_id);
        let path = self.index_path(&study_id);
        let temp = dir.join(format!("{}.tmp", INDEX_FILE));

        let json = serde_json::to_vec_pretty(&index).map_err(|e| StorageError::new(&path, e))?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::new(&dir, e))?;
        fs::write(&temp, &json)
            .await
            .map_err(|e| StorageError::new(&temp, e))?;
        fs::rename(&temp, &path)
            .await
            .map_err(|e| StorageError::new(&path, e))?;

        debug!(study_id = %study_id, bytes = json.len(), "Saved study index");

        let index = Arc::new(index);
        self.index_cache
            .lock()
            .await
            .put(study_id, Arc::clone(&index));
        Ok(index)
    }
}
