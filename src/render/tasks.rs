//! Background ingestion task tracking.
//!
//! Each ingestion run gets an id and a `watch` channel. The registry keeps the
//! receiving half so status requests read the latest pushed value directly.
//! Old tasks are forgotten in LRU order.

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::StudyError;

use super::scheduler::{progress_channel, IngestProgress, ProgressReceiver, ProgressSender};

/// Number of tasks remembered.
pub const DEFAULT_TASK_HISTORY: usize = 256;

/// Status of one ingestion task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub study_id: String,

    #[serde(flatten)]
    pub progress: IngestProgress,
}

struct TaskEntry {
    study_id: String,
    progress: ProgressReceiver,
}

/// Registry of ingestion tasks and their progress channels.
pub struct TaskRegistry {
    tasks: Mutex<LruCache<String, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TASK_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            tasks: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Register a new task and return its id and progress sender.
    pub async fn register(&self, study_id: &str) -> (String, ProgressSender) {
        let task_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = progress_channel();
        self.tasks.lock().await.put(
            task_id.clone(),
            TaskEntry {
                study_id: study_id.to_string(),
                progress: rx,
            },
        );
        (task_id, tx)
    }

    /// Latest status of a task.
    pub async fn status(&self, task_id: &str) -> Result<TaskStatus, StudyError> {
        let tasks = self.tasks.lock().await;
        let entry = tasks.peek(task_id).ok_or_else(|| StudyError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;
        let progress = entry.progress.borrow().clone();

        Ok(TaskStatus {
            task_id: task_id.to_string(),
            study_id: entry.study_id.clone(),
            progress,
        })
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
