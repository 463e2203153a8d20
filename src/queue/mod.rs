//! Durable priority queue of pending actions
//!
//! Items are ordered by descending priority, FIFO within a priority. The head
//! is returned without removal so a crash mid-execution leaves it
//! recoverable; the parallel scheduler removes by id instead.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::status::models::ActionKind;
use crate::storage::layout::StateLayout;

/// One pending unit of work against one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: String,
    pub server_name: String,
    pub action: ActionKind,
    pub priority: i32,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: String,
}

struct QueueInner {
    actions: Vec<QueuedAction>,
    current: Option<QueuedAction>,
}

/// Persistent action queue, scoped to one environment
pub struct ActionQueue {
    file: File,
    inner: RwLock<QueueInner>,
    stopped: AtomicBool,
}

impl ActionQueue {
    /// Open the queue for one environment, loading any persisted document.
    pub async fn open(layout: &StateLayout, environment: &str) -> Result<Self, ControllerError> {
        let file = layout.queue_file(environment);

        let actions = if file.exists().await {
            match file.read_json::<Vec<QueuedAction>>().await {
                Ok(actions) => actions,
                Err(err) => {
                    warn!("could not load queue document, starting empty: {err}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(Self {
            file,
            inner: RwLock::new(QueueInner {
                actions,
                current: None,
            }),
            stopped: AtomicBool::new(false),
        })
    }

    async fn persist(&self, actions: &[QueuedAction]) {
        if let Err(err) = self.file.write_json(&actions).await {
            warn!("could not persist queue document: {err}");
        }
    }

    /// Enqueue an action, assign it a fresh id, and persist.
    pub async fn add(
        &self,
        server_name: &str,
        action: ActionKind,
        priority: i32,
        tags: &str,
    ) -> QueuedAction {
        let item = QueuedAction {
            id: uuid::Uuid::new_v4().to_string(),
            server_name: server_name.to_string(),
            action,
            priority,
            queued_at: Utc::now(),
            started_at: None,
            tags: tags.to_string(),
        };

        debug!(
            "queueing {} for {} (priority {}, id {})",
            action, server_name, priority, item.id
        );

        let mut inner = self.inner.write().await;
        inner.actions.push(item.clone());
        // Stable sort keeps FIFO order within a priority.
        inner.actions.sort_by_key(|a| std::cmp::Reverse(a.priority));
        self.persist(&inner.actions).await;
        item
    }

    /// Return the head without removing it, stamping its start time.
    pub async fn next(&self) -> Option<QueuedAction> {
        let mut inner = self.inner.write().await;
        let action = inner.actions.first_mut()?;
        action.started_at = Some(Utc::now());
        let action = action.clone();
        inner.current = Some(action.clone());
        Some(action)
    }

    /// Remove the head and persist.
    pub async fn complete(&self) {
        let mut inner = self.inner.write().await;
        if !inner.actions.is_empty() {
            let done = inner.actions.remove(0);
            debug!("completed {} for {}", done.action, done.server_name);
        }
        inner.current = None;
        self.persist(&inner.actions).await;
    }

    /// Remove a specific item and persist. Used by the parallel scheduler,
    /// which dispatches without the head-of-queue assumption.
    pub async fn complete_by_id(&self, id: &str) {
        let mut inner = self.inner.write().await;
        match inner.actions.iter().position(|a| a.id == id) {
            Some(index) => {
                let done = inner.actions.remove(index);
                debug!("completed {} for {} by id", done.action, done.server_name);
                self.persist(&inner.actions).await;
            }
            None => warn!("action id {id} not found for completion"),
        }
    }

    /// Empty the queue and persist.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.actions.clear();
        inner.current = None;
        self.persist(&inner.actions).await;
    }

    pub async fn size(&self) -> usize {
        self.inner.read().await.actions.len()
    }

    /// Snapshot of every queued item, in dispatch order.
    pub async fn get_all(&self) -> Vec<QueuedAction> {
        self.inner.read().await.actions.clone()
    }

    /// The last item handed out by `next`, cleared on completion.
    pub async fn get_current(&self) -> Option<QueuedAction> {
        self.inner.read().await.current.clone()
    }

    /// Latch the stop signal; producers drain politely.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn resume(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }
}
