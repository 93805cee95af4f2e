use crate::cache::KvStore;
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

const STORAGE_KEY: &str = "activity_log";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Bounded log of service activity.
///
/// Loaded from the backing store on first use and written back after every
/// mutation. Once full, the oldest entry is dropped.
pub struct ActivityLog {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    // None until first use
    entries: Mutex<Option<VecDeque<ActivityEntry>>>,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            store,
            clock,
            capacity: capacity.max(1),
            entries: Mutex::new(None),
        }
    }

    /// Append a message, evicting the oldest entry when full
    pub async fn append(&self, message: impl Into<String>) {
        let entry = ActivityEntry {
            at: self.clock.utc(),
            message: message.into(),
        };

        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await);
        }
        let entries = guard.get_or_insert_with(VecDeque::new);
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        self.persist(entries).await;
    }

    /// Snapshot, oldest first
    pub async fn entries(&self) -> Vec<ActivityEntry> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await);
        }
        guard.iter().flatten().cloned().collect()
    }

    pub async fn clear(&self) {
        let mut guard = self.entries.lock().await;
        let entries = guard.insert(VecDeque::new());
        self.persist(entries).await;
    }

    async fn load(&self) -> VecDeque<ActivityEntry> {
        let raw = match self.store.get(STORAGE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return VecDeque::new(),
            Err(e) => {
                warn!(error = %e, "Failed to load activity log");
                return VecDeque::new();
            }
        };

        match serde_json::from_slice::<VecDeque<ActivityEntry>>(&raw) {
            Ok(mut entries) => {
                while entries.len() > self.capacity {
                    entries.pop_front();
                }
                entries
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable activity log");
                VecDeque::new()
            }
        }
    }

    async fn persist(&self, entries: &VecDeque<ActivityEntry>) {
        let result = match serde_json::to_vec(entries) {
            Ok(bytes) => self.store.set(STORAGE_KEY, bytes).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            warn!(error = %e, "Failed to persist activity log");
        }
    }
}
