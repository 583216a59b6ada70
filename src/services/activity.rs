//! Bounded, append-only record of synchronization outcomes.
//!
//! Entries are kept newest first in a ring: once the cap is reached the oldest
//! entry is evicted. Every entry is mirrored to `tracing`. When backed by a
//! [`ConfigStore`] each change is saved as a versioned snapshot. Inside a tokio
//! runtime the save runs on the blocking pool, outside it runs inline.

use crate::config::ConfigStore;
use crate::models::{LogEntry, Severity};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default number of entries kept.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

pub struct ActivityLog {
    entries: Mutex<Ring>,
    capacity: usize,
    writer: Option<Arc<SnapshotWriter>>,
}

#[derive(Default)]
struct Ring {
    entries: VecDeque<LogEntry>,
    version: u64,
}

struct Snapshot {
    version: u64,
    entries: Vec<LogEntry>,
}

/// Saves snapshots through the store, skipping any older than the last saved.
struct SnapshotWriter {
    store: Arc<ConfigStore>,
    saved: Mutex<u64>,
}

impl SnapshotWriter {
    fn write(&self, snapshot: Snapshot) {
        let mut saved = self.saved.lock().unwrap();
        if snapshot.version <= *saved {
            return;
        }
        if let Err(e) = self.store.save_activity(&snapshot.entries) {
            tracing::warn!("Failed to persist activity log: {:#}", e);
        }
        *saved = snapshot.version;
    }
}

impl ActivityLog {
    /// In-memory log holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity),
                version: 0,
            }),
            capacity: capacity.max(1),
            writer: None,
        }
    }

    /// Log persisted through `store`, seeded with its saved entries.
    pub fn persistent(store: Arc<ConfigStore>, capacity: usize) -> anyhow::Result<Self> {
        let mut saved = store.load_activity()?;
        let capacity = capacity.max(1);
        saved.truncate(capacity);

        tracing::info!("Loaded {} activity entries", saved.len());
        Ok(Self {
            entries: Mutex::new(Ring {
                entries: saved.into(),
                version: 0,
            }),
            capacity,
            writer: Some(Arc::new(SnapshotWriter {
                store,
                saved: Mutex::new(0),
            })),
        })
    }

    /// Append an entry, evicting the oldest beyond the cap.
    pub fn record(&self, entry: LogEntry) {
        match entry.severity {
            Severity::Error => tracing::error!("{}", entry.message),
            Severity::Success | Severity::Info => tracing::info!("{}", entry.message),
        }

        let snapshot = {
            let mut ring = self.entries.lock().unwrap();
            ring.entries.push_front(entry);
            ring.entries.truncate(self.capacity);
            self.snapshot(&mut ring)
        };
        self.persist(snapshot);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogEntry::new(message, Severity::Info));
    }

    pub fn success(&self, message: impl Into<String>) {
        self.record(LogEntry::new(message, Severity::Success));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogEntry::new(message, Severity::Error));
    }

    /// Entries, most recent first.
    pub fn list(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().entries.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let snapshot = {
            let mut ring = self.entries.lock().unwrap();
            ring.entries.clear();
            self.snapshot(&mut ring)
        };
        self.persist(snapshot);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Save the current entries on the calling thread.
    ///
    /// Call on shutdown so the file holds the final state even if queued
    /// background saves never run.
    pub fn flush(&self) {
        let snapshot = {
            let mut ring = self.entries.lock().unwrap();
            self.snapshot(&mut ring)
        };
        if let (Some(writer), Some(snapshot)) = (&self.writer, snapshot) {
            writer.write(snapshot);
        }
    }

    // Versions are assigned under the entries lock, so a newer version always
    // holds the newer entries.
    fn snapshot(&self, ring: &mut Ring) -> Option<Snapshot> {
        self.writer.as_ref()?;
        ring.version += 1;
        let (front, back) = ring.entries.as_slices();
        Some(Snapshot {
            version: ring.version,
            entries: front.iter().chain(back).cloned().collect(),
        })
    }

    fn persist(&self, snapshot: Option<Snapshot>) {
        let (Some(writer), Some(snapshot)) = (&self.writer, snapshot) else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let writer = Arc::clone(writer);
                handle.spawn_blocking(move || writer.write(snapshot));
            }
            Err(_) => writer.write(snapshot),
        }
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
