//! Append-only diagnostic journal of engine events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use steward_core::{TabId, TaskId};
use uuid::Uuid;

/// Sink for engine journal entries. Fire-and-forget.
pub trait Journal: Send + Sync {
    fn log(&self, tab: Option<TabId>, task_id: TaskId, event: &str, detail: &str);
}

/// One recorded journal line.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub task_id: TaskId,
    pub tab: Option<TabId>,
    pub event: String,
    pub detail: String,
}

/// Writes journal entries as structured tracing events.
pub struct TracingJournal;

impl Journal for TracingJournal {
    fn log(&self, tab: Option<TabId>, task_id: TaskId, event: &str, detail: &str) {
        match tab {
            Some(tab) => tracing::info!(
                target: "steward::journal",
                task_id = %task_id,
                tab = %tab,
                event,
                "{}",
                detail
            ),
            None => tracing::info!(
                target: "steward::journal",
                task_id = %task_id,
                event,
                "{}",
                detail
            ),
        }
    }
}

/// Keeps the most recent `capacity` entries in memory.
pub struct MemoryJournal {
    capacity: usize,
    entries: Mutex<VecDeque<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Retained entries for one task, oldest first.
    pub fn entries_for(&self, task_id: TaskId) -> Vec<JournalEntry> {
        self.lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<JournalEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Journal for MemoryJournal {
    fn log(&self, tab: Option<TabId>, task_id: TaskId, event: &str, detail: &str) {
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(JournalEntry {
            id: Uuid::new_v4(),
            at: Utc::now(),
            task_id,
            tab,
            event: event.to_string(),
            detail: detail.to_string(),
        });
    }
}

/// Forwards every entry to several journals.
pub struct FanoutJournal {
    sinks: Vec<Arc<dyn Journal>>,
}

impl FanoutJournal {
    pub fn new(sinks: Vec<Arc<dyn Journal>>) -> Self {
        Self { sinks }
    }
}

impl Journal for FanoutJournal {
    fn log(&self, tab: Option<TabId>, task_id: TaskId, event: &str, detail: &str) {
        for sink in &self.sinks {
            sink.log(tab, task_id, event, detail);
        }
    }
}
