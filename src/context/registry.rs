//! The per-context source registry.
//!
//! Maps monotone ids to attached sources. Ids are never reused, so the
//! id doubles as the attachment sequence number: sorting a snapshot by
//! `(priority, id)` yields dispatch order, ascending priority with
//! attachment order within one priority level.

use crate::source::SourceInner;

use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct Registry {
    sources: HashMap<u64, Arc<SourceInner>>,
}

pub(crate) struct SnapshotEntry {
    pub(crate) priority: i32,
    pub(crate) source: Arc<SourceInner>,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry {
            sources: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, id: u64, source: Arc<SourceInner>) {
        let prev = self.sources.insert(id, source);
        debug_assert!(prev.is_none(), "source id reused");
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<Arc<SourceInner>> {
        self.sources.remove(&id)
    }

    pub(crate) fn get(&self, id: u64) -> Option<&Arc<SourceInner>> {
        self.sources.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns the attached sources in dispatch order, skipping
    /// already-destroyed entries.
    pub(crate) fn snapshot_sorted(&self) -> Vec<SnapshotEntry> {
        let mut entries: Vec<(i32, u64, Arc<SourceInner>)> = self
            .sources
            .iter()
            .filter_map(|(&id, source)| {
                let state = source.state.lock().unwrap();
                if state.destroyed {
                    None
                } else {
                    Some((state.priority, id, source.clone()))
                }
            })
            .collect();

        entries.sort_by_key(|&(priority, id, _)| (priority, id));

        entries
            .into_iter()
            .map(|(priority, _, source)| SnapshotEntry { priority, source })
            .collect()
    }
}
