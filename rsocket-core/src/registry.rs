//! Concurrent map of live streams.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Stream id to handler map. No lock is held beyond a single call.
pub struct StreamRegistry<T> {
    streams: DashMap<u32, Arc<T>>,
}

impl<T> StreamRegistry<T> {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    /// Registers a handler. Returns false, leaving the map untouched, if
    /// the id is already taken.
    pub fn insert(&self, stream_id: u32, handler: Arc<T>) -> bool {
        match self.streams.entry(stream_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(handler);
                true
            }
        }
    }

    pub fn get(&self, stream_id: u32) -> Option<Arc<T>> {
        self.streams.get(&stream_id).map(|entry| entry.value().clone())
    }

    /// Removes a handler. Only the first caller for a given id gets it back.
    pub fn remove(&self, stream_id: u32) -> Option<Arc<T>> {
        self.streams.remove(&stream_id).map(|(_, handler)| handler)
    }

    pub fn contains(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Snapshot of the registered ids.
    pub fn ids(&self) -> Vec<u32> {
        self.streams.iter().map(|entry| *entry.key()).collect()
    }

    /// Removes and returns every handler.
    pub fn drain(&self) -> Vec<Arc<T>> {
        self.ids()
            .into_iter()
            .filter_map(|stream_id| self.remove(stream_id))
            .collect()
    }
}

impl<T> Default for StreamRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
