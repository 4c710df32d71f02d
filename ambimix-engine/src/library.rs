//! In-memory library catalog
//!
//! Maps channel ids to playable sources. Removing an entry makes the id
//! unresolvable, which atmospheres then report as missing.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use ambimix_common::ChannelId;

use crate::audio::{SourceHandle, SourceResolver};

#[derive(Default)]
pub struct LibraryCatalog {
    entries: RwLock<HashMap<ChannelId, SourceHandle>>,
}

impl LibraryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the source for `source.channel_id`
    pub fn insert(&self, source: SourceHandle) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.channel_id, source);
    }

    pub fn remove(&self, channel_id: ChannelId) -> Option<SourceHandle> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&channel_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<SourceHandle> for LibraryCatalog {
    fn from_iter<I: IntoIterator<Item = SourceHandle>>(iter: I) -> Self {
        let catalog = Self::new();
        for source in iter {
            catalog.insert(source);
        }
        catalog
    }
}

impl SourceResolver for LibraryCatalog {
    fn resolve(&self, channel_id: ChannelId) -> Option<SourceHandle> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel_id)
            .cloned()
    }
}
