use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use log::debug;

pub const DEFAULT_MAX_ENTRIES: usize = 1024 * 1024;

type Snapshot = HashMap<String, String>;

/// AddressCache maps tokens to resolved backend addresses.
///
/// Readers load the current snapshot without locking. Writers take `write`,
/// copy the snapshot, add their entry and publish the copy. When the
/// snapshot already holds `max_entries` tokens the copy starts empty, so the
/// whole cache is flushed instead of evicting single entries.
pub struct AddressCache {
    current: ArcSwap<Snapshot>,
    write: Mutex<()>,
    max_entries: usize,
}

impl AddressCache {
    pub fn new(max_entries: usize) -> AddressCache {
        AddressCache {
            current: ArcSwap::from_pointee(HashMap::new()),
            write: Mutex::new(()),
            max_entries,
        }
    }

    pub fn lookup(&self, token: &str) -> Option<String> {
        self.current.load().get(token).cloned()
    }

    pub fn insert(&self, token: String, addr: String) {
        let _guard = self.write.lock().unwrap_or_else(|e| e.into_inner());

        let old = self.current.load_full();
        let mut new = if old.len() < self.max_entries {
            // copy-on-write
            (*old).clone()
        } else {
            debug!("address cache full ({} entries), flushing", old.len());
            HashMap::new()
        };
        new.insert(token, addr);
        self.current.store(Arc::new(new));
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        AddressCache::new(DEFAULT_MAX_ENTRIES)
    }
}
