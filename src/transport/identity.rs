use crate::transport::Transport;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Stable token naming one transport instance inside query keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TransportToken(String);

impl TransportToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct RegistryEntry {
    transport: Weak<dyn Transport>,
    token: TransportToken,
}

impl RegistryEntry {
    fn is_live(&self) -> bool {
        self.transport.strong_count() > 0
    }
}

/// Hands out one token per transport *instance*.
///
/// Entries hold only a weak reference, so registering a transport never keeps it alive. The weak
/// reference also pins the allocation, which means an address is never reused while its entry
/// exists; dead entries are pruned whenever a new token is allocated.
pub struct TransportRegistry {
    entries: DashMap<usize, RegistryEntry>,
    next_id: AtomicU64,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn identity_of(&self, transport: &Arc<dyn Transport>) -> TransportToken {
        let address = Arc::as_ptr(transport) as *const () as usize;
        // the entry guard holds the shard lock, so concurrent first uses converge on one token
        let (token, allocated) = match self.entries.entry(address) {
            Entry::Occupied(entry) if entry.get().is_live() => (entry.get().token.clone(), false),
            Entry::Occupied(mut entry) => {
                let token = self.allocate();
                entry.insert(RegistryEntry {
                    transport: Arc::downgrade(transport),
                    token: token.clone(),
                });
                (token, true)
            }
            Entry::Vacant(entry) => {
                let token = self.allocate();
                entry.insert(RegistryEntry {
                    transport: Arc::downgrade(transport),
                    token: token.clone(),
                });
                (token, true)
            }
        };

        if allocated {
            debug!("TransportRegistry: Allocated {} (address={:#x})", token, address);
            self.prune();
        }
        token
    }

    /// Number of entries whose transport is still alive.
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_live()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn allocate(&self) -> TransportToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        TransportToken(format!("t{}", id))
    }

    fn prune(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("TransportRegistry: Pruned {} dropped transports", removed);
        }
    }
}
