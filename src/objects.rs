//! Object resolution for guest addresses
//!
//! Lock ids and guest addresses are reused once memory is freed. Resolving an
//! address to the object that was live at that point gives each allocation its
//! own id, so statistics for different allocations at the same address stay apart.

use crate::trace::{ObjectId, TraceEntry};
use std::collections::BTreeMap;
use tracing::warn;

/// Resolved object descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtraceObject {
    /// Stable per-allocation id (0 for unresolved addresses)
    pub id: ObjectId,
    pub base: u64,
    pub len: u64,
    /// Type or allocation-site name
    pub name: String,
}

impl MtraceObject {
    /// One past the last covered byte; a zero-length object covers its base
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.len.max(1))
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.base <= addr && addr < self.end()
    }

    /// Placeholder for an address no live object covers
    pub fn unknown(addr: u64) -> Self {
        Self {
            id: 0,
            base: addr,
            len: 0,
            name: String::new(),
        }
    }
}

/// Maps guest addresses to the object that covers them
pub trait ObjectResolver {
    fn resolve(&self, addr: u64) -> Option<MtraceObject>;
}

/// Live-object table built from `alloc`/`free` entries
#[derive(Debug)]
pub struct ObjectTable {
    /// base address → object
    live: BTreeMap<u64, MtraceObject>,
    next_id: ObjectId,
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self {
            live: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new allocation and return its id
    pub fn alloc(&mut self, base: u64, len: u64, name: &str) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;

        let obj = MtraceObject {
            id,
            base,
            len,
            name: name.to_string(),
        };
        let end = obj.end();
        let below = self
            .live
            .range(..base)
            .next_back()
            .filter(|(_, prev)| prev.end() > base);
        let above = self
            .live
            .range(base..)
            .find(|&(&b, _)| b != base)
            .filter(|&(&b, _)| b < end);
        for (_, other) in below.into_iter().chain(above) {
            warn!(
                "alloc {:#x}+{:#x} ({}) overlaps live object {} ({}) at {:#x}",
                base, len, name, other.id, other.name, other.base
            );
        }
        if let Some(old) = self.live.insert(base, obj) {
            warn!(
                "alloc at {:#x} replaces live object {} ({}) that was never freed",
                base, old.id, old.name
            );
        }
        id
    }

    /// Drop the allocation starting at `base`
    pub fn free(&mut self, base: u64) -> Option<MtraceObject> {
        self.live.remove(&base)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Update the table from an `alloc` or `free` entry; other kinds are ignored
    pub fn observe(&mut self, entry: &TraceEntry) {
        match entry {
            TraceEntry::Alloc(a) => {
                self.alloc(a.addr, a.len, &a.name);
            }
            TraceEntry::Free(f) => {
                if self.free(f.addr).is_none() {
                    warn!("free of untracked object at {:#x}", f.addr);
                }
            }
            _ => {}
        }
    }
}

impl ObjectResolver for ObjectTable {
    fn resolve(&self, addr: u64) -> Option<MtraceObject> {
        // Highest base first, so nested objects win over their enclosing one
        self.live
            .range(..=addr)
            .rev()
            .map(|(_, obj)| obj)
            .find(|obj| obj.contains(addr))
            .cloned()
    }
}
