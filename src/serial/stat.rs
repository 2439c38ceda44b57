use super::{SerialSection, SerialSectionSummary};
use crate::error::Result;
use crate::objects::MtraceObject;
use crate::trace::{AccessEntry, LockEntry, ObjectId, Pc, Tid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a statistics bucket: lock id (or guest address) plus owning object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SerialSectionKey {
    pub id: u64,
    pub obj_id: ObjectId,
}

/// Whether a bucket describes a real lock or unlocked accesses to an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Lock,
    Unlocked,
}

/// Statistics for one lock (or unlocked address) with call-site and thread breakdowns
#[derive(Debug, Clone)]
pub struct SerialSectionStat {
    pub key: SerialSectionKey,
    pub name: String,
    pub kind: SectionKind,

    pub summary: SerialSectionSummary,
    /// Keyed by acquire pc
    pub per_pc: BTreeMap<Pc, SerialSectionSummary>,
    pub per_tid: BTreeMap<Tid, SerialSectionSummary>,
}

impl SerialSectionStat {
    fn new(key: SerialSectionKey, name: String, kind: SectionKind) -> Self {
        Self {
            key,
            name,
            kind,
            summary: SerialSectionSummary::default(),
            per_pc: BTreeMap::new(),
            per_tid: BTreeMap::new(),
        }
    }

    /// Bucket for a lock, named after the lock's symbol
    pub fn for_lock(object: &MtraceObject, l: &LockEntry) -> Self {
        Self::new(
            SerialSectionKey {
                id: l.lock,
                obj_id: object.id,
            },
            l.name.clone(),
            SectionKind::Lock,
        )
    }

    /// Bucket for accesses made to `a.guest_addr` with no lock held
    pub fn for_access(object: &MtraceObject, a: &AccessEntry, name: String) -> Self {
        Self::new(
            SerialSectionKey {
                id: a.guest_addr,
                obj_id: object.id,
            },
            name,
            SectionKind::Unlocked,
        )
    }

    /// Fold a section into the overall, per-acquire-pc and per-thread summaries
    pub fn add(&mut self, ss: &SerialSection) -> Result<()> {
        self.summary.add(ss)?;
        self.per_pc.entry(ss.acquire_pc).or_default().add(ss)?;
        self.per_tid.entry(ss.tid).or_default().add(ss)
    }

    pub fn is_lock(&self) -> bool {
        self.kind == SectionKind::Lock
    }
}

/// Descriptive name for an unlocked-access bucket
pub(crate) fn unlocked_name(object: &MtraceObject, addr: u64) -> String {
    if object.id == 0 || object.name.is_empty() || addr < object.base {
        format!("unlocked:{:#x}", addr)
    } else {
        format!("unlocked:{}+{:#x}", object.name, addr - object.base)
    }
}
