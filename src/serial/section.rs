use crate::trace::{CpuId, Pc, Tid, Timestamp};
use std::collections::BTreeMap;

/// One hold interval (or one synthesized unlocked access) ready for attribution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialSection {
    pub start: Timestamp,
    pub end: Timestamp,

    pub acquire_cpu: CpuId,
    pub release_cpu: CpuId,

    /// Call-site executing on the acquiring cpu when the hold began
    pub call_pc: Pc,
    /// Pc of the acquire (or of the access, for unlocked sections)
    pub acquire_pc: Pc,

    pub tid: Tid,

    /// Coherence misses observed inside the section, by access pc
    pub per_pc_coherence_miss: BTreeMap<Pc, u64>,
    /// Lock-protected instructions executed inside the section
    pub locked_inst: u64,
}

impl SerialSection {
    /// Held cycles, `None` if the section ends before it starts
    pub fn duration(&self) -> Option<Timestamp> {
        self.end.checked_sub(self.start)
    }

    /// The section started and ended on the same cpu
    pub fn same_cpu(&self) -> bool {
        self.acquire_cpu == self.release_cpu
    }

    pub fn coherence_misses(&self) -> u64 {
        self.per_pc_coherence_miss.values().sum()
    }

    /// Count one access against this section
    pub(crate) fn record_access(&mut self, pc: Pc, traffic: bool, locked: bool) {
        if traffic {
            *self.per_pc_coherence_miss.entry(pc).or_insert(0) += 1;
        } else if locked {
            self.locked_inst += 1;
        }
    }
}
