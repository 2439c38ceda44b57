use super::{SectionKind, SerialSection};
use crate::config::LatencyModel;
use crate::cpu::{check_cpu, MAX_CPUS};
use crate::error::{Result, SersecError};
use crate::trace::{Pc, Timestamp};
use std::collections::BTreeMap;

/// Running totals over a set of serial sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSectionSummary {
    pub cycles_per_cpu: [Timestamp; MAX_CPUS],
    pub per_pc_coherence_miss: BTreeMap<Pc, u64>,
    pub locked_inst: u64,
    /// Sections charged to a cpu
    pub acquires: u64,
    /// Sections released on a different cpu than they were acquired on
    pub mismatches: u64,
}

impl Default for SerialSectionSummary {
    fn default() -> Self {
        Self {
            cycles_per_cpu: [0; MAX_CPUS],
            per_pc_coherence_miss: BTreeMap::new(),
            locked_inst: 0,
            acquires: 0,
            mismatches: 0,
        }
    }
}

impl SerialSectionSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one section into the totals
    ///
    /// Cross-cpu sections only bump `mismatches`.
    ///
    /// # Errors
    /// [`SersecError::NegativeSection`] if the section ends before it starts,
    /// [`SersecError::CpuOutOfRange`] if its cpu does not fit the per-cpu table.
    pub fn add(&mut self, ss: &SerialSection) -> Result<()> {
        if !ss.same_cpu() {
            self.mismatches += 1;
            return Ok(());
        }

        let cycles = ss.duration().ok_or(SersecError::NegativeSection {
            start: ss.start,
            end: ss.end,
        })?;
        check_cpu(ss.acquire_cpu)?;

        self.cycles_per_cpu[ss.acquire_cpu] += cycles;
        for (&pc, &n) in &ss.per_pc_coherence_miss {
            *self.per_pc_coherence_miss.entry(pc).or_insert(0) += n;
        }
        self.locked_inst += ss.locked_inst;
        self.acquires += 1;
        Ok(())
    }

    pub fn total_cycles(&self) -> Timestamp {
        self.cycles_per_cpu.iter().sum()
    }

    pub fn coherence_misses(&self) -> u64 {
        self.per_pc_coherence_miss.values().sum()
    }

    /// Hold time under a simple latency model
    ///
    /// Locked sections cost their measured cycles plus one lock acquisition per
    /// section and one miss per coherence miss or locked instruction. Unlocked
    /// accesses cost one miss each.
    pub fn modeled_hold_time(&self, latency: &LatencyModel, kind: SectionKind) -> u64 {
        match kind {
            SectionKind::Lock => self
                .total_cycles()
                .saturating_add(self.acquires.saturating_mul(latency.lock_latency))
                .saturating_add(
                    self.locked_inst
                        .saturating_add(self.coherence_misses())
                        .saturating_mul(latency.miss_latency),
                ),
            SectionKind::Unlocked => self.acquires.saturating_mul(latency.miss_latency),
        }
    }
}
