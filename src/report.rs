//! Final serial-section report
//!
//! Built from a finished [`SerialSections`] once the trace has been replayed.
//! Serializes to JSON for machine consumption and renders a strace-style table
//! for humans.

use crate::config::LatencyModel;
use crate::serial::{SectionKind, SerialSectionStat, SerialSectionSummary, SerialSections};
use crate::trace::{CpuId, ObjectId, Tid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Aggregate figures for one summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub total_cycles: u64,
    /// Only cpus with non-zero cycles
    pub cycles_per_cpu: BTreeMap<CpuId, u64>,
    pub coherence_misses: u64,
    /// Access pc (hex) → coherence misses
    pub per_pc_coherence_miss: BTreeMap<String, u64>,
    pub locked_inst: u64,
    pub acquires: u64,
    pub mismatches: u64,
    pub modeled_hold_time: u64,
}

impl SummaryReport {
    fn new(sum: &SerialSectionSummary, latency: &LatencyModel, kind: SectionKind) -> Self {
        Self {
            total_cycles: sum.total_cycles(),
            cycles_per_cpu: sum
                .cycles_per_cpu
                .iter()
                .enumerate()
                .filter(|&(_, &c)| c > 0)
                .map(|(cpu, &c)| (cpu, c))
                .collect(),
            coherence_misses: sum.coherence_misses(),
            per_pc_coherence_miss: sum
                .per_pc_coherence_miss
                .iter()
                .map(|(pc, &n)| (format!("{:#x}", pc), n))
                .collect(),
            locked_inst: sum.locked_inst,
            acquires: sum.acquires,
            mismatches: sum.mismatches,
            modeled_hold_time: sum.modeled_hold_time(latency, kind),
        }
    }
}

/// Breakdown entry for one acquire pc
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcReport {
    pub pc: String,
    pub summary: SummaryReport,
}

/// Breakdown entry for one thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TidReport {
    pub tid: Tid,
    pub summary: SummaryReport,
}

/// One lock or unlocked-address bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatReport {
    pub name: String,
    /// Lock id or guest address (hex)
    pub id: String,
    pub obj_id: ObjectId,
    pub kind: SectionKind,
    pub summary: SummaryReport,
    pub per_pc: Vec<PcReport>,
    pub per_tid: Vec<TidReport>,
}

impl StatReport {
    fn new(stat: &SerialSectionStat, latency: &LatencyModel) -> Self {
        Self {
            name: stat.name.clone(),
            id: format!("{:#x}", stat.key.id),
            obj_id: stat.key.obj_id,
            kind: stat.kind,
            summary: SummaryReport::new(&stat.summary, latency, stat.kind),
            per_pc: stat
                .per_pc
                .iter()
                .map(|(pc, sum)| PcReport {
                    pc: format!("{:#x}", pc),
                    summary: SummaryReport::new(sum, latency, stat.kind),
                })
                .collect(),
            per_tid: stat
                .per_tid
                .iter()
                .map(|(&tid, sum)| TidReport {
                    tid,
                    summary: SummaryReport::new(sum, latency, stat.kind),
                })
                .collect(),
        }
    }
}

/// Root report structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSectionsReport {
    /// Format version identifier
    pub version: String,
    /// Run-wide totals, over every bucket even when `sections` is truncated
    pub total_cycles: u64,
    pub coherence_misses: u64,
    pub acquires: u64,
    pub mismatches: u64,
    pub locked_inst: u64,
    /// Number of buckets in the run
    pub buckets: usize,
    /// Buckets sorted by total cycles, largest first
    pub sections: Vec<StatReport>,
}

impl SerialSectionsReport {
    /// Build the report, keeping at most `top` buckets if given
    pub fn from_sections(sections: &SerialSections, top: Option<usize>) -> Self {
        let latency = sections.latency();
        let mut stats: Vec<&SerialSectionStat> = sections.stats().collect();
        let buckets = stats.len();
        let acquires = stats.iter().map(|s| s.summary.acquires).sum();
        let mismatches = stats.iter().map(|s| s.summary.mismatches).sum();
        let locked_inst = stats.iter().map(|s| s.summary.locked_inst).sum();
        stats.sort_by(|a, b| {
            b.summary
                .total_cycles()
                .cmp(&a.summary.total_cycles())
                .then(a.key.cmp(&b.key))
        });
        if let Some(n) = top {
            stats.truncate(n);
        }

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            total_cycles: sections.total_cycles(),
            coherence_misses: sections.coherence_misses(),
            acquires,
            mismatches,
            locked_inst,
            buckets,
            sections: stats
                .into_iter()
                .map(|s| StatReport::new(s, latency))
                .collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render the human-readable summary table
    ///
    /// Each bucket is followed by its per-acquire-pc and per-thread breakdown.
    /// The total row always covers the whole run.
    pub fn write_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.sections.is_empty() {
            writeln!(w, "No serial sections.")?;
            return Ok(());
        }

        writeln!(
            w,
            "% cycles       cycles  acquires mismatch coh-miss   locked  kind     name"
        )?;
        writeln!(
            w,
            "-------- ------------ --------- -------- -------- -------- -------- ----------------"
        )?;

        for s in &self.sections {
            let kind = match s.kind {
                SectionKind::Lock => "lock",
                SectionKind::Unlocked => "unlocked",
            };
            write_row(
                w,
                self.percent(&s.summary),
                &s.summary,
                kind,
                &format!("{} ({}/{})", s.name, s.id, s.obj_id),
            )?;
            for pc in &s.per_pc {
                write_row(
                    w,
                    self.percent(&pc.summary),
                    &pc.summary,
                    "",
                    &format!("  pc {}", pc.pc),
                )?;
            }
            for tid in &s.per_tid {
                write_row(
                    w,
                    self.percent(&tid.summary),
                    &tid.summary,
                    "",
                    &format!("  tid {}", tid.tid),
                )?;
            }
        }

        writeln!(
            w,
            "-------- ------------ --------- -------- -------- -------- -------- ----------------"
        )?;
        writeln!(
            w,
            "  100.00 {:>12} {:>9} {:>8} {:>8} {:>8} {:<8} total",
            self.total_cycles,
            self.acquires,
            self.mismatches,
            self.coherence_misses,
            self.locked_inst,
            ""
        )?;
        if self.sections.len() < self.buckets {
            writeln!(
                w,
                "(showing {} of {} buckets)",
                self.sections.len(),
                self.buckets
            )?;
        }
        Ok(())
    }

    fn percent(&self, sum: &SummaryReport) -> f64 {
        if self.total_cycles > 0 {
            (sum.total_cycles as f64 / self.total_cycles as f64) * 100.0
        } else {
            0.0
        }
    }
}

fn write_row<W: Write>(
    w: &mut W,
    percent: f64,
    sum: &SummaryReport,
    kind: &str,
    label: &str,
) -> io::Result<()> {
    writeln!(
        w,
        "{:8.2} {:>12} {:>9} {:>8} {:>8} {:>8} {:<8} {}",
        percent,
        sum.total_cycles,
        sum.acquires,
        sum.mismatches,
        sum.coherence_misses,
        sum.locked_inst,
        kind,
        label
    )
}
