use super::stat::unlocked_name;
use super::{AccessOutcome, LockManager, SerialSectionKey, SerialSectionStat};
use crate::config::{LatencyModel, SersecConfig};
use crate::cpu::{check_cpu, CpuTables};
use crate::error::Result;
use crate::objects::{MtraceObject, ObjectResolver};
use crate::report::SerialSectionsReport;
use crate::trace::{AccessEntry, LockEntry, LockOp, Timestamp, TraceEntry};
use std::collections::HashMap;
use std::io::{self, Write};
use tracing::debug;

/// Serial-section statistics for a whole trace
///
/// Feed entries in trace order through [`SerialSections::handle`]; the
/// per-(lock or address, object) stats are the final report.
#[derive(Debug, Default)]
pub struct SerialSections {
    lock_manager: LockManager,
    stat: HashMap<SerialSectionKey, SerialSectionStat>,
    latency: LatencyModel,
}

impl SerialSections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &SersecConfig) -> Self {
        Self {
            lock_manager: LockManager::with_limits(config.miss_limits()),
            stat: HashMap::new(),
            latency: config.latency,
        }
    }

    /// Dispatch one trace entry; kinds other than lock and access are ignored
    pub fn handle(
        &mut self,
        entry: &TraceEntry,
        cpus: &CpuTables,
        objects: &dyn ObjectResolver,
    ) -> Result<()> {
        match entry {
            TraceEntry::Lock(l) => self.handle_lock(l, cpus, objects),
            TraceEntry::Access(a) => self.handle_access(a, cpus, objects),
            _ => Ok(()),
        }
    }

    fn handle_lock(
        &mut self,
        l: &LockEntry,
        cpus: &CpuTables,
        objects: &dyn ObjectResolver,
    ) -> Result<()> {
        check_cpu(l.cpu)?;
        match l.op {
            LockOp::Acquire => self.lock_manager.acquire(l, cpus),
            LockOp::Acquired => self.lock_manager.acquired(l, cpus),
            LockOp::Release => {
                let Some(ss) = self.lock_manager.release(l)? else {
                    return Ok(());
                };
                let object = resolve(objects, l.lock);
                let key = SerialSectionKey {
                    id: l.lock,
                    obj_id: object.id,
                };
                self.stat
                    .entry(key)
                    .or_insert_with(|| {
                        debug!("new lock section {} ({:#x}/{})", l.name, l.lock, object.id);
                        SerialSectionStat::for_lock(&object, l)
                    })
                    .add(&ss)
            }
        }
    }

    fn handle_access(
        &mut self,
        a: &AccessEntry,
        cpus: &CpuTables,
        objects: &dyn ObjectResolver,
    ) -> Result<()> {
        check_cpu(a.cpu)?;
        let AccessOutcome::Unlocked(ss) = self.lock_manager.access(a, cpus) else {
            return Ok(());
        };

        let object = resolve(objects, a.guest_addr);
        let key = SerialSectionKey {
            id: a.guest_addr,
            obj_id: object.id,
        };
        self.stat
            .entry(key)
            .or_insert_with(|| {
                let name = unlocked_name(&object, a.guest_addr);
                debug!("new unlocked section {} ({:#x}/{})", name, a.guest_addr, object.id);
                SerialSectionStat::for_access(&object, a, name)
            })
            .add(&ss)
    }

    /// Held cycles across every bucket
    pub fn total_cycles(&self) -> Timestamp {
        self.stat.values().map(|s| s.summary.total_cycles()).sum()
    }

    /// Coherence misses across every bucket
    pub fn coherence_misses(&self) -> u64 {
        self.stat.values().map(|s| s.summary.coherence_misses()).sum()
    }

    pub fn stats(&self) -> impl Iterator<Item = &SerialSectionStat> {
        self.stat.values()
    }

    pub fn get(&self, key: &SerialSectionKey) -> Option<&SerialSectionStat> {
        self.stat.get(key)
    }

    pub fn len(&self) -> usize {
        self.stat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stat.is_empty()
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn latency(&self) -> &LatencyModel {
        &self.latency
    }

    pub fn report(&self, top: Option<usize>) -> SerialSectionsReport {
        SerialSectionsReport::from_sections(self, top)
    }

    /// Write the human-readable summary
    pub fn exit<W: Write>(&self, w: &mut W, top: Option<usize>) -> io::Result<()> {
        self.report(top).write_text(w)
    }

    /// Insert the structured report into a JSON document under `"serial_sections"`
    pub fn exit_json(
        &self,
        doc: &mut serde_json::Map<String, serde_json::Value>,
        top: Option<usize>,
    ) -> serde_json::Result<()> {
        let value = serde_json::to_value(self.report(top))?;
        doc.insert("serial_sections".to_string(), value);
        Ok(())
    }
}

fn resolve(objects: &dyn ObjectResolver, addr: u64) -> MtraceObject {
    objects
        .resolve(addr)
        .unwrap_or_else(|| MtraceObject::unknown(addr))
}
