//! Per-cpu side tables
//!
//! The analysis core reads the current call-site and thread of a cpu when it
//! stamps a serial section. The tables themselves are kept current by the replay
//! driver from `call` and `task` entries.

use crate::error::{Result, SersecError};
use crate::trace::{CpuId, Pc, Tid, TraceEntry};

/// Highest number of cpus a trace may describe
pub const MAX_CPUS: usize = 64;

/// Reject cpu ids that do not fit the per-cpu tables
pub fn check_cpu(cpu: CpuId) -> Result<()> {
    if cpu >= MAX_CPUS {
        return Err(SersecError::CpuOutOfRange { cpu, max: MAX_CPUS });
    }
    Ok(())
}

/// Current call-site pc and thread id for every cpu
#[derive(Debug, Clone)]
pub struct CpuTables {
    call_pc: [Pc; MAX_CPUS],
    tid: [Tid; MAX_CPUS],
}

impl Default for CpuTables {
    fn default() -> Self {
        Self {
            call_pc: [0; MAX_CPUS],
            tid: [0; MAX_CPUS],
        }
    }
}

impl CpuTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call-site pc currently executing on `cpu` (0 if unknown)
    pub fn call_pc(&self, cpu: CpuId) -> Pc {
        self.call_pc.get(cpu).copied().unwrap_or(0)
    }

    /// Thread currently running on `cpu` (0 if unknown)
    pub fn tid(&self, cpu: CpuId) -> Tid {
        self.tid.get(cpu).copied().unwrap_or(0)
    }

    pub fn set_call_pc(&mut self, cpu: CpuId, pc: Pc) -> Result<()> {
        check_cpu(cpu)?;
        self.call_pc[cpu] = pc;
        Ok(())
    }

    pub fn set_tid(&mut self, cpu: CpuId, tid: Tid) -> Result<()> {
        check_cpu(cpu)?;
        self.tid[cpu] = tid;
        Ok(())
    }

    /// Update the tables from a `call` or `task` entry; other kinds are ignored
    pub fn observe(&mut self, entry: &TraceEntry) -> Result<()> {
        match entry {
            TraceEntry::Call(c) => self.set_call_pc(c.cpu, c.pc),
            TraceEntry::Task(t) => self.set_tid(t.cpu, t.tid),
            _ => Ok(()),
        }
    }
}
