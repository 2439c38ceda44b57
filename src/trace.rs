//! Trace entry model and JSON-lines ingestion
//!
//! A trace is a totally ordered stream of entries, one JSON object per line:
//!
//! ```text
//! {"type":"task","ts":90,"cpu":0,"tid":7}
//! {"type":"lock","ts":100,"cpu":0,"lock":4096,"pc":64,"name":"vm_lock","op":"acquire"}
//! {"type":"lock","ts":105,"cpu":0,"lock":4096,"pc":64,"name":"vm_lock","op":"acquired"}
//! {"type":"access","ts":106,"cpu":0,"guest_addr":8192,"pc":7,"traffic":true,"locked":false}
//! {"type":"lock","ts":120,"cpu":0,"lock":4096,"pc":72,"name":"vm_lock","op":"release"}
//! ```
//!
//! Unknown `type` values deserialize to [`TraceEntry::Other`] and are ignored by the analysis.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Monotonic cycle counter
pub type Timestamp = u64;
/// Program counter
pub type Pc = u64;
/// Thread id
pub type Tid = u64;
/// Cpu index into per-cpu tables
pub type CpuId = usize;
/// Lock identity (usually the lock's guest address)
pub type LockId = u64;
/// Resolver-assigned object id
pub type ObjectId = u64;

/// Header shared by every entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub ts: Timestamp,
    pub cpu: CpuId,
}

/// Lock protocol step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOp {
    /// The cpu started trying to take the lock
    Acquire,
    /// The lock was actually obtained (after any wait)
    Acquired,
    /// The lock was dropped
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub ts: Timestamp,
    pub cpu: CpuId,
    pub lock: LockId,
    pub pc: Pc,
    #[serde(default)]
    pub name: String,
    pub op: LockOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub ts: Timestamp,
    pub cpu: CpuId,
    pub guest_addr: u64,
    pub pc: Pc,
    /// Access caused inter-cpu coherence traffic
    #[serde(default)]
    pub traffic: bool,
    /// Access was a lock-protected (atomic) instruction
    #[serde(default)]
    pub locked: bool,
}

/// Call-site change on a cpu
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEntry {
    pub ts: Timestamp,
    pub cpu: CpuId,
    pub pc: Pc,
}

/// Thread switched onto a cpu
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub ts: Timestamp,
    pub cpu: CpuId,
    pub tid: Tid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocEntry {
    pub ts: Timestamp,
    pub cpu: CpuId,
    pub addr: u64,
    pub len: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeEntry {
    pub ts: Timestamp,
    pub cpu: CpuId,
    pub addr: u64,
}

/// One trace record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEntry {
    Lock(LockEntry),
    Access(AccessEntry),
    Call(CallEntry),
    Task(TaskEntry),
    Alloc(AllocEntry),
    Free(FreeEntry),
    /// Headers and any record kind this tool does not interpret
    #[serde(other)]
    Other,
}

impl TraceEntry {
    /// Common header, `None` for [`TraceEntry::Other`]
    pub fn header(&self) -> Option<EntryHeader> {
        let (ts, cpu) = match self {
            TraceEntry::Lock(e) => (e.ts, e.cpu),
            TraceEntry::Access(e) => (e.ts, e.cpu),
            TraceEntry::Call(e) => (e.ts, e.cpu),
            TraceEntry::Task(e) => (e.ts, e.cpu),
            TraceEntry::Alloc(e) => (e.ts, e.cpu),
            TraceEntry::Free(e) => (e.ts, e.cpu),
            TraceEntry::Other => return None,
        };
        Some(EntryHeader { ts, cpu })
    }
}

/// Streaming reader for JSON-lines traces
pub struct TraceReader<R> {
    reader: R,
    line_no: usize,
    buf: String,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
        }
    }

    /// Number of lines consumed so far
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            let n = match self.reader.read_line(&mut self.buf) {
                Ok(n) => n,
                Err(e) => {
                    let line_no = self.line_no + 1;
                    return Some(
                        Err(e).with_context(|| format!("Failed to read trace line {}", line_no)),
                    );
                }
            };
            if n == 0 {
                return None;
            }
            self.line_no += 1;

            let line = self.buf.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line_no = self.line_no;
            return Some(
                serde_json::from_str(line)
                    .with_context(|| format!("Invalid trace entry on line {}", line_no)),
            );
        }
    }
}

/// Open a trace file for streaming
pub fn open_trace<P: AsRef<Path>>(path: P) -> Result<TraceReader<BufReader<File>>> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("Failed to open trace file: {}", path.as_ref().display()))?;
    Ok(TraceReader::new(BufReader::new(file)))
}

/// Read a whole trace file into memory
pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<Vec<TraceEntry>> {
    open_trace(path)?.collect()
}
