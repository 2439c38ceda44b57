use super::SerialSection;
use crate::config::MissLimits;
use crate::cpu::CpuTables;
use crate::error::{Result, SersecError};
use crate::trace::{AccessEntry, LockEntry, LockId, Timestamp};
use fnv::FnvHashMap;
use tracing::{debug, warn};

/// Ownership record for one held lock id
#[derive(Debug, Default)]
struct LockState {
    ss: SerialSection,
    /// First time the lock was actually obtained in this hold; an `acquired`
    /// at ts 0 counts
    acquired_ts: Option<Timestamp>,
    depth: u32,
}

impl LockState {
    fn acquire(&mut self, lock: &LockEntry, cpus: &CpuTables) {
        if self.depth == 0 {
            self.ss.start = lock.ts;
            self.ss.call_pc = cpus.call_pc(lock.cpu);
            self.ss.acquire_cpu = lock.cpu;
            self.ss.acquire_pc = lock.pc;
            self.ss.tid = cpus.tid(lock.cpu);
        }
        self.depth += 1;
    }

    fn acquired(&mut self, lock: &LockEntry, cpus: &CpuTables) {
        if self.acquired_ts.is_none() {
            self.acquired_ts = Some(lock.ts);
            self.ss.start = lock.ts;
            self.ss.acquire_cpu = lock.cpu;
            self.ss.acquire_pc = lock.pc;
            self.ss.tid = cpus.tid(lock.cpu);
        }
    }

    fn release(&mut self, lock: &LockEntry) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.ss.end = lock.ts;
            self.ss.release_cpu = lock.cpu;
        }
    }
}

/// Result of feeding one access to the [`LockManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOutcome {
    /// No lock was held; a one-cycle section was synthesized for the access
    Unlocked(SerialSection),
    /// The access was counted against the innermost held lock's open section
    Folded(LockId),
}

/// Lock-ownership state machine
///
/// Tracks every lock id currently held (with its reentrancy depth) and the
/// order in which they were taken, so accesses can be charged to the innermost
/// held lock. A lock id returns to untracked once its depth reaches zero.
#[derive(Debug, Default)]
pub struct LockManager {
    state: FnvHashMap<LockId, LockState>,
    /// Held lock ids, innermost last
    stack: Vec<LockId>,
    limits: MissLimits,
    release_misses: u32,
    acquired_misses: u32,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: MissLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// The cpu started acquiring `lock.lock`
    pub fn acquire(&mut self, lock: &LockEntry, cpus: &CpuTables) -> Result<()> {
        if !self.state.contains_key(&lock.lock) {
            if self.state.insert(lock.lock, LockState::default()).is_some() {
                return Err(SersecError::DuplicateLock { lock: lock.lock });
            }
            self.stack.push(lock.lock);
        }

        if let Some(ls) = self.state.get_mut(&lock.lock) {
            ls.acquire(lock, cpus);
        }
        Ok(())
    }

    /// The lock was actually obtained; moves the section start past any wait
    ///
    /// # Errors
    /// Returns [`SersecError::UntrackedAcquired`] once the number of
    /// notifications for untracked locks reaches the acquired-miss limit.
    pub fn acquired(&mut self, lock: &LockEntry, cpus: &CpuTables) -> Result<()> {
        match self.state.get_mut(&lock.lock) {
            Some(ls) => {
                ls.acquired(lock, cpus);
                Ok(())
            }
            None => {
                self.acquired_misses += 1;
                if self.acquired_misses >= self.limits.acquired {
                    return Err(SersecError::UntrackedAcquired {
                        lock: lock.lock,
                        misses: self.acquired_misses,
                    });
                }
                warn!(
                    "acquired untracked lock {:#x} at ts {} ({} misses)",
                    lock.lock, lock.ts, self.acquired_misses
                );
                Ok(())
            }
        }
    }

    /// Release one level of `lock.lock`
    ///
    /// Returns the completed section when the outermost hold ends, `None` for a
    /// nested release or a tolerated release of an untracked lock.
    ///
    /// # Errors
    /// Returns [`SersecError::UntrackedRelease`] once the number of releases of
    /// untracked locks reaches the release-miss limit.
    pub fn release(&mut self, lock: &LockEntry) -> Result<Option<SerialSection>> {
        let Some(ls) = self.state.get_mut(&lock.lock) else {
            self.release_misses += 1;
            if self.release_misses >= self.limits.release {
                return Err(SersecError::UntrackedRelease {
                    lock: lock.lock,
                    misses: self.release_misses,
                });
            }
            warn!(
                "released untracked lock {:#x} at ts {} ({} misses)",
                lock.lock, lock.ts, self.release_misses
            );
            return Ok(None);
        };

        ls.release(lock);
        if ls.depth > 0 {
            return Ok(None);
        }

        if let Some(pos) = self.stack.iter().rposition(|&id| id == lock.lock) {
            self.stack.remove(pos);
        }
        let section = self.state.remove(&lock.lock).map(|ls| ls.ss);
        if let Some(ss) = &section {
            debug!(
                "lock {:#x} released: [{}, {}] cpu {} -> {}",
                lock.lock, ss.start, ss.end, ss.acquire_cpu, ss.release_cpu
            );
        }
        Ok(section)
    }

    /// Attribute one access to the innermost held lock, or synthesize an
    /// unlocked section for it when nothing is held
    pub fn access(&mut self, a: &AccessEntry, cpus: &CpuTables) -> AccessOutcome {
        let innermost = self
            .stack
            .last()
            .copied()
            .and_then(|id| self.state.get_mut(&id).map(|ls| (id, ls)));

        match innermost {
            Some((id, ls)) => {
                ls.ss.record_access(a.pc, a.traffic, a.locked);
                AccessOutcome::Folded(id)
            }
            None => {
                let mut ss = SerialSection {
                    start: a.ts,
                    end: a.ts.saturating_add(1),
                    acquire_cpu: a.cpu,
                    release_cpu: a.cpu,
                    call_pc: cpus.call_pc(a.cpu),
                    acquire_pc: a.pc,
                    ..SerialSection::default()
                };
                ss.record_access(a.pc, a.traffic, a.locked);
                AccessOutcome::Unlocked(ss)
            }
        }
    }

    /// Reentrancy depth of a held lock, `None` if untracked
    pub fn depth(&self, lock: LockId) -> Option<u32> {
        self.state.get(&lock).map(|ls| ls.depth)
    }

    /// Open section of a held lock
    pub fn in_progress(&self, lock: LockId) -> Option<&SerialSection> {
        self.state.get(&lock).map(|ls| &ls.ss)
    }

    /// Innermost held lock
    pub fn innermost(&self) -> Option<LockId> {
        self.stack.last().copied()
    }

    pub fn held_count(&self) -> usize {
        self.stack.len()
    }

    pub fn release_misses(&self) -> u32 {
        self.release_misses
    }

    pub fn acquired_misses(&self) -> u32 {
        self.acquired_misses
    }
}
