// Lock state machine and aggregation tests

use super::*;
use crate::config::{MissLimits, SersecConfig};
use crate::cpu::CpuTables;
use crate::error::SersecError;
use crate::objects::ObjectTable;
use crate::trace::{AccessEntry, LockEntry, LockOp, TraceEntry};

fn lock(op: LockOp, id: u64, cpu: usize, ts: u64) -> LockEntry {
    LockEntry {
        ts,
        cpu,
        lock: id,
        pc: 0x100 + ts,
        name: "test_lock".to_string(),
        op,
    }
}

fn access(pc: u64, traffic: bool, locked: bool, cpu: usize, ts: u64) -> AccessEntry {
    AccessEntry {
        ts,
        cpu,
        guest_addr: 0x8000,
        pc,
        traffic,
        locked,
    }
}

#[test]
fn test_balanced_hold_yields_one_section() {
    let cpus = CpuTables::new();
    let mut lm = LockManager::new();

    lm.acquire(&lock(LockOp::Acquire, 1, 0, 100), &cpus).unwrap();
    lm.acquired(&lock(LockOp::Acquired, 1, 0, 105), &cpus).unwrap();
    assert_eq!(lm.depth(1), Some(1));

    let ss = lm
        .release(&lock(LockOp::Release, 1, 0, 120))
        .unwrap()
        .expect("outermost release completes the section");
    assert_eq!(ss.start, 105);
    assert_eq!(ss.end, 120);
    assert_eq!(lm.depth(1), None);
    assert_eq!(lm.held_count(), 0);
}

#[test]
fn test_nested_release_completes_only_at_depth_zero() {
    let cpus = CpuTables::new();
    let mut lm = LockManager::new();

    lm.acquire(&lock(LockOp::Acquire, 1, 0, 10), &cpus).unwrap();
    lm.acquire(&lock(LockOp::Acquire, 1, 0, 20), &cpus).unwrap();
    assert_eq!(lm.depth(1), Some(2));
    assert_eq!(lm.held_count(), 1);

    assert_eq!(lm.release(&lock(LockOp::Release, 1, 0, 30)).unwrap(), None);
    assert_eq!(lm.depth(1), Some(1));

    let ss = lm.release(&lock(LockOp::Release, 1, 0, 40)).unwrap().unwrap();
    assert_eq!((ss.start, ss.end), (10, 40));
    assert_eq!(ss.acquire_pc, 0x100 + 10);
}

#[test]
fn test_request_time_kept_without_acquired() {
    let mut cpus = CpuTables::new();
    cpus.set_call_pc(2, 0xca11).unwrap();
    cpus.set_tid(2, 77).unwrap();
    let mut lm = LockManager::new();

    lm.acquire(&lock(LockOp::Acquire, 5, 2, 50), &cpus).unwrap();
    let ss = lm.release(&lock(LockOp::Release, 5, 2, 58)).unwrap().unwrap();

    assert_eq!(ss.start, 50);
    assert_eq!(ss.call_pc, 0xca11);
    assert_eq!(ss.tid, 77);
    assert_eq!(ss.acquire_cpu, 2);
    assert_eq!(ss.release_cpu, 2);
}

#[test]
fn test_first_acquired_restamps_once() {
    let mut cpus = CpuTables::new();
    cpus.set_tid(0, 1).unwrap();
    cpus.set_tid(1, 2).unwrap();
    let mut lm = LockManager::new();

    lm.acquire(&lock(LockOp::Acquire, 9, 0, 100), &cpus).unwrap();
    lm.acquired(&lock(LockOp::Acquired, 9, 1, 110), &cpus).unwrap();
    lm.acquired(&lock(LockOp::Acquired, 9, 0, 130), &cpus).unwrap();

    let ss = lm.in_progress(9).unwrap();
    assert_eq!(ss.start, 110);
    assert_eq!(ss.acquire_cpu, 1);
    assert_eq!(ss.acquire_pc, 0x100 + 110);
    assert_eq!(ss.tid, 2);
}

#[test]
fn test_acquired_at_time_zero_locks_start() {
    let cpus = CpuTables::new();
    let mut lm = LockManager::new();

    lm.acquire(&lock(LockOp::Acquire, 1, 0, 0), &cpus).unwrap();
    lm.acquired(&lock(LockOp::Acquired, 1, 0, 0), &cpus).unwrap();
    lm.acquired(&lock(LockOp::Acquired, 1, 1, 5), &cpus).unwrap();

    let ss = lm.release(&lock(LockOp::Release, 1, 0, 9)).unwrap().unwrap();
    assert_eq!(ss.start, 0);
    assert_eq!(ss.acquire_cpu, 0);
}

#[test]
fn test_unlocked_access_synthesizes_one_cycle_section() {
    let mut cpus = CpuTables::new();
    cpus.set_call_pc(3, 0x500).unwrap();
    cpus.set_tid(3, 11).unwrap();
    let mut lm = LockManager::new();

    let outcome = lm.access(&access(7, true, false, 3, 200), &cpus);
    let AccessOutcome::Unlocked(ss) = outcome else {
        panic!("expected a synthetic section");
    };
    assert_eq!(ss.start, 200);
    assert_eq!(ss.end, 201);
    assert_eq!(ss.acquire_cpu, 3);
    assert_eq!(ss.release_cpu, 3);
    assert_eq!(ss.call_pc, 0x500);
    assert_eq!(ss.acquire_pc, 7);
    // Unlocked sections carry no thread; the per-cpu thread is not consulted
    assert_eq!(ss.tid, 0);
    assert_eq!(ss.per_pc_coherence_miss.get(&7), Some(&1));
    assert_eq!(ss.locked_inst, 0);
}

#[test]
fn test_unlocked_access_at_max_timestamp_saturates() {
    let cpus = CpuTables::new();
    let mut lm = LockManager::new();

    let AccessOutcome::Unlocked(ss) = lm.access(&access(7, true, false, 0, u64::MAX), &cpus) else {
        panic!("expected a synthetic section");
    };
    assert_eq!(ss.start, u64::MAX);
    assert_eq!(ss.end, u64::MAX);

    let mut sections = SerialSections::new();
    replay(
        &mut sections,
        &[TraceEntry::Access(access(7, true, false, 0, u64::MAX))],
    )
    .unwrap();
    assert_eq!(sections.total_cycles(), 0);
    assert_eq!(sections.coherence_misses(), 1);
}

#[test]
fn test_locked_unlocked_access_counts_locked_inst() {
    let cpus = CpuTables::new();
    let mut lm = LockManager::new();

    let AccessOutcome::Unlocked(ss) = lm.access(&access(7, false, true, 0, 1), &cpus) else {
        panic!("expected a synthetic section");
    };
    assert_eq!(ss.locked_inst, 1);
    assert!(ss.per_pc_coherence_miss.is_empty());
}

#[test]
fn test_access_while_held_folds_into_innermost() {
    let cpus = CpuTables::new();
    let mut lm = LockManager::new();

    lm.acquire(&lock(LockOp::Acquire, 1, 0, 10), &cpus).unwrap();
    lm.acquire(&lock(LockOp::Acquire, 2, 0, 20), &cpus).unwrap();
    assert_eq!(lm.innermost(), Some(2));

    assert_eq!(
        lm.access(&access(7, true, false, 0, 25), &cpus),
        AccessOutcome::Folded(2)
    );
    assert_eq!(
        lm.access(&access(8, false, true, 0, 26), &cpus),
        AccessOutcome::Folded(2)
    );

    let inner = lm.in_progress(2).unwrap();
    assert_eq!(inner.per_pc_coherence_miss.get(&7), Some(&1));
    assert_eq!(inner.locked_inst, 1);

    let outer = lm.in_progress(1).unwrap();
    assert!(outer.per_pc_coherence_miss.is_empty());
    assert_eq!(outer.locked_inst, 0);

    // Once the inner lock is gone, the outer one becomes innermost again
    lm.release(&lock(LockOp::Release, 2, 0, 30)).unwrap().unwrap();
    assert_eq!(
        lm.access(&access(9, true, false, 0, 31), &cpus),
        AccessOutcome::Folded(1)
    );
}

#[test]
fn test_release_out_of_order_keeps_stack_consistent() {
    let cpus = CpuTables::new();
    let mut lm = LockManager::new();

    lm.acquire(&lock(LockOp::Acquire, 1, 0, 10), &cpus).unwrap();
    lm.acquire(&lock(LockOp::Acquire, 2, 0, 20), &cpus).unwrap();
    lm.release(&lock(LockOp::Release, 1, 0, 30)).unwrap().unwrap();

    assert_eq!(lm.innermost(), Some(2));
    assert_eq!(lm.held_count(), 1);
}

#[test]
fn test_untracked_release_threshold() {
    let mut lm = LockManager::new();

    for i in 0..19 {
        assert_eq!(lm.release(&lock(LockOp::Release, 42, 0, i)).unwrap(), None);
    }
    assert_eq!(lm.release_misses(), 19);
    assert_eq!(
        lm.release(&lock(LockOp::Release, 42, 0, 19)),
        Err(SersecError::UntrackedRelease {
            lock: 42,
            misses: 20
        })
    );
}

#[test]
fn test_untracked_acquired_threshold() {
    let cpus = CpuTables::new();
    let mut lm = LockManager::new();

    for i in 0..9 {
        lm.acquired(&lock(LockOp::Acquired, 42, 0, i), &cpus).unwrap();
    }
    assert_eq!(lm.acquired_misses(), 9);
    assert_eq!(
        lm.acquired(&lock(LockOp::Acquired, 42, 0, 9), &cpus),
        Err(SersecError::UntrackedAcquired {
            lock: 42,
            misses: 10
        })
    );
}

#[test]
fn test_miss_counters_are_independent() {
    let cpus = CpuTables::new();
    let mut lm = LockManager::new();

    for i in 0..9 {
        lm.acquired(&lock(LockOp::Acquired, 1, 0, i), &cpus).unwrap();
    }
    for i in 0..19 {
        lm.release(&lock(LockOp::Release, 1, 0, i)).unwrap();
    }
    assert_eq!(lm.acquired_misses(), 9);
    assert_eq!(lm.release_misses(), 19);
}

#[test]
fn test_custom_limits() {
    let mut lm = LockManager::with_limits(MissLimits {
        release: 2,
        acquired: 10,
    });
    assert!(lm.release(&lock(LockOp::Release, 1, 0, 1)).is_ok());
    assert!(lm.release(&lock(LockOp::Release, 1, 0, 2)).is_err());
}

#[test]
fn test_fresh_managers_do_not_share_miss_counts() {
    for _ in 0..3 {
        let mut lm = LockManager::new();
        for i in 0..19 {
            assert!(lm.release(&lock(LockOp::Release, 1, 0, i)).is_ok());
        }
    }
}

fn replay(sections: &mut SerialSections, entries: &[TraceEntry]) -> crate::error::Result<()> {
    let cpus = CpuTables::new();
    let objects = ObjectTable::new();
    for entry in entries {
        sections.handle(entry, &cpus, &objects)?;
    }
    Ok(())
}

#[test]
fn test_end_to_end_single_hold() {
    let entries = vec![
        TraceEntry::Lock(lock(LockOp::Acquire, 1, 0, 100)),
        TraceEntry::Lock(lock(LockOp::Acquired, 1, 0, 105)),
        TraceEntry::Access(access(7, true, false, 0, 106)),
        TraceEntry::Lock(lock(LockOp::Release, 1, 0, 120)),
    ];
    let mut sections = SerialSections::new();
    replay(&mut sections, &entries).unwrap();

    assert_eq!(sections.len(), 1);
    let stat = sections
        .get(&SerialSectionKey { id: 1, obj_id: 0 })
        .unwrap();
    assert!(stat.is_lock());
    assert_eq!(stat.name, "test_lock");
    assert_eq!(stat.summary.cycles_per_cpu[0], 15);
    assert_eq!(stat.summary.acquires, 1);
    assert_eq!(stat.summary.mismatches, 0);
    assert_eq!(stat.summary.per_pc_coherence_miss.get(&7), Some(&1));
    assert_eq!(sections.total_cycles(), 15);
    assert_eq!(sections.coherence_misses(), 1);

    // Acquire pc comes from the acquired notification
    assert!(stat.per_pc.contains_key(&(0x100 + 105)));
}

#[test]
fn test_unlocked_access_creates_unlocked_bucket() {
    let entries = vec![
        TraceEntry::Access(access(7, true, false, 0, 10)),
        TraceEntry::Access(access(7, false, true, 0, 20)),
    ];
    let mut sections = SerialSections::new();
    replay(&mut sections, &entries).unwrap();

    let stat = sections
        .get(&SerialSectionKey {
            id: 0x8000,
            obj_id: 0,
        })
        .unwrap();
    assert_eq!(stat.kind, SectionKind::Unlocked);
    assert_eq!(stat.name, "unlocked:0x8000");
    assert_eq!(stat.summary.acquires, 2);
    assert_eq!(stat.summary.total_cycles(), 2);
    assert_eq!(stat.summary.locked_inst, 1);
    assert_eq!(sections.coherence_misses(), 1);
}

#[test]
fn test_access_under_lock_produces_no_stat_until_release() {
    let entries = vec![
        TraceEntry::Lock(lock(LockOp::Acquire, 1, 0, 100)),
        TraceEntry::Access(access(7, true, false, 0, 106)),
    ];
    let mut sections = SerialSections::new();
    replay(&mut sections, &entries).unwrap();
    assert!(sections.is_empty());
    assert_eq!(sections.lock_manager().held_count(), 1);
}

#[test]
fn test_migrated_section_counts_as_mismatch() {
    let entries = vec![
        TraceEntry::Lock(lock(LockOp::Acquire, 1, 0, 100)),
        TraceEntry::Lock(lock(LockOp::Release, 1, 1, 150)),
    ];
    let mut sections = SerialSections::new();
    replay(&mut sections, &entries).unwrap();

    let stat = sections.stats().next().unwrap();
    assert_eq!(stat.summary.mismatches, 1);
    assert_eq!(stat.summary.acquires, 0);
    assert_eq!(sections.total_cycles(), 0);
}

#[test]
fn test_negative_section_aborts_replay() {
    let entries = vec![
        TraceEntry::Lock(lock(LockOp::Acquire, 1, 0, 100)),
        TraceEntry::Lock(lock(LockOp::Release, 1, 0, 90)),
    ];
    let mut sections = SerialSections::new();
    assert_eq!(
        replay(&mut sections, &entries),
        Err(SersecError::NegativeSection {
            start: 100,
            end: 90
        })
    );
}

#[test]
fn test_reused_lock_address_split_by_object() {
    let cpus = CpuTables::new();
    let mut objects = ObjectTable::new();
    let mut sections = SerialSections::new();

    let first = objects.alloc(1, 8, "old");
    sections
        .handle(&TraceEntry::Lock(lock(LockOp::Acquire, 1, 0, 0)), &cpus, &objects)
        .unwrap();
    sections
        .handle(&TraceEntry::Lock(lock(LockOp::Release, 1, 0, 10)), &cpus, &objects)
        .unwrap();
    objects.free(1);

    let second = objects.alloc(1, 8, "new");
    sections
        .handle(&TraceEntry::Lock(lock(LockOp::Acquire, 1, 0, 20)), &cpus, &objects)
        .unwrap();
    sections
        .handle(&TraceEntry::Lock(lock(LockOp::Release, 1, 0, 50)), &cpus, &objects)
        .unwrap();

    assert_eq!(sections.len(), 2);
    let old = sections.get(&SerialSectionKey { id: 1, obj_id: first }).unwrap();
    let new = sections.get(&SerialSectionKey { id: 1, obj_id: second }).unwrap();
    assert_eq!(old.summary.total_cycles(), 10);
    assert_eq!(new.summary.total_cycles(), 30);
}

#[test]
fn test_out_of_range_cpu_aborts() {
    let mut sections = SerialSections::new();
    let err = replay(
        &mut sections,
        &[TraceEntry::Access(access(1, false, false, 1000, 5))],
    )
    .unwrap_err();
    assert!(matches!(err, SersecError::CpuOutOfRange { cpu: 1000, .. }));
}

#[test]
fn test_other_entries_ignored() {
    let mut sections = SerialSections::new();
    replay(&mut sections, &[TraceEntry::Other]).unwrap();
    assert!(sections.is_empty());
}

#[test]
fn test_config_limits_reach_lock_manager() {
    let config = SersecConfig {
        acquired_miss_limit: 1,
        ..SersecConfig::default()
    };
    let mut sections = SerialSections::with_config(&config);
    let err = replay(
        &mut sections,
        &[TraceEntry::Lock(lock(LockOp::Acquired, 3, 0, 1))],
    )
    .unwrap_err();
    assert!(matches!(err, SersecError::UntrackedAcquired { misses: 1, .. }));
}

#[test]
fn test_exit_json_inserts_report() {
    let entries = vec![
        TraceEntry::Lock(lock(LockOp::Acquire, 1, 0, 100)),
        TraceEntry::Lock(lock(LockOp::Release, 1, 0, 110)),
    ];
    let mut sections = SerialSections::new();
    replay(&mut sections, &entries).unwrap();

    let mut doc = serde_json::Map::new();
    sections.exit_json(&mut doc, None).unwrap();
    let report = &doc["serial_sections"];
    assert_eq!(report["total_cycles"], 10);
    assert_eq!(report["sections"][0]["kind"], "lock");
    assert_eq!(report["sections"][0]["id"], "0x1");
}

#[test]
fn test_exit_writes_table() {
    let entries = vec![
        TraceEntry::Lock(lock(LockOp::Acquire, 1, 0, 100)),
        TraceEntry::Lock(lock(LockOp::Release, 1, 0, 110)),
    ];
    let mut sections = SerialSections::new();
    replay(&mut sections, &entries).unwrap();

    let mut out = Vec::new();
    sections.exit(&mut out, None).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("test_lock"));
    assert!(text.contains("total"));
}
