//! Integration tests for snapshot + WAL persistence: recovery across
//! reopen, crash windows, compaction, and corruption handling.

use fennec::kernel::flex::Flex;
use fennec::persist::{
    FlexOps, IntSetOps, MemStore, Persist, PersistConfig, PersistCtx, PersistCtxConfig,
    PersistOp, PersistentFlex, PersistentIntSet, PersistentMultimap, PersistentSeries,
    SyncMode,
};
use fennec::{Databox, IntSetU32};
use tempfile::TempDir;

fn always_sync() -> PersistCtxConfig {
    PersistCtxConfig {
        sync_mode: SyncMode::Always,
        ..PersistCtxConfig::default()
    }
}

#[test]
fn test_intset_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("ids");

    let mut set = PersistentIntSet::create(&base, always_sync()).unwrap();
    for v in [1, 2, 3] {
        assert!(set.add(v).unwrap());
    }
    set.close().unwrap();

    let mut set = PersistentIntSet::open(&base, always_sync()).unwrap();
    assert_eq!(set.count(), 3);
    assert!(set.contains(2));
    assert!(!set.contains(4));

    set.add(4).unwrap();
    set.close().unwrap();

    let set = PersistentIntSet::open(&base, always_sync()).unwrap();
    assert_eq!(set.count(), 4);
    assert!(set.contains(4));
}

#[test]
fn test_wal_replays_without_close() {
    // Dropping the wrapper without close() models a crash after the WAL
    // writes; with ALWAYS sync every logged op must still recover.
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("crash");

    let mut set = PersistentIntSet::create(&base, always_sync()).unwrap();
    for v in 0..50 {
        set.add(v * 3).unwrap();
    }
    set.remove(6).unwrap();
    drop(set);

    let set = PersistentIntSet::open(&base, always_sync()).unwrap();
    assert_eq!(set.count(), 49);
    assert!(set.contains(0));
    assert!(set.contains(147));
    assert!(!set.contains(6));
}

#[test]
fn test_logged_op_recovers_before_memory_applied() {
    // A crash between log_op and the in-memory mutation loses nothing:
    // the logged op replays on recovery.
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("half");

    let mut ctx: PersistCtx<IntSetOps> = PersistCtx::open(&base, always_sync()).unwrap();
    ctx.save_snapshot(&IntSetU32::new()).unwrap();
    ctx.log_op(PersistOp::Insert, &[Databox::Unsigned(42)]).unwrap();
    drop(ctx);

    let set = PersistentIntSet::open(&base, always_sync()).unwrap();
    assert_eq!(set.count(), 1);
    assert!(set.contains(42));
}

#[test]
fn test_compaction_truncates_wal_and_preserves_state() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("compact");

    let mut set = PersistentIntSet::create(&base, always_sync()).unwrap();
    for v in 0..100 {
        set.add(v).unwrap();
    }

    let wal_before = set.stats().wal_bytes;
    set.compact().unwrap();
    let stats = set.stats();
    assert!(stats.wal_bytes < wal_before, "WAL truncated to its header");
    assert_eq!(stats.total_compactions, 1);
    assert_eq!(stats.ops_since_compact, 0);

    // Snapshot alone (empty WAL) restores the full state.
    drop(set);
    let mut set = PersistentIntSet::open(&base, always_sync()).unwrap();
    assert_eq!(set.count(), 100);

    // Snapshot plus subsequent WAL entries restores snapshot + ops.
    set.add(500).unwrap();
    set.remove(7).unwrap();
    drop(set);
    let set = PersistentIntSet::open(&base, always_sync()).unwrap();
    assert_eq!(set.count(), 100);
    assert!(set.contains(500));
    assert!(!set.contains(7));
}

#[test]
fn test_auto_compaction_on_op_threshold() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("auto");

    let config = PersistCtxConfig {
        sync_mode: SyncMode::Never,
        compact_after_ops: 10,
        compact_after_bytes: 0,
        ..PersistCtxConfig::default()
    };

    let mut set = PersistentIntSet::create(&base, config).unwrap();
    for v in 0..35 {
        set.add(v).unwrap();
    }
    let stats = set.stats();
    assert_eq!(stats.total_compactions, 3, "every tenth op compacts");
    assert_eq!(stats.total_ops, 35);

    set.close().unwrap();
    let set = PersistentIntSet::open(&base, config).unwrap();
    assert_eq!(set.count(), 35);
}

#[test]
fn test_stale_wal_entries_skip_after_compaction_crash() {
    // Crash window between a compaction's snapshot write and its WAL
    // truncate: the snapshot already contains the logged pushes, and the
    // count guard keeps replay from applying them twice.
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("window");

    let mut ctx: PersistCtx<FlexOps> = PersistCtx::open(&base, always_sync()).unwrap();
    let mut kernel = Flex::new();
    ctx.save_snapshot(&kernel).unwrap();

    for (i, v) in [10i64, 20].iter().enumerate() {
        ctx.log_op(
            PersistOp::PushTail,
            &[Databox::Signed(*v), Databox::Unsigned(i as u64 + 1)],
        )
        .unwrap();
        kernel.push_tail(&Databox::Signed(*v));
    }

    // The snapshot now subsumes the WAL, but the WAL was never truncated.
    ctx.save_snapshot(&kernel).unwrap();
    drop(ctx);

    let seq = PersistentFlex::open(&base, always_sync()).unwrap();
    assert_eq!(seq.count(), 2, "stale entries skipped, not re-applied");
    assert_eq!(seq.get(0).unwrap().as_i64(), Some(10));
    assert_eq!(seq.get(1).unwrap().as_i64(), Some(20));
}

#[test]
fn test_flex_push_pop_reopen() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("list");

    let mut seq = PersistentFlex::create(&base, always_sync()).unwrap();
    seq.push_tail(&Databox::Signed(2)).unwrap();
    seq.push_tail(&Databox::Signed(3)).unwrap();
    seq.push_head(&Databox::Signed(1)).unwrap();
    seq.push_tail(&Databox::Bytes(b"tail".to_vec())).unwrap();
    assert_eq!(seq.pop_tail().unwrap().unwrap().as_i64(), None);
    seq.close().unwrap();

    let seq = PersistentFlex::open(&base, always_sync()).unwrap();
    assert_eq!(seq.count(), 3);
    assert_eq!(seq.get(0).unwrap().as_i64(), Some(1));
    assert_eq!(seq.get(1).unwrap().as_i64(), Some(2));
    assert_eq!(seq.get(2).unwrap().as_i64(), Some(3));
}

#[test]
fn test_multimap_reopen_with_field_incr() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("map");

    let mut map = PersistentMultimap::create(&base, always_sync(), 2).unwrap();
    map.insert(&[Databox::Bytes(b"requests".to_vec()), Databox::Signed(0)])
        .unwrap();
    map.insert(&[Databox::Bytes(b"errors".to_vec()), Databox::Signed(0)])
        .unwrap();

    let key = Databox::Bytes(b"requests".to_vec());
    for _ in 0..5 {
        map.field_incr(&key, 1, 10).unwrap();
    }
    assert_eq!(map.field_incr(&key, 1, -8).unwrap(), Some(42));
    map.delete(&Databox::Bytes(b"errors".to_vec())).unwrap();
    map.close().unwrap();

    let map = PersistentMultimap::open(&base, always_sync()).unwrap();
    assert_eq!(map.count(), 1);
    let record = map.lookup(&key).expect("present after reopen");
    assert_eq!(record[1].as_i64(), Some(42));
}

#[test]
fn test_series_reopen_reads_identical_values() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("series");

    let n = 500usize;
    let mut series = PersistentSeries::create(&base, always_sync()).unwrap();
    for i in 0..n {
        let ts = 1_700_000_000_000i64 + i as i64 * 1000;
        series.append(ts, 20.0 + (i as f64) * 0.01).unwrap();
    }
    series.close().unwrap();

    let series = PersistentSeries::open(&base, always_sync()).unwrap();
    assert_eq!(series.elements(), n as u64);

    let (keys, vals) = series.read_range(0, -1).expect("non-empty");
    for i in 0..n {
        assert_eq!(keys[i], 1_700_000_000_000i64 + i as i64 * 1000);
        assert_eq!(vals[i].to_bits(), (20.0 + (i as f64) * 0.01).to_bits());
    }

    let (_, _, stats) = series.read_range_stats(-100, 100).expect("tail window");
    assert!(stats.mean > 20.0);
}

#[test]
fn test_corrupt_wal_entry_lenient_vs_strict() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("corrupt");

    let mut set = PersistentIntSet::create(&base, always_sync()).unwrap();
    for v in [1, 2, 3] {
        set.add(v).unwrap();
    }
    set.close().unwrap();

    // Flip one payload byte of the first entry. Layout: 24-byte WAL
    // header, then len(4) + seq(8) + op(1) puts the payload at offset 37.
    let wal_path = base.with_extension("wal");
    let mut bytes = std::fs::read(&wal_path).unwrap();
    bytes[37] ^= 0xFF;
    std::fs::write(&wal_path, &bytes).unwrap();

    // Lenient (default): the bad entry is skipped, the rest replay.
    let set = PersistentIntSet::open(&base, always_sync()).unwrap();
    assert_eq!(set.count(), 2);
    assert!(!set.contains(1));
    assert!(set.contains(2));
    assert!(set.contains(3));

    // Strict: the first corruption aborts recovery.
    let strict = PersistCtxConfig {
        strict_recovery: true,
        ..always_sync()
    };
    assert!(PersistentIntSet::open(&base, strict).is_err());
}

#[test]
fn test_corrupt_snapshot_is_always_fatal() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("badsnap");

    let mut set = PersistentIntSet::create(&base, always_sync()).unwrap();
    for v in [5, 6] {
        set.add(v).unwrap();
    }
    set.compact().unwrap();
    set.close().unwrap();

    // Corrupt one body byte; the footer checksum catches it even in
    // lenient mode.
    let snap_path = base.with_extension("snap");
    let mut bytes = std::fs::read(&snap_path).unwrap();
    bytes[40] ^= 0xFF;
    std::fs::write(&snap_path, &bytes).unwrap();

    assert!(PersistentIntSet::open(&base, always_sync()).is_err());
}

#[test]
fn test_memory_engine_round_trip() {
    let mut engine: Persist<IntSetOps> = Persist::new(
        Box::new(MemStore::new()),
        Box::new(MemStore::new()),
        PersistConfig::default(),
    );

    let mut kernel = IntSetU32::new();
    for v in [7u32, 9, 11] {
        kernel.add(v);
    }

    engine.snapshot(&kernel).unwrap();
    let restored = engine.restore().unwrap();
    assert_eq!(restored, kernel);

    engine
        .log_op(PersistOp::Insert, &[Databox::Unsigned(13)])
        .unwrap();
    engine
        .log_op(PersistOp::Delete, &[Databox::Unsigned(7)])
        .unwrap();

    let mut recovered = engine.recover().unwrap();
    assert!(recovered.exists(13));
    assert!(!recovered.exists(7));
    assert_eq!(recovered.count(), 3);

    // Replay is idempotent for set operations.
    engine.replay_wal(&mut recovered).unwrap();
    assert_eq!(recovered.count(), 3);
}

#[test]
fn test_wal_sequences_strictly_increase_across_reopen() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("seq");

    let mut ctx: PersistCtx<IntSetOps> = PersistCtx::open(&base, always_sync()).unwrap();
    ctx.save_snapshot(&IntSetU32::new()).unwrap();
    for v in 0..5u32 {
        ctx.log_op(PersistOp::Insert, &[Databox::Unsigned(v.into())]).unwrap();
    }
    drop(ctx);

    // Reopen, recover, and append more; sequences must keep climbing.
    let mut ctx: PersistCtx<IntSetOps> = PersistCtx::open(&base, always_sync()).unwrap();
    let mut kernel = ctx.recover().unwrap();
    assert_eq!(kernel.count(), 5);
    for v in 5..8u32 {
        ctx.log_op(PersistOp::Insert, &[Databox::Unsigned(v.into())]).unwrap();
        kernel.add(v);
    }

    let mut sequences = Vec::new();
    ctx.engine()
        .iterate_wal(|entry| {
            sequences.push(entry.sequence);
            true
        })
        .unwrap();

    assert_eq!(sequences.len(), 8);
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}
