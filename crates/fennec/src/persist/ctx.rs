//! Policy wrapper shared by the typed persistence wrappers.
//!
//! A `PersistCtx` owns a [`Persist`] engine over a `<base>.snap` /
//! `<base>.wal` file pair (or injected stores), applies the sync policy on
//! every logged operation, and compacts automatically when either the
//! operation-count or byte-count threshold since the last compaction is
//! exceeded.

use crate::error::Result;
use crate::kernel::databox::Databox;
use crate::persist::checksum::ChecksumKind;
use crate::persist::core::{Persist, PersistConfig, SyncMode};
use crate::persist::ops::{PersistOp, PersistOps};
use crate::persist::store::{FileStore, Store};
use std::path::Path;
use tracing::debug;

/// Context configuration.
#[derive(Debug, Clone, Copy)]
pub struct PersistCtxConfig {
    /// WAL durability policy.
    pub sync_mode: SyncMode,
    /// Compact after this many operations (0 disables the trigger).
    pub compact_after_ops: u64,
    /// Compact after this many WAL bytes (0 disables the trigger).
    pub compact_after_bytes: u64,
    /// Checksum kind for snapshot body footers.
    pub checksum_kind: ChecksumKind,
    /// Abort recovery on the first corruption instead of skipping.
    pub strict_recovery: bool,
}

impl Default for PersistCtxConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::EverySec,
            compact_after_ops: 10_000,
            compact_after_bytes: 64 * 1024 * 1024,
            checksum_kind: ChecksumKind::Xxh64,
            strict_recovery: false,
        }
    }
}

/// Context counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistCtxStats {
    /// Operations logged since creation.
    pub total_ops: u64,
    /// Explicit syncs performed.
    pub total_syncs: u64,
    /// Compactions performed.
    pub total_compactions: u64,
    /// Operations since the last compaction.
    pub ops_since_compact: u64,
    /// WAL bytes since the last compaction.
    pub bytes_since_compact: u64,
    /// Current snapshot file size.
    pub snapshot_bytes: u64,
    /// Current WAL file size.
    pub wal_bytes: u64,
}

/// Policy layer over the persistence engine for one kernel type.
pub struct PersistCtx<O: PersistOps> {
    p: Persist<O>,
    config: PersistCtxConfig,
    ops_since_compact: u64,
    bytes_since_compact: u64,
    total_ops: u64,
    total_syncs: u64,
    total_compactions: u64,
}

impl<O: PersistOps> PersistCtx<O> {
    fn engine_config(config: &PersistCtxConfig) -> PersistConfig {
        PersistConfig {
            checksum_kind: config.checksum_kind,
            sync_mode: config.sync_mode,
            strict_recovery: config.strict_recovery,
            ..PersistConfig::default()
        }
    }

    /// Opens (or creates) a context over `<base>.snap` and `<base>.wal`.
    pub fn open(base: impl AsRef<Path>, config: PersistCtxConfig) -> Result<Self> {
        let base = base.as_ref();
        let snapshot = FileStore::open(base.with_extension("snap"))?;
        let wal = FileStore::open(base.with_extension("wal"))?;
        Ok(Self::with_stores(Box::new(snapshot), Box::new(wal), config))
    }

    /// Builds a context over caller-provided stores (memory stores in
    /// tests, typically).
    pub fn with_stores(
        snapshot: Box<dyn Store>,
        wal: Box<dyn Store>,
        config: PersistCtxConfig,
    ) -> Self {
        let p = Persist::new(snapshot, wal, Self::engine_config(&config));
        Self {
            p,
            config,
            ops_since_compact: 0,
            bytes_since_compact: 0,
            total_ops: 0,
            total_syncs: 0,
            total_compactions: 0,
        }
    }

    /// True when a snapshot file exists for `base`.
    pub fn exists(base: impl AsRef<Path>) -> bool {
        base.as_ref().with_extension("snap").exists()
    }

    /// The underlying engine, for inspection paths like
    /// [`Persist::iterate_wal`].
    pub fn engine(&mut self) -> &mut Persist<O> {
        &mut self.p
    }

    /// Logs one operation, applying the sync policy and updating the
    /// compaction counters.
    pub fn log_op(&mut self, op: PersistOp, args: &[Databox]) -> Result<()> {
        let before = self.p.stats().wal_bytes;
        self.p.log_op(op, args)?;
        let after = self.p.stats().wal_bytes;

        self.ops_since_compact += 1;
        self.bytes_since_compact += after - before;
        self.total_ops += 1;
        Ok(())
    }

    /// Compacts when either threshold since the last compaction is
    /// exceeded. Returns true when a compaction ran.
    pub fn maybe_compact(&mut self, kernel: &O::Kernel) -> Result<bool> {
        let ops_hit = self.config.compact_after_ops > 0
            && self.ops_since_compact >= self.config.compact_after_ops;
        let bytes_hit = self.config.compact_after_bytes > 0
            && self.bytes_since_compact >= self.config.compact_after_bytes;

        if !(ops_hit || bytes_hit) {
            return Ok(false);
        }

        self.compact(kernel)?;
        Ok(true)
    }

    /// Forces a compaction now.
    pub fn compact(&mut self, kernel: &O::Kernel) -> Result<()> {
        self.p.compact(kernel)?;
        self.ops_since_compact = 0;
        self.bytes_since_compact = 0;
        self.total_compactions += 1;
        debug!(
            structure = O::name(),
            compactions = self.total_compactions,
            "context compaction"
        );
        Ok(())
    }

    /// Writes a snapshot without touching the WAL. Used on fresh creation
    /// so recovery always finds a valid header.
    pub fn save_snapshot(&mut self, kernel: &O::Kernel) -> Result<()> {
        self.p.snapshot(kernel)
    }

    /// Recovers the kernel: verified snapshot restore plus WAL replay.
    pub fn recover(&mut self) -> Result<O::Kernel> {
        self.p.recover()
    }

    /// Forces a WAL sync.
    pub fn sync(&mut self) -> Result<()> {
        self.p.sync()?;
        self.total_syncs += 1;
        Ok(())
    }

    /// A counters snapshot including current file sizes.
    pub fn stats(&mut self) -> PersistCtxStats {
        PersistCtxStats {
            total_ops: self.total_ops,
            total_syncs: self.total_syncs,
            total_compactions: self.total_compactions,
            ops_since_compact: self.ops_since_compact,
            bytes_since_compact: self.bytes_since_compact,
            snapshot_bytes: self.p.snapshot_size().unwrap_or(0),
            wal_bytes: self.p.wal_size().unwrap_or(0),
        }
    }
}
