//! Snapshot and write-ahead-log engine.
//!
//! On-disk formats (little-endian):
//!
//! ```text
//! SNAPSHOT                             WAL
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │ header (36 bytes)        │        │ header (24 bytes)        │
//! │   magic      "DKSP"      │        │   magic      "DKWL"      │
//! │   version    u16 = 1     │        │   version    u16 = 1     │
//! │   flags      u16         │        │   flags      u16         │
//! │   structType u32         │        │   structType u32         │
//! │   count      u64         │        │   sequence   u64         │
//! │   dataLen    u64         │        │   hdrChk     u32 (XXH32) │
//! │   hdrChk     u64 (XXH64) │        ├──────────────────────────┤
//! ├──────────────────────────┤        │ entry*                   │
//! │ body (dataLen bytes)     │        │   len      u32           │
//! ├──────────────────────────┤        │   seq      u64           │
//! │ footer (0/4/8/16 bytes)  │        │   op       u8            │
//! └──────────────────────────┘        │   data     opaque        │
//!                                     │   entryChk u32 (XXH32)   │
//!                                     └──────────────────────────┘
//! ```
//!
//! Snapshot flags: bit 0 body compression, bit 1 footer checksum present,
//! bits 2-3 footer checksum kind. The header checksum covers the preceding
//! 28 bytes; the WAL header checksum covers the preceding 20. Entry
//! checksums cover `(seq, op, data)`; the entry length field covers
//! everything after itself.

use crate::error::{Error, Result};
use crate::kernel::databox::Databox;
use crate::persist::checksum::{checksum32, checksum64, ChecksumKind, ChecksumValue};
use crate::persist::ops::{PersistOp, PersistOps};
use crate::persist::store::{read_exact_or_len, Store};
use std::io::SeekFrom;
use std::marker::PhantomData;
use std::time::Instant;
use tracing::{debug, warn};

/// Snapshot file magic.
pub const SNAP_MAGIC: [u8; 4] = *b"DKSP";
/// WAL file magic.
pub const WAL_MAGIC: [u8; 4] = *b"DKWL";
/// Current format version for both files.
pub const PERSIST_VERSION: u16 = 1;
/// Snapshot header size in bytes.
pub const SNAP_HEADER_SIZE: usize = 36;
/// WAL header size in bytes.
pub const WAL_HEADER_SIZE: usize = 24;

/// Snapshot flag: body footer checksum present.
const FLAG_HAS_CHECKSUM: u16 = 1 << 1;

/// Fixed entry overhead: seq (8) + op (1) + checksum (4).
const WAL_ENTRY_OVERHEAD: u32 = 13;
/// Entry length sanity bound.
const WAL_ENTRY_MAX: u32 = 100 * 1024 * 1024;

/// WAL durability policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Never sync automatically; callers sync explicitly.
    Never,
    /// Sync at most once per second (default).
    #[default]
    EverySec,
    /// Sync after every logged operation.
    Always,
}

/// Engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct PersistConfig {
    /// Checksum kind for the snapshot body footer.
    pub checksum_kind: ChecksumKind,
    /// WAL durability policy.
    pub sync_mode: SyncMode,
    /// WAL size that makes [`Persist::should_compact`] advise compaction.
    pub wal_max_size: u64,
    /// Whether [`Persist::should_compact`] advises at all.
    pub auto_compact: bool,
    /// Advise compaction when the WAL grows past `snapshot * ratio`.
    pub compact_ratio: f64,
    /// Abort recovery on the first corruption instead of skipping.
    pub strict_recovery: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            checksum_kind: ChecksumKind::Xxh64,
            sync_mode: SyncMode::default(),
            wal_max_size: 64 * 1024 * 1024,
            auto_compact: true,
            compact_ratio: 2.0,
            strict_recovery: false,
        }
    }
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    /// Snapshots written.
    pub snapshot_count: u64,
    /// Total snapshot bytes written.
    pub snapshot_bytes: u64,
    /// WAL entries written.
    pub wal_entries: u64,
    /// Total WAL bytes written.
    pub wal_bytes: u64,
    /// Next WAL sequence number.
    pub wal_sequence: u64,
    /// Compactions performed.
    pub compaction_count: u64,
    /// Recoveries performed.
    pub recovery_count: u64,
    /// Entries applied during the last replay.
    pub entries_recovered: u64,
    /// Corrupt or rejected entries skipped during the last replay.
    pub entries_skipped: u64,
}

/// Outcome of reading one framed WAL entry.
enum EntryRead {
    /// A verified entry.
    Entry {
        sequence: u64,
        op: u8,
        data: Vec<u8>,
    },
    /// A fully-framed entry whose checksum failed; framing after it is
    /// still intact.
    ChecksumMismatch,
    /// Clean end of the WAL.
    Eof,
}

/// One WAL entry surfaced by [`Persist::iterate_wal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Monotonic per-entry sequence number.
    pub sequence: u64,
    /// Raw operation tag.
    pub op: u8,
    /// Operation payload.
    pub data: Vec<u8>,
}

/// Snapshot + WAL engine for one kernel type.
pub struct Persist<O: PersistOps> {
    config: PersistConfig,
    snapshot_store: Box<dyn Store>,
    wal_store: Box<dyn Store>,
    stats: PersistStats,
    wal_sequence: u64,
    last_sync: Instant,
    wal_initialized: bool,
    _ops: PhantomData<O>,
}

impl<O: PersistOps> Persist<O> {
    /// Creates an engine over a snapshot store and a WAL store.
    pub fn new(
        snapshot_store: Box<dyn Store>,
        wal_store: Box<dyn Store>,
        config: PersistConfig,
    ) -> Self {
        Self {
            config,
            snapshot_store,
            wal_store,
            stats: PersistStats::default(),
            wal_sequence: 1,
            last_sync: Instant::now(),
            wal_initialized: false,
            _ops: PhantomData,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// A statistics snapshot.
    pub fn stats(&self) -> PersistStats {
        let mut stats = self.stats;
        stats.wal_sequence = self.wal_sequence;
        stats
    }

    /// Zeroes the counters.
    pub fn reset_stats(&mut self) {
        self.stats = PersistStats::default();
    }

    fn encode_snap_header(struct_type: u32, flags: u16, count: u64, data_len: u64) -> [u8; SNAP_HEADER_SIZE] {
        let mut header = [0u8; SNAP_HEADER_SIZE];
        header[0..4].copy_from_slice(&SNAP_MAGIC);
        header[4..6].copy_from_slice(&PERSIST_VERSION.to_le_bytes());
        header[6..8].copy_from_slice(&flags.to_le_bytes());
        header[8..12].copy_from_slice(&struct_type.to_le_bytes());
        header[12..20].copy_from_slice(&count.to_le_bytes());
        header[20..28].copy_from_slice(&data_len.to_le_bytes());
        let chk = checksum64(&header[0..28]);
        header[28..36].copy_from_slice(&chk.to_le_bytes());
        header
    }

    fn encode_wal_header(struct_type: u32, sequence: u64) -> [u8; WAL_HEADER_SIZE] {
        let mut header = [0u8; WAL_HEADER_SIZE];
        header[0..4].copy_from_slice(&WAL_MAGIC);
        header[4..6].copy_from_slice(&PERSIST_VERSION.to_le_bytes());
        header[6..8].copy_from_slice(&0u16.to_le_bytes());
        header[8..12].copy_from_slice(&struct_type.to_le_bytes());
        header[12..20].copy_from_slice(&sequence.to_le_bytes());
        let chk = checksum32(&header[0..20]);
        header[20..24].copy_from_slice(&chk.to_le_bytes());
        header
    }

    /// Writes a full snapshot of the kernel: header, opaque body, footer
    /// checksum, then truncates stale tail bytes and syncs.
    pub fn snapshot(&mut self, kernel: &O::Kernel) -> Result<()> {
        let data = O::snapshot(kernel);
        let flags = FLAG_HAS_CHECKSUM | ((self.config.checksum_kind as u16 & 0x3) << 2);
        let header = Self::encode_snap_header(
            O::struct_type() as u32,
            flags,
            O::count(kernel),
            data.len() as u64,
        );

        let store = &mut *self.snapshot_store;
        store.seek(SeekFrom::Start(0))?;
        store.write_all(&header)?;
        store.write_all(&data)?;

        let footer = ChecksumValue::compute(self.config.checksum_kind, &data);
        store.write_all(footer.as_bytes())?;

        store.truncate()?;
        store.sync()?;

        self.stats.snapshot_count += 1;
        self.stats.snapshot_bytes += (SNAP_HEADER_SIZE + data.len() + footer.as_bytes().len()) as u64;

        debug!(
            structure = O::name(),
            bytes = data.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Reads and verifies the snapshot, reconstructing the kernel.
    pub fn restore(&mut self) -> Result<O::Kernel> {
        let store = &mut *self.snapshot_store;
        store.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; SNAP_HEADER_SIZE];
        if read_exact_or_len(store, &mut header)? != SNAP_HEADER_SIZE {
            return Err(Error::CorruptSnapshot("truncated header".into()));
        }

        if header[0..4] != SNAP_MAGIC {
            return Err(Error::CorruptSnapshot(format!(
                "invalid magic {:?}",
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes(header[4..6].try_into().expect("2 bytes"));
        if version > PERSIST_VERSION {
            return Err(Error::CorruptSnapshot(format!(
                "unsupported version {}",
                version
            )));
        }

        let stored_chk = u64::from_le_bytes(header[28..36].try_into().expect("8 bytes"));
        let computed_chk = checksum64(&header[0..28]);
        if stored_chk != computed_chk {
            return Err(Error::CorruptSnapshot(format!(
                "header checksum mismatch: stored {:#x}, computed {:#x}",
                stored_chk, computed_chk
            )));
        }

        let struct_type = u32::from_le_bytes(header[8..12].try_into().expect("4 bytes"));
        if struct_type != O::struct_type() as u32 {
            return Err(Error::TypeMismatch {
                expected: O::struct_type() as u32,
                found: struct_type,
            });
        }

        let flags = u16::from_le_bytes(header[6..8].try_into().expect("2 bytes"));
        let data_len = u64::from_le_bytes(header[20..28].try_into().expect("8 bytes"));
        let data_len = usize::try_from(data_len)
            .map_err(|_| Error::AllocationFailure(format!("snapshot body of {} bytes", data_len)))?;

        let mut data = vec![0u8; data_len];
        if read_exact_or_len(store, &mut data)? != data_len {
            return Err(Error::CorruptSnapshot("truncated body".into()));
        }

        if flags & FLAG_HAS_CHECKSUM != 0 {
            let kind = ChecksumKind::from_u8(((flags >> 2) & 0x3) as u8)
                .expect("two bits cover all kinds");

            let mut stored = [0u8; 16];
            let stored = &mut stored[..kind.len()];
            if read_exact_or_len(store, stored)? != kind.len() {
                return Err(Error::CorruptSnapshot("truncated footer".into()));
            }

            let expected = ChecksumValue::from_bytes(kind, stored).expect("length checked");
            if !expected.verify(&data) {
                return Err(Error::CorruptSnapshot("body checksum mismatch".into()));
            }
        }

        let kernel = O::restore(&data)?;
        if !O::validate(&kernel) {
            return Err(Error::CorruptSnapshot("structure validation failed".into()));
        }
        Ok(kernel)
    }

    /// Writes the WAL header when the store is fresh, or positions at the
    /// end of an existing WAL for appending.
    fn wal_init(&mut self) -> Result<()> {
        let store = &mut *self.wal_store;
        store.seek(SeekFrom::Start(0))?;

        let mut existing = [0u8; WAL_HEADER_SIZE];
        let n = read_exact_or_len(store, &mut existing)?;
        if n == WAL_HEADER_SIZE && existing[0..4] == WAL_MAGIC {
            store.seek(SeekFrom::End(0))?;
            return Ok(());
        }

        let header = Self::encode_wal_header(O::struct_type() as u32, self.wal_sequence);
        store.seek(SeekFrom::Start(0))?;
        store.write_all(&header)?;
        store.sync()?;
        Ok(())
    }

    /// Appends one operation to the WAL with the next sequence number,
    /// applying the configured sync policy.
    pub fn log_op(&mut self, op: PersistOp, args: &[Databox]) -> Result<()> {
        if !self.wal_initialized {
            self.wal_init()?;
            self.wal_initialized = true;
        }

        let data = O::encode_op(op, args);
        let entry_len = WAL_ENTRY_OVERHEAD + data.len() as u32;

        let mut entry = Vec::with_capacity(4 + entry_len as usize);
        entry.extend_from_slice(&entry_len.to_le_bytes());
        entry.extend_from_slice(&self.wal_sequence.to_le_bytes());
        entry.push(op as u8);
        entry.extend_from_slice(&data);

        // Checksum covers (seq, op, data).
        let chk = checksum32(&entry[4..]);
        entry.extend_from_slice(&chk.to_le_bytes());

        self.wal_store.write_all(&entry)?;

        self.wal_sequence += 1;
        self.stats.wal_entries += 1;
        self.stats.wal_bytes += entry.len() as u64;

        match self.config.sync_mode {
            SyncMode::Always => {
                self.wal_store.sync()?;
                self.last_sync = Instant::now();
            }
            SyncMode::EverySec => {
                if self.last_sync.elapsed().as_micros() >= 1_000_000 {
                    self.wal_store.sync()?;
                    self.last_sync = Instant::now();
                }
            }
            SyncMode::Never => {}
        }

        Ok(())
    }

    /// Reads one framed entry.
    ///
    /// Framing loss (short read, implausible length) is an `Err`: nothing
    /// after it can be trusted. A checksum mismatch on a fully-framed entry
    /// is recoverable (the next entry's framing is still intact) and is
    /// reported as its own variant so lenient replay can skip past it.
    fn read_entry(store: &mut dyn Store) -> Result<EntryRead> {
        let mut len_buf = [0u8; 4];
        let n = read_exact_or_len(store, &mut len_buf)?;
        if n == 0 {
            return Ok(EntryRead::Eof);
        }
        if n != 4 {
            return Err(Error::CorruptWalEntry("truncated length field".into()));
        }

        let entry_len = u32::from_le_bytes(len_buf);
        if entry_len < WAL_ENTRY_OVERHEAD || entry_len > WAL_ENTRY_MAX {
            return Err(Error::CorruptWalEntry(format!(
                "implausible entry length {}",
                entry_len
            )));
        }

        let mut entry = vec![0u8; entry_len as usize];
        if read_exact_or_len(store, &mut entry)? != entry_len as usize {
            return Err(Error::CorruptWalEntry("truncated entry body".into()));
        }

        let payload_end = entry.len() - 4;
        let stored_chk = u32::from_le_bytes(entry[payload_end..].try_into().expect("4 bytes"));
        let computed_chk = checksum32(&entry[..payload_end]);
        if stored_chk != computed_chk {
            return Ok(EntryRead::ChecksumMismatch);
        }

        let sequence = u64::from_le_bytes(entry[0..8].try_into().expect("8 bytes"));
        let op = entry[8];
        let data = entry[9..payload_end].to_vec();
        Ok(EntryRead::Entry { sequence, op, data })
    }

    /// Verifies the WAL header, returning its starting sequence, or
    /// `Ok(None)` when the store is empty (a fresh WAL).
    fn read_wal_header(&mut self) -> Result<Option<u64>> {
        let store = &mut *self.wal_store;
        store.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; WAL_HEADER_SIZE];
        let n = read_exact_or_len(store, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n != WAL_HEADER_SIZE {
            return Err(Error::CorruptWalEntry("truncated WAL header".into()));
        }

        if header[0..4] != WAL_MAGIC {
            return Err(Error::CorruptWalEntry(format!(
                "invalid WAL magic {:?}",
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes(header[4..6].try_into().expect("2 bytes"));
        if version > PERSIST_VERSION {
            return Err(Error::CorruptWalEntry(format!(
                "unsupported WAL version {}",
                version
            )));
        }

        let stored_chk = u32::from_le_bytes(header[20..24].try_into().expect("4 bytes"));
        if stored_chk != checksum32(&header[0..20]) {
            return Err(Error::CorruptWalEntry("WAL header checksum mismatch".into()));
        }

        let struct_type = u32::from_le_bytes(header[8..12].try_into().expect("4 bytes"));
        if struct_type != O::struct_type() as u32 {
            return Err(Error::TypeMismatch {
                expected: O::struct_type() as u32,
                found: struct_type,
            });
        }

        let sequence = u64::from_le_bytes(header[12..20].try_into().expect("8 bytes"));
        Ok(Some(sequence))
    }

    /// Replays WAL entries onto the kernel.
    ///
    /// Entries are verified individually. Under strict recovery the first
    /// corruption aborts with an error; otherwise corrupt or rejected
    /// entries are skipped (counted in `entries_skipped`) and replay
    /// continues. The engine's sequence counter resumes past the highest
    /// replayed entry.
    pub fn replay_wal(&mut self, kernel: &mut O::Kernel) -> Result<()> {
        let start_sequence = match self.read_wal_header() {
            Ok(Some(seq)) => seq,
            Ok(None) => return Ok(()),
            Err(e) => {
                if self.config.strict_recovery {
                    return Err(e);
                }
                warn!(structure = O::name(), error = %e, "skipping unreadable WAL");
                return Ok(());
            }
        };
        if start_sequence >= self.wal_sequence {
            self.wal_sequence = start_sequence;
        }

        loop {
            let (sequence, raw_op, data) = match Self::read_entry(&mut *self.wal_store) {
                Ok(EntryRead::Entry { sequence, op, data }) => (sequence, op, data),
                Ok(EntryRead::Eof) => break,
                Ok(EntryRead::ChecksumMismatch) => {
                    self.stats.entries_skipped += 1;
                    if self.config.strict_recovery {
                        return Err(Error::CorruptWalEntry("entry checksum mismatch".into()));
                    }
                    warn!(structure = O::name(), "skipping WAL entry with bad checksum");
                    continue;
                }
                Err(e) => {
                    if self.config.strict_recovery {
                        return Err(e);
                    }
                    // Framing is gone; nothing after this point can be read.
                    warn!(structure = O::name(), error = %e, "stopping WAL replay at truncated tail");
                    break;
                }
            };

            let Some(op) = PersistOp::from_u8(raw_op) else {
                self.stats.entries_skipped += 1;
                if self.config.strict_recovery {
                    return Err(Error::CorruptWalEntry(format!("unknown op tag {}", raw_op)));
                }
                warn!(structure = O::name(), op = raw_op, "skipping unknown WAL op");
                continue;
            };

            if let Err(e) = O::apply_op(kernel, op, &data) {
                self.stats.entries_skipped += 1;
                if self.config.strict_recovery {
                    return Err(Error::CallbackFailure(e.to_string()));
                }
                warn!(structure = O::name(), sequence, error = %e, "skipping rejected WAL entry");
                continue;
            }

            if sequence >= self.wal_sequence {
                self.wal_sequence = sequence + 1;
            }
            self.stats.entries_recovered += 1;
        }

        debug!(
            structure = O::name(),
            recovered = self.stats.entries_recovered,
            skipped = self.stats.entries_skipped,
            "WAL replay complete"
        );
        Ok(())
    }

    /// Iterates WAL entries without applying them. The callback returns
    /// false to stop early; checksum-failed entries are skipped and a
    /// truncated tail ends the iteration.
    pub fn iterate_wal(&mut self, mut cb: impl FnMut(&WalEntry) -> bool) -> Result<()> {
        if self.read_wal_header()?.is_none() {
            return Ok(());
        }

        loop {
            match Self::read_entry(&mut *self.wal_store) {
                Ok(EntryRead::Entry { sequence, op, data }) => {
                    let entry = WalEntry { sequence, op, data };
                    if !cb(&entry) {
                        break;
                    }
                }
                Ok(EntryRead::ChecksumMismatch) => continue,
                Ok(EntryRead::Eof) | Err(_) => break,
            }
        }

        // Restore the append position for any logging that follows.
        self.wal_store.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Compacts: writes a fresh snapshot subsuming the WAL, then truncates
    /// the WAL to a fresh header carrying the next sequence number.
    ///
    /// The snapshot is synced before the WAL is touched, so a crash between
    /// the two leaves a valid snapshot plus a stale WAL whose entries will
    /// be re-applied on recovery; `apply_op` implementations account for
    /// that (see [`PersistOps`]).
    pub fn compact(&mut self, kernel: &O::Kernel) -> Result<()> {
        self.snapshot(kernel)?;

        let header = Self::encode_wal_header(O::struct_type() as u32, self.wal_sequence);
        let store = &mut *self.wal_store;
        store.seek(SeekFrom::Start(0))?;
        store.truncate()?;
        store.write_all(&header)?;
        store.sync()?;
        self.wal_initialized = true;

        self.stats.compaction_count += 1;
        debug!(structure = O::name(), "compaction complete");
        Ok(())
    }

    /// True when the WAL has outgrown the configured absolute size or the
    /// snapshot-relative ratio.
    pub fn should_compact(&mut self) -> Result<bool> {
        if !self.config.auto_compact {
            return Ok(false);
        }

        let wal_size = self.wal_store.size()?;
        if wal_size > self.config.wal_max_size {
            return Ok(true);
        }

        let snap_size = self.snapshot_store.size()?;
        Ok(snap_size > 0 && wal_size as f64 > snap_size as f64 * self.config.compact_ratio)
    }

    /// Full recovery: verified snapshot restore, then WAL replay. Produces
    /// a kernel equal to the last durably-logged state.
    pub fn recover(&mut self) -> Result<O::Kernel> {
        self.stats.recovery_count += 1;
        self.stats.entries_recovered = 0;
        self.stats.entries_skipped = 0;

        let mut kernel = self.restore()?;
        self.replay_wal(&mut kernel)?;

        debug!(
            structure = O::name(),
            entries = self.stats.entries_recovered,
            "recovery complete"
        );
        Ok(kernel)
    }

    /// Syncs the WAL store.
    pub fn sync(&mut self) -> Result<()> {
        self.wal_store.sync()?;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&mut self) -> Result<u64> {
        self.wal_store.size()
    }

    /// Current snapshot size in bytes.
    pub fn snapshot_size(&mut self) -> Result<u64> {
        self.snapshot_store.size()
    }
}
