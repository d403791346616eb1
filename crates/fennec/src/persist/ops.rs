//! The per-structure operations interface and stable tag registries.

use crate::error::Result;
use crate::kernel::databox::Databox;
use crate::persist::checksum::{ChecksumKind, ChecksumValue};

/// Structure type tags embedded in snapshot and WAL headers.
///
/// Tags are stable on-disk identifiers and must never be renumbered; gaps
/// are reserved for structure variants. Values above the current maximum up
/// to 255 are reserved for future structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StructType {
    /// Compact typed sequence.
    Flex = 1,
    /// Sorted integer set.
    IntSet = 2,

    /// Multi-tier list family.
    Multilist = 10,
    /// Multimap family.
    Multimap = 20,
    /// Dictionary on top of the multimap family.
    Multidict = 30,
    /// Multi-tier array family.
    Multiarray = 40,
    /// Ordered set on top of the multimap family.
    MultiOrderedSet = 50,
    /// LRU cache structure.
    Multilru = 60,
    /// Compressed bitmap structure.
    Multiroar = 70,

    /// Counting bloom filter.
    LinearBloom = 80,
    /// HyperLogLog cardinality sketch.
    HyperLogLog = 81,

    /// Chunked delta-of-delta + XOR-of-floats time series container.
    TimeSeries = 82,
}

impl StructType {
    /// Decodes a stored tag.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Flex),
            2 => Some(Self::IntSet),
            10 => Some(Self::Multilist),
            20 => Some(Self::Multimap),
            30 => Some(Self::Multidict),
            40 => Some(Self::Multiarray),
            50 => Some(Self::MultiOrderedSet),
            60 => Some(Self::Multilru),
            70 => Some(Self::Multiroar),
            80 => Some(Self::LinearBloom),
            81 => Some(Self::HyperLogLog),
            82 => Some(Self::TimeSeries),
            _ => None,
        }
    }
}

/// WAL operation tags. Stable on-disk identifiers; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PersistOp {
    /// No operation.
    Nop = 0,

    /// Insert element(s).
    Insert = 1,
    /// Delete element(s).
    Delete = 2,
    /// Update an element in place.
    Update = 3,
    /// Delete + insert atomically.
    Replace = 4,

    /// Push to the head.
    PushHead = 10,
    /// Push to the tail.
    PushTail = 11,
    /// Pop from the head.
    PopHead = 12,
    /// Pop from the tail.
    PopTail = 13,
    /// Insert at an index.
    InsertAt = 14,
    /// Delete at an index.
    DeleteAt = 15,

    /// Remove all elements.
    Clear = 20,
    /// Insert multiple elements.
    BulkInsert = 21,
    /// Delete multiple elements.
    BulkDelete = 22,
    /// Merge another structure.
    Merge = 23,

    /// Structure-specific operation encoded in the data.
    Custom = 100,
}

impl PersistOp {
    /// Decodes a stored tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Nop),
            1 => Some(Self::Insert),
            2 => Some(Self::Delete),
            3 => Some(Self::Update),
            4 => Some(Self::Replace),
            10 => Some(Self::PushHead),
            11 => Some(Self::PushTail),
            12 => Some(Self::PopHead),
            13 => Some(Self::PopTail),
            14 => Some(Self::InsertAt),
            15 => Some(Self::DeleteAt),
            20 => Some(Self::Clear),
            21 => Some(Self::BulkInsert),
            22 => Some(Self::BulkDelete),
            23 => Some(Self::Merge),
            100 => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Per-structure persistence callbacks.
///
/// Implementing this for a kernel type makes it snapshottable and
/// WAL-loggable through [`crate::persist::Persist`]. Operation arguments
/// travel as databox slices; `encode_op` turns them into opaque WAL entry
/// payloads and `apply_op` replays those payloads against a kernel.
///
/// Replayed operations may be re-applied after a crash between a
/// compaction's snapshot write and its WAL truncation, so `apply_op` must
/// be idempotent or the encoding must carry enough absolute state to detect
/// an already-applied entry.
pub trait PersistOps {
    /// The kernel type being persisted.
    type Kernel;

    /// The structure's stable type tag.
    fn struct_type() -> StructType;

    /// Human-readable structure name for logging.
    fn name() -> &'static str;

    /// Serializes the entire kernel into a snapshot body.
    fn snapshot(kernel: &Self::Kernel) -> Vec<u8>;

    /// Reconstructs a kernel from a snapshot body.
    fn restore(data: &[u8]) -> Result<Self::Kernel>;

    /// Current element count, recorded in the snapshot header.
    fn count(kernel: &Self::Kernel) -> u64;

    /// Approximate serialized size, for pre-allocation.
    fn estimate_size(kernel: &Self::Kernel) -> usize;

    /// Encodes one operation's arguments into a WAL entry payload.
    fn encode_op(op: PersistOp, args: &[Databox]) -> Vec<u8>;

    /// Applies one replayed operation to the kernel.
    fn apply_op(kernel: &mut Self::Kernel, op: PersistOp, data: &[u8]) -> Result<()>;

    /// Optional post-restore integrity check.
    fn validate(_kernel: &Self::Kernel) -> bool {
        true
    }

    /// Number of internal chunks for chunk-level checksumming, or 0 when
    /// the structure has no internal pagination and relies on the
    /// whole-body footer.
    fn chunk_count(_kernel: &Self::Kernel) -> usize {
        0
    }

    /// Serializes one chunk with its checksum. `None` when the structure
    /// has no chunks or the index is out of range.
    fn snapshot_chunk(
        _kernel: &Self::Kernel,
        _chunk_index: usize,
        _kind: ChecksumKind,
    ) -> Option<(Vec<u8>, ChecksumValue)> {
        None
    }

    /// Restores one verified chunk. `None`-chunked structures reject this.
    fn restore_chunk(
        _kernel: &mut Self::Kernel,
        _chunk_index: usize,
        _data: &[u8],
        _expected: &ChecksumValue,
    ) -> bool {
        false
    }
}
