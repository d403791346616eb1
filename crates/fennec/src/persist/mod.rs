//! Snapshot + write-ahead-log persistence for the kernel types.
//!
//! Layered bottom-up:
//!
//! - [`store`]: byte-addressable backends (file, memory).
//! - [`checksum`]: the xxHash checksum family used by all framing.
//! - [`ops`]: the per-structure callback interface and stable tag
//!   registries.
//! - [`core`]: the snapshot/WAL engine: exact on-disk formats, logging,
//!   replay, compaction, recovery.
//! - [`ctx`]: sync and auto-compaction policy shared by the wrappers.
//! - [`wrappers`]: typed persistent structures (`PersistentIntSet`,
//!   `PersistentFlex`, `PersistentMultimap`, `PersistentSeries`).

pub mod checksum;
pub mod core;
pub mod ctx;
pub mod ops;
pub mod store;
pub mod wrappers;

pub use checksum::{ChecksumKind, ChecksumValue};
pub use core::{Persist, PersistConfig, PersistStats, SyncMode, WalEntry};
pub use ctx::{PersistCtx, PersistCtxConfig, PersistCtxStats};
pub use ops::{PersistOp, PersistOps, StructType};
pub use store::{FileStore, MemStore, Store};
pub use wrappers::{
    FlexOps, IntSetOps, MultimapOps, PersistentFlex, PersistentIntSet, PersistentMultimap,
    PersistentSeries, SeriesOps,
};
