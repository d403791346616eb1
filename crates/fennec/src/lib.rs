//! Fennec - memory-efficient data structure kernels with durable storage.
//!
//! This crate provides a toolkit of compact data-structure kernels for
//! time-series, set, map, and list workloads, plus a uniform persistence
//! layer giving any kernel snapshot + write-ahead-log durability.
//!
//! # Components
//!
//! - [`codec`]: bit-packed codecs: delta-of-delta integers
//!   ([`codec::dod`]), XOR-of-floats doubles ([`codec::xof`]), and the
//!   chunked containers binding them ([`codec::bbits`]).
//! - [`intersect`]: sorted-set `u32` intersection with skew-adaptive
//!   variants.
//! - [`kernel`]: container kernels: [`kernel::databox`], [`kernel::flex`],
//!   [`kernel::intset`], [`kernel::multimap`].
//! - [`wheel`]: a four-level hierarchical timing wheel.
//! - [`persist`]: snapshot + WAL persistence with typed wrappers.
//!
//! # Example
//!
//! ```rust,ignore
//! use fennec::persist::{PersistentIntSet, PersistCtxConfig};
//!
//! // Create a durable set backed by /data/ids.snap + /data/ids.wal.
//! let mut set = PersistentIntSet::create("/data/ids", PersistCtxConfig::default())?;
//! set.add(42)?;
//! set.close()?;
//!
//! // Reopen later: snapshot restore + WAL replay.
//! let set = PersistentIntSet::open("/data/ids", PersistCtxConfig::default())?;
//! assert!(set.contains(42));
//! ```
//!
//! All components are single-threaded; wrap instances in a mutex for
//! shared use.

#![deny(missing_docs)]

pub mod codec;
pub mod error;
pub mod intersect;
pub mod kernel;
pub mod persist;
pub mod wheel;

pub use codec::bbits::{DodDod, DodXof, SeriesStats};
pub use codec::dod::{DodReader, DodWriter};
pub use codec::xof::{XofReader, XofWriter};
pub use error::{Error, Result};
pub use kernel::databox::Databox;
pub use kernel::flex::Flex;
pub use kernel::intset::IntSetU32;
pub use kernel::multimap::Multimap;
pub use wheel::{TimerId, TimerWheel, TimerWheelStats};
