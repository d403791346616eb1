//! Bit-packed codecs for time-series workloads.
//!
//! - [`bitstream`]: N-bit field access over `u64` word arrays.
//! - [`dod`]: self-describing delta-of-delta integer codec.
//! - [`xof`]: XOR-of-floats codec for IEEE-754 doubles.
//! - [`bbits`]: chunked containers binding codec writers into fixed-size
//!   segments with offset/count reads and streaming statistics.

pub mod bbits;
pub mod bitstream;
pub mod dod;
pub mod xof;
