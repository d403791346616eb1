//! Checksum family used by snapshot and WAL framing.
//!
//! The on-disk format fixes the family to xxHash: the snapshot header is
//! always XXH64, WAL entries are always XXH32, and the snapshot body footer
//! is configurable between none / XXH32 / XXH64 / XXH128. Checksum kinds
//! are encoded in file headers, so the numeric tags are stable.

use xxhash_rust::xxh3::xxh3_128;
use xxhash_rust::xxh32::xxh32;
use xxhash_rust::xxh64::xxh64;

/// Checksum algorithm selector. Tags are stored on disk; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ChecksumKind {
    /// No checksum (testing only).
    None = 0,
    /// 32-bit xxHash (4 bytes).
    Xxh32 = 1,
    /// 64-bit xxHash (8 bytes, default).
    #[default]
    Xxh64 = 2,
    /// 128-bit xxHash (16 bytes).
    Xxh128 = 3,
}

impl ChecksumKind {
    /// Decodes a stored tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Xxh32),
            2 => Some(Self::Xxh64),
            3 => Some(Self::Xxh128),
            _ => None,
        }
    }

    /// Stored checksum length in bytes.
    pub fn len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Xxh32 => 4,
            Self::Xxh64 => 8,
            Self::Xxh128 => 16,
        }
    }

    /// True for [`ChecksumKind::None`].
    pub fn is_empty(self) -> bool {
        self == Self::None
    }
}

/// A computed checksum tagged with its algorithm.
///
/// The value is held in little-endian byte form, the same form written to
/// disk, so comparison and serialization are both plain byte operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumValue {
    kind: ChecksumKind,
    bytes: [u8; 16],
}

impl ChecksumValue {
    /// Computes the checksum of `data` with the given algorithm.
    pub fn compute(kind: ChecksumKind, data: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        match kind {
            ChecksumKind::None => {}
            ChecksumKind::Xxh32 => {
                bytes[..4].copy_from_slice(&xxh32(data, 0).to_le_bytes());
            }
            ChecksumKind::Xxh64 => {
                bytes[..8].copy_from_slice(&xxh64(data, 0).to_le_bytes());
            }
            ChecksumKind::Xxh128 => {
                bytes.copy_from_slice(&xxh3_128(data).to_le_bytes());
            }
        }
        Self { kind, bytes }
    }

    /// Reconstructs a stored checksum from its on-disk bytes.
    pub fn from_bytes(kind: ChecksumKind, stored: &[u8]) -> Option<Self> {
        if stored.len() != kind.len() {
            return None;
        }
        let mut bytes = [0u8; 16];
        bytes[..stored.len()].copy_from_slice(stored);
        Some(Self { kind, bytes })
    }

    /// The algorithm tag.
    pub fn kind(self) -> ChecksumKind {
        self.kind
    }

    /// The on-disk byte form (length per [`ChecksumKind::len`]).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.kind.len()]
    }

    /// True when `data` hashes to this value under the same algorithm.
    pub fn verify(&self, data: &[u8]) -> bool {
        *self == Self::compute(self.kind, data)
    }
}

/// XXH32 convenience for WAL entry and header checksums.
pub fn checksum32(data: &[u8]) -> u32 {
    xxh32(data, 0)
}

/// XXH64 convenience for snapshot header checksums.
pub fn checksum64(data: &[u8]) -> u64 {
    xxh64(data, 0)
}
