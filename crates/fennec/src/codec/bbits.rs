//! Chunked bitmap containers binding codec writers into fixed-size segments.
//!
//! Two flavours exist: [`DodDod`] (integer keys + integer values) and
//! [`DodXof`] (integer keys + double values). Each keeps two parallel arrays
//! of codec writers backed by 4096-byte bitstreams. A new chunk opens lazily
//! when appending a worst-case element would overflow the tail chunk; the
//! sealed tail is closed and its buffer shrunk to the bytes actually used.

use crate::codec::dod::{DodWriter, DOD_MAX_ELEMENT_BITS};
use crate::codec::xof::{XofWriter, XOF_MAX_ELEMENT_BITS};

/// Bytes per chunk bitstream.
pub const CHUNK_BYTES: usize = 4096;

const CHUNK_BITS: usize = CHUNK_BYTES * 8;

#[inline]
fn dod_chunk_full(used_bits: usize) -> bool {
    used_bits + DOD_MAX_ELEMENT_BITS >= CHUNK_BITS
}

#[inline]
fn xof_chunk_full(used_bits: usize) -> bool {
    used_bits + XOF_MAX_ELEMENT_BITS >= CHUNK_BITS
}

/// Streaming statistics over a decoded value range.
///
/// `variance` is the accumulated sum of squared deviations (Welford's M2,
/// not divided by the count); `stddev` is `sqrt(variance / count)`, the
/// uncorrected population form. Both choices are deliberate and part of the
/// read contract.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeriesStats {
    /// Running mean of the values.
    pub mean: f64,
    /// Sum of squared deviations from the running mean.
    pub variance: f64,
    /// `sqrt(variance / count)`.
    pub stddev: f64,
}

fn welford(values: impl Iterator<Item = f64>) -> SeriesStats {
    let mut mean = 0.0f64;
    let mut m2 = 0.0f64;
    let mut n = 0usize;

    for v in values {
        n += 1;
        let delta = v - mean;
        mean += delta / n as f64;
        m2 += delta * (v - mean);
    }

    if n == 0 {
        return SeriesStats::default();
    }
    SeriesStats {
        mean,
        variance: m2,
        stddev: (m2 / n as f64).sqrt(),
    }
}

/// Resolves a possibly-negative offset and clamps the count to the
/// remaining elements. Returns `None` when the offset falls before the
/// start.
fn resolve_range(elements: u64, offset: i64, count: i64) -> Option<(u64, u64)> {
    let mut offset = offset;
    if offset < 0 {
        offset += elements as i64;
        if offset < 0 {
            return None;
        }
    }
    let offset = (offset as u64).min(elements);

    let count = if count < 0 || count as u64 > elements {
        elements
    } else {
        count as u64
    };

    Some((offset, count.min(elements - offset)))
}

/// A chunked container of (integer key, integer value) pairs.
#[derive(Debug, Clone, Default)]
pub struct DodDod {
    key: Vec<DodWriter>,
    val: Vec<DodWriter>,
    elements: u64,
}

impl DodDod {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total appended pairs across all chunks.
    pub fn elements(&self) -> u64 {
        self.elements
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.key.len()
    }

    /// The key and value writers of chunk `i`.
    pub fn chunk(&self, i: usize) -> (&DodWriter, &DodWriter) {
        (&self.key[i], &self.val[i])
    }

    /// Appends a pair, opening a new chunk when the tail could overflow.
    pub fn append(&mut self, new_key: i64, new_val: i64) {
        let need_new = match self.key.last() {
            None => true,
            Some(kw) => {
                let vw = self.val.last().expect("parallel chunk arrays");
                dod_chunk_full(kw.used_bits()) || dod_chunk_full(vw.used_bits())
            }
        };

        if need_new {
            if let Some(kw) = self.key.last_mut() {
                kw.close();
            }
            if let Some(vw) = self.val.last_mut() {
                vw.close();
            }
            self.key.push(DodWriter::with_capacity_bytes(CHUNK_BYTES));
            self.val.push(DodWriter::with_capacity_bytes(CHUNK_BYTES));
        }

        self.key.last_mut().expect("tail chunk").write(new_key);
        self.val.last_mut().expect("tail chunk").write(new_val);
        self.elements += 1;
    }

    fn read_into(&self, offset: u64, count: u64, keys: &mut Vec<i64>, vals: &mut Vec<i64>) {
        // Locate the chunk containing `offset`.
        let mut current = 0u64;
        let mut i = 0usize;
        while i < self.key.len() {
            let chunk_count = self.key[i].count();
            if current + chunk_count > offset {
                break;
            }
            current += chunk_count;
            i += 1;
        }

        let mut start_offset = (offset - current) as usize;
        let mut remaining = count as usize;

        while remaining > 0 && i < self.key.len() {
            debug_assert_eq!(self.key[i].count(), self.val[i].count());
            let chunk_keys = self.key[i].decode_all();
            let chunk_vals = self.val[i].decode_all();

            let available = chunk_keys.len() - start_offset;
            let take = available.min(remaining);

            keys.extend_from_slice(&chunk_keys[start_offset..start_offset + take]);
            vals.extend_from_slice(&chunk_vals[start_offset..start_offset + take]);

            remaining -= take;
            start_offset = 0;
            i += 1;
        }
    }

    /// Reads `count` pairs starting at `offset`.
    ///
    /// A negative offset counts from the tail; a negative or oversized count
    /// is clamped to the remaining elements. Returns `None` when the
    /// container is empty or the offset falls before the start.
    pub fn read_range(&self, offset: i64, count: i64) -> Option<(Vec<i64>, Vec<i64>)> {
        if self.key.is_empty() {
            return None;
        }
        let (offset, count) = resolve_range(self.elements, offset, count)?;

        let mut keys = Vec::with_capacity(count as usize);
        let mut vals = Vec::with_capacity(count as usize);
        self.read_into(offset, count, &mut keys, &mut vals);
        Some((keys, vals))
    }

    /// Like [`DodDod::read_range`], additionally computing streaming
    /// statistics over the produced values.
    pub fn read_range_stats(&self, offset: i64, count: i64) -> Option<(Vec<i64>, Vec<i64>, SeriesStats)> {
        let (keys, vals) = self.read_range(offset, count)?;
        let stats = welford(vals.iter().map(|&v| v as f64));
        Some((keys, vals, stats))
    }
}

/// A chunked container of (integer key, double value) pairs.
#[derive(Debug, Clone, Default)]
pub struct DodXof {
    key: Vec<DodWriter>,
    val: Vec<XofWriter>,
    elements: u64,
}

impl DodXof {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total appended pairs across all chunks.
    pub fn elements(&self) -> u64 {
        self.elements
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.key.len()
    }

    /// The key and value writers of chunk `i`.
    pub fn chunk(&self, i: usize) -> (&DodWriter, &XofWriter) {
        (&self.key[i], &self.val[i])
    }

    /// Appends a pair, opening a new chunk when the tail could overflow.
    pub fn append(&mut self, new_key: i64, new_val: f64) {
        let need_new = match self.key.last() {
            None => true,
            Some(kw) => {
                let vw = self.val.last().expect("parallel chunk arrays");
                dod_chunk_full(kw.used_bits()) || xof_chunk_full(vw.used_bits())
            }
        };

        if need_new {
            if let Some(kw) = self.key.last_mut() {
                kw.close();
            }
            if let Some(vw) = self.val.last_mut() {
                vw.close();
            }
            self.key.push(DodWriter::with_capacity_bytes(CHUNK_BYTES));
            self.val.push(XofWriter::with_capacity_bytes(CHUNK_BYTES));
        }

        self.key.last_mut().expect("tail chunk").write(new_key);
        self.val.last_mut().expect("tail chunk").write(new_val);
        self.elements += 1;
    }

    fn read_into(&self, offset: u64, count: u64, keys: &mut Vec<i64>, vals: &mut Vec<f64>) {
        let mut current = 0u64;
        let mut i = 0usize;
        while i < self.key.len() {
            let chunk_count = self.key[i].count();
            if current + chunk_count > offset {
                break;
            }
            current += chunk_count;
            i += 1;
        }

        let mut start_offset = (offset - current) as usize;
        let mut remaining = count as usize;

        while remaining > 0 && i < self.key.len() {
            debug_assert_eq!(self.key[i].count(), self.val[i].count());
            let chunk_keys = self.key[i].decode_all();
            let chunk_vals = self.val[i].decode_all();

            let available = chunk_keys.len() - start_offset;
            let take = available.min(remaining);

            keys.extend_from_slice(&chunk_keys[start_offset..start_offset + take]);
            vals.extend_from_slice(&chunk_vals[start_offset..start_offset + take]);

            remaining -= take;
            start_offset = 0;
            i += 1;
        }
    }

    /// Reads `count` pairs starting at `offset`; same offset/count
    /// semantics as [`DodDod::read_range`].
    pub fn read_range(&self, offset: i64, count: i64) -> Option<(Vec<i64>, Vec<f64>)> {
        if self.key.is_empty() {
            return None;
        }
        let (offset, count) = resolve_range(self.elements, offset, count)?;

        let mut keys = Vec::with_capacity(count as usize);
        let mut vals = Vec::with_capacity(count as usize);
        self.read_into(offset, count, &mut keys, &mut vals);
        Some((keys, vals))
    }

    /// Like [`DodXof::read_range`], additionally computing streaming
    /// statistics over the produced values.
    pub fn read_range_stats(&self, offset: i64, count: i64) -> Option<(Vec<i64>, Vec<f64>, SeriesStats)> {
        let (keys, vals) = self.read_range(offset, count)?;
        let stats = welford(vals.iter().copied());
        Some((keys, vals, stats))
    }
}
