//! XOR-of-floats codec for IEEE-754 doubles.
//!
//! Each value is XORed with its predecessor; the result is framed with a
//! short type prefix:
//!
//! - `0`: XOR is zero, the value repeats (1 bit total).
//! - `10`: the XOR fits inside the previous leading/trailing-zero window;
//!   only the window's unique bits follow.
//! - `11`: a new window: 6 bits of leading-zero count, 6 bits of payload
//!   length minus one, then the payload.
//!
//! The first value is written as a raw 64-bit pattern, so NaN payloads and
//! signed zeros round-trip bit-exactly.

use crate::codec::bitstream;

const TYPE_SAME: u64 = 0x02;
const TYPE_NEW: u64 = 0x03;

const BITS_TYPE: u32 = 2;
const BITS_LEADING_ZEROS: u32 = 6;
const BITS_LENGTH: u32 = 6;

/// Worst-case encoded size of one value: type + lz + length + 64 payload
/// bits.
pub const XOF_MAX_ELEMENT_BITS: usize = (BITS_TYPE + BITS_LEADING_ZEROS + BITS_LENGTH) as usize + 64;

/// Writes the first value of a stream as a raw 64-bit pattern.
pub fn xof_init(x: &mut [u64], bits_used: &mut usize, val: f64) {
    bitstream::set(x, 0, 64, val.to_bits());
    *bits_used = 64;
}

/// Appends one value as an XOR against `prev_val`.
///
/// `prev_lz`/`prev_tz` carry the previous window across appends; both start
/// at −1 meaning "no prior window", which forces the first non-zero XOR to
/// declare a new window.
pub fn xof_append(
    x: &mut [u64],
    bits_used: &mut usize,
    prev_lz: &mut i32,
    prev_tz: &mut i32,
    prev_val: f64,
    new_val: f64,
) {
    let compared = prev_val.to_bits() ^ new_val.to_bits();
    if compared == 0 {
        // A single zero bit; the destination is pre-zeroed.
        *bits_used += 1;
        return;
    }

    let new_lz = compared.leading_zeros() as i32;
    let new_tz = compared.trailing_zeros() as i32;
    let new_len = 64 - new_lz - new_tz;

    if *prev_lz >= 0 && new_lz >= *prev_lz && new_tz >= *prev_tz {
        // The XOR fits in the previous window; force-encode at the previous
        // window's width even when the exact fit would be narrower.
        let window_len = 64 - *prev_lz - *prev_tz;
        let bits = compared >> *prev_tz;

        bitstream::set(x, *bits_used, BITS_TYPE, TYPE_SAME);
        *bits_used += BITS_TYPE as usize;
        bitstream::set(x, *bits_used, window_len as u32, bits);
        *bits_used += window_len as usize;
    } else {
        let bits = compared >> new_tz;

        bitstream::set(x, *bits_used, BITS_TYPE, TYPE_NEW);
        *bits_used += BITS_TYPE as usize;
        bitstream::set(x, *bits_used, BITS_LEADING_ZEROS, new_lz as u64);
        *bits_used += BITS_LEADING_ZEROS as usize;
        // Length is 1-64 but six bits store 0-63, so keep length-1.
        bitstream::set(x, *bits_used, BITS_LENGTH, (new_len - 1) as u64);
        *bits_used += BITS_LENGTH as usize;
        bitstream::set(x, *bits_used, new_len as u32, bits);
        *bits_used += new_len as usize;

        *prev_lz = new_lz;
        *prev_tz = new_tz;
    }
}

/// Walks `skip` encoded values from the cursor, updating the cached decode
/// state, and returns the value after the last step.
///
/// `current_bits` holds the bit pattern of the last decoded value; `lz` and
/// `len` cache the active window. `skip == 0` returns the current value
/// without consuming anything.
pub fn xof_get_cached(
    x: &[u64],
    bit_offset: &mut usize,
    current_bits: &mut u64,
    lz: &mut u32,
    len: &mut u32,
    skip: usize,
) -> f64 {
    let mut consumed = 0usize;

    loop {
        if consumed == skip {
            return f64::from_bits(*current_bits);
        }
        consumed += 1;

        let ty = bitstream::get(x, *bit_offset, BITS_TYPE);
        if ty < 2 {
            // Zero marker: eat one bit, value unchanged.
            *bit_offset += 1;
            continue;
        }

        *bit_offset += BITS_TYPE as usize;

        if ty == TYPE_NEW {
            *lz = bitstream::get(x, *bit_offset, BITS_LEADING_ZEROS) as u32;
            *bit_offset += BITS_LEADING_ZEROS as usize;
            *len = bitstream::get(x, *bit_offset, BITS_LENGTH) as u32 + 1;
            *bit_offset += BITS_LENGTH as usize;
        }

        let unique = bitstream::get(x, *bit_offset, *len);
        *bit_offset += *len as usize;

        // Restore the window position, then fold into the running value.
        *current_bits ^= unique << (64 - *lz - *len);
    }
}

/// Decodes the value at `offset`, walking from the start of the stream.
pub fn xof_get(x: &[u64], offset: usize) -> f64 {
    let mut current_bits = bitstream::get(x, 0, 64);
    let mut bit_offset = 64usize;
    let mut lz = 0u32;
    let mut len = 0u32;

    xof_get_cached(x, &mut bit_offset, &mut current_bits, &mut lz, &mut len, offset)
}

/// Bulk-decodes `count` values from the stream.
pub fn xof_read_all(x: &[u64], out: &mut Vec<f64>, count: usize) {
    if count == 0 {
        return;
    }

    let mut current_bits = bitstream::get(x, 0, 64);
    let mut bit_offset = 64usize;
    let mut lz = 0u32;
    let mut len = 0u32;

    out.push(f64::from_bits(current_bits));
    for _ in 1..count {
        out.push(xof_get_cached(
            x,
            &mut bit_offset,
            &mut current_bits,
            &mut lz,
            &mut len,
            1,
        ));
    }
}

/// An append-only XOR-of-floats container.
#[derive(Debug, Clone)]
pub struct XofWriter {
    d: Vec<u64>,
    used_bits: usize,
    prev_val: f64,
    prev_lz: i32,
    prev_tz: i32,
    count: u64,
}

impl Default for XofWriter {
    fn default() -> Self {
        Self {
            d: Vec::new(),
            used_bits: 0,
            prev_val: 0.0,
            prev_lz: -1,
            prev_tz: -1,
            count: 0,
        }
    }
}

impl XofWriter {
    /// Creates an empty writer with no preallocated backing store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty writer with `bytes` of zeroed backing store.
    pub fn with_capacity_bytes(bytes: usize) -> Self {
        Self {
            d: vec![0u64; bytes.div_ceil(8)],
            ..Self::default()
        }
    }

    /// Number of values appended.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Bits consumed in the backing store.
    pub fn used_bits(&self) -> usize {
        self.used_bits
    }

    /// Bytes allocated for the backing store.
    pub fn bytes(&self) -> usize {
        self.d.len() * 8
    }

    /// The backing bitstream words.
    pub fn stream(&self) -> &[u64] {
        &self.d
    }

    fn ensure_bits(&mut self, extra: usize) {
        let need = (self.used_bits + extra).div_ceil(64);
        if self.d.len() < need {
            self.d.resize(need, 0);
        }
    }

    /// Appends a value.
    pub fn write(&mut self, val: f64) {
        self.ensure_bits(XOF_MAX_ELEMENT_BITS);
        if self.count == 0 {
            xof_init(&mut self.d, &mut self.used_bits, val);
        } else {
            xof_append(
                &mut self.d,
                &mut self.used_bits,
                &mut self.prev_lz,
                &mut self.prev_tz,
                self.prev_val,
                val,
            );
        }
        self.prev_val = val;
        self.count += 1;
    }

    /// Decodes every value in order.
    pub fn decode_all(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.count as usize);
        xof_read_all(&self.d, &mut out, self.count as usize);
        out
    }

    /// Freezes the writer, shrinking the backing store to its used size.
    pub fn close(&mut self) {
        self.d.truncate(self.used_bits.div_ceil(64));
        self.d.shrink_to_fit();
    }
}

/// Resumable sequential reader with O(1) amortised cost per value.
#[derive(Debug, Clone)]
pub struct XofReader {
    bit_offset: usize,
    current_bits: u64,
    lz: u32,
    len: u32,
    values_read: u64,
}

impl XofReader {
    /// Creates a reader over a stream, decoding the raw first value.
    pub fn new(x: &[u64]) -> Self {
        Self {
            bit_offset: 64,
            current_bits: bitstream::get(x, 0, 64),
            lz: 0,
            len: 0,
            values_read: 1,
        }
    }

    /// Creates a reader from a writer; an empty writer yields an empty
    /// reader positioned at the stream start.
    pub fn from_writer(w: &XofWriter) -> Self {
        if w.count == 0 {
            return Self {
                bit_offset: 0,
                current_bits: 0,
                lz: 0,
                len: 0,
                values_read: 0,
            };
        }
        Self::new(&w.d)
    }

    /// Decodes the next value and advances.
    pub fn next_value(&mut self, x: &[u64]) -> f64 {
        let val = xof_get_cached(
            x,
            &mut self.bit_offset,
            &mut self.current_bits,
            &mut self.lz,
            &mut self.len,
            1,
        );
        self.values_read += 1;
        val
    }

    /// Decodes up to `out.len()` values into `out`, returning the count.
    pub fn next_n(&mut self, x: &[u64], out: &mut [f64]) -> usize {
        for slot in out.iter_mut() {
            *slot = self.next_value(x);
        }
        out.len()
    }

    /// The most recently decoded value, without advancing.
    pub fn current(&self) -> f64 {
        f64::from_bits(self.current_bits)
    }

    /// Values decoded so far (the raw first value counts as read).
    pub fn values_read(&self) -> u64 {
        self.values_read
    }

    /// Values left given the stream's total element count.
    pub fn remaining(&self, total: u64) -> u64 {
        total.saturating_sub(self.values_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(values: &[f64]) {
        let mut w = XofWriter::new();
        for &v in values {
            w.write(v);
        }

        let decoded = w.decode_all();
        assert_eq!(decoded.len(), values.len());
        for (i, (&expected, &got)) in values.iter().zip(decoded.iter()).enumerate() {
            assert_eq!(expected.to_bits(), got.to_bits(), "element {}", i);
        }
    }

    #[test]
    fn test_all_same() {
        for v in [-1.0f64, 0.0, 1.0] {
            let mut w = XofWriter::new();
            for _ in 0..1000 {
                w.write(v);
            }
            // Raw first value plus one bit per repeat.
            assert_eq!(w.used_bits(), 64 + 999);
            round_trip(&vec![v; 1000]);
        }
    }

    #[test]
    fn test_alternating_values() {
        for base in -7..=7 {
            let values: Vec<f64> = (0..1000)
                .map(|i| if i % 2 == 0 { base as f64 } else { base as f64 + 1.0 })
                .collect();
            round_trip(&values);
        }
    }

    #[test]
    fn test_sequential_integers() {
        let values: Vec<f64> = (1..1000).map(|i| i as f64).collect();
        round_trip(&values);
    }

    #[test]
    fn test_smooth_series_framing() {
        let values = [25.0f64, 25.0, 25.000001, 25.000002];
        let mut w = XofWriter::new();
        w.write(values[0]);
        assert_eq!(w.used_bits(), 64);

        w.write(values[1]);
        assert_eq!(w.used_bits(), 65, "repeat costs one bit");

        w.write(values[2]);
        let x = values[1].to_bits() ^ values[2].to_bits();
        let len = (64 - x.leading_zeros() - x.trailing_zeros()) as usize;
        assert_eq!(w.used_bits(), 65 + 2 + 6 + 6 + len, "first XOR declares a window");

        round_trip(&values);
    }

    #[test]
    fn test_window_reuse() {
        // Bit patterns chosen so the second XOR nests inside the first
        // window: lz 32 / tz 24 / len 8, then lz 34 / tz 26 / len 4.
        let v0 = f64::from_bits(0x4009_0000_0000_0000);
        let v1 = f64::from_bits(v0.to_bits() ^ (0xFFu64 << 24));
        let v2 = f64::from_bits(v1.to_bits() ^ (0x3Cu64 << 24));

        let mut w = XofWriter::new();
        w.write(v0);
        w.write(v1);
        let after_new = w.used_bits();
        assert_eq!(after_new, 64 + 2 + 6 + 6 + 8);

        // Same window: type bits + window length only, no lz/len fields.
        w.write(v2);
        assert_eq!(w.used_bits() - after_new, 2 + 8);

        round_trip(&[v0, v1, v2]);
    }

    #[test]
    fn test_special_values_bit_exact() {
        round_trip(&[
            0.0,
            -0.0,
            f64::MIN,
            f64::MAX,
            f64::MIN_POSITIVE,
            f64::EPSILON,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NAN,
            f64::from_bits(0x7FF8_0000_0000_0001),
        ]);
    }

    #[test]
    fn test_random_walk() {
        let mut values = Vec::with_capacity(5000);
        let mut v = 100.5f64;
        let mut state = 0x1234_5678_9ABC_DEF0u64;
        for _ in 0..5000 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            v += (state >> 40) as f64 / 1e9;
            values.push(v);
        }
        round_trip(&values);
    }

    #[test]
    fn test_indexed_get() {
        let values: Vec<f64> = (0..200).map(|i| 1.0 + i as f64 * 0.125).collect();
        let mut w = XofWriter::new();
        for &v in &values {
            w.write(v);
        }
        for (i, &v) in values.iter().enumerate() {
            assert_eq!(xof_get(w.stream(), i).to_bits(), v.to_bits());
        }
    }

    #[test]
    fn test_reader_sequential_and_batch() {
        let values: Vec<f64> = (0..2000).map(|i| 50.0 + (i as f64) * 0.05).collect();
        let mut w = XofWriter::new();
        for &v in &values {
            w.write(v);
        }

        let mut r = XofReader::from_writer(&w);
        assert_eq!(r.current().to_bits(), values[0].to_bits());
        for &v in &values[1..] {
            assert_eq!(r.next_value(w.stream()).to_bits(), v.to_bits());
        }
        assert_eq!(r.values_read(), values.len() as u64);
        assert_eq!(r.remaining(values.len() as u64), 0);

        let mut r = XofReader::from_writer(&w);
        let mut batch = vec![0.0f64; values.len() - 1];
        assert_eq!(r.next_n(w.stream(), &mut batch), values.len() - 1);
        for (got, expected) in batch.iter().zip(&values[1..]) {
            assert_eq!(got.to_bits(), expected.to_bits());
        }
    }

    #[test]
    fn test_reader_remaining_midway() {
        let mut w = XofWriter::new();
        for i in 0..10 {
            w.write(i as f64 * 1.5);
        }

        let mut r = XofReader::from_writer(&w);
        assert_eq!(r.remaining(w.count()), 9);
        for _ in 0..4 {
            r.next_value(w.stream());
        }
        assert_eq!(r.remaining(w.count()), 5);
    }
}
