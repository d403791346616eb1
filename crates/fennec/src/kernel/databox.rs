//! Tagged primitive values with a total (type, value) ordering.
//!
//! `Databox` is the value currency of the kernels: flex sequences hold
//! databoxes, multimap records are databox tuples, and WAL operation
//! arguments travel as databox slices. The compact byte encoding here is
//! shared by flex storage and the WAL argument path.

use std::cmp::Ordering;

/// A tagged primitive value.
#[derive(Debug, Clone, PartialEq)]
pub enum Databox {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Signed(i64),
    /// Unsigned 64-bit integer.
    Unsigned(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Bounded byte string.
    Bytes(Vec<u8>),
}

impl Databox {
    /// Stable rank of the variant, the major key of the total order.
    fn type_rank(&self) -> u8 {
        match self {
            Databox::Null => 0,
            Databox::Bool(_) => 1,
            Databox::Signed(_) => 2,
            Databox::Unsigned(_) => 3,
            Databox::Float(_) => 4,
            Databox::Double(_) => 5,
            Databox::Bytes(_) => 6,
        }
    }

    /// Returns the numeric value as an `i64` when the variant is integral.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Databox::Signed(v) => Some(v),
            Databox::Unsigned(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Returns the numeric value as a `u64` when the variant is integral
    /// and non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Databox::Unsigned(v) => Some(v),
            Databox::Signed(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Returns the value as an `f64` when the variant is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Databox::Signed(v) => Some(v as f64),
            Databox::Unsigned(v) => Some(v as f64),
            Databox::Float(v) => Some(v as f64),
            Databox::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Appends the compact encoding of this value to `buf`.
    ///
    /// Layout: one tag byte, then a variant-specific payload (zigzag LEB128
    /// for integers, raw IEEE bits for floats, LEB128 length + bytes for
    /// byte strings).
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Databox::Null => buf.push(0),
            Databox::Bool(false) => buf.push(1),
            Databox::Bool(true) => buf.push(2),
            Databox::Signed(v) => {
                buf.push(3);
                write_varint(buf, zigzag(*v));
            }
            Databox::Unsigned(v) => {
                buf.push(4);
                write_varint(buf, *v);
            }
            Databox::Float(v) => {
                buf.push(5);
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Databox::Double(v) => {
                buf.push(6);
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Databox::Bytes(b) => {
                buf.push(7);
                write_varint(buf, b.len() as u64);
                buf.extend_from_slice(b);
            }
        }
    }

    /// Decodes one value from the front of `data`, returning it with the
    /// number of bytes consumed, or `None` when the encoding is malformed.
    pub fn decode_from(data: &[u8]) -> Option<(Databox, usize)> {
        let (&tag, rest) = data.split_first()?;
        match tag {
            0 => Some((Databox::Null, 1)),
            1 => Some((Databox::Bool(false), 1)),
            2 => Some((Databox::Bool(true), 1)),
            3 => {
                let (raw, n) = read_varint(rest)?;
                Some((Databox::Signed(unzigzag(raw)), 1 + n))
            }
            4 => {
                let (raw, n) = read_varint(rest)?;
                Some((Databox::Unsigned(raw), 1 + n))
            }
            5 => {
                let bits = u32::from_le_bytes(rest.get(..4)?.try_into().ok()?);
                Some((Databox::Float(f32::from_bits(bits)), 5))
            }
            6 => {
                let bits = u64::from_le_bytes(rest.get(..8)?.try_into().ok()?);
                Some((Databox::Double(f64::from_bits(bits)), 9))
            }
            7 => {
                let (len, n) = read_varint(rest)?;
                let len = len as usize;
                let bytes = rest.get(n..n + len)?;
                Some((Databox::Bytes(bytes.to_vec()), 1 + n + len))
            }
            _ => None,
        }
    }

    /// Total (type, value) comparison. Floats compare by IEEE total order
    /// so the relation stays antisymmetric in the presence of NaN.
    pub fn compare(&self, other: &Databox) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Databox::Null, Databox::Null) => Ordering::Equal,
            (Databox::Bool(a), Databox::Bool(b)) => a.cmp(b),
            (Databox::Signed(a), Databox::Signed(b)) => a.cmp(b),
            (Databox::Unsigned(a), Databox::Unsigned(b)) => a.cmp(b),
            (Databox::Float(a), Databox::Float(b)) => a.total_cmp(b),
            (Databox::Double(a), Databox::Double(b)) => a.total_cmp(b),
            (Databox::Bytes(a), Databox::Bytes(b)) => a.cmp(b),
            _ => unreachable!("equal ranks imply equal variants"),
        }
    }
}

#[inline]
fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// LEB128 unsigned varint append.
pub fn write_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// LEB128 unsigned varint read, returning the value and bytes consumed.
pub fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut v = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        v |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((v, i + 1));
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(b: &Databox) {
        let mut buf = Vec::new();
        b.encode_into(&mut buf);
        let (decoded, consumed) = Databox::decode_from(&buf).expect("decodes");
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.compare(b), Ordering::Equal);
    }

    #[test]
    fn test_encoding_round_trip() {
        round_trip(&Databox::Null);
        round_trip(&Databox::Bool(false));
        round_trip(&Databox::Bool(true));
        round_trip(&Databox::Signed(0));
        round_trip(&Databox::Signed(-1));
        round_trip(&Databox::Signed(i64::MIN));
        round_trip(&Databox::Signed(i64::MAX));
        round_trip(&Databox::Unsigned(u64::MAX));
        round_trip(&Databox::Float(1.5));
        round_trip(&Databox::Double(-0.0));
        round_trip(&Databox::Double(f64::NAN));
        round_trip(&Databox::Bytes(b"hello".to_vec()));
        round_trip(&Databox::Bytes(Vec::new()));
    }

    #[test]
    fn test_ordering_by_type_then_value() {
        assert_eq!(
            Databox::Null.compare(&Databox::Bool(false)),
            Ordering::Less
        );
        assert_eq!(
            Databox::Signed(100).compare(&Databox::Signed(7)),
            Ordering::Greater
        );
        assert_eq!(
            Databox::Signed(7).compare(&Databox::Unsigned(7)),
            Ordering::Less,
            "type rank dominates value"
        );
        assert_eq!(
            Databox::Bytes(b"abc".to_vec()).compare(&Databox::Bytes(b"abd".to_vec())),
            Ordering::Less
        );
    }

    #[test]
    fn test_small_integers_encode_compactly() {
        let mut buf = Vec::new();
        Databox::Unsigned(5).encode_into(&mut buf);
        assert_eq!(buf.len(), 2);

        buf.clear();
        Databox::Signed(-3).encode_into(&mut buf);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_malformed_input_rejected() {
        assert!(Databox::decode_from(&[]).is_none());
        assert!(Databox::decode_from(&[99]).is_none());
        assert!(Databox::decode_from(&[6, 1, 2]).is_none());
        assert!(Databox::decode_from(&[7, 10, 1, 2]).is_none());
    }
}
