//! Typed persistent wrappers pairing a kernel with a persistence context.
//!
//! Every mutation follows the same protocol: encode the arguments, append a
//! WAL entry through the context, apply the mutation in memory, then check
//! the compaction thresholds. Reads delegate straight to the kernel.
//! `close` syncs; `open` recovers the kernel from snapshot + WAL.
//!
//! Operations that are not naturally idempotent (flex pushes and pops,
//! series appends) encode the expected post-operation element count, so a
//! replay that re-applies entries already captured by a snapshot (possible
//! after a crash between a compaction's snapshot write and its WAL
//! truncation) detects and skips them.

use crate::codec::bbits::{DodXof, SeriesStats};
use crate::error::{Error, Result};
use crate::kernel::databox::{read_varint, write_varint, Databox};
use crate::kernel::flex::Flex;
use crate::kernel::intset::IntSetU32;
use crate::kernel::multimap::Multimap;
use crate::persist::ctx::{PersistCtx, PersistCtxConfig, PersistCtxStats};
use crate::persist::ops::{PersistOp, PersistOps, StructType};
use std::path::Path;

fn encode_boxes(data: &mut Vec<u8>, boxes: &[Databox]) {
    write_varint(data, boxes.len() as u64);
    for b in boxes {
        b.encode_into(data);
    }
}

fn decode_boxes(data: &[u8]) -> Result<Vec<Databox>> {
    let (n, mut offset) =
        read_varint(data).ok_or_else(|| Error::CorruptWalEntry("bad argument count".into()))?;
    let mut boxes = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let (b, used) = Databox::decode_from(&data[offset..])
            .ok_or_else(|| Error::CorruptWalEntry("bad argument encoding".into()))?;
        boxes.push(b);
        offset += used;
    }
    Ok(boxes)
}

/* ====================================================================
 * IntSet
 * ==================================================================== */

/// Persistence callbacks for [`IntSetU32`].
pub struct IntSetOps;

impl PersistOps for IntSetOps {
    type Kernel = IntSetU32;

    fn struct_type() -> StructType {
        StructType::IntSet
    }

    fn name() -> &'static str {
        "intset"
    }

    fn snapshot(kernel: &IntSetU32) -> Vec<u8> {
        // [count: u64][values: count * u32], all little-endian.
        let mut buf = Vec::with_capacity(8 + kernel.count() * 4);
        buf.extend_from_slice(&(kernel.count() as u64).to_le_bytes());
        for v in kernel.iter() {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    fn restore(data: &[u8]) -> Result<IntSetU32> {
        if data.len() < 8 {
            return Err(Error::CorruptSnapshot("intset body too short".into()));
        }
        let count = u64::from_le_bytes(data[0..8].try_into().expect("8 bytes")) as usize;
        if data.len() < 8 + count * 4 {
            return Err(Error::CorruptSnapshot("intset body shorter than count".into()));
        }

        let mut kernel = IntSetU32::new();
        for i in 0..count {
            let off = 8 + i * 4;
            kernel.add(u32::from_le_bytes(data[off..off + 4].try_into().expect("4 bytes")));
        }
        Ok(kernel)
    }

    fn count(kernel: &IntSetU32) -> u64 {
        kernel.count() as u64
    }

    fn estimate_size(kernel: &IntSetU32) -> usize {
        8 + kernel.bytes()
    }

    fn encode_op(op: PersistOp, args: &[Databox]) -> Vec<u8> {
        match op {
            PersistOp::Insert | PersistOp::Delete => {
                let value = args[0].as_u64().expect("intset arg is integral") as u32;
                value.to_le_bytes().to_vec()
            }
            _ => Vec::new(),
        }
    }

    fn apply_op(kernel: &mut IntSetU32, op: PersistOp, data: &[u8]) -> Result<()> {
        match op {
            PersistOp::Insert | PersistOp::Delete => {
                if data.len() != 4 {
                    return Err(Error::CorruptWalEntry("intset op payload size".into()));
                }
                let value = u32::from_le_bytes(data.try_into().expect("4 bytes"));
                // Both directions are idempotent; replay may re-apply.
                if op == PersistOp::Insert {
                    kernel.add(value);
                } else {
                    kernel.remove(value);
                }
                Ok(())
            }
            PersistOp::Clear => {
                kernel.clear();
                Ok(())
            }
            _ => Err(Error::CorruptWalEntry(format!("intset op {:?}", op))),
        }
    }
}

/// A persistent sorted set of distinct `u32` values.
pub struct PersistentIntSet {
    kernel: IntSetU32,
    ctx: PersistCtx<IntSetOps>,
}

impl PersistentIntSet {
    /// Creates a fresh set at `<base>.snap` / `<base>.wal`, writing the
    /// initial empty snapshot immediately.
    pub fn create(base: impl AsRef<Path>, config: PersistCtxConfig) -> Result<Self> {
        Self::create_with_ctx(PersistCtx::open(base, config)?)
    }

    /// Opens an existing set, recovering from snapshot + WAL.
    pub fn open(base: impl AsRef<Path>, config: PersistCtxConfig) -> Result<Self> {
        Self::open_with_ctx(PersistCtx::open(base, config)?)
    }

    /// Creates a fresh set over a prepared context.
    pub fn create_with_ctx(mut ctx: PersistCtx<IntSetOps>) -> Result<Self> {
        let kernel = IntSetU32::new();
        ctx.save_snapshot(&kernel)?;
        Ok(Self { kernel, ctx })
    }

    /// Opens a set over a prepared context.
    pub fn open_with_ctx(mut ctx: PersistCtx<IntSetOps>) -> Result<Self> {
        let kernel = ctx.recover()?;
        Ok(Self { kernel, ctx })
    }

    /// Adds a value. Returns false when it was already present.
    pub fn add(&mut self, value: u32) -> Result<bool> {
        self.ctx.log_op(PersistOp::Insert, &[Databox::Unsigned(value.into())])?;
        let added = self.kernel.add(value);
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(added)
    }

    /// Removes a value. Returns false when it was absent.
    pub fn remove(&mut self, value: u32) -> Result<bool> {
        self.ctx.log_op(PersistOp::Delete, &[Databox::Unsigned(value.into())])?;
        let removed = self.kernel.remove(value);
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(removed)
    }

    /// Membership test.
    pub fn contains(&self, value: u32) -> bool {
        self.kernel.exists(value)
    }

    /// The member at sorted position `index`.
    pub fn get(&self, index: usize) -> Option<u32> {
        self.kernel.get(index)
    }

    /// Number of members.
    pub fn count(&self) -> usize {
        self.kernel.count()
    }

    /// The underlying kernel.
    pub fn kernel(&self) -> &IntSetU32 {
        &self.kernel
    }

    /// Forces a compaction now.
    pub fn compact(&mut self) -> Result<()> {
        self.ctx.compact(&self.kernel)
    }

    /// Context counters.
    pub fn stats(&mut self) -> PersistCtxStats {
        self.ctx.stats()
    }

    /// Syncs and consumes the wrapper.
    pub fn close(mut self) -> Result<()> {
        self.ctx.sync()
    }
}

/* ====================================================================
 * Flex
 * ==================================================================== */

/// Persistence callbacks for [`Flex`].
pub struct FlexOps;

impl FlexOps {
    /// Push/pop payloads carry the expected post-operation count so an
    /// already-applied entry is detectable on replay.
    fn encode_counted(expected_count: u64, value: Option<&Databox>) -> Vec<u8> {
        let mut data = Vec::new();
        write_varint(&mut data, expected_count);
        if let Some(v) = value {
            v.encode_into(&mut data);
        }
        data
    }

    fn decode_counted(data: &[u8]) -> Result<(u64, Option<Databox>)> {
        let (expected, offset) =
            read_varint(data).ok_or_else(|| Error::CorruptWalEntry("bad count field".into()))?;
        if offset == data.len() {
            return Ok((expected, None));
        }
        let (value, _) = Databox::decode_from(&data[offset..])
            .ok_or_else(|| Error::CorruptWalEntry("bad value encoding".into()))?;
        Ok((expected, Some(value)))
    }
}

impl PersistOps for FlexOps {
    type Kernel = Flex;

    fn struct_type() -> StructType {
        StructType::Flex
    }

    fn name() -> &'static str {
        "flex"
    }

    fn snapshot(kernel: &Flex) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + kernel.bytes());
        buf.extend_from_slice(&kernel.count().to_le_bytes());
        for value in kernel.iter() {
            value.encode_into(&mut buf);
        }
        buf
    }

    fn restore(data: &[u8]) -> Result<Flex> {
        if data.len() < 8 {
            return Err(Error::CorruptSnapshot("flex body too short".into()));
        }
        let count = u64::from_le_bytes(data[0..8].try_into().expect("8 bytes"));

        let mut kernel = Flex::new();
        let mut offset = 8usize;
        for _ in 0..count {
            let (value, used) = Databox::decode_from(&data[offset..])
                .ok_or_else(|| Error::CorruptSnapshot("flex element encoding".into()))?;
            kernel.push_tail(&value);
            offset += used;
        }
        Ok(kernel)
    }

    fn count(kernel: &Flex) -> u64 {
        kernel.count()
    }

    fn estimate_size(kernel: &Flex) -> usize {
        8 + kernel.bytes()
    }

    fn encode_op(op: PersistOp, args: &[Databox]) -> Vec<u8> {
        match op {
            PersistOp::PushHead | PersistOp::PushTail => {
                let expected = args[1].as_u64().expect("expected count");
                Self::encode_counted(expected, Some(&args[0]))
            }
            PersistOp::PopHead | PersistOp::PopTail => {
                let expected = args[0].as_u64().expect("expected count");
                Self::encode_counted(expected, None)
            }
            _ => Vec::new(),
        }
    }

    fn apply_op(kernel: &mut Flex, op: PersistOp, data: &[u8]) -> Result<()> {
        match op {
            PersistOp::PushHead | PersistOp::PushTail => {
                let (expected, value) = Self::decode_counted(data)?;
                if kernel.count() + 1 != expected {
                    // Already captured by the snapshot this WAL follows.
                    return Ok(());
                }
                let value =
                    value.ok_or_else(|| Error::CorruptWalEntry("push without value".into()))?;
                if op == PersistOp::PushHead {
                    kernel.push_head(&value);
                } else {
                    kernel.push_tail(&value);
                }
                Ok(())
            }
            PersistOp::PopHead | PersistOp::PopTail => {
                let (expected, _) = Self::decode_counted(data)?;
                if kernel.count() != expected + 1 {
                    return Ok(());
                }
                if op == PersistOp::PopHead {
                    kernel.pop_head();
                } else {
                    kernel.pop_tail();
                }
                Ok(())
            }
            PersistOp::Clear => {
                kernel.clear();
                Ok(())
            }
            _ => Err(Error::CorruptWalEntry(format!("flex op {:?}", op))),
        }
    }
}

/// A persistent compact typed sequence.
pub struct PersistentFlex {
    kernel: Flex,
    ctx: PersistCtx<FlexOps>,
}

impl PersistentFlex {
    /// Creates a fresh sequence, writing the initial empty snapshot.
    pub fn create(base: impl AsRef<Path>, config: PersistCtxConfig) -> Result<Self> {
        Self::create_with_ctx(PersistCtx::open(base, config)?)
    }

    /// Opens an existing sequence, recovering from snapshot + WAL.
    pub fn open(base: impl AsRef<Path>, config: PersistCtxConfig) -> Result<Self> {
        Self::open_with_ctx(PersistCtx::open(base, config)?)
    }

    /// Creates a fresh sequence over a prepared context.
    pub fn create_with_ctx(mut ctx: PersistCtx<FlexOps>) -> Result<Self> {
        let kernel = Flex::new();
        ctx.save_snapshot(&kernel)?;
        Ok(Self { kernel, ctx })
    }

    /// Opens a sequence over a prepared context.
    pub fn open_with_ctx(mut ctx: PersistCtx<FlexOps>) -> Result<Self> {
        let kernel = ctx.recover()?;
        Ok(Self { kernel, ctx })
    }

    /// Appends a value at the tail.
    pub fn push_tail(&mut self, value: &Databox) -> Result<()> {
        let expected = Databox::Unsigned(self.kernel.count() + 1);
        self.ctx
            .log_op(PersistOp::PushTail, &[value.clone(), expected])?;
        self.kernel.push_tail(value);
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(())
    }

    /// Inserts a value at the head.
    pub fn push_head(&mut self, value: &Databox) -> Result<()> {
        let expected = Databox::Unsigned(self.kernel.count() + 1);
        self.ctx
            .log_op(PersistOp::PushHead, &[value.clone(), expected])?;
        self.kernel.push_head(value);
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(())
    }

    /// Removes and returns the head value.
    pub fn pop_head(&mut self) -> Result<Option<Databox>> {
        if self.kernel.is_empty() {
            return Ok(None);
        }
        let expected = Databox::Unsigned(self.kernel.count() - 1);
        self.ctx.log_op(PersistOp::PopHead, &[expected])?;
        let value = self.kernel.pop_head();
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(value)
    }

    /// Removes and returns the tail value.
    pub fn pop_tail(&mut self) -> Result<Option<Databox>> {
        if self.kernel.is_empty() {
            return Ok(None);
        }
        let expected = Databox::Unsigned(self.kernel.count() - 1);
        self.ctx.log_op(PersistOp::PopTail, &[expected])?;
        let value = self.kernel.pop_tail();
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(value)
    }

    /// Removes all values.
    pub fn clear(&mut self) -> Result<()> {
        self.ctx.log_op(PersistOp::Clear, &[])?;
        self.kernel.clear();
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(())
    }

    /// The value at `index`.
    pub fn get(&self, index: u64) -> Option<Databox> {
        self.kernel.get(index)
    }

    /// Number of values held.
    pub fn count(&self) -> u64 {
        self.kernel.count()
    }

    /// The underlying kernel.
    pub fn kernel(&self) -> &Flex {
        &self.kernel
    }

    /// Context counters.
    pub fn stats(&mut self) -> PersistCtxStats {
        self.ctx.stats()
    }

    /// Syncs and consumes the wrapper.
    pub fn close(mut self) -> Result<()> {
        self.ctx.sync()
    }
}

/* ====================================================================
 * Multimap
 * ==================================================================== */

/// Persistence callbacks for [`Multimap`].
pub struct MultimapOps;

impl PersistOps for MultimapOps {
    type Kernel = Multimap;

    fn struct_type() -> StructType {
        StructType::Multimap
    }

    fn name() -> &'static str {
        "multimap"
    }

    fn snapshot(kernel: &Multimap) -> Vec<u8> {
        // [width varint][record count varint][records...]
        let mut buf = Vec::with_capacity(16 + kernel.bytes());
        write_varint(&mut buf, kernel.width() as u64);
        write_varint(&mut buf, kernel.count() as u64);
        for record in kernel.iter() {
            for value in record {
                value.encode_into(&mut buf);
            }
        }
        buf
    }

    fn restore(data: &[u8]) -> Result<Multimap> {
        let (width, mut offset) =
            read_varint(data).ok_or_else(|| Error::CorruptSnapshot("multimap width".into()))?;
        let (count, used) = read_varint(&data[offset..])
            .ok_or_else(|| Error::CorruptSnapshot("multimap count".into()))?;
        offset += used;

        if width == 0 {
            return Err(Error::CorruptSnapshot("multimap width of zero".into()));
        }

        let mut kernel = Multimap::new(width as usize);
        let mut record = Vec::with_capacity(width as usize);
        for _ in 0..count {
            record.clear();
            for _ in 0..width {
                let (value, used) = Databox::decode_from(&data[offset..])
                    .ok_or_else(|| Error::CorruptSnapshot("multimap record encoding".into()))?;
                record.push(value);
                offset += used;
            }
            kernel.insert(&record);
        }
        Ok(kernel)
    }

    fn count(kernel: &Multimap) -> u64 {
        kernel.count() as u64
    }

    fn estimate_size(kernel: &Multimap) -> usize {
        16 + kernel.bytes()
    }

    fn encode_op(op: PersistOp, args: &[Databox]) -> Vec<u8> {
        match op {
            PersistOp::Insert | PersistOp::Delete | PersistOp::Update => {
                let mut data = Vec::new();
                encode_boxes(&mut data, args);
                data
            }
            _ => Vec::new(),
        }
    }

    fn apply_op(kernel: &mut Multimap, op: PersistOp, data: &[u8]) -> Result<()> {
        match op {
            PersistOp::Insert => {
                let record = decode_boxes(data)?;
                if record.len() != kernel.width() {
                    return Err(Error::CorruptWalEntry("multimap record width".into()));
                }
                // Insert replaces on equal key; replay is idempotent.
                kernel.insert(&record);
                Ok(())
            }
            PersistOp::Delete => {
                let args = decode_boxes(data)?;
                let key = args
                    .first()
                    .ok_or_else(|| Error::CorruptWalEntry("multimap delete key".into()))?;
                kernel.delete(key);
                Ok(())
            }
            PersistOp::Update => {
                // Field update carries the absolute new value, so replaying
                // it twice converges instead of double-applying a delta.
                let args = decode_boxes(data)?;
                if args.len() != 3 {
                    return Err(Error::CorruptWalEntry("multimap update arity".into()));
                }
                let column = args[1]
                    .as_u64()
                    .ok_or_else(|| Error::CorruptWalEntry("multimap update column".into()))?
                    as usize;

                if let Some(record) = kernel.lookup(&args[0]) {
                    let mut updated = record.to_vec();
                    if column >= updated.len() {
                        return Err(Error::CorruptWalEntry("multimap update column range".into()));
                    }
                    updated[column] = args[2].clone();
                    kernel.insert(&updated);
                }
                Ok(())
            }
            _ => Err(Error::CorruptWalEntry(format!("multimap op {:?}", op))),
        }
    }
}

/// A persistent sorted fixed-width record store.
pub struct PersistentMultimap {
    kernel: Multimap,
    ctx: PersistCtx<MultimapOps>,
}

impl PersistentMultimap {
    /// Creates a fresh map of `width`-column records, writing the initial
    /// empty snapshot.
    pub fn create(
        base: impl AsRef<Path>,
        config: PersistCtxConfig,
        width: usize,
    ) -> Result<Self> {
        let mut ctx = PersistCtx::open(base, config)?;
        let kernel = Multimap::new(width);
        ctx.save_snapshot(&kernel)?;
        Ok(Self { kernel, ctx })
    }

    /// Opens an existing map; the record width comes from the snapshot.
    pub fn open(base: impl AsRef<Path>, config: PersistCtxConfig) -> Result<Self> {
        let mut ctx = PersistCtx::open(base, config)?;
        let kernel = ctx.recover()?;
        Ok(Self { kernel, ctx })
    }

    /// Inserts a record, replacing an existing record with an equal key.
    pub fn insert(&mut self, record: &[Databox]) -> Result<()> {
        if record.len() != self.kernel.width() {
            return Err(Error::InvalidArgument("record width mismatch"));
        }
        self.ctx.log_op(PersistOp::Insert, record)?;
        self.kernel.insert(record);
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(())
    }

    /// Removes the record with the given key. Returns false when absent.
    pub fn delete(&mut self, key: &Databox) -> Result<bool> {
        self.ctx.log_op(PersistOp::Delete, std::slice::from_ref(key))?;
        let removed = self.kernel.delete(key);
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(removed)
    }

    /// Adds `delta` to a numeric column of the keyed record, returning the
    /// new value, or `None` when the key is absent or non-numeric.
    ///
    /// The WAL entry carries the resulting absolute value.
    pub fn field_incr(
        &mut self,
        key: &Databox,
        column: usize,
        delta: i64,
    ) -> Result<Option<i64>> {
        let Some(record) = self.kernel.lookup(key) else {
            return Ok(None);
        };
        let Some(current) = record.get(column).and_then(|c| c.as_i64()) else {
            return Ok(None);
        };
        let Some(updated) = current.checked_add(delta) else {
            return Ok(None);
        };

        self.ctx.log_op(
            PersistOp::Update,
            &[
                key.clone(),
                Databox::Unsigned(column as u64),
                Databox::Signed(updated),
            ],
        )?;
        self.kernel.field_incr(key, column, delta);
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(Some(updated))
    }

    /// The record with the given key.
    pub fn lookup(&self, key: &Databox) -> Option<&[Databox]> {
        self.kernel.lookup(key)
    }

    /// Number of records held.
    pub fn count(&self) -> usize {
        self.kernel.count()
    }

    /// The underlying kernel.
    pub fn kernel(&self) -> &Multimap {
        &self.kernel
    }

    /// Context counters.
    pub fn stats(&mut self) -> PersistCtxStats {
        self.ctx.stats()
    }

    /// Syncs and consumes the wrapper.
    pub fn close(mut self) -> Result<()> {
        self.ctx.sync()
    }
}

/* ====================================================================
 * Time series (wrapped DodXof container)
 * ==================================================================== */

/// Persistence callbacks for the chunked [`DodXof`] container.
pub struct SeriesOps;

impl PersistOps for SeriesOps {
    type Kernel = DodXof;

    fn struct_type() -> StructType {
        StructType::TimeSeries
    }

    fn name() -> &'static str {
        "timeseries"
    }

    fn snapshot(kernel: &DodXof) -> Vec<u8> {
        // [count: u64][pairs: key i64 + value f64 bits], little-endian.
        let mut buf = Vec::with_capacity(8 + kernel.elements() as usize * 16);
        buf.extend_from_slice(&kernel.elements().to_le_bytes());
        if let Some((keys, vals)) = kernel.read_range(0, -1) {
            for (k, v) in keys.iter().zip(vals.iter()) {
                buf.extend_from_slice(&k.to_le_bytes());
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
        }
        buf
    }

    fn restore(data: &[u8]) -> Result<DodXof> {
        if data.len() < 8 {
            return Err(Error::CorruptSnapshot("series body too short".into()));
        }
        let count = u64::from_le_bytes(data[0..8].try_into().expect("8 bytes")) as usize;
        if data.len() < 8 + count * 16 {
            return Err(Error::CorruptSnapshot("series body shorter than count".into()));
        }

        let mut kernel = DodXof::new();
        for i in 0..count {
            let off = 8 + i * 16;
            let key = i64::from_le_bytes(data[off..off + 8].try_into().expect("8 bytes"));
            let bits = u64::from_le_bytes(data[off + 8..off + 16].try_into().expect("8 bytes"));
            kernel.append(key, f64::from_bits(bits));
        }
        Ok(kernel)
    }

    fn count(kernel: &DodXof) -> u64 {
        kernel.elements()
    }

    fn estimate_size(kernel: &DodXof) -> usize {
        8 + kernel.elements() as usize * 16
    }

    fn encode_op(op: PersistOp, args: &[Databox]) -> Vec<u8> {
        match op {
            PersistOp::Insert => {
                let key = args[0].as_i64().expect("series key");
                let val = args[1].as_f64().expect("series value");
                let expected = args[2].as_u64().expect("expected count");

                let mut data = Vec::with_capacity(24);
                write_varint(&mut data, expected);
                data.extend_from_slice(&key.to_le_bytes());
                data.extend_from_slice(&val.to_bits().to_le_bytes());
                data
            }
            _ => Vec::new(),
        }
    }

    fn apply_op(kernel: &mut DodXof, op: PersistOp, data: &[u8]) -> Result<()> {
        match op {
            PersistOp::Insert => {
                let (expected, offset) = read_varint(data)
                    .ok_or_else(|| Error::CorruptWalEntry("series count field".into()))?;
                if data.len() < offset + 16 {
                    return Err(Error::CorruptWalEntry("series payload size".into()));
                }
                if kernel.elements() + 1 != expected {
                    // Already captured by the snapshot this WAL follows.
                    return Ok(());
                }

                let key =
                    i64::from_le_bytes(data[offset..offset + 8].try_into().expect("8 bytes"));
                let bits = u64::from_le_bytes(
                    data[offset + 8..offset + 16].try_into().expect("8 bytes"),
                );
                kernel.append(key, f64::from_bits(bits));
                Ok(())
            }
            _ => Err(Error::CorruptWalEntry(format!("series op {:?}", op))),
        }
    }
}

/// A persistent chunked (timestamp, double) series.
pub struct PersistentSeries {
    kernel: DodXof,
    ctx: PersistCtx<SeriesOps>,
}

impl PersistentSeries {
    /// Creates a fresh series, writing the initial empty snapshot.
    pub fn create(base: impl AsRef<Path>, config: PersistCtxConfig) -> Result<Self> {
        let mut ctx = PersistCtx::open(base, config)?;
        let kernel = DodXof::new();
        ctx.save_snapshot(&kernel)?;
        Ok(Self { kernel, ctx })
    }

    /// Opens an existing series, recovering from snapshot + WAL.
    pub fn open(base: impl AsRef<Path>, config: PersistCtxConfig) -> Result<Self> {
        let mut ctx = PersistCtx::open(base, config)?;
        let kernel = ctx.recover()?;
        Ok(Self { kernel, ctx })
    }

    /// Appends a (key, value) pair.
    pub fn append(&mut self, key: i64, value: f64) -> Result<()> {
        let expected = Databox::Unsigned(self.kernel.elements() + 1);
        self.ctx.log_op(
            PersistOp::Insert,
            &[Databox::Signed(key), Databox::Double(value), expected],
        )?;
        self.kernel.append(key, value);
        self.ctx.maybe_compact(&self.kernel)?;
        Ok(())
    }

    /// Reads `count` pairs starting at `offset`; see
    /// [`DodXof::read_range`].
    pub fn read_range(&self, offset: i64, count: i64) -> Option<(Vec<i64>, Vec<f64>)> {
        self.kernel.read_range(offset, count)
    }

    /// Range read with streaming statistics.
    pub fn read_range_stats(
        &self,
        offset: i64,
        count: i64,
    ) -> Option<(Vec<i64>, Vec<f64>, SeriesStats)> {
        self.kernel.read_range_stats(offset, count)
    }

    /// Total appended pairs.
    pub fn elements(&self) -> u64 {
        self.kernel.elements()
    }

    /// The underlying kernel.
    pub fn kernel(&self) -> &DodXof {
        &self.kernel
    }

    /// Context counters.
    pub fn stats(&mut self) -> PersistCtxStats {
        self.ctx.stats()
    }

    /// Syncs and consumes the wrapper.
    pub fn close(mut self) -> Result<()> {
        self.ctx.sync()
    }
}
