//! Per-attribute run generation.
//!
//! A collector buffers `(value, row_id)` pairs for one attribute, and on each
//! flush sorts the buffer and appends it to the attribute's temp file as one
//! run, recording the run's start offset. The offsets table plus the final
//! file size fully describe the run partition consumed by the merge.

use std::cmp::Ordering;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use crate::build::attr_writer::{AttrWriter, AttrWriterImpl};
use crate::build::encoder::StoredValue;
use crate::collation::{Collation, StrHashFn, hash_fn};
use crate::io::{FileReader, FileWriter, MappedValue};
use crate::pgm::PgmValue;
use crate::schema::AttrType;
use crate::{Result, RowId};

/// One record flowing through the sort pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Pair<V> {
    pub value: V,
    pub row_id: RowId,
}

/// Collector-side value width. The four instantiations (`u32`, `f32`, `i64`,
/// `u64`) cover the seven source attribute types; each knows its temp-file
/// record format, its total pair ordering and its on-disk (stored) width.
pub(crate) trait PairValue: Copy + Default + PgmValue + MappedValue {
    type Stored: StoredValue;

    /// Float values group and compare through IEEE equality.
    const IS_FLOAT: bool = false;

    /// Bytes one value occupies in a run record (row id not included).
    const VALUE_BYTES: usize;

    fn write_value(self, out: &mut FileWriter) -> Result<()>;
    fn read_value(reader: &mut FileReader) -> Result<Self>;

    /// Total order on values. Consistent with the grouping relation: values
    /// comparing `Equal` tie-break on row id everywhere.
    fn cmp_values(a: Self, b: Self) -> Ordering;

    /// Reinterpret into the index width written to the output file.
    fn to_stored(self) -> Self::Stored;

    // Ingestion per call shape; `None` flags a wrong-shape call.
    fn from_scalar(value: i64) -> Option<Self>;
    fn from_bytes(data: &[u8], hash: StrHashFn) -> Option<Self>;
    fn from_element(value: i64) -> Option<Self>;
}

impl PairValue for u32 {
    type Stored = u32;
    const VALUE_BYTES: usize = size_of::<u32>();

    fn write_value(self, out: &mut FileWriter) -> Result<()> {
        out.write_u32(self)
    }

    fn read_value(reader: &mut FileReader) -> Result<Self> {
        reader.read_u32()
    }

    fn cmp_values(a: Self, b: Self) -> Ordering {
        a.cmp(&b)
    }

    fn to_stored(self) -> u32 {
        self
    }

    fn from_scalar(value: i64) -> Option<Self> {
        Some(value as u32)
    }

    fn from_bytes(_data: &[u8], _hash: StrHashFn) -> Option<Self> {
        None
    }

    fn from_element(value: i64) -> Option<Self> {
        Some(value as u32)
    }
}

impl PairValue for i64 {
    type Stored = u64;
    const VALUE_BYTES: usize = size_of::<i64>();

    fn write_value(self, out: &mut FileWriter) -> Result<()> {
        out.write_u64(self as u64)
    }

    fn read_value(reader: &mut FileReader) -> Result<Self> {
        Ok(reader.read_u64()? as i64)
    }

    fn cmp_values(a: Self, b: Self) -> Ordering {
        a.cmp(&b)
    }

    fn to_stored(self) -> u64 {
        self as u64
    }

    fn from_scalar(value: i64) -> Option<Self> {
        Some(value)
    }

    fn from_bytes(_data: &[u8], _hash: StrHashFn) -> Option<Self> {
        None
    }

    fn from_element(value: i64) -> Option<Self> {
        Some(value)
    }
}

/// String attributes: the collation hash of the bytes.
impl PairValue for u64 {
    type Stored = u64;
    const VALUE_BYTES: usize = size_of::<u64>();

    fn write_value(self, out: &mut FileWriter) -> Result<()> {
        out.write_u64(self)
    }

    fn read_value(reader: &mut FileReader) -> Result<Self> {
        reader.read_u64()
    }

    fn cmp_values(a: Self, b: Self) -> Ordering {
        a.cmp(&b)
    }

    fn to_stored(self) -> u64 {
        self
    }

    fn from_scalar(_value: i64) -> Option<Self> {
        None
    }

    fn from_bytes(data: &[u8], hash: StrHashFn) -> Option<Self> {
        Some(hash(data))
    }

    fn from_element(_value: i64) -> Option<Self> {
        None
    }
}

impl PairValue for f32 {
    type Stored = u32;
    const IS_FLOAT: bool = true;
    const VALUE_BYTES: usize = size_of::<f32>();

    fn write_value(self, out: &mut FileWriter) -> Result<()> {
        out.write_u32(self.to_bits())
    }

    fn read_value(reader: &mut FileReader) -> Result<Self> {
        Ok(f32::from_bits(reader.read_u32()?))
    }

    fn cmp_values(a: Self, b: Self) -> Ordering {
        // IEEE equality first so -0.0/+0.0 form one equivalence class; only
        // unordered operands (NaN) fall through to the bit key.
        if a == b {
            return Ordering::Equal;
        }
        match a.partial_cmp(&b) {
            Some(ord) => ord,
            None => float_sort_key(a).cmp(&float_sort_key(b)),
        }
    }

    fn to_stored(self) -> u32 {
        self.to_bits()
    }

    fn from_scalar(value: i64) -> Option<Self> {
        // The host hands floats over bit-preserved in the integer channel.
        Some(f32::from_bits(value as u32))
    }

    fn from_bytes(_data: &[u8], _hash: StrHashFn) -> Option<Self> {
        None
    }

    fn from_element(_value: i64) -> Option<Self> {
        None
    }
}

/// Order-preserving bit key: NaNs sort past the infinity of their sign.
fn float_sort_key(v: f32) -> u32 {
    let bits = v.to_bits();
    if bits & 0x8000_0000 != 0 { !bits } else { bits | 0x8000_0000 }
}

/// Object-safe collector surface the builder drives; one per live attribute.
pub(crate) trait RawCollector {
    /// Size of one buffered pair, used for the shared memory budget.
    fn item_size(&self) -> usize;
    fn reserve(&mut self, pairs: usize);
    fn set_scalar(&mut self, row_id: RowId, value: i64);
    fn set_bytes(&mut self, row_id: RowId, data: &[u8]);
    fn set_array(&mut self, row_id: RowId, values: &[i64]);
    fn flush(&mut self) -> Result<()>;
    fn done(&mut self) -> Result<()>;
    /// Hand the finished run file over to the index writer.
    fn into_attr_writer(self: Box<Self>) -> Box<dyn AttrWriter>;
}

pub(crate) struct Collector<V: PairValue> {
    pairs: Vec<Pair<V>>,
    file: FileWriter,
    path: PathBuf,
    offsets: Vec<u64>,
    file_size: u64,
    attr_type: AttrType,
    hash: StrHashFn,
}

impl<V: PairValue> Collector<V> {
    /// Open the attribute's run file `<output>.<attr>.tmp`.
    pub fn new(
        output: &Path,
        src_attr: usize,
        attr_type: AttrType,
        collation: Collation,
    ) -> Result<Self> {
        let mut name = output.as_os_str().to_os_string();
        name.push(format!(".{src_attr}.tmp"));
        let path = PathBuf::from(name);
        let file = FileWriter::create(&path)?;
        Ok(Self {
            pairs: Vec::new(),
            file,
            path,
            offsets: Vec::new(),
            file_size: 0,
            attr_type,
            hash: hash_fn(collation),
        })
    }

    fn push(&mut self, value: V, row_id: RowId) {
        self.pairs.push(Pair { value, row_id });
    }
}

impl<V: PairValue + 'static> RawCollector for Collector<V> {
    fn item_size(&self) -> usize {
        V::VALUE_BYTES + size_of::<RowId>()
    }

    fn reserve(&mut self, pairs: usize) {
        self.pairs.reserve(pairs);
    }

    fn set_scalar(&mut self, row_id: RowId, value: i64) {
        match V::from_scalar(value) {
            Some(v) => self.push(v, row_id),
            None => debug_assert!(false, "scalar value sent to {:?} attribute", self.attr_type),
        }
    }

    fn set_bytes(&mut self, row_id: RowId, data: &[u8]) {
        match V::from_bytes(data, self.hash) {
            Some(v) => self.push(v, row_id),
            None => debug_assert!(false, "byte value sent to {:?} attribute", self.attr_type),
        }
    }

    fn set_array(&mut self, row_id: RowId, values: &[i64]) {
        debug_assert!(
            self.attr_type.is_set(),
            "array value sent to {:?} attribute",
            self.attr_type
        );
        for &element in values {
            match V::from_element(element) {
                Some(v) => self.push(v, row_id),
                None => {
                    debug_assert!(false, "array value sent to {:?} attribute", self.attr_type);
                    return;
                }
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.pairs.is_empty() {
            return Ok(());
        }

        // Row id breaks value ties, so an unstable sort is exact.
        self.pairs
            .sort_unstable_by(|a, b| V::cmp_values(a.value, b.value).then(a.row_id.cmp(&b.row_id)));

        self.offsets.push(self.file.pos());
        for pair in &self.pairs {
            pair.value.write_value(&mut self.file)?;
            self.file.write_u32(pair.row_id)?;
        }
        log::debug!(
            "flushed run of {} pairs to {}",
            self.pairs.len(),
            self.path.display()
        );

        self.pairs.clear();
        Ok(())
    }

    fn done(&mut self) -> Result<()> {
        self.flush()?;
        self.file_size = self.file.pos();
        self.file.finish()?;
        self.pairs = Vec::new();
        Ok(())
    }

    fn into_attr_writer(self: Box<Self>) -> Box<dyn AttrWriter> {
        let collector = *self;
        Box::new(AttrWriterImpl::<V>::new(
            collector.path,
            collector.offsets,
            collector.file_size,
        ))
    }
}
