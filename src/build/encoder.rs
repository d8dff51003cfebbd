//! Block-structured encoding of the merged pair stream.
//!
//! Consecutive pairs sharing a value form a value group; up to
//! [`VALUES_PER_BLOCK`] groups bundle into one value block, the unit of codec
//! application and of PGM addressing. Each group's posting is laid out by
//! cardinality:
//!
//! | row ids | tag               | payload                                   |
//! |---------|-------------------|-------------------------------------------|
//! | 1       | `Row`             | the row id itself, stored in `row_start`  |
//! | 2..=128 | `RowBlock`        | one packed row block in `rows_packed`     |
//! | >128    | `RowBlocksList`   | varint block count + ⌈c/128⌉ row blocks   |
//!
//! A row block is `varint(min)`, `varint(max - min)`, then the delta-encoded
//! codec-packed ids in `len32` form. Single-id groups store the id literally,
//! which mixes literals into the `row_start` column and forces its delta
//! encoding off for the whole block.

use crate::codec::{CODEC_NAME_U32, CODEC_NAME_U64, IntCodec, compute_deltas, create_int_codec};
use crate::io::{FileWriter, MemWriter};
use crate::{Result, RowId};

/// Value groups per block; also the row-block chunk length.
pub const VALUES_PER_BLOCK: usize = 128;

/// Posting layout tag, one per value group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Packing {
    Row = 0,
    RowBlock = 1,
    RowBlocksList = 2,
}

impl Packing {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Row),
            1 => Some(Self::RowBlock),
            2 => Some(Self::RowBlocksList),
            _ => None,
        }
    }
}

/// Index-width value as it appears in the output file: `u32` or `u64`.
pub(crate) trait StoredValue: Copy + Default + crate::codec::DeltaInt + 'static {
    /// Append raw fixed-width little-endian values (the PGM side-file form).
    fn write_raw(out: &mut FileWriter, values: &[Self]) -> Result<()>;

    /// Codec entry point for this width.
    fn codec_encode(codec: &dyn IntCodec, values: &[Self], out: &mut Vec<u32>);

    /// Grouping equality; `float_mode` switches `u32` to IEEE bit semantics.
    fn values_equal(a: Self, b: Self, float_mode: bool) -> bool;
}

impl StoredValue for u32 {
    fn write_raw(out: &mut FileWriter, values: &[Self]) -> Result<()> {
        for &v in values {
            out.write_u32(v)?;
        }
        Ok(())
    }

    fn codec_encode(codec: &dyn IntCodec, values: &[Self], out: &mut Vec<u32>) {
        codec.encode_u32(values, out);
    }

    fn values_equal(a: Self, b: Self, float_mode: bool) -> bool {
        if float_mode {
            f32::from_bits(a) == f32::from_bits(b)
        } else {
            a == b
        }
    }
}

impl StoredValue for u64 {
    fn write_raw(out: &mut FileWriter, values: &[Self]) -> Result<()> {
        for &v in values {
            out.write_u64(v)?;
        }
        Ok(())
    }

    fn codec_encode(codec: &dyn IntCodec, values: &[Self], out: &mut Vec<u32>) {
        codec.encode_u64(values, out);
    }

    fn values_equal(a: Self, b: Self, _float_mode: bool) -> bool {
        a == b
    }
}

/// Converts the ordered pair stream into the on-disk block sequence.
pub(crate) struct BlockEncoder<S: StoredValue> {
    values: Vec<S>,
    types: Vec<u32>,
    row_start: Vec<u32>,
    rows: Vec<u32>,
    rows_packed: Vec<u8>,
    codec_buf: Vec<u32>,
    delta_buf: Vec<u32>,
    last_value: S,
    in_group: bool,
    float_values: bool,
    codec: Box<dyn IntCodec>,
}

impl<S: StoredValue> BlockEncoder<S> {
    pub fn new(float_values: bool) -> Result<Self> {
        Ok(Self {
            values: Vec::with_capacity(VALUES_PER_BLOCK),
            types: Vec::with_capacity(VALUES_PER_BLOCK),
            row_start: Vec::with_capacity(VALUES_PER_BLOCK),
            rows: Vec::with_capacity(VALUES_PER_BLOCK * 16),
            rows_packed: Vec::with_capacity(VALUES_PER_BLOCK * 16),
            codec_buf: Vec::with_capacity(VALUES_PER_BLOCK),
            delta_buf: Vec::with_capacity(VALUES_PER_BLOCK),
            last_value: S::default(),
            in_group: false,
            float_values,
            codec: create_int_codec(CODEC_NAME_U32, CODEC_NAME_U64)?,
        })
    }

    /// Feed the next pair of the globally sorted stream.
    pub fn push(
        &mut self,
        value: S,
        row_id: RowId,
        out: &mut FileWriter,
        blocks_off: &mut FileWriter,
        pgm_values: &mut FileWriter,
    ) -> Result<()> {
        if self.in_group && S::values_equal(self.last_value, value, self.float_values) {
            self.rows.push(row_id);
            return Ok(());
        }
        if self.in_group && self.values.len() == VALUES_PER_BLOCK {
            self.flush_block(out, blocks_off, pgm_values)?;
        }
        self.row_start.push(self.rows.len() as u32);
        self.values.push(value);
        self.rows.push(row_id);
        self.last_value = value;
        self.in_group = true;
        Ok(())
    }

    /// Flush the trailing partial block.
    pub fn finish(
        &mut self,
        out: &mut FileWriter,
        blocks_off: &mut FileWriter,
        pgm_values: &mut FileWriter,
    ) -> Result<()> {
        self.flush_block(out, blocks_off, pgm_values)
    }

    fn flush_block(
        &mut self,
        out: &mut FileWriter,
        blocks_off: &mut FileWriter,
        pgm_values: &mut FileWriter,
    ) -> Result<()> {
        debug_assert_eq!(self.values.len(), self.row_start.len());
        if self.values.is_empty() {
            return Ok(());
        }
        let group_count = self.values.len();
        let mut rows_delta = true;

        // Pack postings into the staging buffer, rewriting row_start from
        // staging offsets into payload offsets (or row-id literals).
        self.types.clear();
        self.rows_packed.clear();
        let mut packer = MemWriter::new(&mut self.rows_packed);
        for item in 0..group_count {
            let start = self.row_start[item] as usize;
            let count = if item + 1 < group_count {
                self.row_start[item + 1] as usize - start
            } else {
                self.rows.len() - start
            };

            if count == 1 {
                self.types.push(Packing::Row as u32);
                self.row_start[item] = self.rows[start];
                rows_delta = false;
            } else if count <= VALUES_PER_BLOCK {
                self.types.push(Packing::RowBlock as u32);
                self.row_start[item] = packer.pos() as u32;
                encode_rows_block(
                    &self.rows[start..start + count],
                    self.codec.as_ref(),
                    &mut self.delta_buf,
                    &mut self.codec_buf,
                    &mut packer,
                );
            } else {
                self.types.push(Packing::RowBlocksList as u32);
                self.row_start[item] = packer.pos() as u32;
                let sub_blocks = count.div_ceil(VALUES_PER_BLOCK);
                packer.pack_u32(sub_blocks as u32);
                for sub in 0..sub_blocks {
                    let sub_start = start + sub * VALUES_PER_BLOCK;
                    let sub_count = VALUES_PER_BLOCK.min(count - sub * VALUES_PER_BLOCK);
                    encode_rows_block(
                        &self.rows[sub_start..sub_start + sub_count],
                        self.codec.as_ref(),
                        &mut self.delta_buf,
                        &mut self.codec_buf,
                        &mut packer,
                    );
                }
            }
        }

        blocks_off.write_u64(out.pos())?;
        S::write_raw(pgm_values, &self.values)?;

        // Values: delta + codec.
        self.codec_buf.clear();
        compute_deltas(&mut self.values);
        S::codec_encode(self.codec.as_ref(), &self.values, &mut self.codec_buf);
        out.write_len32_words(&self.codec_buf)?;

        // Types: codec only.
        self.codec_buf.clear();
        self.codec.encode_u32(&self.types, &mut self.codec_buf);
        out.write_len32_words(&self.codec_buf)?;

        // Row starts: delta unless a literal row id sits in the column.
        out.write_u8(rows_delta as u8)?;
        if rows_delta {
            compute_deltas(&mut self.row_start);
        }
        self.codec_buf.clear();
        self.codec.encode_u32(&self.row_start, &mut self.codec_buf);
        out.write_len32_words(&self.codec_buf)?;

        out.write_u32(self.rows_packed.len() as u32)?;
        out.write_all(&self.rows_packed)?;
        self.rows_packed.clear();

        self.values.clear();
        self.types.clear();
        self.row_start.clear();
        self.rows.clear();
        Ok(())
    }
}

/// One packed row block: `varint(min)`, `varint(max - min)`, `len32(packed
/// deltas)`. Ids are strictly increasing, so deltas are exact.
fn encode_rows_block(
    rows: &[u32],
    codec: &dyn IntCodec,
    delta_buf: &mut Vec<u32>,
    codec_buf: &mut Vec<u32>,
    packer: &mut MemWriter,
) {
    let min = rows[0];
    let max = *rows.last().expect("row block never empty");

    delta_buf.clear();
    delta_buf.extend_from_slice(rows);
    compute_deltas(delta_buf);

    codec_buf.clear();
    codec.encode_u32(delta_buf, codec_buf);

    packer.pack_u32(min);
    packer.pack_u32(max - min);
    packer.write_len32_words(codec_buf);
}
