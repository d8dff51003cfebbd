//! Build pipeline: collectors → k-way merge → block encoder → PGM → meta.
//!
//! One [`Builder`] produces one index file. The host streams rows in
//! (`set_row_id` then `set_attr*` per live attribute), and `done` runs the
//! per-attribute merge/encode/PGM passes back to back into the single output
//! file before writing the meta trailer:
//!
//! ```text
//! [header][attr 0 blocks]…[attr A-1 blocks][meta][PGM blobs][block offsets]
//! ```
//!
//! The header's meta-offset field stays zero until the trailer and both
//! appended sections are in place, so a torn build is always recognizable.

mod attr_writer;
mod collector;
mod encoder;
mod merge;

#[cfg(test)]
mod tests;

pub use encoder::{Packing, VALUES_PER_BLOCK};

use std::path::{Path, PathBuf};

use attr_writer::AttrWriter;
use collector::{Collector, RawCollector};

use crate::collation::Collation;
use crate::io::FileWriter;
use crate::schema::{AttrType, ColumnInfo, LIB_VERSION, SourceAttr};
use crate::{Result, RowId};

/// Floor for the per-row-boundary flush threshold.
const MIN_FLUSH_ROWS: u32 = 1000;

/// Streaming secondary-index builder; single-threaded, single-writer.
pub struct Builder {
    path: PathBuf,
    row_id: RowId,
    max_rows: u32,
    collectors: Vec<Option<Box<dyn RawCollector>>>,
    attrs: Vec<ColumnInfo>,
    collation: Collation,
}

impl Builder {
    /// Set up one collector per indexable attribute and split the memory
    /// budget across them. `attrs` must be ordered by source index.
    pub fn new(
        attrs: &[SourceAttr],
        memory_limit: usize,
        collation: Collation,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut collectors: Vec<Option<Box<dyn RawCollector>>> = Vec::new();
        if let Some(last) = attrs.last() {
            collectors.resize_with(last.src_index + 1, || None);
        }

        let mut infos = Vec::new();
        for attr in attrs {
            let collector: Box<dyn RawCollector> = match attr.attr_type {
                AttrType::Uint32 | AttrType::Timestamp | AttrType::Uint32Set => Box::new(
                    Collector::<u32>::new(&path, attr.src_index, attr.attr_type, collation)?,
                ),
                AttrType::Float => Box::new(Collector::<f32>::new(
                    &path,
                    attr.src_index,
                    attr.attr_type,
                    collation,
                )?),
                AttrType::Int64 | AttrType::Int64Set => Box::new(Collector::<i64>::new(
                    &path,
                    attr.src_index,
                    attr.attr_type,
                    collation,
                )?),
                AttrType::String => Box::new(Collector::<u64>::new(
                    &path,
                    attr.src_index,
                    attr.attr_type,
                    collation,
                )?),
            };
            if attr.src_index >= collectors.len() {
                collectors.resize_with(attr.src_index + 1, || None);
            }
            collectors[attr.src_index] = Some(collector);
            infos.push(ColumnInfo {
                name: attr.name.clone(),
                src_attr: attr.src_index,
                attr: infos.len(),
                attr_type: attr.attr_type,
            });
        }

        let pair_bytes: usize = collectors
            .iter()
            .flatten()
            .map(|c| c.item_size())
            .sum();
        let max_rows = if pair_bytes == 0 {
            MIN_FLUSH_ROWS
        } else {
            ((memory_limit / 3 / pair_bytes) as u32).max(MIN_FLUSH_ROWS)
        };
        for collector in collectors.iter_mut().flatten() {
            collector.reserve(max_rows as usize);
        }

        Ok(Self {
            path,
            row_id: 0,
            max_rows,
            collectors,
            attrs: infos,
            collation,
        })
    }

    /// Begin a row. Crossing the flush threshold spills every collector at
    /// once, keeping runs aligned across attributes.
    pub fn set_row_id(&mut self, row_id: RowId) -> Result<()> {
        self.row_id = row_id;
        if row_id % self.max_rows == 0 {
            self.flush()?;
        }
        Ok(())
    }

    /// Scalar attribute value for the current row (floats bit-preserved in
    /// the integer channel).
    pub fn set_attr(&mut self, attr: usize, value: i64) {
        if let Some(Some(collector)) = self.collectors.get_mut(attr) {
            collector.set_scalar(self.row_id, value);
        }
    }

    /// String attribute value for the current row; hashed by the collation.
    pub fn set_attr_bytes(&mut self, attr: usize, data: &[u8]) {
        if let Some(Some(collector)) = self.collectors.get_mut(attr) {
            collector.set_bytes(self.row_id, data);
        }
    }

    /// Set attribute value for the current row; one pair per element.
    pub fn set_attr_array(&mut self, attr: usize, values: &[i64]) {
        if let Some(Some(collector)) = self.collectors.get_mut(attr) {
            collector.set_array(self.row_id, values);
        }
    }

    fn flush(&mut self) -> Result<()> {
        for collector in self.collectors.iter_mut().flatten() {
            collector.flush()?;
        }
        Ok(())
    }

    /// Finalize every attribute and assemble the output file.
    pub fn done(mut self) -> Result<()> {
        for collector in self.collectors.iter_mut().flatten() {
            collector.done()?;
        }
        let mut writers: Vec<Box<dyn AttrWriter>> = self
            .collectors
            .drain(..)
            .flatten()
            .map(|c| c.into_attr_writer())
            .collect();

        let mut out = FileWriter::create(&self.path)?;
        let blocks_path = suffixed(&self.path, ".tmp.meta");
        let pgm_path = suffixed(&self.path, ".tmp.pgm");
        let pgm_values_path = suffixed(&self.path, ".tmp.pgmvalues");
        let mut blocks_staging = FileWriter::create(&blocks_path)?.mark_temporary();
        let mut pgm_staging = FileWriter::create(&pgm_path)?.mark_temporary();

        // Header; the meta offset is patched in last.
        out.write_u32(LIB_VERSION)?;
        out.write_u64(0)?;

        let mut block_offsets_starts = Vec::with_capacity(writers.len());
        for (index, writer) in writers.iter_mut().enumerate() {
            block_offsets_starts.push(blocks_staging.pos());
            writer.process(&mut out, &mut blocks_staging, &pgm_values_path)?;

            let blob = writer.take_pgm();
            pgm_staging.pack_u64(blob.len() as u64)?;
            pgm_staging.write_all(&blob)?;
            log::debug!(
                "attribute {} ({}) encoded at output offset {}",
                index,
                self.attrs[index].name,
                out.pos()
            );
        }
        drop(writers);

        let blocks_end = blocks_staging.pos();
        let block_counts: Vec<u64> = (0..block_offsets_starts.len())
            .map(|i| {
                let end = block_offsets_starts
                    .get(i + 1)
                    .copied()
                    .unwrap_or(blocks_end);
                (end - block_offsets_starts[i]) / size_of::<u64>() as u64
            })
            .collect();

        let meta_offset = out.pos();
        blocks_staging.finish()?;
        pgm_staging.finish()?;

        crate::codec::compute_deltas(&mut block_offsets_starts);
        self.write_meta(&mut out, &block_offsets_starts, &block_counts)?;
        out.append_file(&pgm_path)?;
        out.append_file(&blocks_path)?;
        out.finish()?;
        drop(out);
        drop(blocks_staging);
        drop(pgm_staging);

        // Patch the header only once the trailer is fully on disk; a zero
        // meta offset marks the file invalid.
        let mut patcher = FileWriter::open_rw(&self.path)?;
        patcher.seek(size_of::<u32>() as u64)?;
        patcher.write_u64(meta_offset)?;
        patcher.finish()?;

        log::debug!(
            "index {} complete: {} attributes, meta at {}",
            self.path.display(),
            self.attrs.len(),
            meta_offset
        );
        Ok(())
    }

    fn write_meta(
        &self,
        out: &mut FileWriter,
        block_offsets_starts: &[u64],
        block_counts: &[u64],
    ) -> Result<()> {
        out.write_u64(0)?; // reserved meta-chain link, unused
        out.write_u32(self.attrs.len() as u32)?;

        // Enabled-attributes bitvec; the builder always emits every attribute.
        for _ in 0..self.attrs.len().div_ceil(32) {
            out.write_u32(u32::MAX)?;
        }

        out.write_string(crate::codec::CODEC_NAME_U32)?;
        out.write_string(crate::codec::CODEC_NAME_U64)?;
        out.write_u32(self.collation as u32)?;
        out.write_u32(VALUES_PER_BLOCK as u32)?;

        for info in &self.attrs {
            out.write_string(&info.name)?;
            out.pack_u32(info.src_attr as u32)?;
            out.pack_u32(info.attr as u32)?;
            out.pack_u32(info.attr_type as u32)?;
        }

        write_packed_u64_vec(out, block_offsets_starts)?;
        write_packed_u64_vec(out, block_counts)?;
        Ok(())
    }
}

/// Varint element count + one varint per element.
fn write_packed_u64_vec(out: &mut FileWriter, values: &[u64]) -> Result<()> {
    out.pack_u32(values.len() as u32)?;
    for &v in values {
        out.pack_u64(v)?;
    }
    Ok(())
}

/// `<path><suffix>` for the build's staging files.
fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
