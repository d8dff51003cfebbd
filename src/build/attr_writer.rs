//! Per-attribute index writer: merge → block encoding → PGM build.
//!
//! Takes ownership of the collector's run file and offsets table, streams the
//! merged pairs through the block encoder into the output file, then builds
//! the PGM over the value sequence the encoder spilled to the side file. Both
//! temp files are gone by the time `process` returns.

use std::path::{Path, PathBuf};

use crate::build::collector::PairValue;
use crate::build::encoder::BlockEncoder;
use crate::build::merge::merge_runs;
use crate::io::{FileWriter, MappedSlice};
use crate::pgm::Pgm;
use crate::{Error, Result};

/// One attribute's pass over the output file, in schema order.
pub(crate) trait AttrWriter {
    /// Emit this attribute's blocks to `out`, block offsets to `blocks_off`,
    /// and build the PGM via the `pgm_values_path` side file.
    fn process(
        &mut self,
        out: &mut FileWriter,
        blocks_off: &mut FileWriter,
        pgm_values_path: &Path,
    ) -> Result<()>;

    /// The serialized PGM produced by `process`.
    fn take_pgm(&mut self) -> Vec<u8>;
}

pub(crate) struct AttrWriterImpl<V: PairValue> {
    src_path: PathBuf,
    offsets: Vec<u64>,
    file_size: u64,
    pgm: Vec<u8>,
    _marker: std::marker::PhantomData<V>,
}

impl<V: PairValue> AttrWriterImpl<V> {
    pub fn new(src_path: PathBuf, offsets: Vec<u64>, file_size: u64) -> Self {
        Self {
            src_path,
            offsets,
            file_size,
            pgm: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<V: PairValue> AttrWriter for AttrWriterImpl<V> {
    fn process(
        &mut self,
        out: &mut FileWriter,
        blocks_off: &mut FileWriter,
        pgm_values_path: &Path,
    ) -> Result<()> {
        let mut pgm_values = FileWriter::create(pgm_values_path)?;
        let mut encoder = BlockEncoder::<V::Stored>::new(V::IS_FLOAT)?;

        merge_runs::<V, _>(&self.src_path, &self.offsets, self.file_size, |pair| {
            encoder.push(
                pair.value.to_stored(),
                pair.row_id,
                out,
                blocks_off,
                &mut pgm_values,
            )
        })?;
        encoder.finish(out, blocks_off, &mut pgm_values)?;

        // The run file is fully consumed; drop it before the PGM build so
        // peak disk usage stays one attribute wide.
        std::fs::remove_file(&self.src_path).map_err(|e| Error::io(&self.src_path, e))?;
        self.offsets = Vec::new();

        pgm_values.finish()?;
        drop(pgm_values);

        {
            let mapped = MappedSlice::<V>::open(pgm_values_path)?;
            let values = mapped.as_slice();
            if !is_ascending::<V>(values) {
                return Err(Error::Unsorted(pgm_values_path.to_path_buf()));
            }
            let pgm = Pgm::build(values);
            log::debug!(
                "pgm over {} values: {} segments",
                values.len(),
                pgm.segment_count()
            );
            self.pgm.clear();
            pgm.save(&mut self.pgm);
        }
        std::fs::remove_file(pgm_values_path).map_err(|e| Error::io(pgm_values_path, e))?;
        Ok(())
    }

    fn take_pgm(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pgm)
    }
}

/// Non-strict ascending check with the pair comparator; repeated values
/// (distinct NaN groups) are legal.
fn is_ascending<V: PairValue>(values: &[V]) -> bool {
    values
        .windows(2)
        .all(|w| V::cmp_values(w[0], w[1]) != std::cmp::Ordering::Greater)
}
