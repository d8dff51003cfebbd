//! K-way merge of an attribute's sorted runs.
//!
//! Each run gets its own bounded reader over the shared temp file; run heads
//! sit in a binary heap ordered `(value asc, row_id asc)` (comparator
//! inverted, since `BinaryHeap` is a max-heap). Popping and refilling yields
//! the globally sorted pair stream the block encoder consumes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use crate::Result;
use crate::build::collector::{Pair, PairValue};
use crate::io::FileReader;

struct RunCursor<V: PairValue> {
    reader: FileReader,
    end: u64,
    pair: Pair<V>,
}

impl<V: PairValue> RunCursor<V> {
    /// Load the next pair; `false` once the run is exhausted.
    fn advance(&mut self) -> Result<bool> {
        if self.reader.pos() >= self.end {
            return Ok(false);
        }
        self.pair.value = V::read_value(&mut self.reader)?;
        self.pair.row_id = self.reader.read_u32()?;
        Ok(true)
    }
}

struct HeapEntry<V: PairValue>(RunCursor<V>);

impl<V: PairValue> PartialEq for HeapEntry<V> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<V: PairValue> Eq for HeapEntry<V> {}

impl<V: PairValue> PartialOrd for HeapEntry<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V: PairValue> Ord for HeapEntry<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Inverted for min-heap behavior.
        V::cmp_values(other.0.pair.value, self.0.pair.value)
            .then_with(|| other.0.pair.row_id.cmp(&self.0.pair.row_id))
    }
}

/// Stream the runs described by `offsets` (bounded by `file_size`) in global
/// `(value, row_id)` order, feeding each pair to `emit`.
pub(crate) fn merge_runs<V, F>(
    path: &Path,
    offsets: &[u64],
    file_size: u64,
    mut emit: F,
) -> Result<()>
where
    V: PairValue,
    F: FnMut(Pair<V>) -> Result<()>,
{
    let mut heap: BinaryHeap<HeapEntry<V>> = BinaryHeap::with_capacity(offsets.len());

    for (run, &start) in offsets.iter().enumerate() {
        let end = offsets.get(run + 1).copied().unwrap_or(file_size);
        if end <= start {
            continue;
        }
        let mut reader = FileReader::open(path)?;
        reader.seek(start)?;
        let mut cursor = RunCursor {
            reader,
            end,
            pair: Pair::default(),
        };
        if cursor.advance()? {
            heap.push(HeapEntry(cursor));
        }
    }
    log::debug!(
        "merging {} runs from {}",
        heap.len(),
        path.display()
    );

    while let Some(HeapEntry(mut cursor)) = heap.pop() {
        emit(cursor.pair)?;
        if cursor.advance()? {
            heap.push(HeapEntry(cursor));
        }
    }
    Ok(())
}
