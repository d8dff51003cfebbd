//! Sextant — a secondary index builder for columnar storage.
//!
//! Given a stream of per-row attribute values, the builder produces a single
//! self-describing file mapping each distinct attribute value to its sorted
//! row-id posting, plus a learned positional index (PGM) over the distinct
//! values for fast point/range location:
//!
//! - External sort under a bounded memory budget: per-attribute collectors
//!   spill sorted runs, merged back with a k-way heap
//! - Block-structured postings: 128 value groups per block, cardinality-driven
//!   posting layouts, delta + 128-lane bitpacked integer codecs
//! - PGM construction over each attribute's sorted distinct-value sequence
//! - A versioned meta trailer that makes the file self-describing
//!
//! ```no_run
//! use sextant::{AttrType, Builder, Collation, SourceAttr};
//!
//! # fn main() -> sextant::Result<()> {
//! let attrs = [SourceAttr::new(0, "price", AttrType::Uint32)];
//! let mut builder = Builder::new(&attrs, 64 << 20, Collation::Binary, "prices.spidx")?;
//! for (row_id, price) in [(0u32, 10i64), (1, 20), (2, 10)] {
//!     builder.set_row_id(row_id)?;
//!     builder.set_attr(0, price);
//! }
//! builder.done()?;
//! # Ok(())
//! # }
//! ```

pub mod build;
pub mod codec;
pub mod collation;
pub mod error;
pub mod io;
pub mod pgm;
pub mod schema;

pub use build::{Builder, Packing, VALUES_PER_BLOCK};
pub use codec::{CODEC_NAME_U32, CODEC_NAME_U64, IntCodec, create_int_codec};
pub use collation::{COLLATION_COUNT, Collation, StrHashFn, init_collations};
pub use error::{Error, Result};
pub use pgm::{ApproxPos, PGM_EPSILON, Pgm};
pub use schema::{AttrType, ColumnInfo, LIB_VERSION, STORAGE_VERSION, SourceAttr};

/// Row identifier flowing through the pipeline; postings store these.
pub type RowId = u32;
