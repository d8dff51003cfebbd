//! Learned positional index over a sorted value sequence.
//!
//! A piecewise linear model: the sorted domain is cut into maximal segments
//! such that for every indexed value, `intercept + slope * (v - key)` lands
//! within `PGM_EPSILON` positions of the value's true rank. Lookup is a
//! binary search over segment keys plus one multiply, returning an
//! [`ApproxPos`] window of at most `2 * PGM_EPSILON + 1` positions.
//!
//! Segments are fitted with the streaming slope-interval method: each new
//! point narrows the feasible slope range, and the segment is closed when the
//! range empties.

use byteorder::{ByteOrder, LittleEndian};

use crate::{Error, Result};

/// Maximum distance between a predicted and a true position.
pub const PGM_EPSILON: u64 = 64;

/// Approximate rank of a value: `pos` is the prediction, the true rank lies
/// within `[lo, hi]` (inclusive) for any value present in the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproxPos {
    pub lo: u64,
    pub pos: u64,
    pub hi: u64,
}

/// Value domains a PGM can be built over.
pub trait PgmValue: Copy + PartialOrd {
    fn to_f64(self) -> f64;
}

impl PgmValue for u32 {
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl PgmValue for u64 {
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl PgmValue for i64 {
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl PgmValue for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    key: f64,
    slope: f64,
    intercept: f64,
}

const SEGMENT_BYTES: usize = 24;

/// The fitted index.
#[derive(Debug, Clone)]
pub struct Pgm {
    value_count: u64,
    epsilon: u64,
    segments: Vec<Segment>,
}

impl Pgm {
    /// Fit the model over an ascending value sequence.
    pub fn build<T: PgmValue>(values: &[T]) -> Self {
        let mut segments = Vec::new();
        if values.is_empty() {
            return Self {
                value_count: 0,
                epsilon: PGM_EPSILON,
                segments,
            };
        }

        // Fit against a slightly tighter band than advertised so rounding at
        // lookup time cannot push a prediction past the bound.
        let margin = (PGM_EPSILON - 1) as f64;

        let mut key = values[0].to_f64();
        let mut intercept = 0f64;
        let mut slope_lo = f64::NEG_INFINITY;
        let mut slope_hi = f64::INFINITY;

        for (rank, value) in values.iter().enumerate().skip(1) {
            let x = value.to_f64();
            let y = rank as f64;
            let dx = x - key;
            if dx <= 0.0 {
                // Repeated value; tolerable while the run stays inside the band.
                if y - intercept > margin {
                    segments.push(close_segment(key, intercept, slope_lo, slope_hi));
                    key = x;
                    intercept = y;
                    slope_lo = f64::NEG_INFINITY;
                    slope_hi = f64::INFINITY;
                }
                continue;
            }

            let lo = (y - intercept - margin) / dx;
            let hi = (y - intercept + margin) / dx;
            let next_lo = slope_lo.max(lo);
            let next_hi = slope_hi.min(hi);
            if next_lo > next_hi {
                segments.push(close_segment(key, intercept, slope_lo, slope_hi));
                key = x;
                intercept = y;
                slope_lo = f64::NEG_INFINITY;
                slope_hi = f64::INFINITY;
            } else {
                slope_lo = next_lo;
                slope_hi = next_hi;
            }
        }
        segments.push(close_segment(key, intercept, slope_lo, slope_hi));

        Self {
            value_count: values.len() as u64,
            epsilon: PGM_EPSILON,
            segments,
        }
    }

    pub fn value_count(&self) -> u64 {
        self.value_count
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Approximate the rank of `value`.
    pub fn search<T: PgmValue>(&self, value: T) -> ApproxPos {
        if self.value_count == 0 {
            return ApproxPos {
                lo: 0,
                pos: 0,
                hi: 0,
            };
        }
        let x = value.to_f64();
        let idx = self
            .segments
            .partition_point(|s| s.key <= x)
            .saturating_sub(1);
        let seg = &self.segments[idx];
        let max_rank = self.value_count - 1;
        let predicted = seg.intercept + seg.slope * (x - seg.key);
        let pos = (predicted.round().max(0.0) as u64).min(max_rank);
        ApproxPos {
            lo: pos.saturating_sub(self.epsilon),
            pos,
            hi: (pos + self.epsilon).min(max_rank),
        }
    }

    /// Serialize to the opaque blob stored in the meta trailer.
    pub fn save(&self, out: &mut Vec<u8>) {
        out.reserve(16 + self.segments.len() * SEGMENT_BYTES);
        out.extend_from_slice(&self.value_count.to_le_bytes());
        out.extend_from_slice(&(self.epsilon as u32).to_le_bytes());
        out.extend_from_slice(&(self.segments.len() as u32).to_le_bytes());
        for seg in &self.segments {
            out.extend_from_slice(&seg.key.to_le_bytes());
            out.extend_from_slice(&seg.slope.to_le_bytes());
            out.extend_from_slice(&seg.intercept.to_le_bytes());
        }
    }

    /// Inverse of [`Pgm::save`].
    pub fn load(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(Error::Invariant("pgm blob truncated".to_string()));
        }
        let value_count = LittleEndian::read_u64(&data[0..8]);
        let epsilon = LittleEndian::read_u32(&data[8..12]) as u64;
        let segment_count = LittleEndian::read_u32(&data[12..16]) as usize;
        if data.len() != 16 + segment_count * SEGMENT_BYTES {
            return Err(Error::Invariant("pgm blob truncated".to_string()));
        }
        let mut segments = Vec::with_capacity(segment_count);
        for i in 0..segment_count {
            let at = 16 + i * SEGMENT_BYTES;
            segments.push(Segment {
                key: LittleEndian::read_f64(&data[at..at + 8]),
                slope: LittleEndian::read_f64(&data[at + 8..at + 16]),
                intercept: LittleEndian::read_f64(&data[at + 16..at + 24]),
            });
        }
        Ok(Self {
            value_count,
            epsilon,
            segments,
        })
    }
}

fn close_segment(key: f64, intercept: f64, slope_lo: f64, slope_hi: f64) -> Segment {
    let slope = if slope_lo.is_finite() && slope_hi.is_finite() {
        (slope_lo + slope_hi) / 2.0
    } else if slope_hi.is_finite() {
        slope_hi
    } else if slope_lo.is_finite() {
        slope_lo
    } else {
        0.0
    };
    Segment {
        key,
        slope,
        intercept,
    }
}
