//! Integer codec capability used by the block encoder.
//!
//! Streams are packed in 128-lane blocks: a leading element count, then per
//! block one bit-width word followed by the tightly bitpacked lanes (the tail
//! block is zero-padded to 128 lanes, so a block's packed size depends only
//! on its bit width). Output is always a sequence of `u32` words, for 32-bit
//! and 64-bit inputs alike.
//!
//! The two supported codec names mirror the streams they serve:
//! `simdfastpfor128` for the 32-bit columns and `fastpfor128` for 64-bit
//! value columns.

use crate::{Error, Result};

/// Codec applied to 32-bit streams (row ids, types, row starts, u32 values).
pub const CODEC_NAME_U32: &str = "simdfastpfor128";

/// Codec applied to 64-bit value streams.
pub const CODEC_NAME_U64: &str = "fastpfor128";

/// Lanes per packed block.
pub const CODEC_BLOCK_SIZE: usize = 128;

/// Block-padded integer packing over `u32`/`u64` spans.
pub trait IntCodec {
    fn encode_u32(&self, values: &[u32], out: &mut Vec<u32>);
    fn decode_u32(&self, packed: &[u32], out: &mut Vec<u32>);
    fn encode_u64(&self, values: &[u64], out: &mut Vec<u32>);
    fn decode_u64(&self, packed: &[u32], out: &mut Vec<u64>);
}

/// Resolve a codec from the two names stored in the meta trailer.
pub fn create_int_codec(name_u32: &str, name_u64: &str) -> Result<Box<dyn IntCodec>> {
    if name_u32 != CODEC_NAME_U32 {
        return Err(Error::CodecVersion(name_u32.to_string()));
    }
    if name_u64 != CODEC_NAME_U64 {
        return Err(Error::CodecVersion(name_u64.to_string()));
    }
    Ok(Box::new(Pfor128Codec))
}

/// Bits needed to represent `max_val`.
#[inline]
pub fn bits_needed_u32(max_val: u32) -> u32 {
    32 - max_val.leading_zeros()
}

#[inline]
pub fn bits_needed_u64(max_val: u64) -> u32 {
    64 - max_val.leading_zeros()
}

/// Integer widths that participate in delta coding.
pub trait DeltaInt: Copy {
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_add(self, rhs: Self) -> Self;
}

impl DeltaInt for u32 {
    fn wrapping_sub(self, rhs: Self) -> Self {
        u32::wrapping_sub(self, rhs)
    }
    fn wrapping_add(self, rhs: Self) -> Self {
        u32::wrapping_add(self, rhs)
    }
}

impl DeltaInt for u64 {
    fn wrapping_sub(self, rhs: Self) -> Self {
        u64::wrapping_sub(self, rhs)
    }
    fn wrapping_add(self, rhs: Self) -> Self {
        u64::wrapping_add(self, rhs)
    }
}

/// In-place delta encoding; element 0 keeps its absolute value.
pub fn compute_deltas<T: DeltaInt>(values: &mut [T]) {
    for i in (1..values.len()).rev() {
        values[i] = values[i].wrapping_sub(values[i - 1]);
    }
}

/// Inverse of [`compute_deltas`].
pub fn restore_deltas<T: DeltaInt>(values: &mut [T]) {
    for i in 1..values.len() {
        values[i] = values[i].wrapping_add(values[i - 1]);
    }
}

/// The single codec implementation behind both registered names.
struct Pfor128Codec;

impl IntCodec for Pfor128Codec {
    fn encode_u32(&self, values: &[u32], out: &mut Vec<u32>) {
        out.push(values.len() as u32);
        for chunk in values.chunks(CODEC_BLOCK_SIZE) {
            let bit_width = chunk.iter().copied().map(bits_needed_u32).max().unwrap_or(0);
            out.push(bit_width);
            pack_lanes_u32(chunk, bit_width, out);
        }
    }

    fn decode_u32(&self, packed: &[u32], out: &mut Vec<u32>) {
        let mut remaining = packed[0] as usize;
        out.reserve(remaining);
        let mut idx = 1;
        while remaining > 0 {
            let bit_width = packed[idx];
            idx += 1;
            let take = remaining.min(CODEC_BLOCK_SIZE);
            idx += unpack_lanes_u32(&packed[idx..], bit_width, take, out);
            remaining -= take;
        }
    }

    fn encode_u64(&self, values: &[u64], out: &mut Vec<u32>) {
        out.push(values.len() as u32);
        for chunk in values.chunks(CODEC_BLOCK_SIZE) {
            let bit_width = chunk.iter().copied().map(bits_needed_u64).max().unwrap_or(0);
            out.push(bit_width);
            pack_lanes_u64(chunk, bit_width, out);
        }
    }

    fn decode_u64(&self, packed: &[u32], out: &mut Vec<u64>) {
        let mut remaining = packed[0] as usize;
        out.reserve(remaining);
        let mut idx = 1;
        while remaining > 0 {
            let bit_width = packed[idx];
            idx += 1;
            let take = remaining.min(CODEC_BLOCK_SIZE);
            idx += unpack_lanes_u64(&packed[idx..], bit_width, take, out);
            remaining -= take;
        }
    }
}

/// Pack one chunk (zero-padded to 128 lanes) at `bit_width` bits per lane.
/// Emits exactly `128 * bit_width / 32` words.
fn pack_lanes_u32(chunk: &[u32], bit_width: u32, out: &mut Vec<u32>) {
    if bit_width == 0 {
        return;
    }
    let mut acc: u64 = 0;
    let mut filled: u32 = 0;
    for lane in 0..CODEC_BLOCK_SIZE {
        let v = chunk.get(lane).copied().unwrap_or(0) as u64;
        acc |= v << filled;
        filled += bit_width;
        while filled >= 32 {
            out.push(acc as u32);
            acc >>= 32;
            filled -= 32;
        }
    }
    debug_assert_eq!(filled, 0);
}

/// Unpack `take` lanes out of a 128-lane block; returns the word count
/// consumed (always `128 * bit_width / 32`).
fn unpack_lanes_u32(packed: &[u32], bit_width: u32, take: usize, out: &mut Vec<u32>) -> usize {
    if bit_width == 0 {
        out.extend(std::iter::repeat_n(0u32, take));
        return 0;
    }
    let words = CODEC_BLOCK_SIZE * bit_width as usize / 32;
    let mask = if bit_width == 32 {
        u64::from(u32::MAX)
    } else {
        (1u64 << bit_width) - 1
    };
    let mut acc: u64 = 0;
    let mut avail: u32 = 0;
    let mut widx = 0;
    for lane in 0..CODEC_BLOCK_SIZE {
        while avail < bit_width {
            acc |= (packed[widx] as u64) << avail;
            widx += 1;
            avail += 32;
        }
        if lane < take {
            out.push((acc & mask) as u32);
        }
        acc >>= bit_width;
        avail -= bit_width;
    }
    words
}

fn pack_lanes_u64(chunk: &[u64], bit_width: u32, out: &mut Vec<u32>) {
    if bit_width == 0 {
        return;
    }
    let mut acc: u128 = 0;
    let mut filled: u32 = 0;
    for lane in 0..CODEC_BLOCK_SIZE {
        let v = chunk.get(lane).copied().unwrap_or(0) as u128;
        acc |= v << filled;
        filled += bit_width;
        while filled >= 32 {
            out.push(acc as u32);
            acc >>= 32;
            filled -= 32;
        }
    }
    debug_assert_eq!(filled, 0);
}

fn unpack_lanes_u64(packed: &[u32], bit_width: u32, take: usize, out: &mut Vec<u64>) -> usize {
    if bit_width == 0 {
        out.extend(std::iter::repeat_n(0u64, take));
        return 0;
    }
    let words = CODEC_BLOCK_SIZE * bit_width as usize / 32;
    let mask = if bit_width == 64 {
        u128::from(u64::MAX)
    } else {
        (1u128 << bit_width) - 1
    };
    let mut acc: u128 = 0;
    let mut avail: u32 = 0;
    let mut widx = 0;
    for lane in 0..CODEC_BLOCK_SIZE {
        while avail < bit_width {
            acc |= (packed[widx] as u128) << avail;
            widx += 1;
            avail += 32;
        }
        if lane < take {
            out.push((acc & mask) as u64);
        }
        acc >>= bit_width;
        avail -= bit_width;
    }
    words
}
