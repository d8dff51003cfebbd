//! String collations and the process-wide hash registry.
//!
//! String attributes are indexed by a 64-bit hash of their bytes; which hash
//! applies depends on the collation the host engine was configured with. The
//! host installs its hash table once via [`init_collations`]; until then a
//! default FNV-1a family is active (byte-exact for the case-sensitive
//! collations, ASCII case-folded for the CI ones).

use parking_lot::RwLock;

/// Known collations, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Collation {
    LibcCi = 0,
    LibcCs = 1,
    Utf8GeneralCi = 2,
    Binary = 3,
}

/// Number of collation slots in the registry.
pub const COLLATION_COUNT: usize = 4;

/// Hash applied to string attribute bytes before indexing.
pub type StrHashFn = fn(&[u8]) -> u64;

const FNV64_SEED: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the raw bytes.
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut hash = FNV64_SEED;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV64_PRIME);
    }
    hash
}

/// FNV-1a over ASCII-lowercased bytes.
pub fn hash_bytes_ci(data: &[u8]) -> u64 {
    let mut hash = FNV64_SEED;
    for &b in data {
        hash ^= b.to_ascii_lowercase() as u64;
        hash = hash.wrapping_mul(FNV64_PRIME);
    }
    hash
}

static COLLATIONS: RwLock<[StrHashFn; COLLATION_COUNT]> =
    RwLock::new([hash_bytes_ci, hash_bytes, hash_bytes_ci, hash_bytes]);

/// Install the host engine's collation hash table. Replaces the defaults for
/// the whole process; call before any build starts.
pub fn init_collations(table: [StrHashFn; COLLATION_COUNT]) {
    *COLLATIONS.write() = table;
}

/// Hash function for one collation.
pub fn hash_fn(collation: Collation) -> StrHashFn {
    COLLATIONS.read()[collation as usize]
}
