//! Core Bloom filter implementation
//!
//! INVARIANTS:
//! - FPR = (1 - e^(-kn/m))^k <= target_fpr while n <= capacity
//! - No false negatives: if inserted, contains() MUST return true

use std::io::{Read, Write};

use bincode::Options;
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::MAX_FILTER_BITS;
use super::hash_functions::compute_hash_positions;
use super::parameters::{calculate_fpr, calculate_optimal_parameters, MAX_HASH_COUNT};
use crate::error::FilterError;
use crate::ports::{FilterStats, MembershipFilter};

/// Leading bytes of the native serialized form
pub const FORMAT_MAGIC: [u8; 4] = *b"AMBF";
/// Current native format version
pub const FORMAT_VERSION: u16 = 1;

/// Decoder allocation limit: the largest bit array plus header slack
const MAX_SERIALIZED_BYTES: u64 = (MAX_FILTER_BITS / 8) as u64 + 1024;

/// Bloom filter for probabilistic membership testing
///
/// False positives are possible, false negatives are not.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BloomFilter {
    /// Bit array storing the filter state
    #[serde(with = "bitvec_serde")]
    bits: BitVec<u8, Lsb0>,
    /// Number of hash functions (k)
    k: usize,
    /// Size in bits (m)
    m: usize,
    /// Number of insertions (n), duplicates included
    n: usize,
}

/// Serde support for BitVec
mod bitvec_serde {
    use bitvec::prelude::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bits: &BitVec<u8, Lsb0>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (bits.as_raw_slice(), bits.len()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BitVec<u8, Lsb0>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (bytes, len): (Vec<u8>, usize) = Deserialize::deserialize(deserializer)?;
        let mut bits = BitVec::<u8, Lsb0>::from_vec(bytes);
        bits.truncate(len);
        Ok(bits)
    }
}

/// bincode settings shared by encoder and decoder
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_SERIALIZED_BYTES)
}

impl BloomFilter {
    /// Create a new Bloom filter with `m` bits and `k` hash functions
    pub fn new(m: usize, k: usize) -> Self {
        let m = m.max(1);
        Self {
            bits: bitvec![u8, Lsb0; 0; m],
            k: k.clamp(1, MAX_HASH_COUNT),
            m,
            n: 0,
        }
    }

    /// Create a Bloom filter sized for `capacity` elements at `target_fpr`
    pub fn new_with_fpr(capacity: usize, target_fpr: f64) -> Self {
        let params = calculate_optimal_parameters(capacity, target_fpr);
        Self::new(params.size_bits, params.hash_count)
    }

    /// Insert an element
    pub fn insert(&mut self, element: &[u8]) {
        for pos in compute_hash_positions(element, self.k, self.m) {
            self.bits.set(pos, true);
        }
        self.n += 1;
    }

    /// Test if an element might be in the filter
    ///
    /// `false` is definitive; `true` may be a false positive.
    pub fn contains(&self, element: &[u8]) -> bool {
        compute_hash_positions(element, self.k, self.m).all(|pos| self.bits[pos])
    }

    /// Estimated false positive rate at the current fill level
    pub fn false_positive_rate(&self) -> f64 {
        calculate_fpr(self.m, self.n, self.k)
    }

    /// Get the number of bits set in the filter
    pub fn bits_set(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn size_bits(&self) -> usize {
        self.m
    }

    pub fn hash_count(&self) -> usize {
        self.k
    }

    pub fn elements_inserted(&self) -> usize {
        self.n
    }

    /// Reject decoded filters whose fields disagree
    fn check_consistency(&self) -> Result<(), FilterError> {
        if self.m == 0 || self.m > MAX_FILTER_BITS {
            return Err(FilterError::Corrupt(format!("size {} out of range", self.m)));
        }
        if self.bits.len() != self.m {
            return Err(FilterError::Corrupt(format!(
                "bit array holds {} bits, header says {}",
                self.bits.len(),
                self.m
            )));
        }
        if !(1..=MAX_HASH_COUNT).contains(&self.k) {
            return Err(FilterError::Corrupt(format!("hash count {} out of range", self.k)));
        }
        Ok(())
    }
}

impl MembershipFilter for BloomFilter {
    fn with_estimates(capacity: usize, false_positive_rate: f64) -> Self {
        Self::new_with_fpr(capacity, false_positive_rate)
    }

    fn add(&mut self, key: &[u8]) {
        self.insert(key);
    }

    fn test(&self, key: &[u8]) -> bool {
        self.contains(key)
    }

    fn serialize_to<W: Write>(&self, sink: W) -> Result<u64, FilterError> {
        let record = (FORMAT_MAGIC, FORMAT_VERSION, self);
        let size = codec()
            .serialized_size(&record)
            .map_err(|e| FilterError::SerializationError(e.to_string()))?;
        codec().serialize_into(sink, &record).map_err(|e| match *e {
            // Sink failures stay I/O errors so callers can report them as such
            bincode::ErrorKind::Io(err) => FilterError::Io(err),
            other => FilterError::SerializationError(other.to_string()),
        })?;
        Ok(size)
    }

    fn deserialize_from<R: Read>(source: R) -> Result<Self, FilterError> {
        let (magic, version, filter): ([u8; 4], u16, BloomFilter) = codec()
            .deserialize_from(source)
            .map_err(|e| FilterError::SerializationError(e.to_string()))?;

        if magic != FORMAT_MAGIC {
            return Err(FilterError::BadMagic { found: magic });
        }
        if version != FORMAT_VERSION {
            return Err(FilterError::UnsupportedVersion(version));
        }
        filter.check_consistency()?;
        Ok(filter)
    }

    fn stats(&self) -> FilterStats {
        FilterStats {
            size_bits: self.m,
            hash_count: self.k,
            elements_inserted: self.n,
            estimated_fpr: self.false_positive_rate(),
        }
    }
}
