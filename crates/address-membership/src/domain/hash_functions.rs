//! Hash functions for the Bloom filter
//!
//! MurmurHash3 (x64, 128-bit) with two seeds feeds a double-hashing
//! scheme, so k bit positions cost two hash evaluations.

use std::io::Cursor;

/// Seed of the first base hash
const SEED_PRIMARY: u32 = 0;
/// Seed of the second base hash
const SEED_SECONDARY: u32 = 0x9747_b28c;

/// Hash a key with MurmurHash3 and keep the lower 64 bits
pub fn murmur_hash(key: &[u8], seed: u32) -> u64 {
    let mut cursor = Cursor::new(key);
    // Reading from an in-memory cursor cannot fail.
    murmur3::murmur3_x64_128(&mut cursor, seed).unwrap_or(0) as u64
}

/// Compute k bit positions in `[0, m)` for a key
///
/// Uses double hashing: `h(i) = h1 + i * h2`. The second hash is forced
/// odd so successive probes never collapse onto one position when m is a
/// power of two.
pub fn compute_hash_positions(key: &[u8], k: usize, m: usize) -> impl Iterator<Item = usize> {
    let h1 = murmur_hash(key, SEED_PRIMARY);
    let h2 = murmur_hash(key, SEED_SECONDARY) | 1;
    let m = m as u64;

    (0..k as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_murmur3_hash_deterministic() {
        let key = [0x12u8, 0x34, 0x56, 0x78];

        assert_eq!(
            murmur_hash(&key, SEED_PRIMARY),
            murmur_hash(&key, SEED_PRIMARY),
            "Same key and seed must produce the same hash"
        );
    }

    #[test]
    fn test_murmur3_different_seed_different_output() {
        let key = b"0x1234567890abcdef1234567890abcdef12345678";

        assert_ne!(
            murmur_hash(key, SEED_PRIMARY),
            murmur_hash(key, SEED_SECONDARY),
            "Different seeds must produce different outputs"
        );
    }

    #[test]
    fn test_positions_within_bounds() {
        let key = [0xABu8; 20];
        let m = 9_586;

        let positions: Vec<usize> = compute_hash_positions(&key, 13, m).collect();

        assert_eq!(positions.len(), 13);
        assert!(positions.iter().all(|&pos| pos < m));
        let unique: HashSet<_> = positions.iter().collect();
        assert!(unique.len() >= 10, "Probes should spread across the array");
    }

    #[test]
    fn test_positions_power_of_two_size_do_not_collapse() {
        let key = [0u8; 20];
        let positions: HashSet<usize> = compute_hash_positions(&key, 8, 1024).collect();

        assert!(positions.len() > 1);
    }

    #[test]
    fn test_hash_uniformity() {
        let m = 1000;
        let k = 7;
        let mut counts = vec![0usize; 10];

        for i in 0u32..1000 {
            for pos in compute_hash_positions(&i.to_be_bytes(), k, m) {
                counts[pos / 100] += 1;
            }
        }

        // ~700 per bucket, allow 50% variance
        for (i, count) in counts.iter().enumerate() {
            assert!(
                (350..=1050).contains(count),
                "Bucket {} has {} entries, expected ~700",
                i,
                count
            );
        }
    }
}
