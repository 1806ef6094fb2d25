//! Bucket key hash (spec.md §4.1): the "Couchbase default" hash used by
//! [`crate::locator::VBucketServerMap`] to pick a bucket for a key.

/// CRC32 (IEEE polynomial `0xEDB88320` reversed) of `key`, folded down to
/// the 15 bits Couchbase uses for vbucket selection: `(crc >> 16) &
/// 0x7FFF`. Keys are hashed as the raw byte sequence carried in the
/// request; no normalization is applied.
pub fn couchbase_hash(key: &[u8]) -> u32 {
    let crc = crc32fast::hash(key);
    (crc >> 16) & 0x7FFF
}

/// Map a key's hash onto one of `vbucket_count` buckets.
pub fn vbucket_for(key: &[u8], vbucket_count: u32) -> u32 {
    couchbase_hash(key) % vbucket_count
}

#[cfg(test)]
mod tests {
    use super::*;

    // spec.md §8 scenario 6: literal test vectors that must pass as-is.
    const VECTORS: &[(&str, u32)] = &[
        ("Sikkim", 99),
        ("coming", 546),
        ("abandon", 3467),
        ("Grünewald", 3331),
        ("rotational", 2632),
        ("work", 21326),
        ("Chernobyl", 10641),
        ("squirm", 19755),
        ("smear", 15853),
        ("democratic", 9974),
    ];

    #[test]
    fn couchbase_hash_matches_known_vectors() {
        for (key, expected) in VECTORS {
            assert_eq!(
                couchbase_hash(key.as_bytes()),
                *expected,
                "hash({:?})",
                key
            );
        }
    }

    #[test]
    fn vbucket_locator_example_from_spec() {
        // spec.md §8 scenario 6: 3 nodes, 1024 buckets, key "XXXXX".
        let hash = couchbase_hash(b"XXXXX");
        assert_eq!(hash, 13701);
        let bucket = vbucket_for(b"XXXXX", 1024);
        assert_eq!(bucket, 133);
        assert_eq!(bucket as usize % 3, 1);
    }
}
