//! Shared fixtures for format tests

/// Deterministic incompressible bytes
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(seed);
    std::iter::repeat_with(|| rng.u8(..)).take(len).collect()
}

/// Bytes with enough repetition for deflate to shrink them
pub fn text_bytes(len: usize) -> Vec<u8> {
    b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Distinct random 16-byte keys
pub fn random_keys(count: usize, seed: u64) -> Vec<[u8; 16]> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut seen = std::collections::BTreeSet::new();
    while seen.len() < count {
        let mut key = [0u8; 16];
        rng.fill(&mut key);
        seen.insert(key);
    }
    let mut keys: Vec<_> = seen.into_iter().collect();
    rng.shuffle(&mut keys);
    keys
}
