use xxhash_rust::xxh3::xxh3_128;

/// 128-bit non-cryptographic fingerprint of a member's bytes, used to key
/// set and sorted-set index trees.
pub(crate) fn fingerprint128(data: &[u8]) -> [u8; 16] {
    xxh3_128(data).to_le_bytes()
}

/// Shortest decimal rendering of a score that round-trips through
/// [`str_to_f64`].
pub(crate) fn f64_to_str(val: f64) -> String {
    format!("{val}")
}

pub(crate) fn str_to_f64(val: &str) -> Option<f64> {
    val.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = fingerprint128(b"member-a");
        let b = fingerprint128(b"member-b");
        assert_eq!(a, fingerprint128(b"member-a"));
        assert_ne!(a, b);
        assert_ne!(fingerprint128(b""), [0u8; 16]);
    }

    #[test]
    fn test_f64_round_trip() {
        for v in [0.0, 1.5, -3.25, 99.0, 1e18, -0.001] {
            let s = f64_to_str(v);
            assert_eq!(str_to_f64(&s), Some(v));
        }
        assert_eq!(str_to_f64("not-a-number"), None);
    }
}
