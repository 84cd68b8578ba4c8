//! # Equality Fingerprints
//!
//! CRC32 over the canonical JSON serialization of a value. The
//! fingerprint exists purely so two snapshots can be compared for
//! data equality without comparing the data itself; it is not a
//! cryptographic integrity guarantee.

use serde_json::Value;

/// Compute the equality fingerprint of a JSON value.
///
/// `serde_json` serializes object keys in sorted order, so the same
/// logical value always produces the same fingerprint regardless of
/// how it was assembled.
#[must_use]
pub fn fingerprint(value: &Value) -> String {
    let canonical = value.to_string();
    format!("{:08x}", crc32fast::hash(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = json!({"b": 2, "a": 1});
        let b = json!({"a": 1, "b": 2});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_differs_for_different_data() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_is_eight_hex_chars() {
        let fp = fingerprint(&json!([1, 2, 3]));
        assert_eq!(fp.len(), 8);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_of_scalars() {
        assert_ne!(fingerprint(&json!(1)), fingerprint(&json!("1")));
        assert_eq!(fingerprint(&json!(null)), fingerprint(&json!(null)));
    }
}
