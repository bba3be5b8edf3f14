//! Stable hashing of serializable records.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 of the canonical JSON encoding of `value`, hex-encoded.
///
/// Used to detect edits to the operator-supplied credentials: the hash is
/// stored next to the token cache and compared on startup.
pub fn hash<T: Serialize>(value: &T) -> String {
    let encoded = serde_json::to_vec(value).expect("record is always serializable");
    let digest = Sha256::digest(&encoded);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Record {
        a: String,
        b: u32,
    }

    #[test]
    fn test_hash_is_stable() {
        let r = Record {
            a: "x".into(),
            b: 1,
        };
        assert_eq!(hash(&r), hash(&r));
    }

    #[test]
    fn test_hash_changes_with_content() {
        let r1 = Record {
            a: "x".into(),
            b: 1,
        };
        let r2 = Record {
            a: "x".into(),
            b: 2,
        };
        assert_ne!(hash(&r1), hash(&r2));
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let r = Record {
            a: String::new(),
            b: 0,
        };
        let h = hash(&r);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
