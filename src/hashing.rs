//! Hash computation using BLAKE3
//!
//! Every hash the build core compares across runs (query results, example values,
//! printed type shapes, cache keys, worker shard keys) is produced here so that the
//! encoding stays identical everywhere.

use blake3::Hasher;
use serde::Serialize;
use serde_json::Value;

/// Compute a hex-encoded hash of arbitrary bytes
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hex::encode(hasher.finalize().as_bytes())
}

/// Content digest for raw source content
///
/// Sources use this to fill `internal.content_digest`; the digest changes iff the bytes change.
pub fn compute_content_digest(content: &[u8]) -> String {
    compute_hash(content)
}

/// Hash of a serialized query result
///
/// Callers serialize the result once and hash those bytes; equal results always give
/// equal hashes because `Value` objects serialize with sorted keys.
pub fn compute_result_hash(result_json: &str) -> String {
    compute_hash(result_json.as_bytes())
}

/// Hash of a JSON value with object keys in sorted order
///
/// `serde_json::Value` objects are backed by a `BTreeMap` unless `preserve_order` is
/// enabled, so serializing a `Value` is already canonical. Typed values are first
/// converted to `Value` for the same reason.
pub fn compute_canonical_hash<T: Serialize>(value: &T) -> String {
    let canonical = serde_json::to_value(value)
        .map(|v| canonical_string(&v))
        .unwrap_or_default();
    compute_hash(canonical.as_bytes())
}

fn canonical_string(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Stable shard index for a node id
///
/// Uses the first 8 bytes of BLAKE3(node_id), big-endian, so the same node always lands
/// on the same worker regardless of platform or process.
pub fn shard_for(node_id: &str, shards: usize) -> usize {
    if shards <= 1 {
        return 0;
    }
    let digest = blake3::hash(node_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_be_bytes(prefix) % shards as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_hash_deterministic() {
        let a = compute_result_hash("{\"data\":{\"title\":\"X\"}}");
        let b = compute_result_hash("{\"data\":{\"title\":\"X\"}}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_result_hash_differs_on_content() {
        let a = compute_result_hash("{\"data\":{\"title\":\"X\"}}");
        let b = compute_result_hash("{\"data\":{\"title\":\"Y\"}}");
        assert_ne!(a, b);
    }

    #[test]
    fn test_canonical_hash_ignores_key_order() {
        let a = json!({"b": 1, "a": [1, 2]});
        let b: Value = serde_json::from_str("{\"a\":[1,2],\"b\":1}").unwrap();
        assert_eq!(compute_canonical_hash(&a), compute_canonical_hash(&b));
    }

    #[test]
    fn test_shard_is_stable_and_in_range() {
        for shards in 1..8 {
            let first = shard_for("node-a", shards);
            assert_eq!(first, shard_for("node-a", shards));
            assert!(first < shards);
        }
        assert_eq!(shard_for("anything", 0), 0);
    }
}
