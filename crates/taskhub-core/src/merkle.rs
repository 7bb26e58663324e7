//! Merkle fingerprint over an ordered sequence of job IDs.
//!
//! Pure function built on `sha2`, which this crate already depends on
//! (used elsewhere in this codebase for webhook signature verification).
//! Leaf and interior hashes are domain-separated (`0x00` / `0x01` prefix)
//! so a leaf can never collide with an interior node, a standard
//! Merkle-tree hardening against second-preimage attacks.

use sha2::{Digest, Sha256};

/// Digest of the empty sequence — the defined sentinel for a Task with
/// zero jobs.
pub fn empty_root() -> String {
    hex::encode(Sha256::digest(b""))
}

fn leaf_hash(id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0u8]);
    hasher.update(id.as_bytes());
    hasher.finalize().into()
}

fn interior_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([1u8]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Compute the Merkle root over `ids`, in the order given.
///
/// Order- and content-sensitive: permuting or substituting any id changes
/// the root. An odd node at a level is promoted unchanged rather than
/// duplicated, keeping the root sensitive to the exact sequence length.
pub fn merkle_root<S: AsRef<str>>(ids: &[S]) -> String {
    if ids.is_empty() {
        return empty_root();
    }

    let mut level: Vec<[u8; 32]> = ids.iter().map(|id| leaf_hash(id.as_ref())).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        let mut i = 0;
        while i < level.len() {
            if i + 1 < level.len() {
                next.push(interior_hash(&level[i], &level[i + 1]));
            } else {
                next.push(level[i]);
            }
            i += 2;
        }
        level = next;
    }
    hex::encode(level[0])
}

/// Default job-id derivation for a `Source` that doesn't override
/// `get_job_id`: `hash(serialize(input))`.
pub fn hash_value(value: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_has_defined_sentinel() {
        let empty: Vec<&str> = vec![];
        assert_eq!(merkle_root(&empty), empty_root());
    }

    #[test]
    fn deterministic_across_repeated_calls() {
        let ids = vec!["a", "b", "c", "d", "e"];
        assert_eq!(merkle_root(&ids), merkle_root(&ids));
    }

    #[test]
    fn order_sensitive() {
        let a = vec!["a", "b", "c"];
        let b = vec!["c", "b", "a"];
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn content_sensitive() {
        let a = vec!["a", "b", "c"];
        let b = vec!["a", "b", "d"];
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn odd_length_sequence_is_stable() {
        let ids = vec!["a", "b", "c"];
        let root1 = merkle_root(&ids);
        let root2 = merkle_root(&ids);
        assert_eq!(root1, root2);
        assert_ne!(root1, empty_root());
    }

    #[test]
    fn single_element_is_its_leaf_hash() {
        let ids = vec!["only"];
        assert_eq!(merkle_root(&ids), hex::encode(leaf_hash("only")));
    }

    #[test]
    fn hash_value_is_stable_for_same_json() {
        let v = serde_json::json!({"a": 1, "b": 2});
        assert_eq!(hash_value(&v), hash_value(&v));
    }
}
