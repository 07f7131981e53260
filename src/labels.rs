//! Canonical label handling.
//!
//! A series is identified by `(agent_id, metric_name, canonical(labels))`.
//! Canonicalization sorts keys lexicographically and serializes to a stable
//! JSON string; the SHA-256 of that string is what the catalog indexes on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sorted label map; key order on the wire is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(pub BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Stable serialization: BTreeMap iteration is key-sorted, so the JSON
    /// output is identical for any insertion order.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Hex SHA-256 of the canonical form, used for catalog lookups.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        hex_string(&hasher.finalize())
    }

    /// Parse a previously stored canonical string back into labels.
    pub fn from_canonical(canonical: &str) -> Self {
        serde_json::from_str(canonical).unwrap_or_default()
    }

    /// True when every `(key, value)` pair in `conjunct` is present.
    pub fn contains_all(&self, conjunct: &BTreeMap<String, String>) -> bool {
        conjunct
            .iter()
            .all(|(k, v)| self.0.get(k).is_some_and(|have| have == v))
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Labels {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_is_order_insensitive() {
        let mut a = BTreeMap::new();
        a.insert("sensor".to_string(), "CPU Temp".to_string());
        a.insert("zone".to_string(), "0".to_string());

        let mut b = BTreeMap::new();
        b.insert("zone".to_string(), "0".to_string());
        b.insert("sensor".to_string(), "CPU Temp".to_string());

        assert_eq!(Labels(a).canonical(), Labels(b).canonical());
    }

    #[test]
    fn test_hash_differs_for_different_labels() {
        let a = Labels::from([("sensor", "CPU Temp")]);
        let b = Labels::from([("sensor", "VRM Temp")]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_empty_labels_canonical() {
        assert_eq!(Labels::new().canonical(), "{}");
    }

    #[test]
    fn test_canonical_round_trip() {
        let labels = Labels::from([("mountpoint", "/"), ("device", "nvme0n1")]);
        let parsed = Labels::from_canonical(&labels.canonical());
        assert_eq!(labels, parsed);
    }

    #[test]
    fn test_contains_all() {
        let labels = Labels::from([("sensor", "CPU Temp"), ("zone", "0")]);

        let mut want = BTreeMap::new();
        want.insert("sensor".to_string(), "CPU Temp".to_string());
        assert!(labels.contains_all(&want));

        want.insert("zone".to_string(), "1".to_string());
        assert!(!labels.contains_all(&want));
    }
}
