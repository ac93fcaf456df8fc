use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Canonicalizes a JSON value for stable hashing (spec §4.6): object keys
/// sorted lexicographically at every nesting level, arrays left in order,
/// `null` fields dropped (they stand in for "unset optional field").
///
/// `serde_json::Value` has no bigint/Date/RegExp/cycle/function variants —
/// those JSON-superset cases from the source format don't arise for a tree
/// built from `serde_json::Value`, so there is nothing to special-case here.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in map {
                if v.is_null() {
                    continue;
                }
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serializes an already-canonicalized value deterministically.
pub fn stable_json_string(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).expect("canonicalized JSON never fails to serialize")
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Collapses runs of ASCII/unicode whitespace to a single space and trims
/// the ends, so semantically-equivalent whitespace yields the same prompt
/// cache key (spec §8 "prompt cache idempotence").
pub fn normalize_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for ch in s.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests;
