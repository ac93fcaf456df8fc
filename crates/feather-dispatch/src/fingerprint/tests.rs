use super::*;
use serde_json::json;

#[test]
fn canonicalize_sorts_keys_and_drops_nulls() {
    let value = json!({"b": 1, "a": {"z": null, "y": 2}});
    let canon = canonicalize(&value);
    assert_eq!(stable_json_string(&canon), r#"{"a":{"y":2},"b":1}"#);
}

#[test]
fn key_reordering_yields_same_stable_json() {
    let a = json!({"x": 1, "y": 2});
    let b = json!({"y": 2, "x": 1});
    assert_eq!(stable_json_string(&a), stable_json_string(&b));
}

#[test]
fn arrays_preserve_order() {
    let value = json!({"items": [3, 1, 2]});
    assert_eq!(stable_json_string(&value), r#"{"items":[3,1,2]}"#);
}

#[test]
fn sha256_hex_is_64_hex_chars() {
    let digest = sha256_hex("hello");
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn sha256_hex_is_deterministic() {
    assert_eq!(sha256_hex("same input"), sha256_hex("same input"));
}

#[test]
fn normalize_whitespace_collapses_and_trims() {
    assert_eq!(normalize_whitespace("  hello   world\n\t"), "hello world");
}

#[test]
fn normalize_whitespace_is_idempotent_on_already_normalized_text() {
    let normalized = normalize_whitespace("hello world");
    assert_eq!(normalize_whitespace(&normalized), normalized);
}
