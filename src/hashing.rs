//! Hashing System - SHA-256 fingerprints of filter configuration
//!
//! Two specs that flatten to the same filters with the same parameters get
//! the same fingerprint, whatever their ids, metadata or nesting. Caches of
//! processed tiles key on this rather than on object identity.

use serde::Serialize;
use serde_json::{json, to_string, Value};
use sha2::{Digest, Sha256};

use crate::filter::InputFilter;
use crate::resolution::SpecTable;
use crate::spec::{FilterSpec, ListFilterSpec, SpecError};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    lower_hex(&hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    let sorted = sort_value(&v);
    to_string(&sorted)
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Fingerprint of an already flattened leaf sequence.
pub fn flattened_fingerprint(flattened: &ListFilterSpec) -> Result<String, serde_json::Error> {
    let steps: Vec<Value> = flattened
        .iter()
        .filter_map(|spec| match spec {
            FilterSpec::Leaf(leaf) => Some(json!({
                "className": leaf.implementation_key(),
                "params": leaf.params(),
            })),
            _ => None,
        })
        .collect();
    let canonical = canonical_json(&steps)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Fingerprint of a resolved spec.
pub fn spec_fingerprint(spec: &FilterSpec, table: &SpecTable) -> Result<String, SpecError> {
    let flattened = spec.flattened(table)?;
    Ok(flattened_fingerprint(&flattened)?)
}

/// Fingerprint of a built filter, via its exported spec.
pub fn filter_fingerprint(filter: &dyn InputFilter) -> Result<String, SpecError> {
    spec_fingerprint(&FilterSpec::from_filter(filter), &SpecTable::new())
}

fn lower_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Clahe, FilterParams, Invert};
    use crate::registry::FilterRegistry;
    use crate::spec::LeafFilterSpec;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> FilterParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": 3});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_sha256_hex_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_deterministic() {
        let data = b"test data";
        assert_eq!(sha256_hex(data), sha256_hex(data));
    }

    #[test]
    fn test_fingerprint_ignores_ids_and_param_order() {
        let table = SpecTable::new();
        let a: FilterSpec =
            LeafFilterSpec::with_id("one", None, Clahe::KEY, params(&[("bins", "8"), ("slope", "3")])).into();
        let b: FilterSpec =
            LeafFilterSpec::with_id("two", None, Clahe::KEY, params(&[("slope", "3"), ("bins", "8")])).into();
        assert_eq!(
            spec_fingerprint(&a, &table).unwrap(),
            spec_fingerprint(&b, &table).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_sensitive_to_configuration() {
        let table = SpecTable::new();
        let a: FilterSpec = LeafFilterSpec::new(Clahe::KEY, params(&[("bins", "8")])).into();
        let b: FilterSpec = LeafFilterSpec::new(Clahe::KEY, params(&[("bins", "16")])).into();
        assert_ne!(
            spec_fingerprint(&a, &table).unwrap(),
            spec_fingerprint(&b, &table).unwrap()
        );
    }

    #[test]
    fn test_built_filters_fingerprint_equal() {
        let registry = FilterRegistry::with_defaults();
        let spec: FilterSpec = LeafFilterSpec::new(Invert::KEY, FilterParams::new()).into();
        let table = SpecTable::new();
        let first = spec.build(&table, &registry).unwrap();
        let second = spec.build(&table, &registry).unwrap();
        assert_eq!(
            filter_fingerprint(first.as_ref()).unwrap(),
            filter_fingerprint(second.as_ref()).unwrap()
        );
    }
}
