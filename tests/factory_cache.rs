//! Factory lookups are counted process-wide, so this lives in its own test
//! binary.

#![cfg(feature = "test-hooks")]

use filterspec_core::registry::{get_lookup_count, reset_lookup_count};
use filterspec_core::{FilterParams, FilterRegistry, FilterSpec, Invert, LeafFilterSpec, SpecTable};

#[test]
fn invariant_leaf_caches_factory_lookup() {
    let registry = FilterRegistry::with_defaults();
    let table = SpecTable::new();
    let spec: FilterSpec = LeafFilterSpec::new(Invert::KEY, FilterParams::new()).into();

    reset_lookup_count();
    for _ in 0..3 {
        spec.build(&table, &registry).unwrap();
    }
    assert_eq!(get_lookup_count(), 1);
}
