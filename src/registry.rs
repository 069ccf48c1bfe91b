//! Filter Registry - implementation key -> factory
//!
//! The registry is an explicit value handed to every build call, so tests can
//! work against isolated registries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::AtomicU32;

use crate::filter::{Clahe, FilterError, FlatFieldCorrection, InputFilter, Invert};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

#[cfg(feature = "test-hooks")]
static LOOKUP_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_lookup_count() -> u32 {
    LOOKUP_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_lookup_count() {
    LOOKUP_COUNT.store(0, Ordering::SeqCst);
}

/// Produces a fresh, default-configured filter.
pub type FilterFactory = fn() -> Box<dyn InputFilter>;

#[derive(Debug)]
pub struct FilterRegistry {
    /// Unique per registry and renewed on every registration, so anything
    /// cached from a lookup can tell whether it is still current.
    generation: u64,
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            generation: next_generation(),
            factories: HashMap::new(),
        }
    }

    /// Registry holding the built-in filters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Clahe::KEY, || Box::new(Clahe::default()));
        registry.register(Invert::KEY, || Box::new(Invert));
        registry.register(FlatFieldCorrection::KEY, || Box::new(FlatFieldCorrection::default()));
        registry
    }

    /// Register `factory` under `key`, returning any factory it replaced.
    pub fn register(&mut self, key: impl Into<String>, factory: FilterFactory) -> Option<FilterFactory> {
        self.generation = next_generation();
        self.factories.insert(key.into(), factory)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn factory(&self, key: &str) -> Option<FilterFactory> {
        #[cfg(feature = "test-hooks")]
        LOOKUP_COUNT.fetch_add(1, Ordering::SeqCst);

        self.factories.get(key).copied()
    }

    /// Create a default-configured instance of `key`.
    pub fn create(&self, key: &str) -> Result<Box<dyn InputFilter>, FilterError> {
        let factory = self
            .factory(key)
            .ok_or_else(|| FilterError::UnknownFilter(key.to_string()))?;
        Ok(factory())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Clone for FilterRegistry {
    fn clone(&self) -> Self {
        Self {
            generation: next_generation(),
            factories: self.factories.clone(),
        }
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = FilterRegistry::with_defaults();
        assert_eq!(
            registry.keys(),
            vec!["clahe", "flat_field_correction", "invert"]
        );
    }

    #[test]
    fn test_unknown_key() {
        let registry = FilterRegistry::new();
        let err = registry.create("clahe").unwrap_err();
        assert!(err.to_string().contains("'clahe' is not registered"));
    }

    #[test]
    fn test_each_create_is_a_new_instance() {
        let registry = FilterRegistry::with_defaults();
        let mut a = registry.create(Clahe::KEY).unwrap();
        let b = registry.create(Clahe::KEY).unwrap();
        let mut p = crate::filter::FilterParams::new();
        p.insert("bins".into(), "16".into());
        a.init(&p).unwrap();
        assert_eq!(a.params()["bins"], "16");
        assert_eq!(b.params()["bins"], "256");
    }

    #[test]
    fn test_generation_changes_with_contents() {
        let mut registry = FilterRegistry::new();
        let empty = registry.generation();
        assert_ne!(FilterRegistry::new().generation(), empty);

        registry.register("x", || Box::new(Invert));
        assert_ne!(registry.generation(), empty);
        assert_ne!(registry.clone().generation(), registry.generation());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = FilterRegistry::new();
        assert!(registry.register("x", || Box::new(Invert)).is_none());
        assert!(registry.register("x", || Box::new(Invert)).is_some());
        assert_eq!(registry.len(), 1);
    }
}
