//! FilterSpec Core - declarative image filter pipelines for tiled rendering
//!
//! # Flow
//! 1. Wire documents deserialize into [`FilterSpec`] trees
//! 2. Shared specs go into a [`SpecTable`]; [`SpecTable::resolve`] binds its aliases
//! 3. [`resolve_specs`] binds per-tile specs against the table
//! 4. [`FilterSpec::validate`] / [`FilterSpec::build`] produce an [`InputFilter`]
//! 5. The filter runs per tile with a scale factor
//! 6. [`FilterSpec::from_filter`] exports a built filter back to spec form

pub mod filter;
pub mod hashing;
pub mod registry;
pub mod resolution;
pub mod spec;

pub use filter::{Clahe, FilterError, FilterParams, FlatFieldCorrection, InputFilter, InputFilterList, Invert};
pub use hashing::{canonical_json, filter_fingerprint, spec_fingerprint};
pub use registry::{FilterFactory, FilterRegistry};
pub use resolution::{
    resolve_spec, resolve_specs, Lookup, ReferenceTargets, ResolutionReport, ResolverConfig, SpecHandle, SpecTable,
};
pub use spec::{
    ErrorKind, FilterSpec, FilterSpecMetaData, LeafFilterSpec, ListFilterSpec, ReferenceFilterSpec, ReferenceState,
    SpecError,
};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
