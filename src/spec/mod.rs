//! Filter Specifications - declarative, serializable filter pipelines
//!
//! A spec is a closed sum of three variants:
//! - [`LeafFilterSpec`]: one registered filter plus its configuration
//! - [`ListFilterSpec`]: ordered composition of child specs
//! - [`ReferenceFilterSpec`]: stand-in for another spec, bound by id
//!
//! Operations that may follow a reference take the [`SpecTable`] the
//! references were resolved against.

use std::collections::BTreeSet;
use std::io::Read;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::filter::{FilterError, InputFilter};
use crate::registry::FilterRegistry;
use crate::resolution::{ReferenceTargets, SpecHandle, SpecTable};

mod leaf;
mod list;
mod reference;

pub use leaf::LeafFilterSpec;
pub use list::ListFilterSpec;
pub use reference::{ReferenceFilterSpec, ReferenceState};

/// Error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed spec tree.
    Structural,
    /// Operation invoked before its preconditions hold.
    State,
    /// References left unresolved at validation time.
    Validation,
    /// Filter could not be located or configured.
    Configuration,
    /// Wire document could not be read or written.
    Format,
}

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("a null spec is part of the filter spec list with id '{list_id}'; check for an extraneous comma at the end of the list")]
    NullSpec { list_id: String },

    #[error("spec '{id}' is part of a reference cycle")]
    CyclicReference { id: String },

    #[error("duplicate spec id '{id}'")]
    DuplicateId { id: String },

    #[error("reference to '{id}' points outside of the spec table")]
    DanglingHandle { id: String },

    #[error("cannot flatten unresolved reference to {ref_id}")]
    UnresolvedFlatten { ref_id: String },

    #[error("spec reference to id '{ref_id}' has not been resolved")]
    UnresolvedBuild { ref_id: String },

    #[error("spec '{spec}' has the following unresolved references: {ids:?}")]
    UnresolvedReferences { spec: String, ids: Vec<String> },

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpecError::NullSpec { .. }
            | SpecError::CyclicReference { .. }
            | SpecError::DuplicateId { .. }
            | SpecError::DanglingHandle { .. } => ErrorKind::Structural,
            SpecError::UnresolvedFlatten { .. } | SpecError::UnresolvedBuild { .. } => ErrorKind::State,
            SpecError::UnresolvedReferences { .. } => ErrorKind::Validation,
            SpecError::Filter(_) => ErrorKind::Configuration,
            SpecError::Json(_) => ErrorKind::Format,
        }
    }
}

/// Descriptive information that never affects resolution or execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpecMetaData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum FilterSpec {
    #[serde(rename = "leaf")]
    Leaf(LeafFilterSpec),
    #[serde(rename = "list")]
    List(ListFilterSpec),
    #[serde(rename = "ref")]
    Reference(ReferenceFilterSpec),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum SpecKind {
    Leaf,
    List,
    Ref,
}

// `type` defaults to "leaf" when absent, which serde's internal tagging
// cannot express, so dispatch by hand.
impl<'de> Deserialize<'de> for FilterSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut value = Value::deserialize(deserializer)?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| D::Error::custom("filter spec must be a JSON object"))?;
        let kind = match map.remove("type") {
            None | Some(Value::Null) => SpecKind::Leaf,
            Some(tag) => serde_json::from_value(tag).map_err(D::Error::custom)?,
        };
        let spec = match kind {
            SpecKind::Leaf => serde_json::from_value(value).map(FilterSpec::Leaf),
            SpecKind::List => serde_json::from_value(value).map(FilterSpec::List),
            SpecKind::Ref => serde_json::from_value(value).map(FilterSpec::Reference),
        };
        spec.map_err(D::Error::custom)
    }
}

impl From<LeafFilterSpec> for FilterSpec {
    fn from(spec: LeafFilterSpec) -> Self {
        FilterSpec::Leaf(spec)
    }
}

impl From<ListFilterSpec> for FilterSpec {
    fn from(spec: ListFilterSpec) -> Self {
        FilterSpec::List(spec)
    }
}

impl From<ReferenceFilterSpec> for FilterSpec {
    fn from(spec: ReferenceFilterSpec) -> Self {
        FilterSpec::Reference(spec)
    }
}

impl FilterSpec {
    pub fn id(&self) -> Option<&str> {
        match self {
            FilterSpec::Leaf(s) => s.id(),
            FilterSpec::List(s) => s.id(),
            FilterSpec::Reference(s) => s.id(),
        }
    }

    pub fn has_id(&self) -> bool {
        self.id().is_some()
    }

    pub fn meta_data(&self) -> Option<&FilterSpecMetaData> {
        match self {
            FilterSpec::Leaf(s) => s.meta_data(),
            FilterSpec::List(s) => s.meta_data(),
            FilterSpec::Reference(s) => s.meta_data(),
        }
    }

    /// True when every reference in this tree is bound to a fully resolved
    /// target.
    pub fn is_fully_resolved(&self, table: &SpecTable) -> Result<bool, SpecError> {
        self.fully_resolved(table, &mut Vec::new())
    }

    /// Add the ids of every unresolved reference in this tree to `ids`.
    pub fn add_unresolved_ids(&self, table: &SpecTable, ids: &mut BTreeSet<String>) {
        self.collect_unresolved(table, ids, &mut Vec::new());
    }

    pub fn unresolved_ids(&self, table: &SpecTable) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        self.add_unresolved_ids(table, &mut ids);
        ids
    }

    /// Run one resolution step over every reference in this tree.
    ///
    /// Returns true if any reference changed state. Alias chains collapse by
    /// one hop per call, so callers iterate until this returns false (see
    /// [`crate::resolution::resolve_specs`]). A null list entry anywhere in
    /// the tree fails the step.
    pub fn resolve_references<T: ReferenceTargets + ?Sized>(
        &mut self,
        targets: &T,
    ) -> Result<bool, SpecError> {
        match self {
            FilterSpec::Leaf(_) => Ok(false),
            FilterSpec::List(s) => s.resolve_references(targets),
            FilterSpec::Reference(s) => Ok(s.resolve_references(targets)),
        }
    }

    /// Append the reference-free leaf sequence of this tree to `flattened`.
    pub fn flatten(&self, table: &SpecTable, flattened: &mut ListFilterSpec) -> Result<(), SpecError> {
        self.flatten_into(table, flattened, &mut Vec::new())
    }

    pub fn flattened(&self, table: &SpecTable) -> Result<ListFilterSpec, SpecError> {
        let mut flattened = ListFilterSpec::new();
        self.flatten(table, &mut flattened)?;
        Ok(flattened)
    }

    /// Build a new, independent runtime filter from this spec.
    pub fn build(
        &self,
        table: &SpecTable,
        registry: &FilterRegistry,
    ) -> Result<Box<dyn InputFilter>, SpecError> {
        self.build_in(table, registry, &mut Vec::new())
    }

    /// Check that every reference resolves and that the spec builds.
    pub fn validate(&self, table: &SpecTable, registry: &FilterRegistry) -> Result<(), SpecError> {
        if !self.is_fully_resolved(table)? {
            return Err(SpecError::UnresolvedReferences {
                spec: display_id(self.id()).to_string(),
                ids: self.unresolved_ids(table).into_iter().collect(),
            });
        }
        self.build(table, registry).map(|_| ())
    }

    /// Reconstruct a spec from an already-built filter. Every exported spec
    /// gets a fresh id.
    pub fn from_filter(filter: &dyn InputFilter) -> FilterSpec {
        let id = Uuid::new_v4().to_string();
        match filter.as_list() {
            Some(list) => {
                let mut spec = ListFilterSpec::with_id(id, None);
                for child in list.iter() {
                    spec.add_spec(Self::from_filter(child));
                }
                spec.into()
            }
            None => LeafFilterSpec::with_id(
                id,
                None,
                filter.implementation_key(),
                filter.params(),
            )
            .into(),
        }
    }

    pub fn from_json(json: &str) -> Result<FilterSpec, SpecError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_array(json: &str) -> Result<Vec<FilterSpec>, SpecError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_reader(reader: impl Read) -> Result<Vec<FilterSpec>, SpecError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json(&self) -> Result<String, SpecError> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn fully_resolved(
        &self,
        table: &SpecTable,
        path: &mut Vec<SpecHandle>,
    ) -> Result<bool, SpecError> {
        match self {
            FilterSpec::Leaf(_) => Ok(true),
            FilterSpec::List(s) => s.fully_resolved(table, path),
            FilterSpec::Reference(s) => s.fully_resolved(table, path),
        }
    }

    pub(crate) fn collect_unresolved(
        &self,
        table: &SpecTable,
        ids: &mut BTreeSet<String>,
        path: &mut Vec<SpecHandle>,
    ) {
        match self {
            FilterSpec::Leaf(_) => {}
            FilterSpec::List(s) => s.collect_unresolved(table, ids, path),
            FilterSpec::Reference(s) => s.collect_unresolved(table, ids, path),
        }
    }

    /// Effective ids of references that are not yet bound.
    pub(crate) fn pending_reference_ids(&self, pending: &mut Vec<String>) {
        match self {
            FilterSpec::Leaf(_) => {}
            FilterSpec::List(s) => s.pending_reference_ids(pending),
            FilterSpec::Reference(s) => {
                if !s.is_bound() {
                    pending.push(s.effective_ref_id().to_string());
                }
            }
        }
    }

    pub(crate) fn flatten_into(
        &self,
        table: &SpecTable,
        flattened: &mut ListFilterSpec,
        path: &mut Vec<SpecHandle>,
    ) -> Result<(), SpecError> {
        match self {
            FilterSpec::Leaf(s) => {
                flattened.add_spec(s.clone());
                Ok(())
            }
            FilterSpec::List(s) => s.flatten_into(table, flattened, path),
            FilterSpec::Reference(s) => s.flatten_into(table, flattened, path),
        }
    }

    pub(crate) fn build_in(
        &self,
        table: &SpecTable,
        registry: &FilterRegistry,
        path: &mut Vec<SpecHandle>,
    ) -> Result<Box<dyn InputFilter>, SpecError> {
        match self {
            FilterSpec::Leaf(s) => Ok(s.build(registry)?),
            FilterSpec::List(s) => s.build_in(table, registry, path),
            FilterSpec::Reference(s) => s.build_in(table, registry, path),
        }
    }
}

pub(crate) fn display_id(id: Option<&str>) -> &str {
    id.unwrap_or("null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Clahe, FilterParams, InputFilterList, Invert};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_type_defaults_to_leaf() {
        let spec = FilterSpec::from_json(r#"{"className": "invert", "params": {}}"#).unwrap();
        let FilterSpec::Leaf(leaf) = spec else {
            panic!("expected leaf");
        };
        assert_eq!(leaf.implementation_key(), Some("invert"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = FilterSpec::from_json(r#"{"type": "tree"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(FilterSpec::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_wire_round_trip() {
        let document = json!({
            "type": "list",
            "id": "pipeline",
            "metaData": { "group": "contrast" },
            "specList": [
                { "type": "leaf", "id": "clahe-fast", "className": "clahe",
                  "params": { "fast": "true", "blockradius": "250", "bins": "256", "slope": "2.5" } },
                { "type": "ref", "refId": "shared-invert" },
                null
            ]
        });
        let spec: FilterSpec = serde_json::from_value(document.clone()).unwrap();
        let written: Value = serde_json::from_str(&spec.to_json().unwrap()).unwrap();
        assert_eq!(written, document);
    }

    #[test]
    fn test_params_keep_document_order() {
        let spec = FilterSpec::from_json(
            r#"{"className": "clahe", "params": {"slope": "3", "bins": "8", "fast": "false"}}"#,
        )
        .unwrap();
        let written = spec.to_json().unwrap();
        let slope = written.find("slope").unwrap();
        let bins = written.find("bins").unwrap();
        let fast = written.find("fast").unwrap();
        assert!(slope < bins && bins < fast);
    }

    #[test]
    fn test_json_array() {
        let specs = FilterSpec::from_json_array(
            r#"[{"id": "a", "className": "invert", "params": {}}, {"type": "ref", "refId": "a"}]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].id(), Some("a"));
        assert!(matches!(specs[1], FilterSpec::Reference(_)));
    }

    #[test]
    fn test_export_leaf() {
        let mut clahe = Clahe::default();
        let mut p = FilterParams::new();
        p.insert("bins".into(), "32".into());
        clahe.init(&p).unwrap();

        let FilterSpec::Leaf(leaf) = FilterSpec::from_filter(&clahe) else {
            panic!("expected leaf");
        };
        assert!(leaf.id().is_some());
        assert_eq!(leaf.implementation_key(), Some(Clahe::KEY));
        assert_eq!(leaf.params().unwrap()["bins"], "32");
    }

    #[test]
    fn test_export_nested_list() {
        let mut inner = InputFilterList::new();
        inner.add(Box::new(Invert));
        let mut outer = InputFilterList::new();
        outer.add(Box::new(Clahe::default()));
        outer.add(Box::new(inner));

        let FilterSpec::List(list) = FilterSpec::from_filter(&outer) else {
            panic!("expected list");
        };
        assert_eq!(list.len(), 2);
        assert!(matches!(list.get(0), Some(FilterSpec::Leaf(_))));
        let Some(FilterSpec::List(nested)) = list.get(1) else {
            panic!("expected nested list");
        };
        assert_ne!(nested.id(), list.id());
        assert_eq!(nested.len(), 1);
    }

    #[test]
    fn test_error_kinds() {
        let null = SpecError::NullSpec { list_id: "x".into() };
        assert_eq!(null.kind(), ErrorKind::Structural);
        let state = SpecError::UnresolvedFlatten { ref_id: "x".into() };
        assert_eq!(state.kind(), ErrorKind::State);
        let config = SpecError::from(FilterError::UnknownFilter("x".into()));
        assert_eq!(config.kind(), ErrorKind::Configuration);
    }
}
