use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{FilterSpecMetaData, ListFilterSpec, SpecError};
use crate::filter::InputFilter;
use crate::registry::FilterRegistry;
use crate::resolution::{Lookup, ReferenceTargets, SpecHandle, SpecTable};

/// Resolution progress of a reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReferenceState {
    /// Nothing found yet for the written id.
    #[default]
    Unbound,
    /// The id named another reference; follow that reference's target instead.
    Aliased(String),
    /// Bound to a non-reference spec in the table. Never revisited.
    Bound { id: String, handle: SpecHandle },
}

/// Stands in for another spec, identified by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceFilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta_data: Option<FilterSpecMetaData>,
    ref_id: String,
    #[serde(skip)]
    state: ReferenceState,
}

impl ReferenceFilterSpec {
    pub fn new(ref_id: impl Into<String>) -> Self {
        Self {
            id: None,
            meta_data: None,
            ref_id: ref_id.into(),
            state: ReferenceState::Unbound,
        }
    }

    /// A reference that can itself be referenced, i.e. an alias.
    pub fn with_id(id: impl Into<String>, ref_id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new(ref_id)
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn meta_data(&self) -> Option<&FilterSpecMetaData> {
        self.meta_data.as_ref()
    }

    /// The id as written in the document.
    pub fn ref_id(&self) -> &str {
        &self.ref_id
    }

    /// The id currently being followed: starts as [`Self::ref_id`] and moves
    /// along alias chains during resolution.
    pub fn effective_ref_id(&self) -> &str {
        match &self.state {
            ReferenceState::Unbound => &self.ref_id,
            ReferenceState::Aliased(id) | ReferenceState::Bound { id, .. } => id,
        }
    }

    pub fn state(&self) -> &ReferenceState {
        &self.state
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, ReferenceState::Bound { .. })
    }

    pub fn bound_handle(&self) -> Option<SpecHandle> {
        match self.state {
            ReferenceState::Bound { handle, .. } => Some(handle),
            _ => None,
        }
    }

    pub(crate) fn resolve_references<T: ReferenceTargets + ?Sized>(&mut self, targets: &T) -> bool {
        if self.is_bound() {
            return false;
        }
        let effective = self.effective_ref_id().to_string();
        match targets.lookup(&effective) {
            None => false,
            Some(Lookup::Alias(next)) => {
                if next == effective {
                    return false;
                }
                tracing::trace!(ref_id = %self.ref_id, from = %effective, to = %next, "adopting alias target");
                self.state = ReferenceState::Aliased(next);
                true
            }
            Some(Lookup::Spec(handle)) => {
                tracing::trace!(ref_id = %self.ref_id, target = %effective, "bound reference");
                self.state = ReferenceState::Bound { id: effective, handle };
                true
            }
        }
    }

    pub(crate) fn fully_resolved(
        &self,
        table: &SpecTable,
        path: &mut Vec<SpecHandle>,
    ) -> Result<bool, SpecError> {
        match &self.state {
            ReferenceState::Bound { id, handle } => {
                table.visit(*handle, id, path, |target, path| target.fully_resolved(table, path))
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn collect_unresolved(
        &self,
        table: &SpecTable,
        ids: &mut BTreeSet<String>,
        path: &mut Vec<SpecHandle>,
    ) {
        match &self.state {
            ReferenceState::Bound { id, handle } => {
                let visited = table.visit(*handle, id, path, |target, path| {
                    target.collect_unresolved(table, ids, path);
                    Ok(())
                });
                if let Err(SpecError::DanglingHandle { .. }) = visited {
                    ids.insert(id.clone());
                }
            }
            _ => {
                ids.insert(self.effective_ref_id().to_string());
            }
        }
    }

    pub(crate) fn flatten_into(
        &self,
        table: &SpecTable,
        flattened: &mut ListFilterSpec,
        path: &mut Vec<SpecHandle>,
    ) -> Result<(), SpecError> {
        if let ReferenceState::Bound { id, handle } = &self.state {
            if self.fully_resolved(table, path)? {
                return table.visit(*handle, id, path, |target, path| {
                    target.flatten_into(table, flattened, path)
                });
            }
        }
        Err(SpecError::UnresolvedFlatten {
            ref_id: self.effective_ref_id().to_string(),
        })
    }

    pub(crate) fn build_in(
        &self,
        table: &SpecTable,
        registry: &FilterRegistry,
        path: &mut Vec<SpecHandle>,
    ) -> Result<Box<dyn InputFilter>, SpecError> {
        match &self.state {
            ReferenceState::Bound { id, handle } => {
                table.visit(*handle, id, path, |target, path| target.build_in(table, registry, path))
            }
            _ => Err(SpecError::UnresolvedBuild {
                ref_id: self.ref_id.clone(),
            }),
        }
    }
}

impl PartialEq for ReferenceFilterSpec {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.meta_data == other.meta_data && self.ref_id == other.ref_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_effective_id_defaults_to_ref_id() {
        let r = ReferenceFilterSpec::new("target");
        assert_eq!(r.effective_ref_id(), "target");
        assert_eq!(r.state(), &ReferenceState::Unbound);
    }

    #[test]
    fn test_missing_target_stays_unbound() {
        let mut r = ReferenceFilterSpec::new("target");
        let targets: HashMap<String, Lookup> = HashMap::new();
        assert!(!r.resolve_references(&targets));
        assert!(!r.is_bound());
    }

    #[test]
    fn test_alias_adopts_effective_id() {
        let mut r = ReferenceFilterSpec::new("a");
        let mut targets = HashMap::new();
        targets.insert("a".to_string(), Lookup::Alias("b".to_string()));
        assert!(r.resolve_references(&targets));
        assert_eq!(r.effective_ref_id(), "b");
        assert_eq!(r.ref_id(), "a");
        assert!(!r.is_bound());
    }

    #[test]
    fn test_self_alias_is_a_fixed_point() {
        let mut r = ReferenceFilterSpec::new("a");
        let mut targets = HashMap::new();
        targets.insert("a".to_string(), Lookup::Alias("a".to_string()));
        assert!(!r.resolve_references(&targets));
    }

    #[test]
    fn test_bind_is_permanent() {
        let mut table = SpecTable::new();
        let handle = table
            .insert(crate::spec::LeafFilterSpec::with_id("a", None, "invert", Default::default()).into())
            .unwrap();
        let mut r = ReferenceFilterSpec::new("a");
        assert!(r.resolve_references(&table));
        assert_eq!(r.bound_handle(), Some(handle));

        let mut targets = HashMap::new();
        targets.insert("a".to_string(), Lookup::Alias("z".to_string()));
        assert!(!r.resolve_references(&targets));
        assert_eq!(r.bound_handle(), Some(handle));
    }

    #[test]
    fn test_unbound_build_is_state_error() {
        let r = ReferenceFilterSpec::new("a");
        let err = r
            .build_in(&SpecTable::new(), &FilterRegistry::with_defaults(), &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "spec reference to id 'a' has not been resolved");
    }

    #[test]
    fn test_serialized_form_has_no_state() {
        let mut r = ReferenceFilterSpec::new("a");
        let mut targets = HashMap::new();
        targets.insert("a".to_string(), Lookup::Alias("b".to_string()));
        r.resolve_references(&targets);
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"refId":"a"}"#);
    }
}
