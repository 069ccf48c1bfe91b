use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{display_id, FilterSpec, FilterSpecMetaData, SpecError};
use crate::filter::{InputFilter, InputFilterList};
use crate::registry::FilterRegistry;
use crate::resolution::{ReferenceTargets, SpecHandle, SpecTable};

/// Ordered composition of child specs. Order is execution order.
///
/// Null entries (a trailing comma in a hand-edited document, typically) are
/// kept so resolution can reject them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta_data: Option<FilterSpecMetaData>,
    #[serde(default)]
    spec_list: Vec<Option<FilterSpec>>,
}

impl ListFilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>, meta_data: Option<FilterSpecMetaData>) -> Self {
        Self {
            id: Some(id.into()),
            meta_data,
            spec_list: Vec::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn meta_data(&self) -> Option<&FilterSpecMetaData> {
        self.meta_data.as_ref()
    }

    /// Child at `index`; `None` if out of range or a null entry.
    pub fn get(&self, index: usize) -> Option<&FilterSpec> {
        self.spec_list.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FilterSpec> {
        self.spec_list.get_mut(index).and_then(Option::as_mut)
    }

    pub fn last(&self) -> Option<&FilterSpec> {
        self.spec_list.last().and_then(Option::as_ref)
    }

    pub fn add_spec(&mut self, spec: impl Into<FilterSpec>) {
        self.spec_list.push(Some(spec.into()));
    }

    /// Append a raw entry, null included.
    pub fn add_entry(&mut self, entry: Option<FilterSpec>) {
        self.spec_list.push(entry);
    }

    pub fn add_all_specs(&mut self, specs: impl IntoIterator<Item = FilterSpec>) {
        self.spec_list.extend(specs.into_iter().map(Some));
    }

    /// Remove the entry at `index`, returning it if it was a spec.
    pub fn remove_spec(&mut self, index: usize) -> Option<FilterSpec> {
        if index < self.spec_list.len() {
            self.spec_list.remove(index)
        } else {
            None
        }
    }

    pub fn remove_last_spec(&mut self) -> Option<FilterSpec> {
        self.spec_list.pop().flatten()
    }

    pub fn remove_null_specs(&mut self) {
        self.spec_list.retain(Option::is_some);
    }

    pub fn clear(&mut self) {
        self.spec_list.clear();
    }

    /// Number of entries, null entries included.
    pub fn len(&self) -> usize {
        self.spec_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spec_list.is_empty()
    }

    pub fn entries(&self) -> &[Option<FilterSpec>] {
        &self.spec_list
    }

    /// Non-null children in order.
    pub fn iter(&self) -> impl Iterator<Item = &FilterSpec> {
        self.spec_list.iter().flatten()
    }

    fn null_spec(&self) -> SpecError {
        SpecError::NullSpec {
            list_id: display_id(self.id()).to_string(),
        }
    }

    pub(crate) fn fully_resolved(
        &self,
        table: &SpecTable,
        path: &mut Vec<SpecHandle>,
    ) -> Result<bool, SpecError> {
        for entry in &self.spec_list {
            let spec = entry.as_ref().ok_or_else(|| self.null_spec())?;
            if !spec.fully_resolved(table, path)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn collect_unresolved(
        &self,
        table: &SpecTable,
        ids: &mut BTreeSet<String>,
        path: &mut Vec<SpecHandle>,
    ) {
        for spec in self.iter() {
            spec.collect_unresolved(table, ids, path);
        }
    }

    pub(crate) fn resolve_references<T: ReferenceTargets + ?Sized>(
        &mut self,
        targets: &T,
    ) -> Result<bool, SpecError> {
        // every child gets a chance, even after one stays unresolved
        let mut changed = false;
        let mut has_null = false;
        for entry in self.spec_list.iter_mut() {
            match entry {
                Some(spec) => changed |= spec.resolve_references(targets)?,
                None => has_null = true,
            }
        }
        if has_null {
            return Err(self.null_spec());
        }
        Ok(changed)
    }

    pub(crate) fn pending_reference_ids(&self, pending: &mut Vec<String>) {
        for spec in self.iter() {
            spec.pending_reference_ids(pending);
        }
    }

    pub(crate) fn flatten_into(
        &self,
        table: &SpecTable,
        flattened: &mut ListFilterSpec,
        path: &mut Vec<SpecHandle>,
    ) -> Result<(), SpecError> {
        for entry in &self.spec_list {
            let spec = entry.as_ref().ok_or_else(|| self.null_spec())?;
            spec.flatten_into(table, flattened, path)?;
        }
        Ok(())
    }

    pub(crate) fn build_in(
        &self,
        table: &SpecTable,
        registry: &FilterRegistry,
        path: &mut Vec<SpecHandle>,
    ) -> Result<Box<dyn InputFilter>, SpecError> {
        let mut filters = InputFilterList::new();
        for entry in &self.spec_list {
            let spec = entry.as_ref().ok_or_else(|| self.null_spec())?;
            filters.add(spec.build_in(table, registry, path)?);
        }
        Ok(Box::new(filters))
    }
}
