//! Resolution Engine - binds references to the specs they name
//!
//! [`SpecTable`] owns the addressable specs and hands out [`SpecHandle`]s;
//! references bind to handles, never to owned copies. A single resolution
//! step moves each unbound reference one hop along its alias chain, so the
//! engine repeats steps until nothing changes.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::spec::{FilterSpec, SpecError};

/// Index of a spec inside the [`SpecTable`] that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecHandle(usize);

impl SpecHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What an id currently names, as seen by a reference being resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The id names another reference; carries that reference's effective id.
    Alias(String),
    /// The id names a non-reference spec.
    Spec(SpecHandle),
}

/// Id lookup used by a resolution step.
pub trait ReferenceTargets {
    fn lookup(&self, id: &str) -> Option<Lookup>;
}

impl ReferenceTargets for HashMap<String, Lookup> {
    fn lookup(&self, id: &str) -> Option<Lookup> {
        self.get(id).cloned()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Upper bound on resolution passes. Defaults to the table size plus
    /// two, which covers the longest possible alias chain and the pass that
    /// confirms the fixed point.
    #[serde(default)]
    pub max_passes: Option<usize>,
}

impl ResolverConfig {
    fn pass_limit(&self, table_len: usize) -> usize {
        self.max_passes.unwrap_or(table_len + 2).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub passes: usize,
    /// False when the pass limit was hit before a pass made no changes.
    pub converged: bool,
}

/// The id -> spec table references resolve against. Owns its specs.
#[derive(Debug, Clone, Default)]
pub struct SpecTable {
    specs: Vec<FilterSpec>,
    ids: HashMap<String, SpecHandle>,
}

impl SpecTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = FilterSpec>) -> Result<Self, SpecError> {
        let mut table = Self::new();
        for spec in specs {
            table.insert(spec)?;
        }
        Ok(table)
    }

    pub fn from_json_array(json: &str) -> Result<Self, SpecError> {
        Self::from_specs(FilterSpec::from_json_array(json)?)
    }

    /// Add a spec. Specs with an id become addressable by that id; anonymous
    /// specs are stored but can only be reached by handle.
    pub fn insert(&mut self, spec: FilterSpec) -> Result<SpecHandle, SpecError> {
        let handle = SpecHandle(self.specs.len());
        if let Some(id) = spec.id() {
            if self.ids.contains_key(id) {
                return Err(SpecError::DuplicateId { id: id.to_string() });
            }
            self.ids.insert(id.to_string(), handle);
        }
        self.specs.push(spec);
        Ok(handle)
    }

    pub fn get(&self, handle: SpecHandle) -> Option<&FilterSpec> {
        self.specs.get(handle.0)
    }

    pub fn handle_of(&self, id: &str) -> Option<SpecHandle> {
        self.ids.get(id).copied()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&FilterSpec> {
        self.handle_of(id).and_then(|handle| self.get(handle))
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SpecHandle, &FilterSpec)> {
        self.specs
            .iter()
            .enumerate()
            .map(|(index, spec)| (SpecHandle(index), spec))
    }

    /// Resolve the table's own entries (aliases included) to a fixed point.
    ///
    /// Fails on the first malformed entry; entries are never added or
    /// replaced, so handles bound here stay valid.
    pub fn resolve(&mut self, config: &ResolverConfig) -> Result<ResolutionReport, SpecError> {
        let limit = config.pass_limit(self.specs.len());
        for pass in 1..=limit {
            let mut changed = 0usize;
            for index in 0..self.specs.len() {
                let mut pending = Vec::new();
                self.specs[index].pending_reference_ids(&mut pending);
                // look up against the live table, then apply to the entry
                let targets: HashMap<String, Lookup> = pending
                    .into_iter()
                    .filter_map(|id| self.lookup(&id).map(|target| (id, target)))
                    .collect();
                if self.specs[index].resolve_references(&targets)? {
                    changed += 1;
                }
            }
            tracing::debug!(pass, changed, "spec table resolution pass");
            if changed == 0 {
                return Ok(ResolutionReport { passes: pass, converged: true });
            }
        }
        tracing::warn!(limit, "spec table resolution stopped before reaching a fixed point");
        Ok(ResolutionReport { passes: limit, converged: false })
    }

    /// Unresolved ids across every entry in the table.
    pub fn unresolved_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for spec in &self.specs {
            spec.add_unresolved_ids(self, &mut ids);
        }
        ids
    }

    /// Run `f` on the spec behind `handle`, tracking the reference path so a
    /// revisit is reported as a cycle instead of recursing forever.
    pub(crate) fn visit<R>(
        &self,
        handle: SpecHandle,
        id: &str,
        path: &mut Vec<SpecHandle>,
        f: impl FnOnce(&FilterSpec, &mut Vec<SpecHandle>) -> Result<R, SpecError>,
    ) -> Result<R, SpecError> {
        if path.contains(&handle) {
            return Err(SpecError::CyclicReference { id: id.to_string() });
        }
        let spec = self
            .get(handle)
            .ok_or_else(|| SpecError::DanglingHandle { id: id.to_string() })?;
        path.push(handle);
        let result = f(spec, path);
        path.pop();
        result
    }
}

impl ReferenceTargets for SpecTable {
    fn lookup(&self, id: &str) -> Option<Lookup> {
        let handle = self.handle_of(id)?;
        Some(match &self.specs[handle.0] {
            FilterSpec::Reference(alias) => Lookup::Alias(alias.effective_ref_id().to_string()),
            _ => Lookup::Spec(handle),
        })
    }
}

/// Resolve caller-owned specs against `table` to a fixed point.
pub fn resolve_specs(
    specs: &mut [FilterSpec],
    table: &SpecTable,
    config: &ResolverConfig,
) -> Result<ResolutionReport, SpecError> {
    let limit = config.pass_limit(table.len());
    for pass in 1..=limit {
        let mut changed = 0usize;
        for spec in specs.iter_mut() {
            if spec.resolve_references(table)? {
                changed += 1;
            }
        }
        tracing::debug!(pass, changed, "resolution pass");
        if changed == 0 {
            return Ok(ResolutionReport { passes: pass, converged: true });
        }
    }
    tracing::warn!(limit, "resolution stopped before reaching a fixed point");
    Ok(ResolutionReport { passes: limit, converged: false })
}

pub fn resolve_spec(
    spec: &mut FilterSpec,
    table: &SpecTable,
    config: &ResolverConfig,
) -> Result<ResolutionReport, SpecError> {
    resolve_specs(std::slice::from_mut(spec), table, config)
}
