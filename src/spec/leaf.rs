use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{display_id, FilterSpecMetaData};
use crate::filter::{FilterError, FilterParams, InputFilter};
use crate::registry::{FilterFactory, FilterRegistry};

/// Names one registered filter implementation and its configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafFilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta_data: Option<FilterSpecMetaData>,
    #[serde(rename = "className", default, skip_serializing_if = "Option::is_none")]
    implementation_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<FilterParams>,
    /// Factory from the first successful lookup, tagged with the generation
    /// of the registry it came from. Other registries are always consulted.
    #[serde(skip)]
    factory: OnceCell<(u64, FilterFactory)>,
}

impl LeafFilterSpec {
    /// Anonymous leaf, cannot be referenced.
    pub fn new(implementation_key: impl Into<String>, params: FilterParams) -> Self {
        Self {
            implementation_key: Some(implementation_key.into()),
            params: Some(params),
            ..Self::default()
        }
    }

    pub fn with_id(
        id: impl Into<String>,
        meta_data: Option<FilterSpecMetaData>,
        implementation_key: impl Into<String>,
        params: FilterParams,
    ) -> Self {
        Self {
            id: Some(id.into()),
            meta_data,
            implementation_key: Some(implementation_key.into()),
            params: Some(params),
            factory: OnceCell::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn meta_data(&self) -> Option<&FilterSpecMetaData> {
        self.meta_data.as_ref()
    }

    pub fn implementation_key(&self) -> Option<&str> {
        self.implementation_key.as_deref()
    }

    pub fn params(&self) -> Option<&FilterParams> {
        self.params.as_ref()
    }

    pub(crate) fn build(&self, registry: &FilterRegistry) -> Result<Box<dyn InputFilter>, FilterError> {
        let key = self
            .implementation_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| FilterError::MissingImplementationKey {
                spec: display_id(self.id()).to_string(),
            })?;
        let factory = match self.factory.get() {
            Some(&(generation, factory)) if generation == registry.generation() => factory,
            _ => {
                let factory = registry
                    .factory(key)
                    .ok_or_else(|| FilterError::UnknownFilter(key.to_string()))?;
                // a racing build may have filled the cell first; either entry is valid
                let _ = self.factory.set((registry.generation(), factory));
                factory
            }
        };
        let params = self.params.as_ref().ok_or_else(|| FilterError::MissingParams {
            spec: display_id(self.id()).to_string(),
        })?;

        let mut filter = factory();
        filter.init(params)?;
        tracing::debug!(key, spec = display_id(self.id()), "built leaf filter");
        Ok(filter)
    }
}

impl PartialEq for LeafFilterSpec {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.meta_data == other.meta_data
            && self.implementation_key == other.implementation_key
            && self.params == other.params
    }
}
