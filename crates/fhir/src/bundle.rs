//! Search-result bundles.

use crate::resource::FhirResource;
use crate::{FhirError, FhirResult};
use serde_json::Value;
use std::sync::Arc;

/// The resources of a search-set bundle, in entry order.
#[derive(Clone, Debug, Default)]
pub struct Bundle {
    resources: Vec<Arc<FhirResource>>,
}

impl Bundle {
    pub fn new(resources: Vec<Arc<FhirResource>>) -> Self {
        Self { resources }
    }

    /// Reads `entry[].resource` from a `Bundle` resource. Entries without a resource are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if `json` is not a bundle or an entry resource is invalid.
    pub fn from_json(json: &Value) -> FhirResult<Self> {
        if json.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
            return Err(FhirError::InvalidInput(
                "expected resourceType 'Bundle'".into(),
            ));
        }
        let resources = json
            .get("entry")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("resource"))
                    .cloned()
                    .map(FhirResource::from_json)
                    .collect::<FhirResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        Ok(Self { resources })
    }

    pub fn parse(text: &str) -> FhirResult<Self> {
        Self::from_json(&serde_json::from_str(text)?)
    }

    pub fn resources(&self) -> &[Arc<FhirResource>] {
        &self.resources
    }

    pub fn into_resources(self) -> Vec<Arc<FhirResource>> {
        self.resources
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// The entry with the given type and id.
    pub fn find(&self, resource_type: &str, id: &str) -> Option<&Arc<FhirResource>> {
        self.resources
            .iter()
            .find(|r| r.resource_type_name() == resource_type && r.id() == Some(id))
    }

    /// Links every entry's parent reference to the bundle entry it names, if present.
    pub fn link_parents(&self) -> FhirResult<()> {
        for resource in &self.resources {
            let Some(element) = resource
                .resource_type()
                .and_then(|t| t.parent_element())
            else {
                continue;
            };
            let Some(parent) = resource.reference(element)? else {
                continue;
            };
            let parent_id = parent.reference_element();
            let target = match (parent_id.resource_type(), parent_id.id_part()) {
                (Some(t), Some(id)) => self.find(t, id),
                (None, Some(id)) => self.find(resource.resource_type_name(), id),
                _ => None,
            };
            if let Some(target) = target {
                resource.link(element, target);
            }
        }
        Ok(())
    }
}
