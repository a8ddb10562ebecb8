//! Remote FHIR endpoints and their per resource type subscriptions.

use crate::constants::AUTO_CREATED_DESCRIPTION_PREFIX;
use chrono::{DateTime, Utc};
use fhir::{FhirResourceType, FhirVersion};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Polling cursor of one client resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceUpdate {
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FhirClientResource {
    pub id: Uuid,
    pub fhir_resource_type: FhirResourceType,
    pub criteria_parameters: Option<String>,
    pub description: Option<String>,
    /// Resources of this type are only read as part of other resources.
    pub virtual_resource: bool,
    pub exp_only: bool,
    pub resource_update: ResourceUpdate,
}

impl FhirClientResource {
    /// A subscription created on behalf of the owning client.
    pub fn auto_created(fhir_resource_type: FhirResourceType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            fhir_resource_type,
            criteria_parameters: None,
            description: Some(format!(
                "{AUTO_CREATED_DESCRIPTION_PREFIX} {}.",
                fhir_resource_type.resource_type_name()
            )),
            virtual_resource: false,
            exp_only: false,
            resource_update: ResourceUpdate { last_updated: now },
        }
    }
}

/// A remote FHIR endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FhirClient {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub enabled: bool,
    pub fhir_version: FhirVersion,
    pub tolerance_millis: u64,
    pub remote_sync_enabled: bool,
    pub resources: Vec<FhirClientResource>,
    /// Resource types that get a subscription when the client is saved.
    pub auto_created_resource_types: BTreeSet<FhirResourceType>,
    /// System URIs of the identifier systems this client uses, by resource type.
    pub systems: Vec<(FhirResourceType, String)>,
}

impl FhirClient {
    pub fn resource(&self, id: Uuid) -> Option<&FhirClientResource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn has_resource_type(&self, fhir_resource_type: FhirResourceType) -> bool {
        self.resources
            .iter()
            .any(|r| r.fhir_resource_type == fhir_resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_created_resource_describes_its_type() {
        let now = Utc::now();
        let resource = FhirClientResource::auto_created(FhirResourceType::Observation, now);
        assert_eq!(
            resource.description.as_deref(),
            Some("Automatically created subscription for FHIR Resource Observation.")
        );
        assert_eq!(resource.resource_update.last_updated, now);
        assert!(!resource.virtual_resource);
    }
}
