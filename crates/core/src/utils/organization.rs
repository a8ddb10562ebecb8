use super::ScriptUtils;
use crate::constants::ORGANIZATION_UTILS;
use crate::context::TransformerContext;
use crate::metadata::ResourceSystem;
use crate::store::{OrganizationUnitRepository, RemoteFhirRepository};
use crate::{TransformerError, TransformerResult};
use fhir::{Bundle, FhirResource, FhirResourceType, Reference};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const ORGANIZATION: FhirResourceType = FhirResourceType::Organization;

/// FHIR organizations and the DHIS2 organization units they stand for.
pub struct OrganizationUtils {
    organization_units: Arc<dyn OrganizationUnitRepository>,
    remote: Arc<dyn RemoteFhirRepository>,
}

impl OrganizationUtils {
    pub fn new(
        organization_units: Arc<dyn OrganizationUnitRepository>,
        remote: Arc<dyn RemoteFhirRepository>,
    ) -> Self {
        Self {
            organization_units,
            remote,
        }
    }

    /// True if an organization unit with the code exists.
    pub fn exists(&self, code: Option<&str>) -> TransformerResult<bool> {
        let Some(code) = code else {
            return Ok(false);
        };
        let reference =
            dhis::Reference::code(code).map_err(|err| TransformerError::Mapping(err.to_string()))?;
        Ok(self.organization_units.find_by_reference(&reference)?.is_some())
    }

    /// The code with the organization code prefix, if an organization unit with it exists.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if no system is configured for organizations.
    pub fn exists_with_prefix(
        &self,
        context: &TransformerContext,
        code: Option<&str>,
    ) -> TransformerResult<Option<String>> {
        let Some(code) = code else {
            return Ok(None);
        };
        let prefixed = organization_system(context)?.prefixed(code);
        Ok(self.exists(Some(&prefixed))?.then_some(prefixed))
    }

    /// The organization unit code of an organization: its identifier under the organization
    /// system with the configured prefix.
    pub fn get_organization_unit_code(
        &self,
        context: &TransformerContext,
        resource: Option<&Arc<FhirResource>>,
    ) -> TransformerResult<Option<String>> {
        let Some(resource) = resource else {
            return Ok(None);
        };
        let system = organization_system(context)?;
        Ok(resource
            .identifiers()?
            .into_iter()
            .find(|identifier| identifier.system.as_deref() == Some(system.system.as_str()))
            .and_then(|identifier| identifier.value)
            .map(|value| system.prefixed(&value)))
    }

    /// The organization a reference points to followed by its parents up to the root.
    ///
    /// Parents that are not available in memory are fetched together with their own parents from
    /// the FHIR client of the request. A parent that is already part of the hierarchy ends it.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Data`] if a reference is local without a contained resource,
    /// refers to another type or has no id, or if the hierarchy exceeds the configured depth.
    pub fn find_hierarchy(
        &self,
        context: &TransformerContext,
        child: Option<&Reference>,
    ) -> TransformerResult<Option<Vec<Arc<FhirResource>>>> {
        let max_depth = context.config().hierarchy_max_depth();
        let mut hierarchy: Vec<Arc<FhirResource>> = Vec::new();
        let mut visited = HashSet::new();
        // parent links are weak, fetched bundles must outlive the walk
        let mut bundles: Vec<Bundle> = Vec::new();
        let mut current = child.cloned();

        while let Some(reference) = current.take() {
            let resource = match reference.resource() {
                Some(resource) => Arc::clone(resource),
                None => {
                    let Some((resource, bundle)) = self.fetch(context, &reference)? else {
                        break;
                    };
                    bundles.push(bundle);
                    resource
                }
            };
            if !visited.insert(Arc::as_ptr(&resource) as usize) {
                debug!(id = ?resource.id(), "Organization hierarchy contains a loop");
                break;
            }
            if hierarchy.len() == max_depth {
                return Err(TransformerError::Data(format!(
                    "Organization hierarchy exceeds the maximum depth of {max_depth}."
                )));
            }
            current = resource.parent_reference()?;
            hierarchy.push(resource);
        }
        Ok((!hierarchy.is_empty()).then_some(hierarchy))
    }

    fn fetch(
        &self,
        context: &TransformerContext,
        reference: &Reference,
    ) -> TransformerResult<Option<(Arc<FhirResource>, Bundle)>> {
        if reference.is_empty() {
            return Ok(None);
        }
        let id = reference.reference_element();
        if id.is_local() {
            return Err(TransformerError::Data(format!(
                "Reference element refers to a contained resource, but no resource is specified: {id}"
            )));
        }
        if id
            .resource_type()
            .is_some_and(|t| t != ORGANIZATION.resource_type_name())
        {
            return Err(TransformerError::Data(format!(
                "Reference element does not refer to a FHIR Organization: {id}"
            )));
        }
        let id_part = id.id_part().ok_or_else(|| {
            TransformerError::Data(format!(
                "Reference element does not include an ID part: {id}"
            ))
        })?;
        let client_id = context.request().fhir_client_id().ok_or_else(|| {
            TransformerError::Mapping(
                "FHIR client cannot be created without having a remote request.".into(),
            )
        })?;
        let search_param = ORGANIZATION.parent_search_param().unwrap_or("organizationPartOf");

        debug!(id = id_part, %client_id, "Fetching organization hierarchy");
        let bundle = self
            .remote
            .find_with_parents(client_id, ORGANIZATION, id_part, search_param)?;
        bundle.link_parents()?;
        let found = bundle
            .find(ORGANIZATION.resource_type_name(), id_part)
            .cloned();
        Ok(found.map(|resource| (resource, bundle)))
    }
}

fn organization_system(context: &TransformerContext) -> TransformerResult<&ResourceSystem> {
    context.resource_system(ORGANIZATION).ok_or_else(|| {
        TransformerError::Mapping(format!(
            "No system has been defined for resource type {ORGANIZATION}."
        ))
    })
}

impl ScriptUtils for OrganizationUtils {
    fn name(&self) -> &'static str {
        ORGANIZATION_UTILS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FhirRequest;
    use crate::memory::{BundleRemoteRepository, InMemoryDhisStore};
    use crate::test_support::{config, fhir_resource, organization_unit};
    use fhir::FhirVersion;
    use uuid::Uuid;

    const ORG_SYSTEM: &str = "http://example.org/org-codes";

    fn organization(id: &str, part_of: Option<&str>) -> Arc<FhirResource> {
        let part_of = part_of
            .map(|p| format!(r#", "partOf": {{"reference": "Organization/{p}"}}"#))
            .unwrap_or_default();
        fhir_resource(&format!(
            r#"{{"resourceType": "Organization", "id": "{id}",
                "identifier": [{{"system": "{ORG_SYSTEM}", "value": "{id}"}}]{part_of}}}"#
        ))
    }

    fn remote(client_id: Uuid, resources: Vec<Arc<FhirResource>>) -> Arc<BundleRemoteRepository> {
        let remote = BundleRemoteRepository::default();
        remote.add(client_id, Bundle::new(resources));
        Arc::new(remote)
    }

    fn context(client_id: Uuid) -> TransformerContext {
        let mut system = ResourceSystem::new(ORGANIZATION, ORG_SYSTEM);
        system.code_prefix = Some("OU_".into());
        TransformerContext::new(
            FhirRequest::new(FhirVersion::R4)
                .with_fhir_client(client_id)
                .with_resource_systems([system]),
            config(),
        )
    }

    fn ids(hierarchy: &[Arc<FhirResource>]) -> Vec<&str> {
        hierarchy.iter().filter_map(|r| r.id()).collect()
    }

    #[test]
    fn fetches_missing_parents_from_remote() {
        let client_id = Uuid::new_v4();
        let utils = OrganizationUtils::new(
            Arc::new(InMemoryDhisStore::default()),
            remote(
                client_id,
                vec![organization("a", Some("b")), organization("b", Some("c")), organization("c", None)],
            ),
        );
        let hierarchy = utils
            .find_hierarchy(&context(client_id), Some(&Reference::new("Organization/a")))
            .expect("hierarchy")
            .expect("found");
        assert_eq!(ids(&hierarchy), vec!["a", "b", "c"]);
    }

    #[test]
    fn cyclic_hierarchy_terminates() {
        let client_id = Uuid::new_v4();
        let utils = OrganizationUtils::new(
            Arc::new(InMemoryDhisStore::default()),
            remote(client_id, vec![organization("a", Some("b")), organization("b", Some("a"))]),
        );
        let hierarchy = utils
            .find_hierarchy(&context(client_id), Some(&Reference::new("Organization/a")))
            .expect("hierarchy")
            .expect("found");
        assert_eq!(ids(&hierarchy), vec!["a", "b"]);
    }

    #[test]
    fn embedded_child_comes_first() {
        let client_id = Uuid::new_v4();
        let utils = OrganizationUtils::new(
            Arc::new(InMemoryDhisStore::default()),
            remote(client_id, vec![organization("b", None)]),
        );
        let child = organization("a", Some("b"));
        let hierarchy = utils
            .find_hierarchy(&context(client_id), Some(&Reference::to_resource(&child)))
            .expect("hierarchy")
            .expect("found");
        assert!(FhirResource::same(&hierarchy[0], &child));
        assert_eq!(ids(&hierarchy), vec!["a", "b"]);
        assert!(utils
            .find_hierarchy(&context(client_id), None)
            .expect("no child")
            .is_none());
    }

    #[test]
    fn invalid_references_are_data_errors() {
        let client_id = Uuid::new_v4();
        let utils = OrganizationUtils::new(
            Arc::new(InMemoryDhisStore::default()),
            remote(client_id, Vec::new()),
        );
        let context = context(client_id);
        match utils.find_hierarchy(&context, Some(&Reference::new("Location/l1"))) {
            Err(TransformerError::Data(msg)) => assert!(msg.contains("FHIR Organization")),
            other => panic!("expected Data, got {other:?}"),
        }
        match utils.find_hierarchy(&context, Some(&Reference::new("#local"))) {
            Err(TransformerError::Data(msg)) => assert!(msg.contains("contained resource")),
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn organization_unit_codes_use_the_prefix() {
        let client_id = Uuid::new_v4();
        let store = InMemoryDhisStore::default();
        store.add_organization_unit(organization_unit("OuClinic001", "OU_a", None));
        let utils = OrganizationUtils::new(Arc::new(store), remote(client_id, Vec::new()));
        let context = context(client_id);

        assert!(utils.exists(Some("OU_a")).expect("lookup"));
        assert!(!utils.exists(None).expect("no code"));
        assert_eq!(
            utils.exists_with_prefix(&context, Some("a")).expect("lookup").as_deref(),
            Some("OU_a")
        );
        assert_eq!(utils.exists_with_prefix(&context, Some("b")).expect("lookup"), None);
        assert_eq!(
            utils
                .get_organization_unit_code(&context, Some(&organization("a", None)))
                .expect("code")
                .as_deref(),
            Some("OU_a")
        );
    }
}
