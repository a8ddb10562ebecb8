use super::{ReferenceUtils, ScriptUtils};
use crate::constants::FHIR_RESOURCE_UTILS;
use crate::context::TransformerContext;
use crate::store::CodeStore;
use crate::{TransformerError, TransformerResult};
use dhis::Reference as DhisReference;
use fhir::{FhirResource, FhirResourceType, Identifier, Reference, SystemCodeValue};
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

fn system_code_values(identifiers: &[Identifier]) -> Vec<SystemCodeValue> {
    identifiers
        .iter()
        .filter_map(Identifier::system_code_value)
        .collect()
}

fn dhis_reference(
    result: Result<DhisReference, dhis::DhisError>,
) -> TransformerResult<Option<DhisReference>> {
    result
        .map(Some)
        .map_err(|err| TransformerError::Data(err.to_string()))
}

/// Reconciles FHIR references with the identifiers the adapter can look up in DHIS2.
pub struct FhirResourceUtils {
    references: Arc<ReferenceUtils>,
    codes: Arc<dyn CodeStore>,
}

impl FhirResourceUtils {
    pub fn new(references: Arc<ReferenceUtils>, codes: Arc<dyn CodeStore>) -> Self {
        Self { references, codes }
    }

    /// A reference that carries enough identifiers to find the referenced resource in DHIS2.
    ///
    /// Identifiers are taken from the reference, or else from its embedded resource. In native id
    /// mode of the resource system the reference's id becomes an identifier of that system. Unless
    /// an identifier of the internal or the resource system is known, the code store is asked for
    /// identifiers of those systems that stand for the same codes. Returns none if the reference
    /// cannot be identified and neither the type nor the request uses DHIS2 ids.
    ///
    /// Results of references without an embedded resource are cached in the context.
    pub fn get_identified_reference(
        &self,
        context: &TransformerContext,
        reference: Option<&Reference>,
        resource_type: FhirResourceType,
    ) -> TransformerResult<Option<Reference>> {
        let Some(reference) = reference else {
            return Ok(None);
        };
        // embedded resources are not part of the key, local ids repeat across inputs
        let Some(key) = cache_key(reference) else {
            return self.identify(context, reference, resource_type);
        };
        let key = (resource_type, key);
        if let Some(cached) = context.cached_reference(&key) {
            return Ok(cached);
        }
        let identified = self.identify(context, reference, resource_type)?;
        context.cache_reference(key, identified.clone());
        Ok(identified)
    }

    fn identify(
        &self,
        context: &TransformerContext,
        reference: &Reference,
        resource_type: FhirResourceType,
    ) -> TransformerResult<Option<Reference>> {
        let internal_uri = context.config().internal_identifier_uri();
        let resource_system = context.resource_system(resource_type);
        let reference_element = reference.reference_element();

        let mut identifiers: Vec<SystemCodeValue> = reference
            .identifier()
            .and_then(Identifier::system_code_value)
            .into_iter()
            .collect();
        if identifiers.is_empty() {
            if let Some(resource) = reference.resource() {
                identifiers = system_code_values(&resource.identifiers()?);
            }
        }

        let mut reset_id_element = false;
        if let Some(rs) = resource_system.filter(|rs| rs.fhir_id) {
            if let (Some(id), false) = (reference_element.id_part(), reference_element.is_local()) {
                if identifiers.iter().all(|scv| scv.system() != rs.system) {
                    let value = SystemCodeValue::new(&rs.system, id)
                        .map_err(|err| TransformerError::Data(err.to_string()))?;
                    identifiers.push(value);
                    reset_id_element = true;
                }
            }
        }

        let sufficient = |identifiers: &[SystemCodeValue]| {
            identifiers.iter().any(|scv| {
                scv.system() == internal_uri
                    || resource_system.is_some_and(|rs| scv.system() == rs.system)
            })
        };
        let mut identified = sufficient(&identifiers);
        if !identifiers.is_empty() && !identified {
            let mut systems = vec![internal_uri.to_owned()];
            systems.extend(resource_system.map(|rs| rs.system.clone()));
            let values: Vec<String> = identifiers.iter().map(ToString::to_string).collect();
            identifiers = self
                .codes
                .find_by_systems_and_codes(&systems, &values)?
                .into_iter()
                .map(|sc| SystemCodeValue::new(&sc.system_uri, &sc.system_code))
                .collect::<Result<_, _>>()
                .map_err(|err| TransformerError::Metadata(err.to_string()))?;
            identified = sufficient(&identifiers);
        }

        if !(identified || resource_type.is_sync_dhis_id() || context.request().is_dhis_fhir_id()) {
            debug!(reference = %reference_element, "Reference cannot be identified");
            return Ok(None);
        }

        let id_element = match reference.resource() {
            Some(resource) => resource.id_element(),
            None => reference_element,
        };
        let mut result = Reference::default();
        if !reset_id_element {
            result.set_reference(id_element.value().map(str::to_owned));
        }
        let in_resource_system = identifiers
            .iter()
            .filter(|scv| resource_system.is_some_and(|rs| scv.system() == rs.system));
        let internal = identifiers.iter().filter(|scv| scv.system() == internal_uri);
        // later identifiers replace earlier ones, internal ones are applied last
        for value in in_resource_system.chain(internal) {
            result.set_identifier(Identifier::from(value));
        }
        Ok(Some(result))
    }

    /// The resource `reference` points to, reduced to its id and identifiers once identified.
    pub fn get_identified_resource(
        &self,
        context: &TransformerContext,
        reference: Option<&mut Reference>,
        resource_type: FhirResourceType,
    ) -> TransformerResult<Option<Arc<FhirResource>>> {
        let Some(reference) = reference else {
            return Ok(None);
        };
        match self.get_identified_reference(context, Some(&*reference), resource_type)? {
            Some(identified) => {
                let id_element = identified.reference_element();
                let identifiers: Vec<Identifier> = identified.identifier().cloned().into_iter().collect();
                Ok(Some(FhirResource::identified(
                    resource_type,
                    id_element.id_part(),
                    &identifiers,
                )))
            }
            None if context.request().is_dhis_fhir_id() => Ok(None),
            None => self
                .references
                .get_resource(context, reference, Some(resource_type)),
        }
    }

    /// The DHIS2 reference of the resource `reference` points to.
    ///
    /// A DHIS2 id wins if the reference carries one and ids are synchronised. Otherwise an
    /// identifier of the internal system gives an id reference and any other identifier a code
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Data`] if an identifier of the internal system does not hold a
    /// DHIS2 id.
    pub fn get_adapter_reference(
        &self,
        context: &TransformerContext,
        reference: Option<&Reference>,
        resource_type: FhirResourceType,
    ) -> TransformerResult<Option<DhisReference>> {
        let Some(identified) = self.get_identified_reference(context, reference, resource_type)? else {
            return Ok(None);
        };
        let id_element = identified.reference_element();
        match id_element.id_part() {
            Some(id)
                if !id_element.is_local()
                    && (resource_type.is_sync_dhis_id() || context.request().is_dhis_fhir_id()) =>
            {
                match context.extract_dhis_id(Some(id)) {
                    Some(dhis_id) => dhis_reference(DhisReference::id(dhis_id)),
                    None => Ok(None),
                }
            }
            _ => {
                let identifiers: Vec<SystemCodeValue> = identified
                    .identifier()
                    .and_then(Identifier::system_code_value)
                    .into_iter()
                    .collect();
                adapter_reference_of(context, &identifiers)
            }
        }
    }

    /// The DHIS2 reference of `resource`, see [`Self::get_adapter_reference`].
    pub fn get_resource_adapter_reference(
        &self,
        context: &TransformerContext,
        resource: Option<&Arc<FhirResource>>,
    ) -> TransformerResult<Option<DhisReference>> {
        let Some(resource) = resource else {
            return Ok(None);
        };
        let id_element = resource.id_element();
        match id_element.id_part() {
            Some(id) if !id_element.is_local() && context.request().is_dhis_fhir_id() => {
                match context.extract_dhis_id(Some(id)) {
                    Some(dhis_id) => dhis_reference(DhisReference::id(dhis_id)),
                    None => Ok(None),
                }
            }
            _ => adapter_reference_of(context, &system_code_values(&resource.identifiers()?)),
        }
    }
}

fn cache_key(reference: &Reference) -> Option<String> {
    if reference.resource().is_some() {
        return None;
    }
    let identifier = reference
        .identifier()
        .and_then(Identifier::system_code_value)
        .map(|scv| scv.to_string())
        .unwrap_or_default();
    Some(format!("{}#{identifier}", reference.reference_element()))
}

fn adapter_reference_of(
    context: &TransformerContext,
    identifiers: &[SystemCodeValue],
) -> TransformerResult<Option<DhisReference>> {
    let internal_uri = context.config().internal_identifier_uri();
    let mut result = None;
    for value in identifiers {
        if value.system() == internal_uri {
            let dhis_id = context.extract_dhis_id(Some(value.code())).ok_or_else(|| {
                TransformerError::Data(format!(
                    "Identifier {value} does not contain a DHIS2 ID."
                ))
            })?;
            return dhis_reference(DhisReference::id(dhis_id));
        }
        result = dhis_reference(DhisReference::code(value.code()))?;
    }
    Ok(result)
}

impl ScriptUtils for FhirResourceUtils {
    fn name(&self) -> &'static str {
        FHIR_RESOURCE_UTILS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_INTERNAL_IDENTIFIER_URI;
    use crate::context::FhirRequest;
    use crate::memory::{BundleRemoteRepository, InMemoryMetadataStore};
    use crate::metadata::{Metadata, ResourceSystem};
    use crate::test_support::{config, fhir_resource, system_code};
    use dhis::ReferenceType;
    use fhir::FhirVersion;

    const ORG_SYSTEM: &str = "http://example.org/org-codes";
    const LEGACY_SYSTEM: &str = "http://example.org/legacy-org";

    fn utils() -> FhirResourceUtils {
        let metadata = Metadata {
            system_codes: vec![
                system_code(LEGACY_SYSTEM, "L-17", "CLINIC_17", None),
                system_code(ORG_SYSTEM, "OU_17", "CLINIC_17", None),
            ],
            ..Metadata::default()
        };
        FhirResourceUtils::new(
            Arc::new(ReferenceUtils::new(Arc::new(BundleRemoteRepository::default()))),
            Arc::new(InMemoryMetadataStore::new(metadata)),
        )
    }

    fn context(fhir_id: bool) -> TransformerContext {
        let mut rs = ResourceSystem::new(FhirResourceType::Organization, ORG_SYSTEM);
        rs.fhir_id = fhir_id;
        TransformerContext::new(
            FhirRequest::new(FhirVersion::R4).with_resource_systems([rs]),
            config(),
        )
    }

    fn with_identifier(reference: &str, system: &str, value: &str) -> Reference {
        let mut reference = Reference::new(reference);
        reference.set_identifier(Identifier::new(Some(system), value));
        reference
    }

    #[test]
    fn native_id_becomes_identifier_and_is_dropped() {
        let context = context(true);
        let identified = utils()
            .get_identified_reference(
                &context,
                Some(&Reference::new("Organization/abc")),
                FhirResourceType::Organization,
            )
            .expect("resolved")
            .expect("identified");
        assert_eq!(identified.reference(), None);
        let identifier = identified.identifier().expect("identifier");
        assert_eq!(identifier.system.as_deref(), Some(ORG_SYSTEM));
        assert_eq!(identifier.value.as_deref(), Some("abc"));
    }

    #[test]
    fn identifier_of_other_system_is_broadened_through_code_store() {
        let context = context(false);
        let reference = with_identifier("Organization/o1", LEGACY_SYSTEM, "L-17");
        let utils = utils();
        let identified = utils
            .get_identified_reference(&context, Some(&reference), FhirResourceType::Organization)
            .expect("resolved")
            .expect("identified");
        assert_eq!(identified.reference(), Some("Organization/o1"));
        assert_eq!(
            identified.identifier().and_then(|i| i.value.as_deref()),
            Some("OU_17")
        );
        let again = utils
            .get_identified_reference(&context, Some(&reference), FhirResourceType::Organization)
            .expect("resolved");
        assert_eq!(again, Some(identified));
    }

    #[test]
    fn unidentifiable_reference_gives_none() {
        let context = context(false);
        let utils = utils();
        assert!(utils
            .get_identified_reference(
                &context,
                Some(&Reference::new("Organization/o1")),
                FhirResourceType::Organization
            )
            .expect("resolved")
            .is_none());
        let unknown = with_identifier("Organization/o2", LEGACY_SYSTEM, "L-99");
        assert!(utils
            .get_identified_reference(&context, Some(&unknown), FhirResourceType::Organization)
            .expect("resolved")
            .is_none());
    }

    #[test]
    fn internal_identifier_takes_precedence() {
        let context = context(false);
        let reference = Reference::to_resource(&fhir_resource(&format!(
            r#"{{"resourceType": "Organization", "id": "o1", "identifier": [
                {{"system": "{ORG_SYSTEM}", "value": "OU_17"}},
                {{"system": "{DEFAULT_INTERNAL_IDENTIFIER_URI}", "value": "Ab3xZ0kPq9W"}}]}}"#
        )));
        let utils = utils();
        let identified = utils
            .get_identified_reference(&context, Some(&reference), FhirResourceType::Organization)
            .expect("resolved")
            .expect("identified");
        assert_eq!(
            identified.identifier().and_then(|i| i.system.as_deref()),
            Some(DEFAULT_INTERNAL_IDENTIFIER_URI)
        );

        let adapter = utils
            .get_adapter_reference(&context, Some(&reference), FhirResourceType::Organization)
            .expect("resolved")
            .expect("reference");
        assert_eq!(adapter.reference_type(), ReferenceType::Id);
        assert_eq!(adapter.value(), "Ab3xZ0kPq9W");
    }

    #[test]
    fn contained_references_with_same_local_id_are_not_confused() {
        let context = context(false);
        let contained = |code: &str| {
            Reference::new("#o").with_resource(fhir_resource(&format!(
                r#"{{"resourceType": "Organization", "id": "o",
                    "identifier": [{{"system": "{ORG_SYSTEM}", "value": "{code}"}}]}}"#
            )))
        };
        let utils = utils();
        let value = |reference: &Reference| {
            utils
                .get_identified_reference(&context, Some(reference), FhirResourceType::Organization)
                .expect("resolved")
                .and_then(|r| r.identifier().and_then(|i| i.value.clone()))
        };
        assert_eq!(value(&contained("OU_A")).as_deref(), Some("OU_A"));
        assert_eq!(value(&contained("OU_B")).as_deref(), Some("OU_B"));
    }

    #[test]
    fn resource_adapter_reference_falls_back_to_code() {
        let context = context(false);
        let organization = fhir_resource(&format!(
            r#"{{"resourceType": "Organization", "id": "o1",
                "identifier": [{{"system": "{ORG_SYSTEM}", "value": "OU_17"}}]}}"#
        ));
        let adapter = utils()
            .get_resource_adapter_reference(&context, Some(&organization))
            .expect("resolved")
            .expect("reference");
        assert_eq!(adapter.reference_type(), ReferenceType::Code);
        assert_eq!(adapter.value(), "OU_17");
    }

    #[test]
    fn sync_types_use_dhis_ids() {
        let context = context(false);
        let adapter = utils()
            .get_adapter_reference(
                &context,
                Some(&Reference::new("Questionnaire/Ab3xZ0kPq9W")),
                FhirResourceType::Questionnaire,
            )
            .expect("resolved")
            .expect("reference");
        assert_eq!(adapter.reference_type(), ReferenceType::Id);
        assert_eq!(adapter.value(), "Ab3xZ0kPq9W");
    }
}
