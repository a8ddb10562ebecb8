use super::{ReferenceUtils, ScriptUtils};
use crate::constants::IDENTIFIER_UTILS;
use crate::context::TransformerContext;
use crate::{TransformerError, TransformerResult};
use fhir::{FhirResource, FhirResourceType, Reference};
use std::any::Any;
use std::sync::Arc;

/// Business identifiers of FHIR resources.
pub struct IdentifierUtils {
    references: Arc<ReferenceUtils>,
}

impl IdentifierUtils {
    pub fn new(references: Arc<ReferenceUtils>) -> Self {
        Self { references }
    }

    /// The identifier of `resource` under the system configured for `resource_type`.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if no system is configured for the type.
    pub fn get_resource_identifier(
        &self,
        context: &TransformerContext,
        resource: Option<&Arc<FhirResource>>,
        resource_type: FhirResourceType,
    ) -> TransformerResult<Option<String>> {
        if resource.is_none() {
            return Ok(None);
        }
        let system = configured_system(context, resource_type)?;
        self.get_resource_identifier_with_system(resource, resource_type, Some(system))
    }

    /// The value of the first identifier of `resource` whose system equals `system`.
    ///
    /// Returns none if the resource is of another type.
    pub fn get_resource_identifier_with_system(
        &self,
        resource: Option<&Arc<FhirResource>>,
        resource_type: FhirResourceType,
        system: Option<&str>,
    ) -> TransformerResult<Option<String>> {
        let resource = resource.ok_or_else(|| {
            TransformerError::Mapping("Cannot get identifier of undefined domain resource.".into())
        })?;
        if resource.resource_type() != Some(resource_type) {
            return Ok(None);
        }
        Ok(resource
            .identifiers()?
            .into_iter()
            .find(|identifier| identifier.system.as_deref() == system)
            .and_then(|identifier| identifier.value))
    }

    /// The identifier of the resource `reference` points to, under the configured system.
    pub fn get_reference_identifier(
        &self,
        context: &TransformerContext,
        reference: &mut Reference,
        resource_type: FhirResourceType,
    ) -> TransformerResult<Option<String>> {
        if reference.is_empty() {
            return Ok(None);
        }
        let system = configured_system(context, resource_type)?.to_owned();
        self.get_reference_identifier_with_system(context, reference, resource_type, Some(&system))
    }

    pub fn get_reference_identifier_with_system(
        &self,
        context: &TransformerContext,
        reference: &mut Reference,
        resource_type: FhirResourceType,
        system: Option<&str>,
    ) -> TransformerResult<Option<String>> {
        if reference.is_empty() {
            return Ok(None);
        }
        let resource = self
            .references
            .get_resource(context, reference, Some(resource_type))?;
        match resource {
            Some(resource) => {
                self.get_resource_identifier_with_system(Some(&resource), resource_type, system)
            }
            None => Ok(None),
        }
    }
}

fn configured_system(
    context: &TransformerContext,
    resource_type: FhirResourceType,
) -> TransformerResult<&str> {
    context
        .resource_system(resource_type)
        .map(|rs| rs.system.as_str())
        .ok_or_else(|| {
            TransformerError::Mapping(format!(
                "No system has been defined for resource type {resource_type}."
            ))
        })
}

impl ScriptUtils for IdentifierUtils {
    fn name(&self) -> &'static str {
        IDENTIFIER_UTILS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FhirRequest;
    use crate::memory::BundleRemoteRepository;
    use crate::metadata::ResourceSystem;
    use crate::test_support::{config, fhir_resource};
    use fhir::FhirVersion;

    const NATIONAL_ID: &str = "http://example.org/national-id";

    fn utils() -> IdentifierUtils {
        IdentifierUtils::new(Arc::new(ReferenceUtils::new(Arc::new(
            BundleRemoteRepository::default(),
        ))))
    }

    fn context() -> TransformerContext {
        TransformerContext::new(
            FhirRequest::new(FhirVersion::R4).with_resource_systems([ResourceSystem::new(
                FhirResourceType::Patient,
                NATIONAL_ID,
            )]),
            config(),
        )
    }

    fn patient() -> Arc<FhirResource> {
        fhir_resource(
            r#"{"resourceType": "Patient", "id": "p1", "identifier": [
                {"system": "http://example.org/mrn", "value": "M-1"},
                {"system": "http://example.org/national-id", "value": "12345"}]}"#,
        )
    }

    #[test]
    fn reads_identifier_under_configured_system() {
        let context = context();
        let utils = utils();
        let patient = patient();
        assert_eq!(
            utils
                .get_resource_identifier(&context, Some(&patient), FhirResourceType::Patient)
                .expect("identifier")
                .as_deref(),
            Some("12345")
        );
        assert_eq!(
            utils
                .get_resource_identifier_with_system(
                    Some(&patient),
                    FhirResourceType::Patient,
                    Some("http://example.org/mrn")
                )
                .expect("identifier")
                .as_deref(),
            Some("M-1")
        );
        assert!(utils
            .get_resource_identifier(&context, None, FhirResourceType::Patient)
            .expect("no resource")
            .is_none());
    }

    #[test]
    fn other_resource_type_has_no_identifier() {
        let context = context();
        let utils = utils();
        let err = utils
            .get_resource_identifier(&context, Some(&patient()), FhirResourceType::Practitioner)
            .expect_err("no system for practitioners");
        match err {
            TransformerError::Mapping(msg) => assert!(msg.contains("Practitioner")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        assert!(utils
            .get_resource_identifier_with_system(
                Some(&patient()),
                FhirResourceType::Practitioner,
                Some(NATIONAL_ID)
            )
            .expect("type mismatch")
            .is_none());
    }

    #[test]
    fn reads_identifier_of_embedded_reference_target() {
        let context = context();
        let mut reference = Reference::to_resource(&patient());
        assert_eq!(
            utils()
                .get_reference_identifier(&context, &mut reference, FhirResourceType::Patient)
                .expect("identifier")
                .as_deref(),
            Some("12345")
        );
        assert!(utils()
            .get_reference_identifier(&context, &mut Reference::default(), FhirResourceType::Patient)
            .expect("empty")
            .is_none());
    }
}
