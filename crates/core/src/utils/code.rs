use super::ScriptUtils;
use crate::cache::{ReadThroughCache, ReplaceOnMissCache};
use crate::constants::CODE_UTILS;
use crate::context::TransformerContext;
use crate::metadata::SystemCode;
use crate::store::CodeStore;
use crate::{TransformerError, TransformerResult};
use fhir::{CodeableConcept, FhirResource, FhirResourceType, SystemCodeValue};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

/// The element that holds the code of a resource of the given type.
fn code_element(resource_type: FhirResourceType) -> Option<&'static str> {
    match resource_type {
        FhirResourceType::Immunization => Some("vaccineCode"),
        FhirResourceType::MedicationRequest => Some("medicationCodeableConcept"),
        FhirResourceType::Condition
        | FhirResourceType::DiagnosticReport
        | FhirResourceType::Observation => Some("code"),
        _ => None,
    }
}

/// Codes of FHIR resources and their mapping to adapter and DHIS2 codes.
pub struct CodeUtils {
    store: Arc<dyn CodeStore>,
    code_elements: ReplaceOnMissCache<String, Option<&'static str>>,
    mapped_codes: ReadThroughCache<String, Option<SystemCode>>,
}

impl CodeUtils {
    pub fn new(store: Arc<dyn CodeStore>) -> Self {
        Self {
            store,
            code_elements: ReplaceOnMissCache::new(),
            mapped_codes: ReadThroughCache::new(),
        }
    }

    /// All codes of the resource's code element. Resource types without one have no codes.
    pub fn get_resource_codes(
        &self,
        resource: &FhirResource,
    ) -> TransformerResult<Vec<SystemCodeValue>> {
        let element = self
            .code_elements
            .get_or_insert_with(&resource.resource_type_name().to_owned(), || {
                resource.resource_type().and_then(code_element)
            });
        let Some(element) = element else {
            return Ok(Vec::new());
        };
        Ok(resource
            .codeable_concept(element)?
            .map(|concept| concept.system_code_values())
            .unwrap_or_default())
    }

    /// The DHIS2 code of a code of the resource type's system.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if no system is configured for the type.
    pub fn get_mapped_code(
        &self,
        context: &TransformerContext,
        code: Option<&str>,
        resource_type: FhirResourceType,
    ) -> TransformerResult<Option<String>> {
        let Some(code) = code else {
            return Ok(None);
        };
        let resource_system = context.resource_system(resource_type).ok_or_else(|| {
            TransformerError::Mapping(format!(
                "No system has been defined for resource type {resource_type}."
            ))
        })?;
        let value = SystemCodeValue::new(&resource_system.system, code)
            .map_err(|err| TransformerError::Mapping(err.to_string()))?;
        let system_code = self
            .mapped_codes
            .get_or_load(&value.to_string(), || self.store.find_system_code(&value))?;
        Ok(system_code.map(|sc| sc.effective_code().to_owned()))
    }

    /// Drops all cached code mappings.
    pub fn evict_all(&self) {
        self.mapped_codes.evict_all();
    }

    /// The mapped code of the first coding of `concept` that belongs to the code set.
    pub fn get_mapped_value_set_code(
        &self,
        code_set_code: &str,
        concept: Option<&CodeableConcept>,
    ) -> TransformerResult<Option<String>> {
        let Some(concept) = concept else {
            return Ok(None);
        };
        let code_set = self.store.find_code_set(code_set_code)?.ok_or_else(|| {
            TransformerError::Mapping(format!("Code set {code_set_code} does not exist."))
        })?;
        for value in concept.system_code_values() {
            if let Some(system_code) = self.store.find_system_code(&value)? {
                if code_set.contains(&system_code.code) {
                    if let Some(mapped) = system_code.mapped_code {
                        return Ok(Some(mapped));
                    }
                }
            }
        }
        Ok(None)
    }

    pub fn contains_code(&self, concept: Option<&CodeableConcept>, system: &str, code: &str) -> bool {
        concept.is_some_and(|c| c.contains(system, code))
    }

    pub fn contains_any_code(
        &self,
        concepts: &[CodeableConcept],
        values: &[SystemCodeValue],
    ) -> bool {
        concepts.iter().any(|concept| {
            values
                .iter()
                .any(|value| concept.contains(value.system(), value.code()))
        })
    }

    /// System code values per mapping code, in the order of `mapping_codes`.
    ///
    /// A system code belongs to a mapping code if its adapter code or mapped code equals it.
    pub fn get_system_code_values_by_mapping_codes(
        &self,
        mapping_codes: &[String],
    ) -> TransformerResult<Vec<(String, Vec<SystemCodeValue>)>> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = mapping_codes
            .iter()
            .filter(|code| seen.insert(code.as_str()))
            .cloned()
            .collect();
        let system_codes = self.store.find_by_mapping_codes(&unique)?;

        unique
            .into_iter()
            .map(|mapping_code| {
                let values = system_codes
                    .iter()
                    .filter(|sc| {
                        sc.code == mapping_code || sc.mapped_code.as_deref() == Some(&mapping_code)
                    })
                    .map(|sc| {
                        SystemCodeValue::new(&sc.system_uri, &sc.system_code)
                            .map_err(|err| TransformerError::Metadata(err.to_string()))
                    })
                    .collect::<TransformerResult<Vec<_>>>()?;
                Ok((mapping_code, values))
            })
            .collect()
    }

    /// The first code of `concept` under `system`, or any first code if no system is given.
    pub fn get_code(&self, concept: Option<&CodeableConcept>, system: Option<&str>) -> Option<String> {
        let concept = concept?;
        match system {
            Some(system) => concept.code_for_system(system).map(str::to_owned),
            None => concept.codings.iter().find_map(|c| c.code.clone()),
        }
    }
}

impl ScriptUtils for CodeUtils {
    fn name(&self) -> &'static str {
        CODE_UTILS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FhirRequest;
    use crate::memory::InMemoryMetadataStore;
    use crate::metadata::{CodeSet, CodeSetValue, Metadata, ResourceSystem};
    use crate::test_support::{config, fhir_resource, system_code};
    use fhir::FhirVersion;

    const LOINC: &str = "http://loinc.org";
    const CVX: &str = "http://hl7.org/fhir/sid/cvx";

    fn utils() -> CodeUtils {
        let metadata = Metadata {
            system_codes: vec![
                system_code(LOINC, "8302-2", "BODY_HEIGHT", Some("DE_HEIGHT")),
                system_code(CVX, "20", "VACCINE_DTAP", Some("DTAP")),
                system_code(CVX, "146", "VACCINE_DTAP_HEP_B", None),
            ],
            code_sets: vec![Arc::new(CodeSet {
                code: "ALL_DTAP".into(),
                name: "All DTaP".into(),
                codes: vec![
                    CodeSetValue {
                        code: "VACCINE_DTAP".into(),
                        enabled: true,
                    },
                    CodeSetValue {
                        code: "VACCINE_DTAP_HEP_B".into(),
                        enabled: true,
                    },
                ],
            })],
            ..Metadata::default()
        };
        CodeUtils::new(Arc::new(InMemoryMetadataStore::new(metadata)))
    }

    fn concept(system: &str, code: &str) -> CodeableConcept {
        CodeableConcept::from_json(&serde_json::json!({
            "coding": [{"system": system, "code": code}]
        }))
        .expect("concept")
    }

    #[test]
    fn resource_codes_come_from_the_type_specific_element() {
        let utils = utils();
        let immunization = fhir_resource(
            r#"{"resourceType": "Immunization", "id": "i1",
                "vaccineCode": {"coding": [{"system": "http://hl7.org/fhir/sid/cvx", "code": "20"}]}}"#,
        );
        let codes = utils.get_resource_codes(&immunization).expect("codes");
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].code(), "20");

        let patient = fhir_resource(r#"{"resourceType": "Patient", "id": "p1"}"#);
        assert!(utils.get_resource_codes(&patient).expect("no codes").is_empty());
    }

    #[test]
    fn mapped_code_uses_the_resource_system() {
        let utils = utils();
        let context = TransformerContext::new(
            FhirRequest::new(FhirVersion::R4)
                .with_resource_systems([ResourceSystem::new(FhirResourceType::Observation, LOINC)]),
            config(),
        );
        assert_eq!(
            utils
                .get_mapped_code(&context, Some("8302-2"), FhirResourceType::Observation)
                .expect("mapped")
                .as_deref(),
            Some("DE_HEIGHT")
        );
        assert!(utils
            .get_mapped_code(&context, Some("0000-0"), FhirResourceType::Observation)
            .expect("unknown code")
            .is_none());
        match utils.get_mapped_code(&context, Some("20"), FhirResourceType::Immunization) {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("Immunization")),
            other => panic!("expected Mapping, got {other:?}"),
        }
    }

    #[test]
    fn value_set_code_is_first_mapped_member() {
        let utils = utils();
        let mut both = concept(CVX, "146");
        both.codings.extend(concept(CVX, "20").codings);
        assert_eq!(
            utils
                .get_mapped_value_set_code("ALL_DTAP", Some(&both))
                .expect("mapped")
                .as_deref(),
            Some("DTAP")
        );
        assert!(utils
            .get_mapped_value_set_code("ALL_DTAP", Some(&concept(LOINC, "8302-2")))
            .expect("not a member")
            .is_none());
    }

    #[test]
    fn system_code_values_keep_mapping_code_order() {
        let utils = utils();
        let result = utils
            .get_system_code_values_by_mapping_codes(&[
                "DTAP".into(),
                "BODY_HEIGHT".into(),
                "DTAP".into(),
                "UNKNOWN".into(),
            ])
            .expect("values");
        let codes: Vec<_> = result.iter().map(|(code, _)| code.as_str()).collect();
        assert_eq!(codes, vec!["DTAP", "BODY_HEIGHT", "UNKNOWN"]);
        assert_eq!(result[0].1[0].to_string(), "http://hl7.org/fhir/sid/cvx|20");
        assert!(result[2].1.is_empty());
    }

    #[test]
    fn concept_helpers() {
        let utils = utils();
        let height = concept(LOINC, "8302-2");
        assert!(utils.contains_code(Some(&height), LOINC, "8302-2"));
        assert!(!utils.contains_code(None, LOINC, "8302-2"));
        let value = SystemCodeValue::new(LOINC, "8302-2").expect("value");
        assert!(utils.contains_any_code(&[concept(CVX, "20"), height.clone()], &[value]));
        assert_eq!(utils.get_code(Some(&height), Some(LOINC)).as_deref(), Some("8302-2"));
        assert_eq!(utils.get_code(Some(&height), Some(CVX)), None);
        assert_eq!(utils.get_code(Some(&height), None).as_deref(), Some("8302-2"));
    }
}
