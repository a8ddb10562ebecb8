//! Supported FHIR versions and resource types.

use crate::{FhirError, FhirResult};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Public domain-level types
// ============================================================================

/// FHIR release a request or script is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FhirVersion {
    Dstu3,
    R4,
}

impl FhirVersion {
    pub const ALL: [FhirVersion; 2] = [FhirVersion::Dstu3, FhirVersion::R4];

    fn to_wire(self) -> &'static str {
        match self {
            FhirVersion::Dstu3 => "DSTU3",
            FhirVersion::R4 => "R4",
        }
    }
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_wire())
    }
}

impl FromStr for FhirVersion {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DSTU3" => Ok(FhirVersion::Dstu3),
            "R4" => Ok(FhirVersion::R4),
            other => Err(FhirError::InvalidInput(format!(
                "unsupported FHIR version '{other}'"
            ))),
        }
    }
}

/// The FHIR resource types the adapter can transform.
///
/// A lower [`order`](FhirResourceType::order) means the resource does not depend on resources
/// with a higher order and can be processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FhirResourceType {
    Condition,
    DiagnosticReport,
    Encounter,
    Immunization,
    Location,
    MedicationRequest,
    Observation,
    Organization,
    Patient,
    RelatedPerson,
    Practitioner,
    Measure,
    MeasureReport,
    PlanDefinition,
    Questionnaire,
    CarePlan,
    QuestionnaireResponse,
}

impl FhirResourceType {
    pub const ALL: [FhirResourceType; 17] = [
        FhirResourceType::Condition,
        FhirResourceType::DiagnosticReport,
        FhirResourceType::Encounter,
        FhirResourceType::Immunization,
        FhirResourceType::Location,
        FhirResourceType::MedicationRequest,
        FhirResourceType::Observation,
        FhirResourceType::Organization,
        FhirResourceType::Patient,
        FhirResourceType::RelatedPerson,
        FhirResourceType::Practitioner,
        FhirResourceType::Measure,
        FhirResourceType::MeasureReport,
        FhirResourceType::PlanDefinition,
        FhirResourceType::Questionnaire,
        FhirResourceType::CarePlan,
        FhirResourceType::QuestionnaireResponse,
    ];

    /// The `resourceType` value used on the wire.
    pub fn resource_type_name(self) -> &'static str {
        match self {
            FhirResourceType::Condition => "Condition",
            FhirResourceType::DiagnosticReport => "DiagnosticReport",
            FhirResourceType::Encounter => "Encounter",
            FhirResourceType::Immunization => "Immunization",
            FhirResourceType::Location => "Location",
            FhirResourceType::MedicationRequest => "MedicationRequest",
            FhirResourceType::Observation => "Observation",
            FhirResourceType::Organization => "Organization",
            FhirResourceType::Patient => "Patient",
            FhirResourceType::RelatedPerson => "RelatedPerson",
            FhirResourceType::Practitioner => "Practitioner",
            FhirResourceType::Measure => "Measure",
            FhirResourceType::MeasureReport => "MeasureReport",
            FhirResourceType::PlanDefinition => "PlanDefinition",
            FhirResourceType::Questionnaire => "Questionnaire",
            FhirResourceType::CarePlan => "CarePlan",
            FhirResourceType::QuestionnaireResponse => "QuestionnaireResponse",
        }
    }

    /// Whether resources of this type are always synchronised using their native ids.
    pub fn is_sync_dhis_id(self) -> bool {
        matches!(
            self,
            FhirResourceType::PlanDefinition | FhirResourceType::Questionnaire
        )
    }

    pub fn order(self) -> u32 {
        match self {
            FhirResourceType::Organization => 1,
            FhirResourceType::Location => 2,
            FhirResourceType::Encounter => 4,
            FhirResourceType::Practitioner => 9,
            FhirResourceType::Patient => 10,
            FhirResourceType::RelatedPerson => 11,
            FhirResourceType::Condition => 19,
            FhirResourceType::Observation => 20,
            FhirResourceType::MedicationRequest => 21,
            FhirResourceType::Immunization => 22,
            FhirResourceType::Measure => 29,
            FhirResourceType::DiagnosticReport
            | FhirResourceType::MeasureReport
            | FhirResourceType::PlanDefinition => 30,
            FhirResourceType::Questionnaire => 31,
            FhirResourceType::CarePlan => 35,
            FhirResourceType::QuestionnaireResponse => 40,
        }
    }

    /// FHIR versions in which this resource type is supported.
    pub fn fhir_versions(self) -> &'static [FhirVersion] {
        match self {
            FhirResourceType::PlanDefinition
            | FhirResourceType::Questionnaire
            | FhirResourceType::CarePlan
            | FhirResourceType::QuestionnaireResponse => &[FhirVersion::R4],
            _ => &FhirVersion::ALL,
        }
    }

    /// Element that refers to the parent in a "part-of" hierarchy, if the type has one.
    pub fn parent_element(self) -> Option<&'static str> {
        match self {
            FhirResourceType::Organization | FhirResourceType::Location => Some("partOf"),
            _ => None,
        }
    }

    /// Search parameter used to fetch a resource together with its ancestors.
    pub fn parent_search_param(self) -> Option<&'static str> {
        match self {
            FhirResourceType::Organization => Some("organizationPartOf"),
            FhirResourceType::Location => Some("locationPartOf"),
            _ => None,
        }
    }

    /// Builds the relative reference `Type/id`.
    pub fn with_id(self, id: &str) -> String {
        format!("{}/{}", self.resource_type_name(), id)
    }

    /// Resolves a type from its wire name or its upper snake case constant name
    /// (`MedicationRequest`, `MEDICATION_REQUEST` and `medicationRequest` are all accepted).
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::UnknownResourceType`] if no supported type matches.
    pub fn from_name(name: &str) -> FhirResult<Self> {
        let folded: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|t| t.resource_type_name().to_ascii_lowercase() == folded)
            .ok_or_else(|| FhirError::UnknownResourceType(name.to_owned()))
    }
}

impl fmt::Display for FhirResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_type_name())
    }
}

impl FromStr for FhirResourceType {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl serde::Serialize for FhirResourceType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.resource_type_name())
    }
}

impl<'de> serde::Deserialize<'de> for FhirResourceType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FhirResourceType::from_name(&s).map_err(serde::de::Error::custom)
    }
}

impl serde::Serialize for FhirVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_wire())
    }
}

impl<'de> serde::Deserialize<'de> for FhirVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
