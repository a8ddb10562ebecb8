//! Mapping rules from a FHIR resource type to a DHIS2 resource kind.

use crate::metadata::script::ExecutableScript;
use crate::{TransformerError, TransformerResult};
use dhis::{DhisResourceType, EnrollmentStatus, EventStatus, Reference};
use fhir::FhirResourceType;
use std::sync::Arc;
use uuid::Uuid;

/// A reference to DHIS2 metadata that a rule's scripts rely on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleDataReference {
    pub rule_id: Uuid,
    pub reference: Reference,
    pub description: Option<String>,
    pub required: bool,
}

/// A tracked entity type as used by rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedTrackedEntity {
    pub name: String,
    pub enabled: bool,
    pub tracked_entity_type_reference: Reference,
    /// Attribute that holds the business identifier of the source resource.
    pub tracked_entity_identifier_reference: Reference,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MappedProgram {
    pub name: String,
    pub program_reference: Reference,
    pub enabled: bool,
    pub creation_enabled: bool,
    pub creation_applicable_script: Option<Arc<ExecutableScript>>,
    pub creation_script: Option<Arc<ExecutableScript>>,
    pub enrollment_date_is_incident: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MappedProgramStage {
    pub name: String,
    pub program_stage_reference: Reference,
    pub enabled: bool,
    pub creation_enabled: bool,
    pub creation_applicable_script: Option<Arc<ExecutableScript>>,
    pub creation_script: Option<Arc<ExecutableScript>>,
    /// Decides whether an existing event is continued before the transformation.
    pub before_script: Option<Arc<ExecutableScript>>,
    pub after_script: Option<Arc<ExecutableScript>>,
    pub event_date_is_incident: bool,
    pub program: MappedProgram,
}

/// Target-kind specific part of a rule.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleKind {
    TrackedEntity {
        tracked_entity: MappedTrackedEntity,
        org_unit_lookup_script: Option<Arc<ExecutableScript>>,
        location_lookup_script: Option<Arc<ExecutableScript>>,
        tei_lookup_script: Option<Arc<ExecutableScript>>,
    },
    Enrollment {
        program: MappedProgram,
    },
    ProgramStage {
        program_stage: MappedProgramStage,
        update_event_date: bool,
        /// Empty means all statuses.
        applicable_enrollment_statuses: Vec<EnrollmentStatus>,
        applicable_event_statuses: Vec<EventStatus>,
    },
    OrganizationUnit {
        identifier_lookup_script: Option<Arc<ExecutableScript>>,
    },
    DataValueSet {
        data_set_reference: Option<Reference>,
    },
}

impl RuleKind {
    pub fn dhis_resource_type(&self) -> DhisResourceType {
        match self {
            RuleKind::TrackedEntity { .. } => DhisResourceType::TrackedEntity,
            RuleKind::Enrollment { .. } => DhisResourceType::Enrollment,
            RuleKind::ProgramStage { .. } => DhisResourceType::ProgramStageEvent,
            RuleKind::OrganizationUnit { .. } => DhisResourceType::OrganizationUnit,
            RuleKind::DataValueSet { .. } => DhisResourceType::DataValueSet,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    /// Higher values are evaluated first.
    pub evaluation_order: i32,
    pub fhir_resource_type: FhirResourceType,
    pub imp_enabled: bool,
    /// No further rule is applied once this rule produced an outcome.
    pub stop: bool,
    pub contained_allowed: bool,
    pub applicable_script: Option<Arc<ExecutableScript>>,
    /// Code set that the input's codes must intersect for the rule to be a candidate.
    pub applicable_code_set: Option<String>,
    pub transform_script: Arc<ExecutableScript>,
    pub data_references: Vec<RuleDataReference>,
    pub kind: RuleKind,
}

impl Rule {
    pub fn dhis_resource_type(&self) -> DhisResourceType {
        self.kind.dhis_resource_type()
    }

    /// # Errors
    ///
    /// Returns [`TransformerError::Metadata`] if a data reference belongs to another rule.
    pub fn validate(&self) -> TransformerResult<()> {
        for data_reference in &self.data_references {
            if data_reference.rule_id != self.id {
                return Err(TransformerError::Metadata(format!(
                    "Data reference {} of rule {} belongs to rule {}.",
                    data_reference.reference, self.name, data_reference.rule_id
                )));
            }
        }
        Ok(())
    }
}

/// Per source type lookup scripts shared by all rules of that type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FhirResourceMapping {
    pub fhir_resource_type: Option<FhirResourceType>,
    pub tei_lookup_script: Option<Arc<ExecutableScript>>,
    pub enrollment_org_lookup_script: Option<Arc<ExecutableScript>>,
    pub event_org_lookup_script: Option<Arc<ExecutableScript>>,
    pub enrollment_date_lookup_script: Option<Arc<ExecutableScript>>,
    pub event_date_lookup_script: Option<Arc<ExecutableScript>>,
    pub effective_date_lookup_script: Option<Arc<ExecutableScript>>,
}
