//! Interfaces of the collaborators the engine depends on.
//!
//! Implementations live outside the engine (persistence, remote FHIR access, script sandbox).
//! In-memory implementations for local use are in [`crate::memory`].

use crate::client::AdapterEvent;
use crate::metadata::{CodeSet, ExecutableScript, FhirClient, FhirResourceMapping, Rule, SystemCode};
use crate::script::{ScriptEnv, ScriptValue};
use crate::TransformerResult;
use dhis::{
    DataSet, DataValueSet, Enrollment, Event, OrganizationUnit, Program, Reference,
    TrackedEntityAttributes, TrackedEntityInstance, TrackedEntityType,
};
use fhir::{Bundle, FhirResource, FhirResourceType, FhirVersion, SystemCodeValue};
use std::sync::Arc;
use uuid::Uuid;

/// Whether a save creates a new entity or updates an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceAction {
    Create,
    Update,
}

// ============================================================================
// Metadata
// ============================================================================

pub trait RuleStore: Send + Sync {
    /// Candidate rules for a source type, in evaluation order.
    ///
    /// Rules that declare an applicable code set are returned only if one of `codes` maps to a
    /// code of that set.
    fn find_applicable_rules(
        &self,
        fhir_resource_type: FhirResourceType,
        codes: &[SystemCodeValue],
    ) -> TransformerResult<Vec<Arc<Rule>>>;

    fn find_rule_by_id(&self, id: Uuid) -> TransformerResult<Option<Arc<Rule>>>;

    /// The enabled tracked entity rule whose mapped tracked entity refers to the given type.
    fn find_tracked_entity_rule(
        &self,
        tracked_entity_type: &TrackedEntityType,
    ) -> TransformerResult<Option<Arc<Rule>>>;

    fn find_resource_mapping(
        &self,
        fhir_resource_type: FhirResourceType,
    ) -> TransformerResult<Option<Arc<FhirResourceMapping>>>;
}

pub trait CodeStore: Send + Sync {
    /// System codes under one of `systems` that stand for the same adapter code as one of
    /// `system_code_values` (`system|code`).
    fn find_by_systems_and_codes(
        &self,
        systems: &[String],
        system_code_values: &[String],
    ) -> TransformerResult<Vec<SystemCode>>;

    fn find_system_code(&self, value: &SystemCodeValue) -> TransformerResult<Option<SystemCode>>;

    fn find_code_set(&self, code: &str) -> TransformerResult<Option<Arc<CodeSet>>>;

    /// System codes whose adapter code or mapped code is one of `mapping_codes`.
    fn find_by_mapping_codes(&self, mapping_codes: &[String]) -> TransformerResult<Vec<SystemCode>>;
}

/// Script sandbox.
pub trait ScriptExecutor: Send + Sync {
    fn execute(
        &self,
        script: &ExecutableScript,
        version: FhirVersion,
        env: &mut ScriptEnv<'_>,
    ) -> TransformerResult<ScriptValue>;

    /// # Errors
    ///
    /// Returns [`crate::TransformerError::Script`] if the source does not compile.
    fn compile(&self, source: &str) -> TransformerResult<()>;
}

// ============================================================================
// DHIS2
// ============================================================================

pub trait TrackedEntityMetadataStore: Send + Sync {
    fn attributes(&self) -> TransformerResult<Arc<TrackedEntityAttributes>>;

    fn find_type(&self, reference: &Reference) -> TransformerResult<Option<Arc<TrackedEntityType>>>;
}

pub trait ProgramMetadataStore: Send + Sync {
    fn find_program(&self, reference: &Reference) -> TransformerResult<Option<Arc<Program>>>;
}

pub trait DataSetMetadataStore: Send + Sync {
    fn find_data_set(&self, reference: &Reference) -> TransformerResult<Option<Arc<DataSet>>>;
}

pub trait OrganizationUnitRepository: Send + Sync {
    fn find_by_reference(&self, reference: &Reference) -> TransformerResult<Option<OrganizationUnit>>;
}

pub trait TrackedEntityRepository: Send + Sync {
    fn find_by_id(&self, id: &str) -> TransformerResult<Option<TrackedEntityInstance>>;

    /// At most `max` instances of the type whose attribute has exactly `value`.
    fn find_by_attribute_value(
        &self,
        tracked_entity_type_id: &str,
        attribute_id: &str,
        value: &str,
        max: usize,
    ) -> TransformerResult<Vec<TrackedEntityInstance>>;

    fn save(&self, instance: &TrackedEntityInstance, action: ResourceAction)
        -> TransformerResult<()>;
}

pub trait EnrollmentRepository: Send + Sync {
    fn find_by_id(&self, id: &str) -> TransformerResult<Option<Enrollment>>;

    /// The most recent active enrollment of the instance into the program.
    fn find_latest_active(
        &self,
        program_id: &str,
        tracked_entity_instance_id: &str,
    ) -> TransformerResult<Option<Enrollment>>;

    fn save(&self, enrollment: &Enrollment, action: ResourceAction) -> TransformerResult<()>;
}

pub trait EventRepository: Send + Sync {
    fn find_by_id(&self, id: &str) -> TransformerResult<Option<Event>>;

    fn find_by_enrollment_and_stage(
        &self,
        enrollment_id: &str,
        program_stage_id: &str,
    ) -> TransformerResult<Vec<Event>>;

    fn save(&self, event: &Event, action: ResourceAction) -> TransformerResult<()>;
}

pub trait DataValueSetRepository: Send + Sync {
    fn save(&self, data_value_set: &DataValueSet, action: ResourceAction) -> TransformerResult<()>;
}

// ============================================================================
// FHIR
// ============================================================================

/// Read access to a remote FHIR endpoint.
pub trait RemoteFhirRepository: Send + Sync {
    fn find(
        &self,
        client_id: Uuid,
        fhir_resource_type: FhirResourceType,
        id: &str,
    ) -> TransformerResult<Option<Arc<FhirResource>>>;

    /// The resource together with its ancestors, fetched with the hierarchy search parameter.
    fn find_with_parents(
        &self,
        client_id: Uuid,
        fhir_resource_type: FhirResourceType,
        id: &str,
        parent_search_param: &str,
    ) -> TransformerResult<Bundle>;
}

/// DHIS2 ids assigned to FHIR resources of a client when they were first transformed.
pub trait FhirDhisAssignmentStore: Send + Sync {
    fn find_first_dhis_resource_id(
        &self,
        fhir_client_id: Uuid,
        fhir_resource_type: FhirResourceType,
        fhir_resource_id: &str,
    ) -> TransformerResult<Option<String>>;
}

pub trait FhirClientStore: Send + Sync {
    fn find_by_id(&self, id: Uuid) -> TransformerResult<Option<FhirClient>>;

    fn save(&self, client: &FhirClient, action: ResourceAction) -> TransformerResult<()>;

    /// Makes all saved changes visible to other readers.
    fn flush(&self) -> TransformerResult<()>;
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &AdapterEvent) -> TransformerResult<()>;
}
