//! Transformation of FHIR resources into DHIS2 resources.
//!
//! One [`FhirToDhisTransformer`] exists per DHIS2 resource kind. The [`TransformerService`]
//! selects the candidate rules of an input resource and hands each applicable rule to the
//! transformer of its kind until one of them produces an outcome.

pub mod data_value_set;
pub mod dispatcher;
pub mod enrollment;
pub mod organization_unit;
pub mod program_stage;
pub(crate) mod resolve;
pub mod tracked_entity;

pub use data_value_set::DataValueSetTransformer;
pub use dispatcher::{TransformerRequest, TransformerRequestOutcome, TransformerService};
pub use enrollment::EnrollmentTransformer;
pub use organization_unit::OrganizationUnitTransformer;
pub use program_stage::ProgramStageTransformer;
pub use tracked_entity::TrackedEntityTransformer;

use crate::context::TransformerContext;
use crate::metadata::{ExecutableScript, FhirResourceMapping, MappedTrackedEntity, Rule};
use crate::script::ScriptEnv;
use crate::store::{
    DataSetMetadataStore, DataValueSetRepository, EnrollmentRepository, EventRepository,
    OrganizationUnitRepository, ProgramMetadataStore, ResourceAction, RuleStore, ScriptExecutor,
    TrackedEntityMetadataStore, TrackedEntityRepository,
};
use crate::utils::TransformerUtils;
use crate::{TransformerError, TransformerResult};
use dhis::{
    DhisResource, DhisResourceType, OrganizationUnit, Program, Reference, TrackedEntityAttribute,
    TrackedEntityAttributes, TrackedEntityInstance, TrackedEntityType,
};
use fhir::FhirResource;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// The DHIS2 resource a rule produced, ready to be saved.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformOutcome {
    pub rule_id: Uuid,
    pub resource: DhisResource,
    pub action: ResourceAction,
    /// Resources that have to be saved before `resource`, e.g. a new enrollment of a new event.
    pub dependents: Vec<(DhisResource, ResourceAction)>,
}

impl TransformOutcome {
    pub fn new(rule: &Rule, resource: DhisResource, action: ResourceAction) -> Self {
        Self {
            rule_id: rule.id,
            resource,
            action,
            dependents: Vec::new(),
        }
    }

    pub fn with_dependent(mut self, resource: DhisResource, action: ResourceAction) -> Self {
        self.dependents.push((resource, action));
        self
    }
}

/// Collaborators shared by all transformers.
#[derive(Clone)]
pub struct TransformerServices {
    pub executor: Arc<dyn ScriptExecutor>,
    pub rules: Arc<dyn RuleStore>,
    pub tracked_entity_metadata: Arc<dyn TrackedEntityMetadataStore>,
    pub programs: Arc<dyn ProgramMetadataStore>,
    pub data_sets: Arc<dyn DataSetMetadataStore>,
    pub organization_units: Arc<dyn OrganizationUnitRepository>,
    pub tracked_entities: Arc<dyn TrackedEntityRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub events: Arc<dyn EventRepository>,
    pub data_value_sets: Arc<dyn DataValueSetRepository>,
}

/// Transformation of an input resource into one kind of DHIS2 resource.
pub trait FhirToDhisTransformer: Send + Sync {
    fn dhis_resource_type(&self) -> DhisResourceType;

    /// Resolves or creates the target resource of `rule` and applies the rule's transform script.
    ///
    /// Returns none if the rule does not apply to the input after all, e.g. because the target
    /// resource can neither be found nor created or the transform script did not return true.
    fn transform(
        &self,
        context: &TransformerContext,
        utils: &TransformerUtils,
        input: &Arc<FhirResource>,
        rule: &Rule,
    ) -> TransformerResult<Option<TransformOutcome>>;
}

// ============================================================================
// Helpers shared by the transformers
// ============================================================================

pub(crate) fn wrong_rule_kind(rule: &Rule, expected: DhisResourceType) -> TransformerError {
    TransformerError::Fatal(format!(
        "Rule {} of type {} cannot be handled by the transformer for {expected}.",
        rule.name,
        rule.dhis_resource_type()
    ))
}

pub(crate) fn new_env<'a>(
    context: &'a TransformerContext,
    utils: &'a TransformerUtils,
    input: &Arc<FhirResource>,
) -> ScriptEnv<'a> {
    ScriptEnv::new(context, utils, Some(Arc::clone(input)))
}

/// The organization unit a lookup script refers to.
pub(crate) fn lookup_organization_unit(
    services: &TransformerServices,
    env: &mut ScriptEnv<'_>,
    script: &ExecutableScript,
) -> TransformerResult<Option<OrganizationUnit>> {
    let Some(reference) = env.run_reference(&*services.executor, script)? else {
        info!(script = %script.code, "Could not extract organization unit reference.");
        return Ok(None);
    };
    find_organization_unit(services, &reference)
}

pub(crate) fn find_organization_unit(
    services: &TransformerServices,
    reference: &Reference,
) -> TransformerResult<Option<OrganizationUnit>> {
    let unit = services.organization_units.find_by_reference(reference)?;
    if unit.is_none() {
        info!(%reference, "Organization unit of reference does not exist.");
    }
    Ok(unit)
}

pub(crate) fn id_reference(id: &str) -> TransformerResult<Reference> {
    Reference::id(id).map_err(|err| TransformerError::Mapping(err.to_string()))
}

/// The business identifier of `resource`: its identifier under the system of its type, with the
/// configured code prefix.
///
/// # Errors
///
/// Returns [`TransformerError::Mapping`] if the resource type is unknown or has no system.
pub fn business_identifier(
    context: &TransformerContext,
    utils: &TransformerUtils,
    resource: &Arc<FhirResource>,
) -> TransformerResult<Option<String>> {
    let resource_type = resource.resource_type().ok_or_else(|| {
        TransformerError::Mapping(format!(
            "Could not map {} to a FHIR resource type.",
            resource.resource_type_name()
        ))
    })?;
    let resource_system = context.resource_system(resource_type).ok_or_else(|| {
        TransformerError::Mapping(format!(
            "No system has been defined for resource type {resource_type}."
        ))
    })?;
    let identifier = utils.identifier_utils()?.get_resource_identifier_with_system(
        Some(resource),
        resource_type,
        Some(resource_system.system.as_str()),
    )?;
    match identifier {
        Some(identifier) => Ok(Some(resource_system.prefixed(&identifier))),
        None => {
            info!(
                %resource_type,
                system = %resource_system.system,
                "Resource does not include the required identifier."
            );
            Ok(None)
        }
    }
}

pub(crate) fn identifier_attribute<'a>(
    attributes: &'a TrackedEntityAttributes,
    tracked_entity: &MappedTrackedEntity,
) -> TransformerResult<&'a TrackedEntityAttribute> {
    let reference = &tracked_entity.tracked_entity_identifier_reference;
    attributes.find(reference).ok_or_else(|| {
        TransformerError::Mapping(format!(
            "Tracked entity identifier attribute does not exist: {reference}"
        ))
    })
}

/// The tracked entity instance whose identifier attribute holds `identifier`.
///
/// # Errors
///
/// Returns [`TransformerError::Mapping`] if more than one instance matches.
pub(crate) fn find_tracked_entity_instance(
    services: &TransformerServices,
    tracked_entity: &MappedTrackedEntity,
    tracked_entity_type: &TrackedEntityType,
    attribute_id: &str,
    identifier: &str,
) -> TransformerResult<Option<TrackedEntityInstance>> {
    let mut found = services.tracked_entities.find_by_attribute_value(
        &tracked_entity_type.id,
        attribute_id,
        identifier,
        2,
    )?;
    if found.len() > 1 {
        return Err(TransformerError::Mapping(format!(
            "Filtering with identifier of tracked entity {} returned more than one tracked entity instance: {identifier}",
            tracked_entity.name
        )));
    }
    Ok(found.pop())
}

/// Tracked entity metadata of a program, used by the enrollment and event transformers.
pub(crate) struct TrackedEntityScope {
    pub attributes: Arc<TrackedEntityAttributes>,
    pub tracked_entity_type: Arc<TrackedEntityType>,
    pub tracked_entity: MappedTrackedEntity,
    pub identifier_attribute_id: String,
}

impl TrackedEntityScope {
    pub fn of_program(services: &TransformerServices, program: &Program) -> TransformerResult<Self> {
        let type_id = program.tracked_entity_type_id.as_deref().ok_or_else(|| {
            TransformerError::Mapping(format!(
                "Program \"{}\" is without registration and has no tracked entity type.",
                program.name
            ))
        })?;
        let tracked_entity_type = services
            .tracked_entity_metadata
            .find_type(&id_reference(type_id)?)?
            .ok_or_else(|| {
                TransformerError::Mapping(format!(
                    "Program \"{}\" references tracked entity type {type_id} that does not exist.",
                    program.name
                ))
            })?;
        let rule = services
            .rules
            .find_tracked_entity_rule(&tracked_entity_type)?
            .ok_or_else(|| {
                TransformerError::Mapping(format!(
                    "No tracked entity rule has been defined for tracked entity type \"{}\".",
                    tracked_entity_type.name
                ))
            })?;
        let crate::metadata::RuleKind::TrackedEntity { tracked_entity, .. } = &rule.kind else {
            return Err(TransformerError::Fatal(format!(
                "Rule {} is not a tracked entity rule.",
                rule.name
            )));
        };
        let attributes = services.tracked_entity_metadata.attributes()?;
        let identifier_attribute_id = identifier_attribute(&attributes, tracked_entity)?.id.clone();
        Ok(Self {
            attributes,
            tracked_entity_type,
            tracked_entity: tracked_entity.clone(),
            identifier_attribute_id,
        })
    }

    /// The tracked entity instance the input resource belongs to.
    ///
    /// The resource that identifies the instance is returned by the mapping's lookup script, or
    /// is the input itself if the mapping has none. Returns none if there is no such resource or
    /// it carries no business identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if no instance has the resource's identifier.
    pub fn tracked_entity_instance(
        &self,
        services: &TransformerServices,
        context: &TransformerContext,
        utils: &TransformerUtils,
        input: &Arc<FhirResource>,
        mapping: &FhirResourceMapping,
    ) -> TransformerResult<Option<TrackedEntityInstance>> {
        let resource = match &mapping.tei_lookup_script {
            Some(script) => {
                new_env(context, utils, input).run_resource(&*services.executor, script)?
            }
            None => Some(Arc::clone(input)),
        };
        let Some(resource) = resource else {
            info!("Tracked entity instance resource could not be extracted from input.");
            return Ok(None);
        };
        let Some(identifier) = business_identifier(context, utils, &resource)? else {
            return Ok(None);
        };
        let instance = find_tracked_entity_instance(
            services,
            &self.tracked_entity,
            &self.tracked_entity_type,
            &self.identifier_attribute_id,
            &identifier,
        )?;
        instance.map(Some).ok_or_else(|| {
            TransformerError::Mapping(format!(
                "Tracked entity instance for FHIR resource {} could not be found.",
                resource.id_element()
            ))
        })
    }
}

pub(crate) fn resource_mapping(
    services: &TransformerServices,
    rule: &Rule,
) -> TransformerResult<Arc<FhirResourceMapping>> {
    services
        .rules
        .find_resource_mapping(rule.fhir_resource_type)?
        .ok_or_else(|| {
            TransformerError::Mapping(format!(
                "No FHIR resource mapping has been defined for {}.",
                rule.fhir_resource_type
            ))
        })
}
