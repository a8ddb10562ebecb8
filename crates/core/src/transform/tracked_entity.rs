use super::resolve::{resolve, ResolveStage, ResolveStages};
use super::{
    business_identifier, find_organization_unit, find_tracked_entity_instance, id_reference,
    identifier_attribute, lookup_organization_unit, new_env, wrong_rule_kind,
    FhirToDhisTransformer, TransformOutcome, TransformerServices,
};
use crate::context::TransformerContext;
use crate::metadata::{ExecutableScript, MappedTrackedEntity, Rule, RuleKind};
use crate::script::{ScriptEnv, ScriptOutput, ScriptValue};
use crate::scripted::{ScriptedTrackedEntityInstance, WritableTrackedEntityInstance};
use crate::store::ResourceAction;
use crate::utils::TransformerUtils;
use crate::{TransformerError, TransformerResult};
use dhis::{DhisResource, DhisResourceType, TrackedEntityInstance, TrackedEntityType};
use fhir::FhirResource;
use std::sync::Arc;
use tracing::info;

/// Transforms FHIR resources with a business identifier (patients, related persons) into
/// tracked entity instances.
pub struct TrackedEntityTransformer {
    services: Arc<TransformerServices>,
}

impl TrackedEntityTransformer {
    pub fn new(services: Arc<TransformerServices>) -> Self {
        Self { services }
    }

    /// Organization unit, location and transform script of a resolved instance.
    fn apply(
        &self,
        env: &mut ScriptEnv<'_>,
        rule: &Rule,
        org_unit_lookup_script: Option<&ExecutableScript>,
        location_lookup_script: Option<&ExecutableScript>,
    ) -> TransformerResult<bool> {
        let executor = &*self.services.executor;
        let unit = match org_unit_lookup_script {
            Some(script) => lookup_organization_unit(&self.services, env, script)?,
            None => {
                let current = env
                    .tracked_entity_output()?
                    .organization_unit_id()
                    .map(str::to_owned);
                let Some(current) = current else {
                    info!(
                        rule = %rule.name,
                        "Rule does not define an organization unit lookup script and tracked entity instance does not yet include one."
                    );
                    return Ok(false);
                };
                find_organization_unit(&self.services, &id_reference(&current)?)?
            }
        };
        let Some(unit) = unit else {
            return Ok(false);
        };
        env.tracked_entity_output()?
            .set_organization_unit_id(Some(&unit.id))?;

        if let Some(script) = location_lookup_script {
            if let Some(location) = env.run_location(executor, script)? {
                env.tracked_entity_output()?
                    .set_coordinates(&ScriptValue::Location(location))?;
            }
        }

        if !env.run_boolean(executor, &rule.transform_script)? {
            info!(rule = %rule.name, "Transform script did not return true.");
            return Ok(false);
        }
        env.tracked_entity_output()?.validate()?;
        Ok(true)
    }
}

impl FhirToDhisTransformer for TrackedEntityTransformer {
    fn dhis_resource_type(&self) -> DhisResourceType {
        DhisResourceType::TrackedEntity
    }

    fn transform(
        &self,
        context: &TransformerContext,
        utils: &TransformerUtils,
        input: &Arc<FhirResource>,
        rule: &Rule,
    ) -> TransformerResult<Option<TransformOutcome>> {
        let RuleKind::TrackedEntity {
            tracked_entity,
            org_unit_lookup_script,
            location_lookup_script,
            tei_lookup_script,
        } = &rule.kind
        else {
            return Err(wrong_rule_kind(rule, self.dhis_resource_type()));
        };
        if !tracked_entity.enabled {
            info!(tracked_entity = %tracked_entity.name, "Tracked entity is disabled.");
            return Ok(None);
        }

        let metadata = &self.services.tracked_entity_metadata;
        let attributes = metadata.attributes()?;
        let tracked_entity_type = metadata
            .find_type(&tracked_entity.tracked_entity_type_reference)?
            .ok_or_else(|| {
                TransformerError::Mapping(format!(
                    "Tracked entity type in rule {} could not be found: {}",
                    rule.name, tracked_entity.tracked_entity_type_reference
                ))
            })?;
        let identifier_attribute_id = identifier_attribute(&attributes, tracked_entity)?.id.clone();

        let mut stages = Stages {
            services: &self.services,
            context,
            utils,
            input,
            tracked_entity,
            tracked_entity_type: &tracked_entity_type,
            identifier_attribute_id: &identifier_attribute_id,
            tei_lookup_script: tei_lookup_script.as_deref(),
            identifier: None,
        };
        let Some(resolved) = resolve(context, &mut stages)? else {
            info!(rule = %rule.name, "Tracked entity instance could neither be found nor created.");
            return Ok(None);
        };
        let new_resource = resolved.action == ResourceAction::Create;
        let new_identifier = if new_resource {
            stages.identifier.flatten()
        } else {
            None
        };

        let mut instance = resolved.resource;
        let applied = {
            let mut output = WritableTrackedEntityInstance::new(
                context,
                &attributes,
                &tracked_entity_type,
                &mut instance,
                new_resource,
            );
            if resolved.stage == ResolveStage::BusinessIdentifier {
                output.protect_attribute(identifier_attribute_id.clone());
            }
            if let Some(identifier) = new_identifier {
                output.set_value(
                    &id_reference(&identifier_attribute_id)?,
                    &ScriptValue::String(identifier),
                    None,
                )?;
            }
            let mut env =
                new_env(context, utils, input).with_output(ScriptOutput::TrackedEntity(output));
            self.apply(
                &mut env,
                rule,
                org_unit_lookup_script.as_deref(),
                location_lookup_script.as_deref(),
            )?
        };
        if !applied {
            return Ok(None);
        }
        Ok(Some(TransformOutcome::new(
            rule,
            DhisResource::TrackedEntity(instance),
            resolved.action,
        )))
    }
}

struct Stages<'s> {
    services: &'s TransformerServices,
    context: &'s TransformerContext,
    utils: &'s TransformerUtils,
    input: &'s Arc<FhirResource>,
    tracked_entity: &'s MappedTrackedEntity,
    tracked_entity_type: &'s TrackedEntityType,
    identifier_attribute_id: &'s str,
    tei_lookup_script: Option<&'s ExecutableScript>,
    /// Business identifier, once it has been looked up.
    identifier: Option<Option<String>>,
}

impl Stages<'_> {
    fn identifier(&mut self) -> TransformerResult<Option<String>> {
        if let Some(identifier) = &self.identifier {
            return Ok(identifier.clone());
        }
        let resource = match self.tei_lookup_script {
            Some(script) => new_env(self.context, self.utils, self.input)
                .run_resource(&*self.services.executor, script)?,
            None => Some(Arc::clone(self.input)),
        };
        let identifier = match resource {
            Some(resource) => business_identifier(self.context, self.utils, &resource)?,
            None => None,
        };
        self.identifier = Some(identifier.clone());
        Ok(identifier)
    }
}

impl ResolveStages for Stages<'_> {
    type Resource = TrackedEntityInstance;

    fn by_id(&mut self, id: &str) -> TransformerResult<Option<TrackedEntityInstance>> {
        self.services.tracked_entities.find_by_id(id)
    }

    fn by_identifier(&mut self) -> TransformerResult<Option<TrackedEntityInstance>> {
        let Some(identifier) = self.identifier()? else {
            return Ok(None);
        };
        find_tracked_entity_instance(
            self.services,
            self.tracked_entity,
            self.tracked_entity_type,
            self.identifier_attribute_id,
            &identifier,
        )
    }

    fn by_active_lookup(&mut self) -> TransformerResult<Option<TrackedEntityInstance>> {
        Ok(None)
    }

    fn create(&mut self, id: Option<String>) -> TransformerResult<Option<TrackedEntityInstance>> {
        if self.tei_lookup_script.is_some() {
            return Err(TransformerError::Mapping(format!(
                "Tracked entity instance referenced by FHIR resource {} could not be found.",
                self.input.id_element()
            )));
        }
        if self.identifier()?.is_none() {
            info!(
                resource = %self.input.id_element(),
                "Tracked entity instance is not created for resource without business identifier."
            );
            return Ok(None);
        }
        Ok(Some(TrackedEntityInstance::new(
            id,
            self.tracked_entity_type.id.as_str(),
        )))
    }
}
