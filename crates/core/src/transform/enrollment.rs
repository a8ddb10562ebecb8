use super::resolve::{resolve, ResolveStages};
use super::{
    find_organization_unit, id_reference, lookup_organization_unit, new_env, resource_mapping,
    wrong_rule_kind, FhirToDhisTransformer, TrackedEntityScope, TransformOutcome,
    TransformerServices,
};
use crate::context::TransformerContext;
use crate::metadata::{FhirResourceMapping, MappedProgram, Rule, RuleKind};
use crate::script::{ScriptEnv, ScriptOutput, ScriptValue};
use crate::scripted::{TrackedEntityInstanceView, WritableEnrollment};
use crate::store::ResourceAction;
use crate::utils::TransformerUtils;
use crate::{TransformerError, TransformerResult};
use dhis::{DhisResource, DhisResourceType, Enrollment, Program, TrackedEntityInstance};
use fhir::FhirResource;
use std::sync::Arc;
use tracing::info;

/// Transforms FHIR resources into enrollments of the tracked entity instance they belong to.
pub struct EnrollmentTransformer {
    services: Arc<TransformerServices>,
}

impl EnrollmentTransformer {
    pub fn new(services: Arc<TransformerServices>) -> Self {
        Self { services }
    }
}

/// The program by reference of a mapped program.
///
/// # Errors
///
/// Returns [`TransformerError::Mapping`] if the program does not exist.
pub(crate) fn find_program(
    services: &TransformerServices,
    rule: &Rule,
    mapped: &MappedProgram,
) -> TransformerResult<Arc<Program>> {
    services
        .programs
        .find_program(&mapped.program_reference)?
        .ok_or_else(|| {
            TransformerError::Mapping(format!(
                "Rule {} requires program \"{}\" that does not exist.",
                rule.name, mapped.program_reference
            ))
        })
}

impl FhirToDhisTransformer for EnrollmentTransformer {
    fn dhis_resource_type(&self) -> DhisResourceType {
        DhisResourceType::Enrollment
    }

    fn transform(
        &self,
        context: &TransformerContext,
        utils: &TransformerUtils,
        input: &Arc<FhirResource>,
        rule: &Rule,
    ) -> TransformerResult<Option<TransformOutcome>> {
        let RuleKind::Enrollment { program: mapped } = &rule.kind else {
            return Err(wrong_rule_kind(rule, self.dhis_resource_type()));
        };
        if !mapped.enabled {
            info!(program = %mapped.name, "Program is disabled.");
            return Ok(None);
        }
        let services = &*self.services;
        let program = find_program(services, rule, mapped)?;
        let scope = TrackedEntityScope::of_program(services, &program)?;
        let mapping = resource_mapping(services, rule)?;
        let Some(instance) =
            scope.tracked_entity_instance(services, context, utils, input, &mapping)?
        else {
            return Ok(None);
        };

        let mut stages = EnrollmentScope {
            services,
            context,
            utils,
            input,
            mapped,
            program: &program,
            mapping: &mapping,
            scope: &scope,
            instance: &instance,
        };
        let Some(resolved) = resolve(context, &mut stages)? else {
            info!(rule = %rule.name, "Enrollment could neither be found nor created.");
            return Ok(None);
        };

        let mut enrollment = resolved.resource;
        let applied = {
            let output = WritableEnrollment::new(
                context,
                &program,
                &mut enrollment,
                resolved.action == ResourceAction::Create,
            );
            let mut env = new_env(context, utils, input)
                .with_output(ScriptOutput::Enrollment(output))
                .with_tracked_entity_instance(TrackedEntityInstanceView::new(
                    &scope.attributes,
                    &instance,
                    false,
                ));
            if env.run_boolean(&*services.executor, &rule.transform_script)? {
                env.enrollment_output()?.validate()?;
                true
            } else {
                info!(rule = %rule.name, "Transform script did not return true.");
                false
            }
        };
        if !applied {
            return Ok(None);
        }
        Ok(Some(TransformOutcome::new(
            rule,
            DhisResource::Enrollment(enrollment),
            resolved.action,
        )))
    }
}

/// Everything needed to look up or create the enrollment of a tracked entity instance.
pub(crate) struct EnrollmentScope<'s> {
    pub services: &'s TransformerServices,
    pub context: &'s TransformerContext,
    pub utils: &'s TransformerUtils,
    pub input: &'s Arc<FhirResource>,
    pub mapped: &'s MappedProgram,
    pub program: &'s Program,
    pub mapping: &'s FhirResourceMapping,
    pub scope: &'s TrackedEntityScope,
    pub instance: &'s TrackedEntityInstance,
}

impl<'s> EnrollmentScope<'s> {
    fn env(&self) -> ScriptEnv<'s> {
        new_env(self.context, self.utils, self.input).with_tracked_entity_instance(
            TrackedEntityInstanceView::new(&self.scope.attributes, self.instance, false),
        )
    }

    fn instance_id(&self) -> TransformerResult<&'s str> {
        self.instance.id.as_deref().ok_or_else(|| {
            TransformerError::Mapping("Tracked entity instance has not been saved yet.".into())
        })
    }

    pub fn find_active(&self) -> TransformerResult<Option<Enrollment>> {
        self.services
            .enrollments
            .find_latest_active(&self.program.id, self.instance_id()?)
    }

    /// A new enrollment of the instance into the program.
    ///
    /// Returns none if the program does not allow creation, the creation applicable script
    /// declines or no organization unit can be determined.
    pub fn create(&self, id: Option<String>) -> TransformerResult<Option<Enrollment>> {
        if !self.mapped.creation_enabled {
            info!(program = %self.mapped.name, "Creation of enrollments is disabled.");
            return Ok(None);
        }
        let executor = &*self.services.executor;

        let incident_date = match &self.mapping.enrollment_date_lookup_script {
            Some(script) => self.env().run_date_time(executor, script)?,
            None => None,
        }
        .unwrap_or_else(|| self.context.now());

        if let Some(script) = &self.mapped.creation_applicable_script {
            let mut env = self.env();
            env.set_variable("dateTime", ScriptValue::DateTime(incident_date));
            if !env.run_boolean(executor, script)? {
                info!(program = %self.mapped.name, "Enrollment is not applicable for creation.");
                return Ok(None);
            }
        }

        let unit = match &self.mapping.enrollment_org_lookup_script {
            Some(script) => lookup_organization_unit(self.services, &mut self.env(), script)?,
            None => match self.instance.org_unit_id.as_deref() {
                Some(id) => find_organization_unit(self.services, &id_reference(id)?)?,
                None => None,
            },
        };
        let Some(unit) = unit else {
            info!(program = %self.mapped.name, "Organization unit of enrollment could not be determined.");
            return Ok(None);
        };

        let mut enrollment = Enrollment::new(id, self.program.id.as_str());
        enrollment.tracked_entity_instance_id = self.instance.id.clone();
        enrollment.org_unit_id = Some(unit.id);
        enrollment.enrollment_date = Some(self.context.now());
        enrollment.incident_date = Some(incident_date);

        if let Some(script) = &self.mapped.creation_script {
            let created = {
                let output = WritableEnrollment::new(self.context, self.program, &mut enrollment, true);
                let mut env = self.env().with_output(ScriptOutput::Enrollment(output));
                env.run_boolean(executor, script)?
            };
            if !created {
                info!(program = %self.mapped.name, "Creation script declined the enrollment.");
                return Ok(None);
            }
        }
        if self.mapped.enrollment_date_is_incident {
            enrollment.enrollment_date = enrollment.incident_date;
        }
        Ok(Some(enrollment))
    }
}

impl ResolveStages for EnrollmentScope<'_> {
    type Resource = Enrollment;

    fn by_id(&mut self, id: &str) -> TransformerResult<Option<Enrollment>> {
        self.services.enrollments.find_by_id(id)
    }

    fn by_identifier(&mut self) -> TransformerResult<Option<Enrollment>> {
        Ok(None)
    }

    fn by_active_lookup(&mut self) -> TransformerResult<Option<Enrollment>> {
        self.find_active()
    }

    fn create(&mut self, id: Option<String>) -> TransformerResult<Option<Enrollment>> {
        EnrollmentScope::create(self, id)
    }
}
