use super::enrollment::{find_program, EnrollmentScope};
use super::resolve::{resolve, ResolveStages};
use super::{
    find_organization_unit, id_reference, lookup_organization_unit, new_env, resource_mapping,
    wrong_rule_kind, FhirToDhisTransformer, TrackedEntityScope, TransformOutcome,
    TransformerServices,
};
use crate::context::TransformerContext;
use crate::metadata::{MappedProgramStage, Rule, RuleKind};
use crate::script::{EventDecisionType, ScriptEnv, ScriptOutput, ScriptValue};
use crate::scripted::{EnrollmentView, TrackedEntityInstanceView, WritableEvent};
use crate::store::ResourceAction;
use crate::utils::TransformerUtils;
use crate::{TransformerError, TransformerResult};
use dhis::{
    DhisResource, DhisResourceType, Enrollment, EnrollmentStatus, Event, Program, ProgramStage,
    Uid,
};
use fhir::FhirResource;
use std::sync::Arc;
use tracing::{debug, info};

/// Transforms FHIR resources into events of a program stage.
///
/// The event belongs to the active enrollment of the tracked entity instance in the stage's
/// program. If there is none and the program allows it, a new enrollment is created and saved
/// together with the event.
pub struct ProgramStageTransformer {
    services: Arc<TransformerServices>,
}

impl ProgramStageTransformer {
    pub fn new(services: Arc<TransformerServices>) -> Self {
        Self { services }
    }
}

impl FhirToDhisTransformer for ProgramStageTransformer {
    fn dhis_resource_type(&self) -> DhisResourceType {
        DhisResourceType::ProgramStageEvent
    }

    fn transform(
        &self,
        context: &TransformerContext,
        utils: &TransformerUtils,
        input: &Arc<FhirResource>,
        rule: &Rule,
    ) -> TransformerResult<Option<TransformOutcome>> {
        let RuleKind::ProgramStage {
            program_stage: mapped_stage,
            update_event_date,
            applicable_enrollment_statuses,
            applicable_event_statuses,
        } = &rule.kind
        else {
            return Err(wrong_rule_kind(rule, self.dhis_resource_type()));
        };
        let mapped_program = &mapped_stage.program;
        if !mapped_stage.enabled || !mapped_program.enabled {
            info!(
                program_stage = %mapped_stage.name,
                program = %mapped_program.name,
                "Program stage or program is disabled."
            );
            return Ok(None);
        }

        let services = &*self.services;
        let program = find_program(services, rule, mapped_program)?;
        let stage = program
            .stage(&mapped_stage.program_stage_reference)
            .ok_or_else(|| {
                TransformerError::Mapping(format!(
                    "Rule {} requires program stage \"{}\" that is not included in program \"{}\".",
                    rule.name, mapped_stage.program_stage_reference, program.name
                ))
            })?;
        let scope = TrackedEntityScope::of_program(services, &program)?;
        let mapping = resource_mapping(services, rule)?;
        let Some(instance) =
            scope.tracked_entity_instance(services, context, utils, input, &mapping)?
        else {
            return Ok(None);
        };

        let enrollments = EnrollmentScope {
            services,
            context,
            utils,
            input,
            mapped: mapped_program,
            program: &program,
            mapping: &mapping,
            scope: &scope,
            instance: &instance,
        };
        let enrollment = enrollments.find_active()?;
        if let Some(enrollment) = &enrollment {
            if !is_applicable(applicable_enrollment_statuses, &enrollment.status) {
                info!(rule = %rule.name, status = ?enrollment.status, "Enrollment status is not applicable.");
                return Ok(None);
            }
        }

        let mut stages = EventStages {
            enrollments,
            mapped_stage,
            program: &program,
            stage,
            enrollment_statuses: applicable_enrollment_statuses,
            enrollment,
            created_enrollment: false,
        };
        let Some(resolved) = resolve(context, &mut stages)? else {
            info!(rule = %rule.name, "Event could neither be found nor created.");
            return Ok(None);
        };
        let mut event = resolved.resource;
        if !is_applicable(applicable_event_statuses, &event.status) {
            info!(rule = %rule.name, status = ?event.status, "Event status is not applicable.");
            return Ok(None);
        }
        let new_event = resolved.action == ResourceAction::Create;
        let enrollment = stages.enrollment.take();
        let created_enrollment = stages.created_enrollment;

        let applied = {
            let output = WritableEvent::new(context, &program, stage, &mut event, new_event);
            let mut env = new_env(context, utils, input)
                .with_output(ScriptOutput::Event(output))
                .with_tracked_entity_instance(TrackedEntityInstanceView::new(
                    &scope.attributes,
                    &instance,
                    false,
                ));
            if let Some(enrollment) = &enrollment {
                env = env.with_enrollment(EnrollmentView::new(enrollment, created_enrollment));
            }
            let executor = &*services.executor;

            if *update_event_date && !new_event {
                if let Some(script) = &mapping.event_date_lookup_script {
                    if let Some(date) = env.run_date_time(executor, script)? {
                        env.event_output()?
                            .set_event_date(&ScriptValue::DateTime(date))?;
                    }
                }
            }
            if env.run_boolean(executor, &rule.transform_script)? {
                env.event_output()?.validate()?;
                if let Some(script) = &mapped_stage.after_script {
                    env.run(executor, script)?;
                }
                true
            } else {
                info!(rule = %rule.name, "Transform script did not return true.");
                false
            }
        };
        if !applied {
            return Ok(None);
        }

        let outcome = TransformOutcome::new(rule, DhisResource::Event(event), resolved.action);
        Ok(Some(match enrollment {
            Some(enrollment) if created_enrollment => {
                outcome.with_dependent(DhisResource::Enrollment(enrollment), ResourceAction::Create)
            }
            _ => outcome,
        }))
    }
}

/// An empty list of statuses allows all of them.
fn is_applicable<T: PartialEq>(statuses: &[T], status: &T) -> bool {
    statuses.is_empty() || statuses.contains(status)
}

struct EventStages<'s> {
    enrollments: EnrollmentScope<'s>,
    mapped_stage: &'s MappedProgramStage,
    program: &'s Program,
    stage: &'s ProgramStage,
    enrollment_statuses: &'s [EnrollmentStatus],
    enrollment: Option<Enrollment>,
    created_enrollment: bool,
}

impl EventStages<'_> {
    fn env(&self) -> ScriptEnv<'_> {
        let scope = &self.enrollments;
        let env = new_env(scope.context, scope.utils, scope.input).with_tracked_entity_instance(
            TrackedEntityInstanceView::new(&scope.scope.attributes, scope.instance, false),
        );
        match &self.enrollment {
            Some(enrollment) => {
                env.with_enrollment(EnrollmentView::new(enrollment, self.created_enrollment))
            }
            None => env,
        }
    }

    /// Decides with the before script whether the latest event of the stage is continued or a
    /// new event is created.
    fn continue_event(&mut self, mut event: Event) -> TransformerResult<Option<Event>> {
        let Some(script) = &self.mapped_stage.before_script else {
            return Ok(Some(event));
        };
        let executor = &*self.enrollments.services.executor;
        let decision = {
            let output = WritableEvent::new(
                self.enrollments.context,
                self.program,
                self.stage,
                &mut event,
                false,
            );
            let mut env = self.env().with_output(ScriptOutput::Event(output));
            env.run_event_decision(executor, script)?
        };
        debug!(?decision, program_stage = %self.stage.name, "Decision about existing event");
        match decision {
            None | Some(EventDecisionType::Break) => {
                info!(
                    program_stage = %self.stage.name,
                    "Processing of existing event has been cancelled by before script. A new event will be created."
                );
                Ok(None)
            }
            Some(EventDecisionType::NewEvent) if self.stage.repeatable => Ok(None),
            Some(EventDecisionType::NewEvent | EventDecisionType::Continue) => Ok(Some(event)),
        }
    }

    fn organization_unit_id(&self, enrollment: &Enrollment) -> TransformerResult<Option<String>> {
        let scope = &self.enrollments;
        let unit = match &scope.mapping.event_org_lookup_script {
            Some(script) => lookup_organization_unit(scope.services, &mut self.env(), script)?,
            None => match enrollment.org_unit_id.as_deref() {
                Some(id) => find_organization_unit(scope.services, &id_reference(id)?)?,
                None => None,
            },
        };
        Ok(unit.map(|unit| unit.id))
    }
}

impl ResolveStages for EventStages<'_> {
    type Resource = Event;

    fn by_id(&mut self, id: &str) -> TransformerResult<Option<Event>> {
        self.enrollments.services.events.find_by_id(id)
    }

    fn by_identifier(&mut self) -> TransformerResult<Option<Event>> {
        Ok(None)
    }

    fn by_active_lookup(&mut self) -> TransformerResult<Option<Event>> {
        let Some(enrollment_id) = self.enrollment.as_ref().and_then(|e| e.id.clone()) else {
            return Ok(None);
        };
        let latest = self
            .enrollments
            .services
            .events
            .find_by_enrollment_and_stage(&enrollment_id, &self.stage.id)?
            .into_iter()
            .max_by_key(|event| event.event_date);
        match latest {
            Some(event) => self.continue_event(event),
            None => Ok(None),
        }
    }

    fn create(&mut self, id: Option<String>) -> TransformerResult<Option<Event>> {
        let stage_name = &self.mapped_stage.name;
        if !self.mapped_stage.creation_enabled {
            info!(program_stage = %stage_name, "Creation of events is disabled.");
            return Ok(None);
        }
        let executor = &*self.enrollments.services.executor;
        if let Some(script) = &self.mapped_stage.creation_applicable_script {
            if !self.env().run_boolean(executor, script)? {
                info!(program_stage = %stage_name, "Event is not applicable for creation.");
                return Ok(None);
            }
        }

        if self.enrollment.is_none() {
            let Some(created) = self
                .enrollments
                .create(Some(Uid::generate().as_str().to_owned()))?
            else {
                info!(program_stage = %stage_name, "Enrollment of new event could not be created.");
                return Ok(None);
            };
            if !is_applicable(self.enrollment_statuses, &created.status) {
                info!(program_stage = %stage_name, "Status of new enrollment is not applicable.");
                return Ok(None);
            }
            self.enrollment = Some(created);
            self.created_enrollment = true;
        }
        let Some(enrollment) = self.enrollment.as_ref() else {
            return Ok(None);
        };

        let Some(org_unit_id) = self.organization_unit_id(enrollment)? else {
            info!(program_stage = %stage_name, "Organization unit of event could not be determined.");
            return Ok(None);
        };

        let scope = &self.enrollments;
        let event_date = if self.mapped_stage.event_date_is_incident {
            enrollment.incident_date
        } else {
            match &scope.mapping.event_date_lookup_script {
                Some(script) => self.env().run_date_time(executor, script)?,
                None => None,
            }
            .or_else(|| scope.input.last_updated())
        }
        .unwrap_or_else(|| scope.context.now());

        let mut event = Event::new(id, self.program.id.as_str(), self.stage.id.as_str());
        event.enrollment_id = enrollment.id.clone();
        event.tracked_entity_instance_id = scope.instance.id.clone();
        event.org_unit_id = Some(org_unit_id);
        event.event_date = Some(event_date);
        event.due_date = Some(event_date);

        if let Some(script) = &self.mapped_stage.creation_script {
            let created = {
                let output =
                    WritableEvent::new(scope.context, self.program, self.stage, &mut event, true);
                let mut env = self.env().with_output(ScriptOutput::Event(output));
                env.run_boolean(executor, script)?
            };
            if !created {
                info!(program_stage = %stage_name, "Creation script declined the event.");
                return Ok(None);
            }
        }
        Ok(Some(event))
    }
}
