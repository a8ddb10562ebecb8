use super::{
    new_env, DataValueSetTransformer, EnrollmentTransformer, FhirToDhisTransformer,
    OrganizationUnitTransformer, ProgramStageTransformer, TrackedEntityTransformer,
    TransformOutcome, TransformerServices,
};
use crate::config::CoreConfig;
use crate::context::{FhirRequest, TransformerContext};
use crate::metadata::{ResourceSystem, Rule};
use crate::script::ScriptValue;
use crate::store::ResourceAction;
use crate::utils::TransformerUtils;
use crate::{TransformerError, TransformerResult};
use dhis::{DhisResource, DhisResourceType};
use fhir::FhirResource;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Candidate rules of one input resource and the position of the next rule to try.
#[derive(Clone, Debug)]
pub struct TransformerRequest {
    input: Arc<FhirResource>,
    rules: Vec<Arc<Rule>>,
    next: usize,
}

impl TransformerRequest {
    pub fn input(&self) -> &Arc<FhirResource> {
        &self.input
    }

    /// All candidate rules in evaluation order.
    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn is_first_rule(&self) -> bool {
        self.next == 0
    }

    pub fn has_remaining_rules(&self) -> bool {
        self.next < self.rules.len()
    }
}

/// The outcome of one rule, with the request to continue with if further rules may apply.
#[derive(Debug)]
pub struct TransformerRequestOutcome {
    pub outcome: TransformOutcome,
    pub next_request: Option<TransformerRequest>,
}

/// Selects the rules of an input resource and applies them with the transformer of their kind.
pub struct TransformerService {
    config: Arc<CoreConfig>,
    services: Arc<TransformerServices>,
    utils: TransformerUtils,
    resource_systems: Vec<ResourceSystem>,
    transformers: HashMap<DhisResourceType, Box<dyn FhirToDhisTransformer>>,
}

impl TransformerService {
    /// A service with a transformer for every DHIS2 resource kind.
    pub fn new(
        config: Arc<CoreConfig>,
        services: Arc<TransformerServices>,
        utils: TransformerUtils,
        resource_systems: Vec<ResourceSystem>,
    ) -> Self {
        let transformers: Vec<Box<dyn FhirToDhisTransformer>> = vec![
            Box::new(TrackedEntityTransformer::new(Arc::clone(&services))),
            Box::new(EnrollmentTransformer::new(Arc::clone(&services))),
            Box::new(ProgramStageTransformer::new(Arc::clone(&services))),
            Box::new(OrganizationUnitTransformer::new(Arc::clone(&services))),
            Box::new(DataValueSetTransformer::new(Arc::clone(&services))),
        ];
        Self::with_transformers(config, services, utils, resource_systems, transformers)
    }

    /// A service with exactly the given transformers. A later transformer replaces an earlier one
    /// of the same kind.
    pub fn with_transformers(
        config: Arc<CoreConfig>,
        services: Arc<TransformerServices>,
        utils: TransformerUtils,
        resource_systems: Vec<ResourceSystem>,
        transformers: Vec<Box<dyn FhirToDhisTransformer>>,
    ) -> Self {
        Self {
            config,
            services,
            utils,
            resource_systems,
            transformers: transformers
                .into_iter()
                .map(|t| (t.dhis_resource_type(), t))
                .collect(),
        }
    }

    pub fn utils(&self) -> &TransformerUtils {
        &self.utils
    }

    /// The context of one transformation, with the configured resource systems.
    pub fn create_context(&self, request: FhirRequest) -> TransformerContext {
        let request = request.with_resource_systems(self.resource_systems.iter().cloned());
        TransformerContext::new(request, Arc::clone(&self.config))
    }

    /// Collects the candidate rules of `input`.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Data`] if the input is not of a supported resource type.
    pub fn create_transformer_request(
        &self,
        _context: &TransformerContext,
        input: Arc<FhirResource>,
        contained: bool,
    ) -> TransformerResult<TransformerRequest> {
        let resource_type = input.resource_type().ok_or_else(|| {
            TransformerError::Data(format!(
                "Resource type {} is not supported.",
                input.resource_type_name()
            ))
        })?;
        let codes = self.utils.code_utils()?.get_resource_codes(&input)?;
        let rules = self
            .services
            .rules
            .find_applicable_rules(resource_type, &codes)?
            .into_iter()
            .filter(|rule| !contained || rule.contained_allowed)
            .collect::<Vec<_>>();
        debug!(
            resource = %input.id_element(),
            candidates = rules.len(),
            contained,
            "Collected candidate rules"
        );
        Ok(TransformerRequest {
            input,
            rules,
            next: 0,
        })
    }

    /// Applies the remaining rules of `request` until one produces an outcome.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Fatal`] if no transformer handles the kind of a rule. Errors of
    /// scripts and transformers are returned unchanged.
    pub fn transform_request(
        &self,
        context: &TransformerContext,
        mut request: TransformerRequest,
    ) -> TransformerResult<Option<TransformerRequestOutcome>> {
        while request.next < request.rules.len() {
            let rule = Arc::clone(&request.rules[request.next]);
            request.next += 1;
            if !rule.enabled || !rule.imp_enabled {
                debug!(rule = %rule.name, "Rule is disabled for import");
                continue;
            }

            let kind = rule.dhis_resource_type();
            let transformer = self.transformers.get(&kind).ok_or_else(|| {
                TransformerError::Fatal(format!(
                    "No transformer has been registered for DHIS2 resource type {kind}."
                ))
            })?;
            if !self.is_applicable(context, &request.input, &rule)? {
                debug!(rule = %rule.name, "Rule is not applicable");
                continue;
            }

            let Some(outcome) = transformer.transform(context, &self.utils, &request.input, &rule)?
            else {
                continue;
            };
            info!(
                "Rule {} used successfully for transformation of {} (stop={}).",
                rule.name,
                request.input.id_element(),
                rule.stop
            );
            let next_request = (!rule.stop && request.has_remaining_rules()).then_some(request);
            return Ok(Some(TransformerRequestOutcome {
                outcome,
                next_request,
            }));
        }
        info!("No matching rule for {}.", request.input.id_element());
        Ok(None)
    }

    /// The outcome of the first rule that applies to `input`.
    pub fn transform(
        &self,
        context: &TransformerContext,
        input: Arc<FhirResource>,
    ) -> TransformerResult<Option<TransformOutcome>> {
        let request = self.create_transformer_request(context, input, false)?;
        Ok(self
            .transform_request(context, request)?
            .map(|result| result.outcome))
    }

    /// Saves the dependents of `outcome` and then its resource.
    pub fn save(&self, outcome: &TransformOutcome) -> TransformerResult<()> {
        for (resource, action) in &outcome.dependents {
            self.save_resource(resource, *action)?;
        }
        self.save_resource(&outcome.resource, outcome.action)
    }

    fn save_resource(&self, resource: &DhisResource, action: ResourceAction) -> TransformerResult<()> {
        let services = &self.services;
        match resource {
            DhisResource::TrackedEntity(instance) => services.tracked_entities.save(instance, action),
            DhisResource::Enrollment(enrollment) => services.enrollments.save(enrollment, action),
            DhisResource::Event(event) => services.events.save(event, action),
            DhisResource::DataValueSet(set) => services.data_value_sets.save(set, action),
            DhisResource::OrganizationUnit(unit) => {
                debug!(id = %unit.id, "Organization units are not written");
                Ok(())
            }
        }
    }

    fn is_applicable(
        &self,
        context: &TransformerContext,
        input: &Arc<FhirResource>,
        rule: &Rule,
    ) -> TransformerResult<bool> {
        let Some(script) = &rule.applicable_script else {
            return Ok(true);
        };
        match new_env(context, &self.utils, input).run(&*self.services.executor, script)? {
            ScriptValue::Boolean(applicable) => Ok(applicable),
            ScriptValue::Null => Ok(false),
            other => {
                debug!(
                    rule = %rule.name,
                    value = other.type_name(),
                    "Applicable script did not return a boolean"
                );
                Ok(false)
            }
        }
    }
}
