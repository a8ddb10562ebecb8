use super::resolve::{resolve, ResolveStages};
use super::{
    business_identifier, find_organization_unit, id_reference, new_env, wrong_rule_kind,
    FhirToDhisTransformer, TransformOutcome, TransformerServices,
};
use crate::context::TransformerContext;
use crate::metadata::{ExecutableScript, Rule, RuleKind};
use crate::script::ScriptOutput;
use crate::scripted::OrganizationUnitView;
use crate::store::ResourceAction;
use crate::utils::TransformerUtils;
use crate::{TransformerError, TransformerResult};
use dhis::{DhisResource, DhisResourceType, OrganizationUnit, Reference};
use fhir::FhirResource;
use std::sync::Arc;
use tracing::info;

/// Maps FHIR organizations to existing organization units. Organization units are never created.
pub struct OrganizationUnitTransformer {
    services: Arc<TransformerServices>,
}

impl OrganizationUnitTransformer {
    pub fn new(services: Arc<TransformerServices>) -> Self {
        Self { services }
    }
}

impl FhirToDhisTransformer for OrganizationUnitTransformer {
    fn dhis_resource_type(&self) -> DhisResourceType {
        DhisResourceType::OrganizationUnit
    }

    fn transform(
        &self,
        context: &TransformerContext,
        utils: &TransformerUtils,
        input: &Arc<FhirResource>,
        rule: &Rule,
    ) -> TransformerResult<Option<TransformOutcome>> {
        let RuleKind::OrganizationUnit {
            identifier_lookup_script,
        } = &rule.kind
        else {
            return Err(wrong_rule_kind(rule, self.dhis_resource_type()));
        };
        let mut stages = Stages {
            services: &self.services,
            context,
            utils,
            input,
            identifier_lookup_script: identifier_lookup_script.as_deref(),
        };
        let Some(resolved) = resolve(context, &mut stages)? else {
            info!(rule = %rule.name, "Organization unit does not exist.");
            return Ok(None);
        };

        let unit = resolved.resource;
        let applied = new_env(context, utils, input)
            .with_output(ScriptOutput::OrganizationUnit(OrganizationUnitView::new(&unit)))
            .run_boolean(&*self.services.executor, &rule.transform_script)?;
        if !applied {
            info!(rule = %rule.name, "Transform script did not return true.");
            return Ok(None);
        }
        Ok(Some(TransformOutcome::new(
            rule,
            DhisResource::OrganizationUnit(unit),
            ResourceAction::Update,
        )))
    }
}

struct Stages<'s> {
    services: &'s TransformerServices,
    context: &'s TransformerContext,
    utils: &'s TransformerUtils,
    input: &'s Arc<FhirResource>,
    identifier_lookup_script: Option<&'s ExecutableScript>,
}

impl Stages<'_> {
    fn code(&self) -> TransformerResult<Option<String>> {
        let Some(script) = self.identifier_lookup_script else {
            return business_identifier(self.context, self.utils, self.input);
        };
        let value = new_env(self.context, self.utils, self.input)
            .run(&*self.services.executor, script)?;
        if value.is_null() {
            return Ok(None);
        }
        value.as_str().map(|code| Some(code.to_owned())).ok_or_else(|| {
            TransformerError::Script(format!(
                "Identifier lookup script {} returned a {} instead of a string.",
                script.code,
                value.type_name()
            ))
        })
    }
}

impl ResolveStages for Stages<'_> {
    type Resource = OrganizationUnit;

    fn by_id(&mut self, id: &str) -> TransformerResult<Option<OrganizationUnit>> {
        find_organization_unit(self.services, &id_reference(id)?)
    }

    fn by_identifier(&mut self) -> TransformerResult<Option<OrganizationUnit>> {
        let Some(code) = self.code()? else {
            return Ok(None);
        };
        let reference =
            Reference::code(code).map_err(|err| TransformerError::Mapping(err.to_string()))?;
        find_organization_unit(self.services, &reference)
    }

    fn by_active_lookup(&mut self) -> TransformerResult<Option<OrganizationUnit>> {
        Ok(None)
    }

    fn create(&mut self, _id: Option<String>) -> TransformerResult<Option<OrganizationUnit>> {
        Ok(None)
    }
}
