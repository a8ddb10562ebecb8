use super::resolve::{resolve, ResolveStages};
use super::{
    business_identifier, new_env, wrong_rule_kind, FhirToDhisTransformer, TransformOutcome,
    TransformerServices,
};
use crate::context::TransformerContext;
use crate::metadata::{Rule, RuleKind};
use crate::script::ScriptOutput;
use crate::scripted::WritableDataValueSet;
use crate::utils::TransformerUtils;
use crate::TransformerResult;
use dhis::{DataValueSet, DhisResource, DhisResourceType};
use fhir::FhirResource;
use std::sync::Arc;
use tracing::info;

/// Builds aggregate data value sets. A data value set is always written as a whole, so each
/// transformation creates one keyed by the explicit id or the business identifier of the input.
pub struct DataValueSetTransformer {
    services: Arc<TransformerServices>,
}

impl DataValueSetTransformer {
    pub fn new(services: Arc<TransformerServices>) -> Self {
        Self { services }
    }
}

impl FhirToDhisTransformer for DataValueSetTransformer {
    fn dhis_resource_type(&self) -> DhisResourceType {
        DhisResourceType::DataValueSet
    }

    fn transform(
        &self,
        context: &TransformerContext,
        utils: &TransformerUtils,
        input: &Arc<FhirResource>,
        rule: &Rule,
    ) -> TransformerResult<Option<TransformOutcome>> {
        let RuleKind::DataValueSet { data_set_reference } = &rule.kind else {
            return Err(wrong_rule_kind(rule, self.dhis_resource_type()));
        };
        let mut stages = Stages {
            context,
            utils,
            input,
            identifier: None,
        };
        let Some(resolved) = resolve(context, &mut stages)? else {
            return Ok(None);
        };

        let mut set = resolved.resource;
        {
            let mut writable = WritableDataValueSet::new(
                context,
                &*self.services.data_sets,
                &*self.services.organization_units,
                &mut set,
                true,
            );
            if data_set_reference.is_some() {
                writable.set_data_set_id(data_set_reference.as_ref())?;
            }
            let mut env =
                new_env(context, utils, input).with_output(ScriptOutput::DataValueSet(writable));
            if !env.run_boolean(&*self.services.executor, &rule.transform_script)? {
                info!(rule = %rule.name, "Transform script did not return true.");
                return Ok(None);
            }
            env.data_value_set_output()?.validate()?;
        }
        Ok(Some(TransformOutcome::new(
            rule,
            DhisResource::DataValueSet(set),
            resolved.action,
        )))
    }
}

struct Stages<'s> {
    context: &'s TransformerContext,
    utils: &'s TransformerUtils,
    input: &'s Arc<FhirResource>,
    identifier: Option<String>,
}

impl ResolveStages for Stages<'_> {
    type Resource = DataValueSet;

    fn by_id(&mut self, _id: &str) -> TransformerResult<Option<DataValueSet>> {
        Ok(None)
    }

    fn by_identifier(&mut self) -> TransformerResult<Option<DataValueSet>> {
        self.identifier = business_identifier(self.context, self.utils, self.input)?;
        Ok(None)
    }

    fn by_active_lookup(&mut self) -> TransformerResult<Option<DataValueSet>> {
        Ok(None)
    }

    fn create(&mut self, id: Option<String>) -> TransformerResult<Option<DataValueSet>> {
        Ok(Some(DataValueSet::new(id.or_else(|| self.identifier.take()))))
    }
}
