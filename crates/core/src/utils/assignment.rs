use super::ScriptUtils;
use crate::constants::ASSIGNMENT_UTILS;
use crate::context::TransformerContext;
use crate::store::FhirDhisAssignmentStore;
use crate::{TransformerError, TransformerResult};
use fhir::{FhirResourceType, IdElement};
use std::any::Any;
use std::sync::Arc;

/// The DHIS2 ids that FHIR resources of the request's client have been assigned.
pub struct AssignmentUtils {
    store: Arc<dyn FhirDhisAssignmentStore>,
}

impl AssignmentUtils {
    pub fn new(store: Arc<dyn FhirDhisAssignmentStore>) -> Self {
        Self { store }
    }

    /// The DHIS2 id of the resource `fhir_id` names.
    ///
    /// Types whose ids are synchronised, and requests that use DHIS2 ids, map the FHIR id to
    /// itself. Otherwise the id assigned for the request's FHIR client is looked up.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Script`] if the id has no resource type,
    /// [`TransformerError::Mapping`] if the type is not supported and [`TransformerError::Fatal`]
    /// if the request does not belong to a FHIR client.
    pub fn get_mapped_dhis_id(
        &self,
        context: &TransformerContext,
        fhir_id: Option<&IdElement>,
    ) -> TransformerResult<Option<String>> {
        let Some((fhir_id, id_part)) = fhir_id.and_then(|id| id.id_part().map(|part| (id, part)))
        else {
            return Ok(None);
        };
        let type_name = fhir_id.resource_type().ok_or_else(|| {
            TransformerError::Script(format!("FHIR resource type is not included: {fhir_id}"))
        })?;
        let resource_type = FhirResourceType::from_name(type_name).map_err(|_| {
            TransformerError::Mapping(format!(
                "FHIR ID contains unsupported resource type: {type_name}"
            ))
        })?;
        if resource_type.is_sync_dhis_id() || context.request().is_dhis_fhir_id() {
            return Ok(Some(id_part.to_owned()));
        }
        let client_id = context.request().fhir_client_id().ok_or_else(|| {
            TransformerError::Fatal(format!(
                "Assignment of {fhir_id} requires a request of a FHIR client."
            ))
        })?;
        self.store
            .find_first_dhis_resource_id(client_id, resource_type, id_part)
    }
}

impl ScriptUtils for AssignmentUtils {
    fn name(&self) -> &'static str {
        ASSIGNMENT_UTILS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
