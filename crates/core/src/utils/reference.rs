use super::ScriptUtils;
use crate::constants::REFERENCE_UTILS;
use crate::context::TransformerContext;
use crate::store::RemoteFhirRepository;
use crate::{TransformerError, TransformerResult};
use fhir::{FhirResource, FhirResourceType, Reference};
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

/// Resolves FHIR references to resources.
pub struct ReferenceUtils {
    remote: Arc<dyn RemoteFhirRepository>,
}

impl ReferenceUtils {
    pub fn new(remote: Arc<dyn RemoteFhirRepository>) -> Self {
        Self { remote }
    }

    /// The resource `reference` points to.
    ///
    /// An embedded or contained resource is returned as is. Otherwise the resource is fetched from
    /// the FHIR client of the current request and embedded into `reference`. Returns none if the
    /// reference is empty or refers to another type than `resource_type`.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Data`] if the reference is local without a contained resource,
    /// has no type or id, or names a resource the client does not have, and
    /// [`TransformerError::Mapping`] if the request has no FHIR client to fetch from.
    pub fn get_resource(
        &self,
        context: &TransformerContext,
        reference: &mut Reference,
        resource_type: Option<FhirResourceType>,
    ) -> TransformerResult<Option<Arc<FhirResource>>> {
        if let Some(resource) = reference.resource() {
            if resource_type.is_some_and(|t| resource.resource_type() != Some(t)) {
                debug!(
                    found = resource.resource_type_name(),
                    "Referenced resource has another type than requested"
                );
                return Ok(None);
            }
            return Ok(Some(Arc::clone(resource)));
        }
        if reference.is_empty() {
            return Ok(None);
        }

        let id = reference.reference_element();
        if id.is_local() {
            return Err(TransformerError::Data(format!(
                "Reference element refers to a contained resource, but no resource is specified: {id}"
            )));
        }
        let final_type = match (id.resource_type(), resource_type) {
            (Some(found), Some(requested)) if found != requested.resource_type_name() => {
                debug!(found, requested = %requested, "Reference names another type than requested");
                return Ok(None);
            }
            (_, Some(requested)) => requested,
            (Some(found), None) => FhirResourceType::from_name(found)?,
            (None, None) => {
                return Err(TransformerError::Data(format!(
                    "Final resource type could not be determined for reference: {id}"
                )))
            }
        };
        let id_part = id.id_part().ok_or_else(|| {
            TransformerError::Data(format!(
                "Reference element does not include an ID part: {id}"
            ))
        })?;

        let client_id = context.request().fhir_client_id().ok_or_else(|| {
            TransformerError::Mapping(
                "Referenced resource cannot be fetched without a FHIR client.".into(),
            )
        })?;
        let resource = self
            .remote
            .find(client_id, final_type, id_part)?
            .ok_or_else(|| {
                TransformerError::Data(format!(
                    "Referenced FHIR resource {id} does not exist for FHIR client {client_id}."
                ))
            })?;
        reference.set_resource(Some(Arc::clone(&resource)));
        Ok(Some(resource))
    }
}

impl ScriptUtils for ReferenceUtils {
    fn name(&self) -> &'static str {
        REFERENCE_UTILS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
