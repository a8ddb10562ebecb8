//! Requests and the per-transformation context.

use crate::config::CoreConfig;
use crate::metadata::ResourceSystem;
use crate::{TransformerError, TransformerResult};
use chrono::{DateTime, Utc};
use dhis::{DhisFhirResourceId, Reference, ReferenceType, Uid};
use fhir::{FhirResourceType, FhirVersion};
use std::cell::RefCell;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// The inbound request that triggered a transformation.
#[derive(Clone, Debug)]
pub struct FhirRequest {
    version: FhirVersion,
    resource_type: Option<FhirResourceType>,
    resource_id: Option<String>,
    last_updated: Option<DateTime<Utc>>,
    dhis_resource_id: Option<String>,
    dhis_fhir_id: bool,
    remote: bool,
    fhir_client_id: Option<Uuid>,
    fhir_client_resource_id: Option<Uuid>,
    resource_systems: HashMap<FhirResourceType, ResourceSystem>,
}

impl FhirRequest {
    pub fn new(version: FhirVersion) -> Self {
        Self {
            version,
            resource_type: None,
            resource_id: None,
            last_updated: None,
            dhis_resource_id: None,
            dhis_fhir_id: false,
            remote: false,
            fhir_client_id: None,
            fhir_client_resource_id: None,
            resource_systems: HashMap::new(),
        }
    }

    pub fn with_resource(mut self, resource_type: FhirResourceType, id: Option<String>) -> Self {
        self.resource_type = Some(resource_type);
        self.resource_id = id;
        self
    }

    pub fn with_last_updated(mut self, last_updated: DateTime<Utc>) -> Self {
        self.last_updated = Some(last_updated);
        self
    }

    /// Binds the request to an existing target resource.
    pub fn with_dhis_resource_id(mut self, id: impl Into<String>) -> Self {
        self.dhis_resource_id = Some(id.into());
        self
    }

    /// FHIR ids are DHIS2 ids (no identifier reconciliation needed).
    pub fn with_dhis_fhir_id(mut self, dhis_fhir_id: bool) -> Self {
        self.dhis_fhir_id = dhis_fhir_id;
        self
    }

    /// The resource was polled from a remote FHIR client rather than pushed.
    pub fn with_remote_client(mut self, client_id: Uuid, client_resource_id: Uuid) -> Self {
        self.remote = true;
        self.fhir_client_id = Some(client_id);
        self.fhir_client_resource_id = Some(client_resource_id);
        self
    }

    /// The remote client to fetch referenced resources from, without marking the request remote.
    pub fn with_fhir_client(mut self, client_id: Uuid) -> Self {
        self.fhir_client_id = Some(client_id);
        self
    }

    pub fn with_resource_systems(
        mut self,
        resource_systems: impl IntoIterator<Item = ResourceSystem>,
    ) -> Self {
        self.resource_systems.extend(
            resource_systems
                .into_iter()
                .map(|rs| (rs.fhir_resource_type, rs)),
        );
        self
    }

    pub fn version(&self) -> FhirVersion {
        self.version
    }

    pub fn resource_type(&self) -> Option<FhirResourceType> {
        self.resource_type
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn dhis_resource_id(&self) -> Option<&str> {
        self.dhis_resource_id.as_deref()
    }

    pub fn is_dhis_fhir_id(&self) -> bool {
        self.dhis_fhir_id
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn fhir_client_id(&self) -> Option<Uuid> {
        self.fhir_client_id
    }

    pub fn fhir_client_resource_id(&self) -> Option<Uuid> {
        self.fhir_client_resource_id
    }

    pub fn resource_system(&self, resource_type: FhirResourceType) -> Option<&ResourceSystem> {
        self.resource_systems.get(&resource_type)
    }
}

type CacheKey = (FhirResourceType, String);

/// State of one transformation. Created per input resource and dropped afterwards.
///
/// The context is not `Sync`; it belongs to the call that transforms one resource.
pub struct TransformerContext {
    request: FhirRequest,
    config: Arc<CoreConfig>,
    identified_references: RefCell<HashMap<CacheKey, Option<fhir::Reference>>>,
}

impl TransformerContext {
    pub fn new(request: FhirRequest, config: Arc<CoreConfig>) -> Self {
        Self {
            request,
            config,
            identified_references: RefCell::new(HashMap::new()),
        }
    }

    pub fn request(&self) -> &FhirRequest {
        &self.request
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// The error a script raises to reject the input resource.
    pub fn fail(&self, message: impl Into<String>) -> TransformerError {
        TransformerError::Data(message.into())
    }

    pub fn is_creation_disabled(&self) -> bool {
        self.config.creation_disabled()
    }

    pub fn resource_system(&self, resource_type: FhirResourceType) -> Option<&ResourceSystem> {
        self.request.resource_system(resource_type)
    }

    /// A DHIS2 reference of the given type (`ID`, `CODE` or `NAME`). A missing value gives none.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Script`] for an unknown type or a blank value.
    pub fn create_reference(
        &self,
        value: Option<&str>,
        reference_type: &str,
    ) -> TransformerResult<Option<Reference>> {
        let Some(value) = value else {
            return Ok(None);
        };
        let reference_type = ReferenceType::from_str(reference_type)
            .map_err(|err| TransformerError::Script(err.to_string()))?;
        Reference::new(value, reference_type)
            .map(Some)
            .map_err(|err| TransformerError::Script(err.to_string()))
    }

    /// The DHIS2 id carried by a FHIR id, which is either a DHIS FHIR id or a bare UID.
    pub fn extract_dhis_id(&self, id: Option<&str>) -> Option<String> {
        let id = id?;
        match DhisFhirResourceId::parse(id) {
            Ok(parsed) => Some(parsed.id),
            Err(_) if Uid::is_valid(id) => Some(id.to_owned()),
            Err(_) => None,
        }
    }

    pub(crate) fn cached_reference(&self, key: &CacheKey) -> Option<Option<fhir::Reference>> {
        self.identified_references.borrow().get(key).cloned()
    }

    pub(crate) fn cache_reference(&self, key: CacheKey, reference: Option<fhir::Reference>) {
        self.identified_references
            .borrow_mut()
            .insert(key, reference);
    }
}
