//! In-memory implementations of the store interfaces.
//!
//! They back the CLI and the tests. Metadata comes from a parsed metadata document; DHIS2
//! entities and remote FHIR resources are added programmatically.

use crate::client::AdapterEvent;
use crate::metadata::{
    CodeSet, DhisMetadata, FhirClient, FhirResourceMapping, Metadata, Rule, RuleKind, SystemCode,
};
use crate::store::{
    CodeStore, DataSetMetadataStore, DataValueSetRepository, EnrollmentRepository,
    EventPublisher, EventRepository, FhirClientStore, FhirDhisAssignmentStore,
    OrganizationUnitRepository, ProgramMetadataStore, RemoteFhirRepository, ResourceAction,
    RuleStore, ScriptExecutor, TrackedEntityMetadataStore, TrackedEntityRepository,
};
use crate::transform::TransformerServices;
use crate::{TransformerError, TransformerResult};
use dashmap::DashMap;
use dhis::{
    DataSet, DataValueSet, DhisResourceType, Enrollment, EnrollmentStatus, Event, Identifiable,
    OrganizationUnit, Program, Reference, TrackedEntityAttribute, TrackedEntityAttributes,
    TrackedEntityInstance, TrackedEntityType, Uid,
};
use fhir::{Bundle, FhirResource, FhirResourceType, SystemCodeValue};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

// ============================================================================
// Metadata
// ============================================================================

/// Rules, scripts and codes of one metadata document.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    metadata: Metadata,
}

impl InMemoryMetadataStore {
    pub fn new(metadata: Metadata) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn matches_code_set(&self, code_set: &str, codes: &[SystemCodeValue]) -> bool {
        let Some(set) = self.metadata.code_sets.iter().find(|s| s.code == code_set) else {
            return false;
        };
        codes.iter().any(|value| {
            self.system_code(value)
                .is_some_and(|system_code| set.contains(&system_code.code))
        })
    }

    fn system_code(&self, value: &SystemCodeValue) -> Option<&SystemCode> {
        self.metadata
            .system_codes
            .iter()
            .find(|sc| sc.system_uri == value.system() && sc.system_code == value.code())
    }
}

impl RuleStore for InMemoryMetadataStore {
    fn find_applicable_rules(
        &self,
        fhir_resource_type: FhirResourceType,
        codes: &[SystemCodeValue],
    ) -> TransformerResult<Vec<Arc<Rule>>> {
        let mut rules: Vec<Arc<Rule>> = self
            .metadata
            .rules
            .iter()
            .filter(|rule| rule.fhir_resource_type == fhir_resource_type)
            .filter(|rule| match &rule.applicable_code_set {
                Some(code_set) => self.matches_code_set(code_set, codes),
                None => true,
            })
            .cloned()
            .collect();
        rules.sort_by_key(|rule| (Reverse(rule.evaluation_order), rule.id));
        Ok(rules)
    }

    fn find_rule_by_id(&self, id: Uuid) -> TransformerResult<Option<Arc<Rule>>> {
        Ok(self.metadata.rules.iter().find(|r| r.id == id).cloned())
    }

    fn find_tracked_entity_rule(
        &self,
        tracked_entity_type: &TrackedEntityType,
    ) -> TransformerResult<Option<Arc<Rule>>> {
        Ok(self
            .metadata
            .rules
            .iter()
            .find(|rule| {
                rule.enabled
                    && matches!(
                        &rule.kind,
                        RuleKind::TrackedEntity { tracked_entity, .. }
                            if tracked_entity.enabled
                                && tracked_entity_type
                                    .is_reference(&tracked_entity.tracked_entity_type_reference)
                    )
            })
            .cloned())
    }

    fn find_resource_mapping(
        &self,
        fhir_resource_type: FhirResourceType,
    ) -> TransformerResult<Option<Arc<FhirResourceMapping>>> {
        Ok(self
            .metadata
            .resource_mappings
            .iter()
            .find(|m| m.fhir_resource_type == Some(fhir_resource_type))
            .cloned())
    }
}

impl CodeStore for InMemoryMetadataStore {
    fn find_by_systems_and_codes(
        &self,
        systems: &[String],
        system_code_values: &[String],
    ) -> TransformerResult<Vec<SystemCode>> {
        let codes: HashSet<&str> = system_code_values
            .iter()
            .filter_map(|value| SystemCodeValue::parse(value).ok())
            .filter_map(|value| self.system_code(&value))
            .map(|sc| sc.code.as_str())
            .collect();
        Ok(self
            .metadata
            .system_codes
            .iter()
            .filter(|sc| systems.contains(&sc.system_uri) && codes.contains(sc.code.as_str()))
            .cloned()
            .collect())
    }

    fn find_system_code(&self, value: &SystemCodeValue) -> TransformerResult<Option<SystemCode>> {
        Ok(self.system_code(value).cloned())
    }

    fn find_code_set(&self, code: &str) -> TransformerResult<Option<Arc<CodeSet>>> {
        Ok(self.metadata.code_sets.iter().find(|s| s.code == code).cloned())
    }

    fn find_by_mapping_codes(&self, mapping_codes: &[String]) -> TransformerResult<Vec<SystemCode>> {
        Ok(self
            .metadata
            .system_codes
            .iter()
            .filter(|sc| {
                mapping_codes.iter().any(|mapping_code| {
                    sc.code == *mapping_code || sc.mapped_code.as_ref() == Some(mapping_code)
                })
            })
            .cloned()
            .collect())
    }
}

// ============================================================================
// DHIS2
// ============================================================================

/// Access to the `Option<String>` id of a tracker entity.
trait StoredEntity: Clone {
    const KIND: DhisResourceType;

    fn stored_id(&self) -> Option<&str>;

    fn assign_id(&mut self, id: String);
}

macro_rules! stored_entity {
    ($($t:ty => $kind:expr),+ $(,)?) => {
        $(
            impl StoredEntity for $t {
                const KIND: DhisResourceType = $kind;

                fn stored_id(&self) -> Option<&str> {
                    self.id.as_deref()
                }

                fn assign_id(&mut self, id: String) {
                    self.id = Some(id);
                }
            }
        )+
    };
}

stored_entity!(
    TrackedEntityInstance => DhisResourceType::TrackedEntity,
    Enrollment => DhisResourceType::Enrollment,
    Event => DhisResourceType::ProgramStageEvent,
    DataValueSet => DhisResourceType::DataValueSet,
);

#[derive(Default)]
struct DhisState {
    attributes: Vec<TrackedEntityAttribute>,
    tracked_entity_types: Vec<Arc<TrackedEntityType>>,
    programs: Vec<Arc<Program>>,
    data_sets: Vec<Arc<DataSet>>,
    organization_units: Vec<OrganizationUnit>,
    tracked_entity_instances: Vec<TrackedEntityInstance>,
    enrollments: Vec<Enrollment>,
    events: Vec<Event>,
    data_value_sets: Vec<DataValueSet>,
    saves: Vec<(DhisResourceType, ResourceAction)>,
}

/// DHIS2 metadata and tracker entities held in memory.
#[derive(Default)]
pub struct InMemoryDhisStore {
    state: RwLock<DhisState>,
}

impl InMemoryDhisStore {
    /// A store with the metadata of a metadata document and no tracker entities.
    pub fn from_metadata(metadata: &DhisMetadata) -> Self {
        let state = DhisState {
            attributes: metadata.tracked_entity_attributes.clone(),
            tracked_entity_types: metadata
                .tracked_entity_types
                .iter()
                .cloned()
                .map(Arc::new)
                .collect(),
            programs: metadata.programs.iter().cloned().map(Arc::new).collect(),
            data_sets: metadata.data_sets.iter().cloned().map(Arc::new).collect(),
            organization_units: metadata.organization_units.clone(),
            ..DhisState::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DhisState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DhisState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_data_set(&self, data_set: DataSet) {
        self.write().data_sets.push(Arc::new(data_set));
    }

    pub fn add_organization_unit(&self, unit: OrganizationUnit) {
        self.write().organization_units.push(unit);
    }

    pub fn add_tracked_entity_instance(&self, instance: TrackedEntityInstance) {
        self.write().tracked_entity_instances.push(instance);
    }

    pub fn add_enrollment(&self, enrollment: Enrollment) {
        self.write().enrollments.push(enrollment);
    }

    pub fn add_event(&self, event: Event) {
        self.write().events.push(event);
    }

    pub fn tracked_entity_instances(&self) -> Vec<TrackedEntityInstance> {
        self.read().tracked_entity_instances.clone()
    }

    pub fn enrollments(&self) -> Vec<Enrollment> {
        self.read().enrollments.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.read().events.clone()
    }

    pub fn data_value_sets(&self) -> Vec<DataValueSet> {
        self.read().data_value_sets.clone()
    }

    /// Kind and action of every save, in order.
    pub fn saves(&self) -> Vec<(DhisResourceType, ResourceAction)> {
        self.read().saves.clone()
    }
}

fn find_stored<T: StoredEntity>(entities: &[T], id: &str) -> Option<T> {
    entities.iter().find(|e| e.stored_id() == Some(id)).cloned()
}

/// Stores `entity`. New entities without an id get a generated UID.
fn save_stored<T: StoredEntity>(
    entities: &mut Vec<T>,
    entity: &T,
    action: ResourceAction,
) -> TransformerResult<()> {
    let position = entity
        .stored_id()
        .and_then(|id| entities.iter().position(|e| e.stored_id() == Some(id)));
    match (action, position) {
        (ResourceAction::Create, Some(_)) => Err(TransformerError::Data(format!(
            "{} {} already exists.",
            T::KIND,
            entity.stored_id().unwrap_or_default()
        ))),
        (ResourceAction::Create, None) => {
            let mut created = entity.clone();
            if created.stored_id().is_none() {
                created.assign_id(Uid::generate().as_str().to_owned());
            }
            entities.push(created);
            Ok(())
        }
        (ResourceAction::Update, Some(index)) => {
            entities[index] = entity.clone();
            Ok(())
        }
        (ResourceAction::Update, None) => Err(TransformerError::Data(format!(
            "{} {} does not exist.",
            T::KIND,
            entity.stored_id().unwrap_or("without ID")
        ))),
    }
}

impl TrackedEntityMetadataStore for InMemoryDhisStore {
    fn attributes(&self) -> TransformerResult<Arc<TrackedEntityAttributes>> {
        Ok(Arc::new(TrackedEntityAttributes::new(
            self.read().attributes.clone(),
        )))
    }

    fn find_type(&self, reference: &Reference) -> TransformerResult<Option<Arc<TrackedEntityType>>> {
        Ok(self
            .read()
            .tracked_entity_types
            .iter()
            .find(|t| t.is_reference(reference))
            .cloned())
    }
}

impl ProgramMetadataStore for InMemoryDhisStore {
    fn find_program(&self, reference: &Reference) -> TransformerResult<Option<Arc<Program>>> {
        Ok(self
            .read()
            .programs
            .iter()
            .find(|p| p.is_reference(reference))
            .cloned())
    }
}

impl DataSetMetadataStore for InMemoryDhisStore {
    fn find_data_set(&self, reference: &Reference) -> TransformerResult<Option<Arc<DataSet>>> {
        Ok(self
            .read()
            .data_sets
            .iter()
            .find(|d| d.is_reference(reference))
            .cloned())
    }
}

impl OrganizationUnitRepository for InMemoryDhisStore {
    fn find_by_reference(&self, reference: &Reference) -> TransformerResult<Option<OrganizationUnit>> {
        Ok(self
            .read()
            .organization_units
            .iter()
            .find(|u| u.is_reference(reference))
            .cloned())
    }
}

impl TrackedEntityRepository for InMemoryDhisStore {
    fn find_by_id(&self, id: &str) -> TransformerResult<Option<TrackedEntityInstance>> {
        Ok(find_stored(&self.read().tracked_entity_instances, id))
    }

    fn find_by_attribute_value(
        &self,
        tracked_entity_type_id: &str,
        attribute_id: &str,
        value: &str,
        max: usize,
    ) -> TransformerResult<Vec<TrackedEntityInstance>> {
        Ok(self
            .read()
            .tracked_entity_instances
            .iter()
            .filter(|tei| tei.tracked_entity_type_id == tracked_entity_type_id)
            .filter(|tei| {
                tei.attribute(attribute_id)
                    .and_then(|a| a.value.as_deref())
                    == Some(value)
            })
            .take(max)
            .cloned()
            .collect())
    }

    fn save(
        &self,
        instance: &TrackedEntityInstance,
        action: ResourceAction,
    ) -> TransformerResult<()> {
        let mut state = self.write();
        save_stored(&mut state.tracked_entity_instances, instance, action)?;
        state.saves.push((DhisResourceType::TrackedEntity, action));
        Ok(())
    }
}

impl EnrollmentRepository for InMemoryDhisStore {
    fn find_by_id(&self, id: &str) -> TransformerResult<Option<Enrollment>> {
        Ok(find_stored(&self.read().enrollments, id))
    }

    fn find_latest_active(
        &self,
        program_id: &str,
        tracked_entity_instance_id: &str,
    ) -> TransformerResult<Option<Enrollment>> {
        Ok(self
            .read()
            .enrollments
            .iter()
            .filter(|e| {
                e.program_id == program_id
                    && e.tracked_entity_instance_id.as_deref() == Some(tracked_entity_instance_id)
                    && e.status == EnrollmentStatus::Active
            })
            .max_by_key(|e| e.enrollment_date)
            .cloned())
    }

    fn save(&self, enrollment: &Enrollment, action: ResourceAction) -> TransformerResult<()> {
        let mut state = self.write();
        save_stored(&mut state.enrollments, enrollment, action)?;
        state.saves.push((DhisResourceType::Enrollment, action));
        Ok(())
    }
}

impl EventRepository for InMemoryDhisStore {
    fn find_by_id(&self, id: &str) -> TransformerResult<Option<Event>> {
        Ok(find_stored(&self.read().events, id))
    }

    fn find_by_enrollment_and_stage(
        &self,
        enrollment_id: &str,
        program_stage_id: &str,
    ) -> TransformerResult<Vec<Event>> {
        Ok(self
            .read()
            .events
            .iter()
            .filter(|e| {
                e.enrollment_id.as_deref() == Some(enrollment_id)
                    && e.program_stage_id == program_stage_id
            })
            .cloned()
            .collect())
    }

    fn save(&self, event: &Event, action: ResourceAction) -> TransformerResult<()> {
        let mut state = self.write();
        save_stored(&mut state.events, event, action)?;
        state.saves.push((DhisResourceType::ProgramStageEvent, action));
        Ok(())
    }
}

impl DataValueSetRepository for InMemoryDhisStore {
    /// Data value sets are imported as a whole and replace a stored set with the same id.
    fn save(&self, data_value_set: &DataValueSet, action: ResourceAction) -> TransformerResult<()> {
        let mut state = self.write();
        if let Some(id) = data_value_set.id.as_deref() {
            state.data_value_sets.retain(|s| s.id.as_deref() != Some(id));
        }
        save_stored(&mut state.data_value_sets, data_value_set, ResourceAction::Create)?;
        state.saves.push((DhisResourceType::DataValueSet, action));
        Ok(())
    }
}

// ============================================================================
// FHIR
// ============================================================================

/// Remote FHIR resources of each client, served from bundles.
#[derive(Default)]
pub struct BundleRemoteRepository {
    bundles: DashMap<Uuid, Vec<Bundle>>,
}

impl BundleRemoteRepository {
    pub fn add(&self, client_id: Uuid, bundle: Bundle) {
        self.bundles.entry(client_id).or_default().push(bundle);
    }

    fn bundle_of(
        &self,
        client_id: Uuid,
        fhir_resource_type: FhirResourceType,
        id: &str,
    ) -> Option<(Bundle, Arc<FhirResource>)> {
        let bundles = self.bundles.get(&client_id)?;
        bundles.iter().find_map(|bundle| {
            bundle
                .find(fhir_resource_type.resource_type_name(), id)
                .map(|resource| (bundle.clone(), Arc::clone(resource)))
        })
    }
}

impl RemoteFhirRepository for BundleRemoteRepository {
    fn find(
        &self,
        client_id: Uuid,
        fhir_resource_type: FhirResourceType,
        id: &str,
    ) -> TransformerResult<Option<Arc<FhirResource>>> {
        Ok(self
            .bundle_of(client_id, fhir_resource_type, id)
            .map(|(_, resource)| resource))
    }

    /// The whole bundle that contains the resource, or an empty bundle.
    fn find_with_parents(
        &self,
        client_id: Uuid,
        fhir_resource_type: FhirResourceType,
        id: &str,
        _parent_search_param: &str,
    ) -> TransformerResult<Bundle> {
        Ok(self
            .bundle_of(client_id, fhir_resource_type, id)
            .map(|(bundle, _)| bundle)
            .unwrap_or_default())
    }
}

/// Assigned DHIS2 ids keyed by client, resource type and FHIR id.
#[derive(Default)]
pub struct InMemoryAssignmentStore {
    assignments: DashMap<(Uuid, FhirResourceType, String), String>,
}

impl InMemoryAssignmentStore {
    /// Assigns `dhis_resource_id` unless the FHIR resource already has an assigned id.
    pub fn assign(
        &self,
        fhir_client_id: Uuid,
        fhir_resource_type: FhirResourceType,
        fhir_resource_id: &str,
        dhis_resource_id: &str,
    ) {
        self.assignments
            .entry((fhir_client_id, fhir_resource_type, fhir_resource_id.to_owned()))
            .or_insert_with(|| dhis_resource_id.to_owned());
    }
}

impl FhirDhisAssignmentStore for InMemoryAssignmentStore {
    fn find_first_dhis_resource_id(
        &self,
        fhir_client_id: Uuid,
        fhir_resource_type: FhirResourceType,
        fhir_resource_id: &str,
    ) -> TransformerResult<Option<String>> {
        Ok(self
            .assignments
            .get(&(fhir_client_id, fhir_resource_type, fhir_resource_id.to_owned()))
            .map(|id| id.value().clone()))
    }
}

/// FHIR clients whose saves become visible on flush.
#[derive(Default)]
pub struct InMemoryFhirClientStore {
    committed: RwLock<HashMap<Uuid, FhirClient>>,
    pending: Mutex<Vec<(FhirClient, ResourceAction)>>,
}

impl InMemoryFhirClientStore {
    pub fn with_clients(clients: impl IntoIterator<Item = FhirClient>) -> Self {
        Self {
            committed: RwLock::new(clients.into_iter().map(|c| (c.id, c)).collect()),
            pending: Mutex::new(Vec::new()),
        }
    }
}

impl FhirClientStore for InMemoryFhirClientStore {
    fn find_by_id(&self, id: Uuid) -> TransformerResult<Option<FhirClient>> {
        Ok(self
            .committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    fn save(&self, client: &FhirClient, action: ResourceAction) -> TransformerResult<()> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((client.clone(), action));
        Ok(())
    }

    fn flush(&self) -> TransformerResult<()> {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        let mut committed = self.committed.write().unwrap_or_else(PoisonError::into_inner);
        for (client, action) in pending {
            if action == ResourceAction::Update && !committed.contains_key(&client.id) {
                return Err(TransformerError::Data(format!(
                    "FHIR client {} does not exist.",
                    client.id
                )));
            }
            committed.insert(client.id, client);
        }
        Ok(())
    }
}

/// Keeps every published event.
#[derive(Default)]
pub struct CollectingEventPublisher {
    events: Mutex<Vec<AdapterEvent>>,
}

impl CollectingEventPublisher {
    pub fn events(&self) -> Vec<AdapterEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventPublisher for CollectingEventPublisher {
    fn publish(&self, event: &AdapterEvent) -> TransformerResult<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Transformer collaborators over the in-memory stores.
pub fn transformer_services(
    metadata: Arc<InMemoryMetadataStore>,
    dhis: Arc<InMemoryDhisStore>,
    executor: Arc<dyn ScriptExecutor>,
) -> TransformerServices {
    TransformerServices {
        executor,
        rules: metadata,
        tracked_entity_metadata: Arc::clone(&dhis) as Arc<dyn TrackedEntityMetadataStore>,
        programs: Arc::clone(&dhis) as Arc<dyn ProgramMetadataStore>,
        data_sets: Arc::clone(&dhis) as Arc<dyn DataSetMetadataStore>,
        organization_units: Arc::clone(&dhis) as Arc<dyn OrganizationUnitRepository>,
        tracked_entities: Arc::clone(&dhis) as Arc<dyn TrackedEntityRepository>,
        enrollments: Arc::clone(&dhis) as Arc<dyn EnrollmentRepository>,
        events: Arc::clone(&dhis) as Arc<dyn EventRepository>,
        data_value_sets: dhis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::parse_metadata;
    use crate::test_support::{fhir_resource, organization_unit};
    use chrono::{TimeZone, Utc};

    const DOCUMENT: &str = r#"
scripts:
  - {code: TRANSFORM, type: TRANSFORM_TO_DHIS, returnType: BOOLEAN, source: "true"}
codes:
  - {code: VACCINE_MMR, name: MMR}
  - {code: VACCINE_BCG, name: BCG}
systems:
  - {code: CVX, systemUri: "http://hl7.org/fhir/sid/cvx"}
  - {code: LOCAL, systemUri: "http://example.org/vaccines"}
systemCodes:
  - {system: CVX, systemCode: "03", code: VACCINE_MMR}
  - {system: LOCAL, systemCode: "mmr", code: VACCINE_MMR}
  - {system: CVX, systemCode: "19", code: VACCINE_BCG}
codeSets:
  - {code: MMR, name: MMR vaccines, codes: [VACCINE_MMR]}
rules:
  - {name: Low, fhirResourceType: Immunization, evaluationOrder: 1, transformScript: TRANSFORM, target: {type: ORGANIZATION_UNIT}}
  - {name: High, fhirResourceType: Immunization, evaluationOrder: 9, transformScript: TRANSFORM, target: {type: ORGANIZATION_UNIT}}
  - {name: Only MMR, fhirResourceType: Immunization, evaluationOrder: 5, applicableCodeSet: MMR, transformScript: TRANSFORM, target: {type: ORGANIZATION_UNIT}}
  - {name: Patients, fhirResourceType: Patient, transformScript: TRANSFORM, target: {type: ORGANIZATION_UNIT}}
"#;

    fn store() -> InMemoryMetadataStore {
        InMemoryMetadataStore::new(parse_metadata(DOCUMENT).expect("metadata"))
    }

    fn names(rules: &[Arc<Rule>]) -> Vec<&str> {
        rules.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn rules_are_ordered_and_filtered_by_code_set() {
        let store = store();
        let mmr = SystemCodeValue::new("http://hl7.org/fhir/sid/cvx", "03").expect("code");
        let bcg = SystemCodeValue::new("http://hl7.org/fhir/sid/cvx", "19").expect("code");

        let rules = store
            .find_applicable_rules(FhirResourceType::Immunization, &[mmr])
            .expect("rules");
        assert_eq!(names(&rules), vec!["High", "Only MMR", "Low"]);
        let rules = store
            .find_applicable_rules(FhirResourceType::Immunization, &[bcg])
            .expect("rules");
        assert_eq!(names(&rules), vec!["High", "Low"]);
    }

    #[test]
    fn system_codes_of_other_systems_are_found_by_shared_code() {
        let store = store();
        let found = store
            .find_by_systems_and_codes(
                &["http://example.org/vaccines".to_owned()],
                &["http://hl7.org/fhir/sid/cvx|03".to_owned()],
            )
            .expect("codes");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].system_code, "mmr");
        assert_eq!(
            store
                .find_by_mapping_codes(&["VACCINE_BCG".to_owned()])
                .expect("codes")
                .len(),
            1
        );
    }

    #[test]
    fn saves_assign_ids_and_reject_unknown_updates() {
        let store = InMemoryDhisStore::default();
        let instance = TrackedEntityInstance::new(None, "TetPerson01");
        TrackedEntityRepository::save(&store, &instance, ResourceAction::Create).expect("create");
        let saved = store.tracked_entity_instances();
        assert_eq!(saved.len(), 1);
        let id = saved[0].id.clone().expect("generated id");
        assert!(Uid::is_valid(&id));

        let missing = TrackedEntityInstance::new(Some("TeiMissing1".into()), "TetPerson01");
        match TrackedEntityRepository::save(&store, &missing, ResourceAction::Update) {
            Err(TransformerError::Data(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("expected Data, got {other:?}"),
        }
        assert_eq!(
            store.saves(),
            vec![(DhisResourceType::TrackedEntity, ResourceAction::Create)]
        );
    }

    #[test]
    fn latest_active_enrollment_is_returned() {
        let store = InMemoryDhisStore::default();
        for (id, day, status) in [
            ("EnrOld00001", 1, EnrollmentStatus::Active),
            ("EnrNew00001", 5, EnrollmentStatus::Active),
            ("EnrDone0001", 9, EnrollmentStatus::Completed),
        ] {
            let mut enrollment = Enrollment::new(Some(id.into()), "PrgVaccin01");
            enrollment.tracked_entity_instance_id = Some("TeiExist001".into());
            enrollment.enrollment_date = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).single();
            enrollment.status = status;
            store.add_enrollment(enrollment);
        }
        let latest = store
            .find_latest_active("PrgVaccin01", "TeiExist001")
            .expect("lookup")
            .expect("found");
        assert_eq!(latest.id.as_deref(), Some("EnrNew00001"));
    }

    #[test]
    fn organization_units_are_found_by_any_reference() {
        let store = InMemoryDhisStore::default();
        store.add_organization_unit(organization_unit("OuClinic001", "CLINIC", None));
        for reference in [
            Reference::id("OuClinic001"),
            Reference::code("CLINIC"),
        ] {
            let reference = reference.expect("reference");
            assert!(store.find_by_reference(&reference).expect("lookup").is_some());
        }
        let unknown = Reference::code("OTHER").expect("reference");
        assert!(store.find_by_reference(&unknown).expect("lookup").is_none());
    }

    #[test]
    fn remote_repository_serves_bundles_per_client() {
        let repository = BundleRemoteRepository::default();
        let client_id = Uuid::new_v4();
        repository.add(
            client_id,
            Bundle::new(vec![
                fhir_resource(r#"{"resourceType": "Organization", "id": "a"}"#),
                fhir_resource(r#"{"resourceType": "Organization", "id": "b"}"#),
            ]),
        );
        assert!(repository
            .find(client_id, FhirResourceType::Organization, "a")
            .expect("find")
            .is_some());
        assert!(repository
            .find(Uuid::new_v4(), FhirResourceType::Organization, "a")
            .expect("find")
            .is_none());
        let bundle = repository
            .find_with_parents(client_id, FhirResourceType::Organization, "b", "partOf")
            .expect("bundle");
        assert_eq!(bundle.resources().len(), 2);
    }
}
