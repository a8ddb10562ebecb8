//! FHIR client configuration service: subscription auto-creation and change events.

use crate::cache::ReadThroughCache;
use crate::metadata::{FhirClient, FhirClientResource};
use crate::store::{EventPublisher, FhirClientStore, ResourceAction};
use crate::TransformerResult;
use chrono::{DateTime, Utc};
use fhir::FhirResourceType;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Domain events published after configuration changes are flushed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterEvent {
    AutoCreatedFhirClientResource {
        client_id: Uuid,
        resource_id: Uuid,
        fhir_resource_type: FhirResourceType,
    },
}

pub struct FhirClientService {
    store: Arc<dyn FhirClientStore>,
    publisher: Arc<dyn EventPublisher>,
    clients: ReadThroughCache<Uuid, Option<FhirClient>>,
}

impl FhirClientService {
    pub fn new(store: Arc<dyn FhirClientStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            clients: ReadThroughCache::new(),
        }
    }

    pub fn find_by_id(&self, id: Uuid) -> TransformerResult<Option<FhirClient>> {
        self.clients.get_or_load(&id, || self.store.find_by_id(id))
    }

    /// Saves the client after adding a subscription for every auto-created resource type it does
    /// not have yet.
    ///
    /// Events for the added subscriptions are published once the store has been flushed. Returns
    /// the added subscriptions. `client` is only changed once the flush succeeded.
    pub fn save(
        &self,
        client: &mut FhirClient,
        action: ResourceAction,
    ) -> TransformerResult<Vec<FhirClientResource>> {
        let mut updated = client.clone();
        let created = auto_create_resources(&mut updated, Utc::now());
        self.store.save(&updated, action)?;
        self.store.flush()?;
        self.clients.evict_all();
        *client = updated;

        for resource in &created {
            self.publisher
                .publish(&AdapterEvent::AutoCreatedFhirClientResource {
                    client_id: client.id,
                    resource_id: resource.id,
                    fhir_resource_type: resource.fhir_resource_type,
                })?;
        }
        if !created.is_empty() {
            info!(
                client = %client.code,
                count = created.len(),
                "Created subscriptions for FHIR client."
            );
        }
        Ok(created)
    }
}

fn auto_create_resources(client: &mut FhirClient, now: DateTime<Utc>) -> Vec<FhirClientResource> {
    let missing: Vec<FhirResourceType> = client
        .auto_created_resource_types
        .iter()
        .copied()
        .filter(|t| !client.has_resource_type(*t))
        .collect();
    let created: Vec<FhirClientResource> = missing
        .into_iter()
        .map(|t| {
            debug!(client = %client.code, resource_type = %t.resource_type_name(), "Auto-creating subscription.");
            FhirClientResource::auto_created(t, now)
        })
        .collect();
    client.resources.extend(created.iter().cloned());
    created
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CollectingEventPublisher, InMemoryFhirClientStore};
    use crate::TransformerError;
    use fhir::FhirVersion;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn client() -> FhirClient {
        FhirClient {
            id: Uuid::new_v4(),
            name: "Clinic server".into(),
            code: "CLINIC".into(),
            enabled: true,
            fhir_version: FhirVersion::R4,
            tolerance_millis: 0,
            remote_sync_enabled: true,
            resources: vec![FhirClientResource::auto_created(
                FhirResourceType::Patient,
                Utc::now(),
            )],
            auto_created_resource_types: BTreeSet::from([
                FhirResourceType::Patient,
                FhirResourceType::Immunization,
                FhirResourceType::Observation,
            ]),
            systems: Vec::new(),
        }
    }

    /// Checks on every event that the client is already visible in the store.
    struct VisibilityCheckingPublisher {
        store: Arc<InMemoryFhirClientStore>,
        seen: Mutex<Vec<usize>>,
    }

    impl EventPublisher for VisibilityCheckingPublisher {
        fn publish(&self, event: &AdapterEvent) -> TransformerResult<()> {
            let AdapterEvent::AutoCreatedFhirClientResource {
                client_id,
                resource_id,
                ..
            } = event;
            let stored = self.store.find_by_id(*client_id)?.ok_or_else(|| {
                TransformerError::Data("client not flushed before publishing".into())
            })?;
            if stored.resource(*resource_id).is_none() {
                return Err(TransformerError::Data("resource not flushed".into()));
            }
            self.seen
                .lock()
                .expect("lock")
                .push(stored.resources.len());
            Ok(())
        }
    }

    #[test]
    fn missing_types_are_created_once_and_published_after_flush() {
        let store = Arc::new(InMemoryFhirClientStore::default());
        let publisher = Arc::new(VisibilityCheckingPublisher {
            store: Arc::clone(&store),
            seen: Mutex::new(Vec::new()),
        });
        let service = FhirClientService::new(store.clone(), publisher.clone());

        let mut client = client();
        let created = service
            .save(&mut client, ResourceAction::Create)
            .expect("save");
        let types: Vec<_> = created.iter().map(|r| r.fhir_resource_type).collect();
        assert_eq!(
            types,
            vec![FhirResourceType::Immunization, FhirResourceType::Observation]
        );
        assert_eq!(client.resources.len(), 3);
        assert_eq!(*publisher.seen.lock().expect("lock"), vec![3, 3]);

        let again = service
            .save(&mut client, ResourceAction::Update)
            .expect("save");
        assert!(again.is_empty());
        assert_eq!(publisher.seen.lock().expect("lock").len(), 2);
    }

    /// Fails the first flush.
    struct FailingFlushStore {
        inner: InMemoryFhirClientStore,
        failed: AtomicBool,
    }

    impl FhirClientStore for FailingFlushStore {
        fn find_by_id(&self, id: Uuid) -> TransformerResult<Option<FhirClient>> {
            self.inner.find_by_id(id)
        }

        fn save(&self, client: &FhirClient, action: ResourceAction) -> TransformerResult<()> {
            self.inner.save(client, action)
        }

        fn flush(&self) -> TransformerResult<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(TransformerError::Fatal("store is unavailable".into()));
            }
            self.inner.flush()
        }
    }

    #[test]
    fn failed_flush_leaves_client_unchanged_for_retry() {
        let store = Arc::new(FailingFlushStore {
            inner: InMemoryFhirClientStore::default(),
            failed: AtomicBool::new(false),
        });
        let publisher = Arc::new(CollectingEventPublisher::default());
        let service = FhirClientService::new(store, publisher.clone());

        let mut client = client();
        assert!(service.save(&mut client, ResourceAction::Create).is_err());
        assert_eq!(client.resources.len(), 1);
        assert!(publisher.events().is_empty());

        let created = service
            .save(&mut client, ResourceAction::Create)
            .expect("save");
        assert_eq!(created.len(), 2);
        assert_eq!(client.resources.len(), 3);
        assert_eq!(publisher.events().len(), 2);
    }

    #[test]
    fn saving_evicts_cached_clients() {
        let mut client = client();
        client.auto_created_resource_types.clear();
        let store = Arc::new(InMemoryFhirClientStore::with_clients([client.clone()]));
        let publisher = Arc::new(CollectingEventPublisher::default());
        let service = FhirClientService::new(store, publisher.clone());

        let cached = service.find_by_id(client.id).expect("find").expect("client");
        assert!(cached.enabled);

        client.enabled = false;
        service
            .save(&mut client, ResourceAction::Update)
            .expect("save");
        let reloaded = service.find_by_id(client.id).expect("find").expect("client");
        assert!(!reloaded.enabled);
        assert!(publisher.events().is_empty());
    }
}
