//! Polling cursors of FHIR client resources.

use crate::metadata::FhirClient;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// The "last updated" timestamp up to which each subscribed resource has been processed.
#[derive(Default)]
pub struct ResourceCursorService {
    cursors: DashMap<Uuid, DateTime<Utc>>,
    /// One lock per advanced resource, kept until the resource is removed.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ResourceCursorService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the initial cursors from the client's resources.
    pub fn seed(&self, client: &FhirClient) {
        for resource in &client.resources {
            self.cursors
                .entry(resource.id)
                .or_insert(resource.resource_update.last_updated);
        }
    }

    /// Drops the cursors and locks of resources that are no longer subscribed.
    pub fn remove(&self, resource_ids: impl IntoIterator<Item = Uuid>) {
        for resource_id in resource_ids {
            self.cursors.remove(&resource_id);
            self.locks.remove(&resource_id);
        }
    }

    pub fn last_updated(&self, resource_id: Uuid) -> Option<DateTime<Utc>> {
        self.cursors.get(&resource_id).map(|c| *c.value())
    }

    /// Advances the cursor of the resource. Returns false if it already is at or beyond
    /// `last_updated`.
    pub fn update_last_updated(&self, resource_id: Uuid, last_updated: DateTime<Utc>) -> bool {
        let lock = Arc::clone(self.locks.entry(resource_id).or_default().value());
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.last_updated(resource_id);
        if current.is_some_and(|c| c >= last_updated) {
            debug!(%resource_id, "Cursor is already up to date.");
            return false;
        }
        self.cursors.insert(resource_id, last_updated);
        true
    }
}
