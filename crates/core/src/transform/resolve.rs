//! Resolution of the target resource of a rule.
//!
//! Every transformer resolves its target the same way: by the DHIS2 id of the request, by the
//! business identifier of the input, by an active lookup, and finally by creating a new one.
//! The first stage that yields a resource wins.

use crate::context::TransformerContext;
use crate::store::ResourceAction;
use crate::{TransformerError, TransformerResult};
use tracing::debug;

/// The stage that produced a resolved resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveStage {
    ExplicitId,
    BusinessIdentifier,
    ActiveLookup,
    Create,
}

pub struct Resolved<T> {
    pub resource: T,
    pub action: ResourceAction,
    pub stage: ResolveStage,
}

/// Kind specific lookups of a transformer.
pub trait ResolveStages {
    type Resource;

    fn by_id(&mut self, id: &str) -> TransformerResult<Option<Self::Resource>>;

    fn by_identifier(&mut self) -> TransformerResult<Option<Self::Resource>>;

    fn by_active_lookup(&mut self) -> TransformerResult<Option<Self::Resource>>;

    /// A new resource with the given id, or none if none can be created for the input.
    fn create(&mut self, id: Option<String>) -> TransformerResult<Option<Self::Resource>>;
}

/// Runs the stages in order.
///
/// # Errors
///
/// Returns [`TransformerError::Request`] if a remote request carries an explicit DHIS2 id.
pub fn resolve<S: ResolveStages>(
    context: &TransformerContext,
    stages: &mut S,
) -> TransformerResult<Option<Resolved<S::Resource>>> {
    let request = context.request();
    let explicit_id = request.dhis_resource_id().map(str::to_owned);
    if explicit_id.is_some() && request.is_remote() {
        return Err(TransformerError::Request(
            "Requests that contain a resource ID while processing a remote subscription are not supported."
                .into(),
        ));
    }

    if let Some(id) = explicit_id.as_deref() {
        if let Some(resource) = stages.by_id(id)? {
            return Ok(Some(found(resource, ResolveStage::ExplicitId)));
        }
        debug!(id, "Resource of explicit ID does not exist");
    }
    if let Some(resource) = stages.by_identifier()? {
        return Ok(Some(found(resource, ResolveStage::BusinessIdentifier)));
    }
    if let Some(resource) = stages.by_active_lookup()? {
        return Ok(Some(found(resource, ResolveStage::ActiveLookup)));
    }

    if context.is_creation_disabled() {
        debug!("Creation of resources has been disabled");
        return Ok(None);
    }
    Ok(stages.create(explicit_id)?.map(|resource| Resolved {
        resource,
        action: ResourceAction::Create,
        stage: ResolveStage::Create,
    }))
}

fn found<T>(resource: T, stage: ResolveStage) -> Resolved<T> {
    Resolved {
        resource,
        action: ResourceAction::Update,
        stage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::constants::{DEFAULT_HIERARCHY_MAX_DEPTH, DEFAULT_INTERNAL_IDENTIFIER_URI};
    use crate::context::FhirRequest;
    use crate::test_support::{config, context};
    use fhir::FhirVersion;
    use std::sync::Arc;
    use uuid::Uuid;

    #[derive(Default)]
    struct Stages {
        by_id: Option<&'static str>,
        by_identifier: Option<&'static str>,
        active: Option<&'static str>,
        calls: Vec<&'static str>,
    }

    impl ResolveStages for Stages {
        type Resource = String;

        fn by_id(&mut self, id: &str) -> TransformerResult<Option<String>> {
            self.calls.push("id");
            Ok(self.by_id.filter(|v| *v == id).map(str::to_owned))
        }

        fn by_identifier(&mut self) -> TransformerResult<Option<String>> {
            self.calls.push("identifier");
            Ok(self.by_identifier.map(str::to_owned))
        }

        fn by_active_lookup(&mut self) -> TransformerResult<Option<String>> {
            self.calls.push("active");
            Ok(self.active.map(str::to_owned))
        }

        fn create(&mut self, id: Option<String>) -> TransformerResult<Option<String>> {
            self.calls.push("create");
            Ok(Some(id.unwrap_or_else(|| "new".into())))
        }
    }

    #[test]
    fn business_identifier_precedes_active_lookup() {
        let mut stages = Stages {
            by_identifier: Some("by-identifier"),
            active: Some("active"),
            ..Stages::default()
        };
        let resolved = resolve(&context(), &mut stages).expect("resolve").expect("found");
        assert_eq!(resolved.resource, "by-identifier");
        assert_eq!(resolved.action, ResourceAction::Update);
        assert_eq!(resolved.stage, ResolveStage::BusinessIdentifier);
        assert_eq!(stages.calls, vec!["identifier"]);
    }

    #[test]
    fn creates_when_nothing_is_found() {
        let mut stages = Stages::default();
        let resolved = resolve(&context(), &mut stages).expect("resolve").expect("created");
        assert_eq!(resolved.resource, "new");
        assert_eq!(resolved.action, ResourceAction::Create);
        assert_eq!(stages.calls, vec!["identifier", "active", "create"]);
    }

    #[test]
    fn explicit_id_is_looked_up_first() {
        let context = TransformerContext::new(
            FhirRequest::new(FhirVersion::R4).with_dhis_resource_id("Tei000000A1"),
            config(),
        );
        let mut stages = Stages {
            by_id: Some("Tei000000A1"),
            by_identifier: Some("by-identifier"),
            ..Stages::default()
        };
        let resolved = resolve(&context, &mut stages).expect("resolve").expect("found");
        assert_eq!(resolved.stage, ResolveStage::ExplicitId);
        assert_eq!(stages.calls, vec!["id"]);
    }

    #[test]
    fn missing_explicit_id_falls_through_to_identifier() {
        let context = TransformerContext::new(
            FhirRequest::new(FhirVersion::R4).with_dhis_resource_id("Tei000000A1"),
            config(),
        );
        let mut stages = Stages {
            by_identifier: Some("existing-by-identifier"),
            ..Stages::default()
        };
        let resolved = resolve(&context, &mut stages).expect("resolve").expect("found");
        assert_eq!(resolved.resource, "existing-by-identifier");
        assert_eq!(resolved.stage, ResolveStage::BusinessIdentifier);
        assert_eq!(resolved.action, ResourceAction::Update);
        assert_eq!(stages.calls, vec!["id", "identifier"]);

        let mut missing = Stages::default();
        let created = resolve(&context, &mut missing).expect("resolve").expect("created");
        assert_eq!(created.resource, "Tei000000A1");
        assert_eq!(missing.calls, vec!["id", "identifier", "active", "create"]);
    }

    #[test]
    fn creation_can_be_disabled() {
        let config = CoreConfig::new(
            "adapter".into(),
            DEFAULT_INTERNAL_IDENTIFIER_URI.into(),
            true,
            DEFAULT_HIERARCHY_MAX_DEPTH,
        )
        .expect("config");
        let context = TransformerContext::new(FhirRequest::new(FhirVersion::R4), Arc::new(config));
        let mut stages = Stages::default();
        assert!(resolve(&context, &mut stages).expect("resolve").is_none());
        assert!(!stages.calls.contains(&"create"));
    }

    #[test]
    fn remote_request_with_explicit_id_is_rejected() {
        let context = TransformerContext::new(
            FhirRequest::new(FhirVersion::R4)
                .with_dhis_resource_id("Tei000000A1")
                .with_remote_client(Uuid::new_v4(), Uuid::new_v4()),
            config(),
        );
        match resolve(&context, &mut Stages::default()) {
            Err(TransformerError::Request(msg)) => assert!(msg.contains("remote subscription")),
            Err(other) => panic!("expected Request, got {other:?}"),
            Ok(_) => panic!("expected Request error"),
        }
    }
}
