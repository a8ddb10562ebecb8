//! Utility objects available to scripts, keyed by the name scripts know them by.

pub mod assignment;
pub mod code;
pub mod date_time;
pub mod fhir_resource;
pub mod identifier;
pub mod option_set;
pub mod organization;
pub mod reference;
pub mod value_type;

pub use assignment::AssignmentUtils;
pub use code::CodeUtils;
pub use date_time::DateTimeUtils;
pub use fhir_resource::FhirResourceUtils;
pub use identifier::IdentifierUtils;
pub use option_set::OptionSetUtils;
pub use organization::OrganizationUtils;
pub use reference::ReferenceUtils;
pub use value_type::ValueTypeUtils;

use crate::store::{
    CodeStore, FhirDhisAssignmentStore, OrganizationUnitRepository, RemoteFhirRepository,
};
use crate::{TransformerError, TransformerResult};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A utility object registered in the script environment.
pub trait ScriptUtils: Any + Send + Sync {
    /// The variable name scripts use for this utility.
    fn name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

/// The full set of utilities handed to every script.
#[derive(Clone, Default)]
pub struct TransformerUtils {
    utils: BTreeMap<&'static str, Arc<dyn ScriptUtils>>,
}

impl TransformerUtils {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard registry over the given collaborators.
    pub fn standard(
        code_store: Arc<dyn CodeStore>,
        remote: Arc<dyn RemoteFhirRepository>,
        organization_units: Arc<dyn OrganizationUnitRepository>,
        assignments: Arc<dyn FhirDhisAssignmentStore>,
    ) -> Self {
        let reference_utils = Arc::new(ReferenceUtils::new(Arc::clone(&remote)));
        let mut utils = Self::new();
        utils.register(Arc::new(IdentifierUtils::new(Arc::clone(&reference_utils))));
        utils.register(Arc::new(CodeUtils::new(Arc::clone(&code_store))));
        utils.register(Arc::new(FhirResourceUtils::new(
            Arc::clone(&reference_utils),
            code_store,
        )));
        utils.register(Arc::new(OrganizationUtils::new(organization_units, remote)));
        utils.register(Arc::new(OptionSetUtils));
        utils.register(Arc::new(AssignmentUtils::new(assignments)));
        utils.register(Arc::new(DateTimeUtils));
        utils.register(Arc::new(ValueTypeUtils));
        utils.register(reference_utils);
        utils
    }

    /// Registers `utils` under its name, replacing a utility of the same name.
    pub fn register(&mut self, utils: Arc<dyn ScriptUtils>) {
        self.utils.insert(utils.name(), utils);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ScriptUtils>> {
        self.utils.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.utils.keys().copied()
    }

    fn typed<T: ScriptUtils>(&self, name: &str) -> TransformerResult<&T> {
        self.utils
            .get(name)
            .and_then(|u| u.as_any().downcast_ref::<T>())
            .ok_or_else(|| {
                TransformerError::Fatal(format!("Script utility {name} has not been registered."))
            })
    }

    pub fn identifier_utils(&self) -> TransformerResult<&IdentifierUtils> {
        self.typed(crate::constants::IDENTIFIER_UTILS)
    }

    pub fn code_utils(&self) -> TransformerResult<&CodeUtils> {
        self.typed(crate::constants::CODE_UTILS)
    }

    pub fn reference_utils(&self) -> TransformerResult<&ReferenceUtils> {
        self.typed(crate::constants::REFERENCE_UTILS)
    }

    pub fn fhir_resource_utils(&self) -> TransformerResult<&FhirResourceUtils> {
        self.typed(crate::constants::FHIR_RESOURCE_UTILS)
    }

    pub fn organization_utils(&self) -> TransformerResult<&OrganizationUtils> {
        self.typed(crate::constants::ORGANIZATION_UTILS)
    }

    pub fn option_set_utils(&self) -> TransformerResult<&OptionSetUtils> {
        self.typed(crate::constants::OPTION_SET_UTILS)
    }

    pub fn assignment_utils(&self) -> TransformerResult<&AssignmentUtils> {
        self.typed(crate::constants::ASSIGNMENT_UTILS)
    }

    pub fn date_time_utils(&self) -> TransformerResult<&DateTimeUtils> {
        self.typed(crate::constants::DATE_TIME_UTILS)
    }

    pub fn value_type_utils(&self) -> TransformerResult<&ValueTypeUtils> {
        self.typed(crate::constants::VALUE_TYPE_UTILS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CODE_UTILS, ORGANIZATION_UTILS, VALUE_TYPE_UTILS};
    use crate::memory::{
        BundleRemoteRepository, InMemoryAssignmentStore, InMemoryDhisStore, InMemoryMetadataStore,
    };

    #[test]
    fn standard_registry_holds_all_utilities() {
        let utils = TransformerUtils::standard(
            Arc::new(InMemoryMetadataStore::default()),
            Arc::new(BundleRemoteRepository::default()),
            Arc::new(InMemoryDhisStore::default()),
            Arc::new(InMemoryAssignmentStore::default()),
        );
        let names: Vec<_> = utils.names().collect();
        assert_eq!(names.len(), 9);
        assert!(names.contains(&VALUE_TYPE_UTILS));
        assert!(utils.get(CODE_UTILS).is_some());
        assert_eq!(
            utils.organization_utils().expect("registered").name(),
            ORGANIZATION_UTILS
        );
        utils.fhir_resource_utils().expect("registered");
        utils.assignment_utils().expect("registered");
        utils.date_time_utils().expect("registered");
    }

    #[test]
    fn missing_utility_is_fatal() {
        let err = TransformerUtils::new().code_utils().err().expect("not registered");
        match err {
            TransformerError::Fatal(msg) => assert!(msg.contains(CODE_UTILS)),
            other => panic!("expected Fatal, got {other:?}"),
        }
    }
}
