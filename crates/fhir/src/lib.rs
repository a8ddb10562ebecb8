//! FHIR boundary support for the DHIS2 adapter.
//!
//! This crate provides a **minimal resource model** for inbound FHIR content:
//! - resources are kept as JSON ([`FhirResource`]) with typed accessors for the elements the
//!   transformation engine needs (id, identifiers, coded concepts, references, parents)
//! - small datatypes ([`Identifier`], [`Coding`], [`CodeableConcept`], [`Reference`]) translated
//!   from their JSON wire form
//! - reference parsing ([`IdElement`]) and the supported resource types ([`FhirResourceType`])
//!
//! This crate is NOT a FHIR parser or validator. Unknown elements are kept untouched in the JSON
//! and simply never looked at.

pub mod bundle;
pub mod datatypes;
pub mod id;
pub mod resource;
pub mod resource_type;

pub use bundle::Bundle;
pub use datatypes::{CodeableConcept, Coding, Identifier, Reference};
pub use id::IdElement;
pub use resource::FhirResource;
pub use resource_type::{FhirResourceType, FhirVersion};

pub use adapter_types::SystemCodeValue;

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("unknown FHIR resource type: {0}")]
    UnknownResourceType(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;

/// Deserialises a JSON fragment into a wire struct, reporting the failing path on mismatch.
pub(crate) fn from_json_value<T>(what: &str, value: &serde_json::Value) -> FhirResult<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_path_to_error::deserialize::<_, T>(value).map_err(|err| {
        let path = err.path().to_string();
        let path = if path.is_empty() || path == "." {
            "<root>".to_string()
        } else {
            path
        };
        FhirError::Translation(format!(
            "{what} schema mismatch at {path}: {}",
            err.into_inner()
        ))
    })
}
