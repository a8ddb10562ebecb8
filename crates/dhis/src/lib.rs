//! DHIS2 target model for the FHIR adapter.
//!
//! This crate holds the **case-management side** of a transformation:
//! - tracker entities ([`TrackedEntityInstance`], [`Enrollment`], [`Event`])
//! - aggregate data ([`DataValueSet`])
//! - the metadata that constrains them (option sets, attributes, data elements, programs,
//!   program stages, data sets, organisation units)
//! - references to metadata by id, code or name ([`Reference`])
//!
//! Persistence of these objects is not part of this crate.

pub mod aggregate;
pub mod metadata;
pub mod reference;
pub mod resource;
pub mod tracker;
pub mod value_type;

pub use aggregate::{DataValue, DataValueSet};
pub use metadata::{
    DataElement, DataSet, DhisOption, Identifiable, OptionSet, OrganizationUnit, Program,
    ProgramStage, ProgramStageDataElement, TrackedEntityAttribute, TrackedEntityAttributes,
    TrackedEntityType, TrackedEntityTypeAttribute,
};
pub use reference::{Reference, ReferenceType};
pub use resource::{DhisFhirResourceId, DhisResource, DhisResourceId, DhisResourceType};
pub use tracker::{
    Enrollment, EnrollmentStatus, Event, EventDataValue, EventStatus, Location,
    TrackedEntityAttributeValue, TrackedEntityInstance,
};
pub use value_type::ValueType;

pub use dhis_uid::Uid;

/// Errors returned by the `dhis` model crate.
#[derive(Debug, thiserror::Error)]
pub enum DhisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid reference type: {0}")]
    InvalidReferenceType(String),

    #[error("invalid DHIS FHIR ID: {0}")]
    InvalidDhisFhirId(String),
}

/// Type alias for Results that can fail with a [`DhisError`].
pub type DhisResult<T> = Result<T, DhisError>;
