//! Kinds of target resources and their identifiers.

use crate::aggregate::DataValueSet;
use crate::metadata::OrganizationUnit;
use crate::tracker::{Enrollment, Event, TrackedEntityInstance};
use crate::{DhisError, DhisResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Target entity kinds a rule can map to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DhisResourceType {
    TrackedEntity,
    Enrollment,
    ProgramStageEvent,
    OrganizationUnit,
    DataValueSet,
}

impl DhisResourceType {
    pub const ALL: [DhisResourceType; 5] = [
        DhisResourceType::TrackedEntity,
        DhisResourceType::Enrollment,
        DhisResourceType::ProgramStageEvent,
        DhisResourceType::OrganizationUnit,
        DhisResourceType::DataValueSet,
    ];

    /// Short prefix used in ids exposed on the FHIR side.
    pub fn abbreviation(self) -> &'static str {
        match self {
            DhisResourceType::TrackedEntity => "te",
            DhisResourceType::Enrollment => "en",
            DhisResourceType::ProgramStageEvent => "ps",
            DhisResourceType::OrganizationUnit => "ou",
            DhisResourceType::DataValueSet => "dvs",
        }
    }

    pub fn by_abbreviation(abbreviation: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.abbreviation() == abbreviation)
    }
}

impl fmt::Display for DhisResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DhisResourceType::TrackedEntity => "TRACKED_ENTITY",
            DhisResourceType::Enrollment => "ENROLLMENT",
            DhisResourceType::ProgramStageEvent => "PROGRAM_STAGE_EVENT",
            DhisResourceType::OrganizationUnit => "ORGANIZATION_UNIT",
            DhisResourceType::DataValueSet => "DATA_VALUE_SET",
        })
    }
}

/// Typed id of a target resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DhisResourceId {
    pub resource_type: DhisResourceType,
    pub id: String,
}

/// A target resource id as exposed on the FHIR side: `<abbreviation>-<id>-<rule uuid, simple>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DhisFhirResourceId {
    pub resource_type: DhisResourceType,
    pub id: String,
    pub rule_id: Uuid,
}

impl DhisFhirResourceId {
    pub fn dhis_resource_id(&self) -> DhisResourceId {
        DhisResourceId {
            resource_type: self.resource_type,
            id: self.id.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns [`DhisError::InvalidDhisFhirId`] if `value` does not have the three-part shape,
    /// names an unknown resource type, has a non-alphanumeric id or a malformed rule id.
    pub fn parse(value: &str) -> DhisResult<Self> {
        let invalid = || DhisError::InvalidDhisFhirId(value.to_owned());

        let (abbreviation, rest) = value.split_once('-').ok_or_else(invalid)?;
        let (id, rule_id) = rest.split_once('-').ok_or_else(invalid)?;

        let resource_type = DhisResourceType::by_abbreviation(abbreviation).ok_or_else(invalid)?;
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        if rule_id.len() != 32 || !rule_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        let rule_id = Uuid::parse_str(rule_id).map_err(|_| invalid())?;

        Ok(Self {
            resource_type,
            id: id.to_owned(),
            rule_id,
        })
    }
}

impl fmt::Display for DhisFhirResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.resource_type.abbreviation(),
            self.id,
            self.rule_id.simple()
        )
    }
}

impl FromStr for DhisFhirResourceId {
    type Err = DhisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A resolved target resource.
#[derive(Clone, Debug, PartialEq)]
pub enum DhisResource {
    TrackedEntity(TrackedEntityInstance),
    Enrollment(Enrollment),
    Event(Event),
    OrganizationUnit(OrganizationUnit),
    DataValueSet(DataValueSet),
}

impl DhisResource {
    pub fn resource_type(&self) -> DhisResourceType {
        match self {
            DhisResource::TrackedEntity(_) => DhisResourceType::TrackedEntity,
            DhisResource::Enrollment(_) => DhisResourceType::Enrollment,
            DhisResource::Event(_) => DhisResourceType::ProgramStageEvent,
            DhisResource::OrganizationUnit(_) => DhisResourceType::OrganizationUnit,
            DhisResource::DataValueSet(_) => DhisResourceType::DataValueSet,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            DhisResource::TrackedEntity(r) => r.id.as_deref(),
            DhisResource::Enrollment(r) => r.id.as_deref(),
            DhisResource::Event(r) => r.id.as_deref(),
            DhisResource::OrganizationUnit(r) => Some(r.id.as_str()),
            DhisResource::DataValueSet(r) => r.id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dhis_fhir_id_round_trip() {
        let rule_id = Uuid::parse_str("5f9ebdc9-852e-4c83-87ca-795946aabc35").expect("uuid");
        let id = DhisFhirResourceId {
            resource_type: DhisResourceType::TrackedEntity,
            id: "Ab3xZ0kPq9W".into(),
            rule_id,
        };
        let text = id.to_string();
        assert_eq!(text, "te-Ab3xZ0kPq9W-5f9ebdc9852e4c8387ca795946aabc35");
        assert_eq!(DhisFhirResourceId::parse(&text).expect("parse"), id);
    }

    #[test]
    fn rejects_malformed_dhis_fhir_ids() {
        for value in [
            "Ab3xZ0kPq9W",
            "xx-Ab3xZ0kPq9W-5f9ebdc9852e4c8387ca795946aabc35",
            "te--5f9ebdc9852e4c8387ca795946aabc35",
            "te-Ab3xZ0kPq9W-5f9ebdc9",
            "te-Ab3x_0kPq9W-5f9ebdc9852e4c8387ca795946aabc35",
        ] {
            let err = DhisFhirResourceId::parse(value).expect_err("should reject");
            match err {
                DhisError::InvalidDhisFhirId(v) => assert_eq!(v, value),
                other => panic!("expected InvalidDhisFhirId, got {other:?}"),
            }
        }
    }

    #[test]
    fn abbreviations_are_unique() {
        for t in DhisResourceType::ALL {
            assert_eq!(DhisResourceType::by_abbreviation(t.abbreviation()), Some(t));
        }
    }
}
