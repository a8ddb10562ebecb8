//! References to DHIS2 metadata.

use crate::{DhisError, DhisResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a [`Reference`] identifies its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReferenceType {
    Id,
    Code,
    Name,
}

impl FromStr for ReferenceType {
    type Err = DhisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ID" => Ok(ReferenceType::Id),
            "CODE" => Ok(ReferenceType::Code),
            "NAME" => Ok(ReferenceType::Name),
            _ => Err(DhisError::InvalidReferenceType(s.to_owned())),
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferenceType::Id => "ID",
            ReferenceType::Code => "CODE",
            ReferenceType::Name => "NAME",
        })
    }
}

/// A reference to a DHIS2 object by its id, unique code or unique name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    value: String,
    #[serde(rename = "type")]
    reference_type: ReferenceType,
}

impl Reference {
    /// # Errors
    ///
    /// Returns [`DhisError::InvalidInput`] if `value` is blank.
    pub fn new(value: impl Into<String>, reference_type: ReferenceType) -> DhisResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DhisError::InvalidInput(
                "reference value cannot be empty".into(),
            ));
        }
        Ok(Self {
            value,
            reference_type,
        })
    }

    pub fn id(value: impl Into<String>) -> DhisResult<Self> {
        Self::new(value, ReferenceType::Id)
    }

    pub fn code(value: impl Into<String>) -> DhisResult<Self> {
        Self::new(value, ReferenceType::Code)
    }

    pub fn name(value: impl Into<String>) -> DhisResult<Self> {
        Self::new(value, ReferenceType::Name)
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn reference_type(&self) -> ReferenceType {
        self.reference_type
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reference_type, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_type_case_insensitively() {
        assert_eq!("code".parse::<ReferenceType>().expect("code"), ReferenceType::Code);
        let err = "UID".parse::<ReferenceType>().expect_err("should reject");
        match err {
            DhisError::InvalidReferenceType(value) => assert_eq!(value, "UID"),
            other => panic!("expected InvalidReferenceType, got {other:?}"),
        }
    }

    #[test]
    fn rejects_blank_reference() {
        assert!(Reference::code("  ").is_err());
        let reference = Reference::name("Weight").expect("valid");
        assert_eq!(reference.to_string(), "NAME:Weight");
    }

    #[test]
    fn serialises_with_type_tag() {
        let reference = Reference::id("Ab3xZ0kPq9W").expect("valid");
        let json = serde_json::to_value(&reference).expect("serialise");
        assert_eq!(json, serde_json::json!({"value": "Ab3xZ0kPq9W", "type": "ID"}));
    }
}
