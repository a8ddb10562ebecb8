//! FHIR datatypes used by the transformation engine.
//!
//! Responsibilities:
//! - Define public domain-level datatypes ([`Identifier`], [`Coding`], [`CodeableConcept`],
//!   [`Reference`])
//! - Define the JSON wire model for each of them
//! - Translate between both
//!
//! Notes:
//! - FHIR elements may carry extensions and further elements, so the wire structs ignore unknown
//!   fields rather than rejecting them

use crate::id::IdElement;
use crate::resource::FhirResource;
use crate::{from_json_value, FhirResult};
use adapter_types::SystemCodeValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Public domain-level types
// ============================================================================

/// A business identifier of a resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identifier {
    pub system: Option<String>,
    pub value: Option<String>,
}

impl Identifier {
    pub fn new(system: Option<&str>, value: &str) -> Self {
        Self {
            system: system.map(str::to_owned),
            value: Some(value.to_owned()),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> FhirResult<Self> {
        let wire: IdentifierWire = from_json_value("Identifier", value)?;
        Ok(Self {
            system: wire.system,
            value: wire.value,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(IdentifierWire {
            system: self.system.clone(),
            value: self.value.clone(),
        })
    }

    /// The identifier as `(system, value)` pair, if both parts are present.
    pub fn system_code_value(&self) -> Option<SystemCodeValue> {
        match (&self.system, &self.value) {
            (Some(system), Some(value)) => SystemCodeValue::new(system, value).ok(),
            _ => None,
        }
    }
}

impl From<&SystemCodeValue> for Identifier {
    fn from(value: &SystemCodeValue) -> Self {
        Identifier::new(Some(value.system()), value.code())
    }
}

/// A single code from a coding system.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Coding {
    pub system: Option<String>,
    pub code: Option<String>,
    pub display: Option<String>,
}

impl Coding {
    pub fn system_code_value(&self) -> Option<SystemCodeValue> {
        match (&self.system, &self.code) {
            (Some(system), Some(code)) => SystemCodeValue::new(system, code).ok(),
            _ => None,
        }
    }
}

/// A concept expressed by zero or more codings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeableConcept {
    pub codings: Vec<Coding>,
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn from_json(value: &serde_json::Value) -> FhirResult<Self> {
        let wire: CodeableConceptWire = from_json_value("CodeableConcept", value)?;
        Ok(Self {
            codings: wire
                .coding
                .into_iter()
                .map(|c| Coding {
                    system: c.system,
                    code: c.code,
                    display: c.display,
                })
                .collect(),
            text: wire.text,
        })
    }

    /// All complete `(system, code)` pairs in coding order.
    pub fn system_code_values(&self) -> Vec<SystemCodeValue> {
        self.codings
            .iter()
            .filter_map(Coding::system_code_value)
            .collect()
    }

    /// The first code under `system`.
    pub fn code_for_system(&self, system: &str) -> Option<&str> {
        self.codings
            .iter()
            .find(|c| c.system.as_deref() == Some(system))
            .and_then(|c| c.code.as_deref())
    }

    pub fn contains(&self, system: &str, code: &str) -> bool {
        self.codings
            .iter()
            .any(|c| c.system.as_deref() == Some(system) && c.code.as_deref() == Some(code))
    }
}

/// A reference to another resource.
///
/// Besides the reference string, a reference may carry one business identifier and may point to
/// an already available in-memory resource (embedded, contained or linked from a bundle).
#[derive(Clone, Debug, Default)]
pub struct Reference {
    reference: Option<String>,
    identifier: Option<Identifier>,
    display: Option<String>,
    resource: Option<Arc<FhirResource>>,
}

impl Reference {
    pub fn new(reference: &str) -> Self {
        Self {
            reference: Some(reference.to_owned()),
            ..Self::default()
        }
    }

    /// A reference embedding `resource` and pointing to its id.
    pub fn to_resource(resource: &Arc<FhirResource>) -> Self {
        Self {
            reference: resource.id_element().value().map(str::to_owned),
            resource: Some(Arc::clone(resource)),
            ..Self::default()
        }
    }

    pub fn from_json(value: &serde_json::Value) -> FhirResult<Self> {
        let wire: ReferenceWire = from_json_value("Reference", value)?;
        Ok(Self {
            reference: wire.reference,
            identifier: wire.identifier.map(|i| Identifier {
                system: i.system,
                value: i.value,
            }),
            display: wire.display,
            resource: None,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(ReferenceWire {
            reference: self.reference.clone(),
            identifier: self.identifier.as_ref().map(|i| IdentifierWire {
                system: i.system.clone(),
                value: i.value.clone(),
            }),
            display: self.display.clone(),
        })
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn set_reference(&mut self, reference: Option<String>) {
        self.reference = reference;
    }

    /// The parsed reference string, falling back to the embedded resource's id.
    pub fn reference_element(&self) -> IdElement {
        match (&self.reference, &self.resource) {
            (Some(reference), _) => IdElement::parse(reference),
            (None, Some(resource)) => resource.id_element(),
            (None, None) => IdElement::default(),
        }
    }

    pub fn identifier(&self) -> Option<&Identifier> {
        self.identifier.as_ref()
    }

    /// Replaces the identifier. A reference holds one identifier, so the last call wins.
    pub fn set_identifier(&mut self, identifier: Identifier) {
        self.identifier = Some(identifier);
    }

    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    pub fn resource(&self) -> Option<&Arc<FhirResource>> {
        self.resource.as_ref()
    }

    pub fn set_resource(&mut self, resource: Option<Arc<FhirResource>>) {
        self.resource = resource;
    }

    pub fn with_resource(mut self, resource: Arc<FhirResource>) -> Self {
        self.resource = Some(resource);
        self
    }

    /// True when the reference neither names, identifies nor embeds a resource.
    pub fn is_empty(&self) -> bool {
        self.reference.as_deref().map_or(true, |r| r.trim().is_empty())
            && self.identifier.is_none()
            && self.resource.is_none()
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
            && self.identifier == other.identifier
            && self.display == other.display
            && match (&self.resource, &other.resource) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct IdentifierWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct CodingWire {
    #[serde(default)]
    pub system: Option<String>,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub display: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct CodeableConceptWire {
    #[serde(default)]
    pub coding: Vec<CodingWire>,

    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct ReferenceWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<IdentifierWire>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}
