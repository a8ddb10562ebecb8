//! Coding systems, codes and per resource type identifier policy.

use fhir::FhirResourceType;
use uuid::Uuid;

/// A coding or identifier system known by URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct System {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub system_uri: String,
    pub enabled: bool,
}

/// An adapter-wide code, optionally mapped to a DHIS2 code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Code {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub mapped_code: Option<String>,
    pub enabled: bool,
}

/// The code a system uses for one adapter code. Unique per (system URI, system code).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemCode {
    pub system_uri: String,
    pub system_code: String,
    /// The adapter code this system code stands for.
    pub code: String,
    pub mapped_code: Option<String>,
}

impl SystemCode {
    /// The mapped code, falling back to the adapter code.
    pub fn effective_code(&self) -> &str {
        self.mapped_code.as_deref().unwrap_or(&self.code)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeSetValue {
    pub code: String,
    pub enabled: bool,
}

/// A named group of adapter codes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeSet {
    pub code: String,
    pub name: String,
    pub codes: Vec<CodeSetValue>,
}

impl CodeSet {
    pub fn contains(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c.enabled && c.code == code)
    }
}

/// Identifier policy of one source resource type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceSystem {
    pub fhir_resource_type: FhirResourceType,
    /// URI of the identifier system that holds business identifiers.
    pub system: String,
    /// Prepended to business identifiers before they are looked up in DHIS2.
    pub code_prefix: Option<String>,
    pub default_value: Option<String>,
    /// The resource's own id is its business identifier.
    pub fhir_id: bool,
}

impl ResourceSystem {
    pub fn new(fhir_resource_type: FhirResourceType, system: impl Into<String>) -> Self {
        Self {
            fhir_resource_type,
            system: system.into(),
            code_prefix: None,
            default_value: None,
            fhir_id: false,
        }
    }

    pub fn prefixed(&self, value: &str) -> String {
        match &self.code_prefix {
            Some(prefix) => format!("{prefix}{value}"),
            None => value.to_owned(),
        }
    }
}
