//! Reference string parsing.
//!
//! A FHIR reference string takes one of a few shapes:
//! - `#abc` - local reference to a contained resource
//! - `Patient/123` - relative reference, optionally followed by `/_history/<version>`
//! - `http://server/fhir/Patient/123` - absolute reference
//! - `urn:uuid:...` - logical reference with no resource type
//! - `123` - bare id

use std::fmt;

/// Parsed form of a FHIR reference string or resource id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdElement {
    value: Option<String>,
    base_url: Option<String>,
    resource_type: Option<String>,
    id_part: Option<String>,
    version: Option<String>,
    local: bool,
}

impl IdElement {
    /// Parses a reference string. Blank input gives an empty element.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return Self::default();
        }

        if let Some(local) = value.strip_prefix('#') {
            return Self {
                value: Some(value.to_owned()),
                id_part: (!local.is_empty()).then(|| local.to_owned()),
                local: true,
                ..Self::default()
            };
        }

        if value.starts_with("urn:") {
            return Self {
                value: Some(value.to_owned()),
                id_part: Some(value.to_owned()),
                ..Self::default()
            };
        }

        let mut segments: Vec<&str> = value.split('/').collect();
        let mut version = None;
        if segments.len() >= 4 && segments[segments.len() - 2] == "_history" {
            version = segments.pop().map(str::to_owned);
            segments.pop();
        }

        let (base_url, resource_type, id_part) = match segments.len() {
            0 => (None, None, None),
            1 => (None, None, Some(segments[0])),
            n => {
                let base = segments[..n - 2].join("/");
                (
                    (!base.is_empty()).then_some(base),
                    Some(segments[n - 2]),
                    Some(segments[n - 1]),
                )
            }
        };

        Self {
            value: Some(value.to_owned()),
            base_url,
            resource_type: resource_type
                .filter(|t| !t.is_empty())
                .map(str::to_owned),
            id_part: id_part.filter(|i| !i.is_empty()).map(str::to_owned),
            version,
            local: false,
        }
    }

    /// Builds the element for a resource of the given type and id.
    pub fn of(resource_type: &str, id: &str) -> Self {
        Self::parse(&format!("{resource_type}/{id}"))
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_absolute(&self) -> bool {
        self.base_url.is_some()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn id_part(&self) -> Option<&str> {
        self.id_part.as_deref()
    }

    pub fn has_id_part(&self) -> bool {
        self.id_part.is_some()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Returns `Type/id` without base URL and version, if both parts are known.
    pub fn to_unqualified_versionless(&self) -> Option<String> {
        match (self.resource_type(), self.id_part()) {
            (Some(t), Some(id)) => Some(format!("{t}/{id}")),
            _ => None,
        }
    }
}

impl fmt::Display for IdElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value.as_deref().unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_reference() {
        let id = IdElement::parse("Organization/abc");
        assert_eq!(id.resource_type(), Some("Organization"));
        assert_eq!(id.id_part(), Some("abc"));
        assert!(!id.is_local());
        assert!(!id.is_absolute());
    }

    #[test]
    fn parses_absolute_versioned_reference() {
        let id = IdElement::parse("http://example.org/fhir/Patient/12/_history/3");
        assert_eq!(id.base_url(), Some("http://example.org/fhir"));
        assert_eq!(id.resource_type(), Some("Patient"));
        assert_eq!(id.id_part(), Some("12"));
        assert_eq!(id.version(), Some("3"));
        assert_eq!(id.to_unqualified_versionless().as_deref(), Some("Patient/12"));
    }

    #[test]
    fn parses_local_reference() {
        let id = IdElement::parse("#org1");
        assert!(id.is_local());
        assert_eq!(id.id_part(), Some("org1"));
        assert_eq!(id.resource_type(), None);
    }

    #[test]
    fn parses_bare_id_and_urn() {
        let bare = IdElement::parse("12345");
        assert_eq!(bare.id_part(), Some("12345"));
        assert_eq!(bare.resource_type(), None);

        let urn = IdElement::parse("urn:uuid:4f6a");
        assert_eq!(urn.id_part(), Some("urn:uuid:4f6a"));
        assert!(!urn.is_local());
    }

    #[test]
    fn blank_input_is_empty() {
        let id = IdElement::parse("  ");
        assert!(id.is_empty());
        assert!(!id.has_id_part());
    }
}
