//! FHIR resources held as JSON.
//!
//! A [`FhirResource`] is always shared as `Arc<FhirResource>`. The `Arc` identity is the resource
//! identity: two resources with equal JSON are still different resources when they were loaded
//! separately (for example a contained copy and a remotely fetched copy).
//!
//! References between in-memory resources (a bundle entry pointing to its parent entry) are
//! recorded with [`FhirResource::link`] as weak pointers, so cyclic parent graphs never leak.

use crate::datatypes::{CodeableConcept, Identifier, Reference};
use crate::id::IdElement;
use crate::resource_type::FhirResourceType;
use crate::{FhirError, FhirResult};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

/// A FHIR resource of any type.
#[derive(Debug)]
pub struct FhirResource {
    resource_type: String,
    json: Value,
    contained: Vec<Arc<FhirResource>>,
    links: RwLock<HashMap<String, Weak<FhirResource>>>,
}

impl FhirResource {
    /// Wraps a JSON resource.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if `json` is not an object with a string
    /// `resourceType`, or if a contained resource is invalid in the same way.
    pub fn from_json(json: Value) -> FhirResult<Arc<Self>> {
        let resource_type = json
            .get("resourceType")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                FhirError::InvalidInput("resource does not declare a resourceType".into())
            })?
            .to_owned();

        let contained = match json.get("contained") {
            Some(Value::Array(items)) => items
                .iter()
                .cloned()
                .map(FhirResource::from_json)
                .collect::<FhirResult<Vec<_>>>()?,
            Some(_) => {
                return Err(FhirError::InvalidInput(format!(
                    "{resource_type}.contained must be an array"
                )))
            }
            None => Vec::new(),
        };

        Ok(Arc::new(Self {
            resource_type,
            json,
            contained,
            links: RwLock::new(HashMap::new()),
        }))
    }

    /// Parses JSON text into a resource.
    pub fn parse(text: &str) -> FhirResult<Arc<Self>> {
        Self::from_json(serde_json::from_str(text)?)
    }

    /// A resource that carries nothing but its type, optional id and identifiers.
    pub fn identified(
        resource_type: FhirResourceType,
        id: Option<&str>,
        identifiers: &[Identifier],
    ) -> Arc<Self> {
        let mut json = serde_json::json!({ "resourceType": resource_type.resource_type_name() });
        if let Some(id) = id {
            json["id"] = Value::String(id.to_owned());
        }
        if !identifiers.is_empty() {
            json["identifier"] = Value::Array(identifiers.iter().map(Identifier::to_json).collect());
        }
        Arc::new(Self {
            resource_type: resource_type.resource_type_name().to_owned(),
            json,
            contained: Vec::new(),
            links: RwLock::new(HashMap::new()),
        })
    }

    pub fn resource_type_name(&self) -> &str {
        &self.resource_type
    }

    /// The supported resource type, if this resource is of one.
    pub fn resource_type(&self) -> Option<FhirResourceType> {
        FhirResourceType::from_name(&self.resource_type).ok()
    }

    pub fn id(&self) -> Option<&str> {
        self.json
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// `Type/id`, or an empty element when the resource has no id.
    pub fn id_element(&self) -> IdElement {
        match self.id() {
            Some(id) => IdElement::of(&self.resource_type, id),
            None => IdElement::default(),
        }
    }

    pub fn json(&self) -> &Value {
        &self.json
    }

    pub fn element(&self, name: &str) -> Option<&Value> {
        self.json.get(name).filter(|v| !v.is_null())
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.json
            .get("meta")
            .and_then(|m| m.get("lastUpdated"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Business identifiers in declaration order.
    pub fn identifiers(&self) -> FhirResult<Vec<Identifier>> {
        match self.element("identifier") {
            Some(Value::Array(items)) => items.iter().map(Identifier::from_json).collect(),
            Some(single) => Ok(vec![Identifier::from_json(single)?]),
            None => Ok(Vec::new()),
        }
    }

    pub fn codeable_concept(&self, element: &str) -> FhirResult<Option<CodeableConcept>> {
        self.element(element)
            .map(CodeableConcept::from_json)
            .transpose()
    }

    pub fn contained(&self) -> &[Arc<FhirResource>] {
        &self.contained
    }

    /// Reads a reference element.
    ///
    /// The returned reference embeds the in-memory target when one is known: a contained
    /// resource for local references, or a resource linked with [`FhirResource::link`].
    pub fn reference(&self, element: &str) -> FhirResult<Option<Reference>> {
        let Some(value) = self.element(element) else {
            return Ok(None);
        };
        let mut reference = Reference::from_json(value)?;
        let id = reference.reference_element();

        if id.is_local() {
            let target = id
                .id_part()
                .and_then(|local| self.contained.iter().find(|c| c.id() == Some(local)));
            if let Some(target) = target {
                reference.set_resource(Some(Arc::clone(target)));
            }
        } else if let Some(linked) = self.linked(element) {
            reference.set_resource(Some(linked));
        }
        Ok(Some(reference))
    }

    /// Reference to the parent in a "part-of" hierarchy.
    pub fn parent_reference(&self) -> FhirResult<Option<Reference>> {
        match self.resource_type().and_then(FhirResourceType::parent_element) {
            Some(element) => self.reference(element),
            None => Ok(None),
        }
    }

    /// Records that `element` of this resource refers to `target`.
    pub fn link(&self, element: &str, target: &Arc<FhirResource>) {
        let mut links = match self.links.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        links.insert(element.to_owned(), Arc::downgrade(target));
    }

    fn linked(&self, element: &str) -> Option<Arc<FhirResource>> {
        let links = match self.links.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        links.get(element).and_then(Weak::upgrade)
    }

    /// Identity comparison.
    pub fn same(a: &Arc<FhirResource>, b: &Arc<FhirResource>) -> bool {
        Arc::ptr_eq(a, b)
    }
}
