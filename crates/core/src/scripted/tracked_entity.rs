use super::{checked_option_code, integer_option_code, is_newer_foreign_value};
use crate::context::TransformerContext;
use crate::convert::{convert_from_text, convert_location, convert_to_text};
use crate::script::ScriptValue;
use crate::{TransformerError, TransformerResult};
use chrono::{DateTime, Utc};
use dhis::{
    Location, Reference, TrackedEntityAttribute, TrackedEntityAttributes, TrackedEntityInstance,
    TrackedEntityType,
};
use tracing::debug;

/// Read access to a tracked entity instance.
pub trait ScriptedTrackedEntityInstance {
    fn id(&self) -> Option<&str>;

    fn tracked_entity_type_id(&self) -> &str;

    fn organization_unit_id(&self) -> Option<&str>;

    fn coordinates(&self) -> Option<Location>;

    /// Typed value of an attribute, null if the instance has none.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if the attribute does not exist.
    fn value(&self, attribute: &Reference) -> TransformerResult<ScriptValue>;

    fn is_new_resource(&self) -> bool;
}

fn find_attribute<'a>(
    attributes: &'a TrackedEntityAttributes,
    reference: &Reference,
) -> TransformerResult<&'a TrackedEntityAttribute> {
    attributes.find(reference).ok_or_else(|| {
        TransformerError::Mapping(format!(
            "Tracked entity type attribute \"{reference}\" does not exist."
        ))
    })
}

fn attribute_value(
    attributes: &TrackedEntityAttributes,
    instance: &TrackedEntityInstance,
    reference: &Reference,
) -> TransformerResult<ScriptValue> {
    let attribute = find_attribute(attributes, reference)?;
    let text = instance
        .attribute(&attribute.id)
        .and_then(|value| value.value.as_deref());
    Ok(convert_from_text(text, attribute.value_type))
}

// ============================================================================
// Read-only view
// ============================================================================

/// A tracked entity instance that scripts may inspect but not change.
pub struct TrackedEntityInstanceView<'a> {
    attributes: &'a TrackedEntityAttributes,
    instance: &'a TrackedEntityInstance,
    new_resource: bool,
}

impl<'a> TrackedEntityInstanceView<'a> {
    pub fn new(
        attributes: &'a TrackedEntityAttributes,
        instance: &'a TrackedEntityInstance,
        new_resource: bool,
    ) -> Self {
        Self {
            attributes,
            instance,
            new_resource,
        }
    }
}

impl ScriptedTrackedEntityInstance for TrackedEntityInstanceView<'_> {
    fn id(&self) -> Option<&str> {
        self.instance.id.as_deref()
    }

    fn tracked_entity_type_id(&self) -> &str {
        &self.instance.tracked_entity_type_id
    }

    fn organization_unit_id(&self) -> Option<&str> {
        self.instance.org_unit_id.as_deref()
    }

    fn coordinates(&self) -> Option<Location> {
        self.instance.coordinates
    }

    fn value(&self, attribute: &Reference) -> TransformerResult<ScriptValue> {
        attribute_value(self.attributes, self.instance, attribute)
    }

    fn is_new_resource(&self) -> bool {
        self.new_resource
    }
}

// ============================================================================
// Writable wrapper
// ============================================================================

/// Script-facing wrapper that validates and dirty-tracks writes to a tracked entity instance.
pub struct WritableTrackedEntityInstance<'a> {
    context: &'a TransformerContext,
    attributes: &'a TrackedEntityAttributes,
    tracked_entity_type: &'a TrackedEntityType,
    instance: &'a mut TrackedEntityInstance,
    new_resource: bool,
    modified: bool,
    protected_attribute_id: Option<String>,
}

impl<'a> WritableTrackedEntityInstance<'a> {
    pub fn new(
        context: &'a TransformerContext,
        attributes: &'a TrackedEntityAttributes,
        tracked_entity_type: &'a TrackedEntityType,
        instance: &'a mut TrackedEntityInstance,
        new_resource: bool,
    ) -> Self {
        Self {
            context,
            attributes,
            tracked_entity_type,
            instance,
            new_resource,
            modified: false,
            protected_attribute_id: None,
        }
    }

    /// Forbids changing the value of the attribute the instance was resolved by.
    pub fn protect_attribute(&mut self, attribute_id: impl Into<String>) {
        self.protected_attribute_id = Some(attribute_id.into());
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Sets the value of an attribute.
    ///
    /// Returns false if the stored value is more recent than `last_updated` and was not written
    /// by the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if the attribute does not exist, is generated, is
    /// mandatory and the value is null, is protected and the value differs, or if the value
    /// cannot be converted to the attribute's value type or option set.
    pub fn set_value(
        &mut self,
        reference: &Reference,
        value: &ScriptValue,
        last_updated: Option<DateTime<Utc>>,
    ) -> TransformerResult<bool> {
        let attribute = find_attribute(self.attributes, reference)?;
        let mandatory = self
            .tracked_entity_type
            .type_attribute(&attribute.id)
            .is_some_and(|a| a.mandatory);
        if mandatory && value.is_null() {
            return Err(TransformerError::Mapping(format!(
                "Tracked entity type attribute \"{}\" is mandatory and cannot be null.",
                attribute.name
            )));
        }
        if attribute.generated {
            return Err(TransformerError::Mapping(format!(
                "Tracked entity type attribute \"{}\" is generated and cannot be set.",
                attribute.name
            )));
        }
        let field = format!("tracked entity attribute \"{}\"", attribute.name);
        let text = convert_to_text(value, attribute.value_type, &field)?;
        let text = checked_option_code(attribute.option_set.as_ref(), text, &field)?;
        self.write(attribute, text, last_updated)
    }

    fn write(
        &mut self,
        attribute: &TrackedEntityAttribute,
        text: Option<String>,
        last_updated: Option<DateTime<Utc>>,
    ) -> TransformerResult<bool> {
        let username = self.context.config().adapter_username();
        if let Some(stored) = self.instance.attribute(&attribute.id) {
            if is_newer_foreign_value(
                stored.last_updated,
                stored.stored_by.as_deref(),
                last_updated,
                username,
            ) {
                debug!(attribute = %attribute.name, "Stored attribute value is newer, not overwritten");
                return Ok(false);
            }
            if self.protected_attribute_id.as_deref() == Some(attribute.id.as_str())
                && stored.value.is_some()
                && stored.value != text
            {
                return Err(TransformerError::Mapping(format!(
                    "Identifying tracked entity type attribute \"{}\" cannot be changed.",
                    attribute.name
                )));
            }
        }

        let now = self.context.now();
        let slot = self.instance.attribute_mut(&attribute.id);
        if slot.value != text {
            slot.value = text;
            slot.last_updated = Some(now);
            slot.stored_by = Some(username.to_owned());
            self.modified = true;
        }
        Ok(true)
    }

    /// Sets an option-set attribute to the option at position `value - value_base`.
    ///
    /// Returns false without writing if the value is below the base or would select an earlier
    /// option than the stored one while `decrement_allowed` is false.
    pub fn set_integer_option_value(
        &mut self,
        reference: &Reference,
        value: i64,
        value_base: i64,
        decrement_allowed: bool,
        pattern: Option<&str>,
        last_updated: Option<DateTime<Utc>>,
    ) -> TransformerResult<bool> {
        let attribute = find_attribute(self.attributes, reference)?;
        let option_set = attribute.option_set.as_ref().ok_or_else(|| {
            TransformerError::Mapping(format!(
                "Tracked entity type attribute \"{}\" does not have an option set.",
                attribute.name
            ))
        })?;
        let current = self
            .instance
            .attribute(&attribute.id)
            .and_then(|v| v.value.as_deref());
        match integer_option_code(option_set, value, value_base, decrement_allowed, pattern, current)? {
            Some(code) => self.set_value(reference, &ScriptValue::String(code), last_updated),
            None => Ok(false),
        }
    }

    pub fn set_organization_unit_id(&mut self, id: Option<&str>) -> TransformerResult<bool> {
        let id = id.ok_or_else(|| {
            TransformerError::Mapping(
                "Organization unit ID of tracked entity instance cannot be null.".into(),
            )
        })?;
        if self.instance.org_unit_id.as_deref() != Some(id) {
            self.instance.org_unit_id = Some(id.to_owned());
            self.modified = true;
        }
        Ok(true)
    }

    pub fn set_coordinates(&mut self, value: &ScriptValue) -> TransformerResult<bool> {
        let location = convert_location(value, "tracked entity instance coordinates")?;
        if self.instance.coordinates != location {
            self.instance.coordinates = location;
            self.modified = true;
        }
        Ok(true)
    }

    /// Checks that the instance can be saved.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if the organization unit or a mandatory attribute
    /// value is missing.
    pub fn validate(&self) -> TransformerResult<()> {
        if self.instance.org_unit_id.is_none() {
            return Err(TransformerError::Mapping(
                "Organization unit ID of tracked entity instance has not been specified.".into(),
            ));
        }
        for type_attribute in self.tracked_entity_type.attributes.iter().filter(|a| a.mandatory) {
            let has_value = self
                .instance
                .attribute(&type_attribute.attribute_id)
                .is_some_and(|v| v.value.is_some());
            if !has_value {
                let name = self
                    .attributes
                    .by_id(&type_attribute.attribute_id)
                    .map_or(type_attribute.attribute_id.as_str(), |a| a.name.as_str());
                return Err(TransformerError::Mapping(format!(
                    "Value of mandatory tracked entity type attribute \"{name}\" has not been specified."
                )));
            }
        }
        Ok(())
    }
}

impl ScriptedTrackedEntityInstance for WritableTrackedEntityInstance<'_> {
    fn id(&self) -> Option<&str> {
        self.instance.id.as_deref()
    }

    fn tracked_entity_type_id(&self) -> &str {
        &self.instance.tracked_entity_type_id
    }

    fn organization_unit_id(&self) -> Option<&str> {
        self.instance.org_unit_id.as_deref()
    }

    fn coordinates(&self) -> Option<Location> {
        self.instance.coordinates
    }

    fn value(&self, attribute: &Reference) -> TransformerResult<ScriptValue> {
        attribute_value(self.attributes, self.instance, attribute)
    }

    fn is_new_resource(&self) -> bool {
        self.new_resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, option_set, tracked_entity_attribute};
    use chrono::Duration;
    use dhis::{TrackedEntityAttributeValue, TrackedEntityTypeAttribute, ValueType};

    fn metadata() -> (TrackedEntityAttributes, TrackedEntityType) {
        let mut vaccine = tracked_entity_attribute("AtVaccine01", "Vaccine", ValueType::Text);
        vaccine.option_set = Some(option_set("Vaccines", &["MMR", "BCG"]));
        let mut national_id = tracked_entity_attribute("AtNatId0001", "National ID", ValueType::Text);
        national_id.unique = true;
        let mut generated = tracked_entity_attribute("AtGener0001", "Register No", ValueType::Text);
        generated.generated = true;
        let attributes = TrackedEntityAttributes::new(vec![
            tracked_entity_attribute("AtName00001", "Name", ValueType::Text),
            tracked_entity_attribute("AtWeight001", "Weight", ValueType::Number),
            vaccine,
            national_id,
            generated,
        ]);
        let tracked_entity_type = TrackedEntityType {
            id: "TetPerson01".into(),
            name: "Person".into(),
            code: None,
            attributes: vec![
                TrackedEntityTypeAttribute {
                    attribute_id: "AtName00001".into(),
                    mandatory: true,
                },
                TrackedEntityTypeAttribute {
                    attribute_id: "AtWeight001".into(),
                    mandatory: false,
                },
            ],
        };
        (attributes, tracked_entity_type)
    }

    fn code(value: &str) -> Reference {
        Reference::name(value).expect("reference")
    }

    #[test]
    fn writes_convert_and_mark_modified() {
        let context = context();
        let (attributes, tet) = metadata();
        let mut instance = TrackedEntityInstance::new(None, "TetPerson01");
        let mut writable =
            WritableTrackedEntityInstance::new(&context, &attributes, &tet, &mut instance, true);

        assert!(writable
            .set_value(&code("Weight"), &ScriptValue::Double(72.5), None)
            .expect("weight"));
        assert!(writable.is_modified());
        assert_eq!(
            writable.value(&code("Weight")).expect("weight"),
            ScriptValue::Double(72.5)
        );
        assert!(writable
            .set_value(&code("Vaccine"), &ScriptValue::String("mmr".into()), None)
            .expect("vaccine"));
        drop(writable);

        let vaccine = instance.attribute("AtVaccine01").expect("stored");
        assert_eq!(vaccine.value.as_deref(), Some("MMR"));
        assert_eq!(
            vaccine.stored_by.as_deref(),
            Some(context.config().adapter_username())
        );
    }

    #[test]
    fn unchanged_value_is_not_a_modification() {
        let context = context();
        let (attributes, tet) = metadata();
        let mut instance = TrackedEntityInstance::new(Some("TeiAbc00001".into()), "TetPerson01");
        instance.attribute_mut("AtName00001").value = Some("Jane".into());
        let mut writable =
            WritableTrackedEntityInstance::new(&context, &attributes, &tet, &mut instance, false);
        assert!(writable
            .set_value(&code("Name"), &ScriptValue::String("Jane".into()), None)
            .expect("name"));
        assert!(!writable.is_modified());
    }

    #[test]
    fn rejects_invalid_writes() {
        let context = context();
        let (attributes, tet) = metadata();
        let mut instance = TrackedEntityInstance::new(None, "TetPerson01");
        let mut writable =
            WritableTrackedEntityInstance::new(&context, &attributes, &tet, &mut instance, true);

        match writable.set_value(&code("Unknown"), &ScriptValue::Null, None) {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        match writable.set_value(&code("Name"), &ScriptValue::Null, None) {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("is mandatory")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        match writable.set_value(&code("Register No"), &ScriptValue::String("1".into()), None) {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("is generated")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        match writable.set_value(&code("Vaccine"), &ScriptValue::String("XYZ".into()), None) {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("not a valid option")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        assert!(!writable.is_modified());
    }

    #[test]
    fn newer_values_of_other_users_are_kept() {
        let context = context();
        let (attributes, tet) = metadata();
        let now = Utc::now();
        let mut instance = TrackedEntityInstance::new(Some("TeiAbc00001".into()), "TetPerson01");
        instance.attributes.push(TrackedEntityAttributeValue {
            attribute_id: "AtWeight001".into(),
            value: Some("70".into()),
            last_updated: Some(now),
            stored_by: Some("clerk".into()),
        });
        let mut writable =
            WritableTrackedEntityInstance::new(&context, &attributes, &tet, &mut instance, false);
        let written = writable
            .set_value(
                &code("Weight"),
                &ScriptValue::Integer(75),
                Some(now - Duration::hours(1)),
            )
            .expect("weight");
        assert!(!written);
        assert!(!writable.is_modified());
        drop(writable);
        assert_eq!(
            instance.attribute("AtWeight001").and_then(|v| v.value.as_deref()),
            Some("70")
        );
    }

    #[test]
    fn protected_identifier_cannot_change() {
        let context = context();
        let (attributes, tet) = metadata();
        let mut instance = TrackedEntityInstance::new(Some("TeiAbc00001".into()), "TetPerson01");
        instance.attribute_mut("AtNatId0001").value = Some("ID-1".into());
        let mut writable =
            WritableTrackedEntityInstance::new(&context, &attributes, &tet, &mut instance, false);
        writable.protect_attribute("AtNatId0001");
        assert!(writable
            .set_value(&code("National ID"), &ScriptValue::String("ID-1".into()), None)
            .expect("same value"));
        let err = writable
            .set_value(&code("National ID"), &ScriptValue::String("ID-2".into()), None)
            .expect_err("changed identifier");
        assert!(matches!(err, TransformerError::Mapping(_)));
    }

    #[test]
    fn validation_requires_org_unit_and_mandatory_values() {
        let context = context();
        let (attributes, tet) = metadata();
        let mut instance = TrackedEntityInstance::new(None, "TetPerson01");
        let mut writable =
            WritableTrackedEntityInstance::new(&context, &attributes, &tet, &mut instance, true);
        match writable.validate() {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("Organization unit")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        writable.set_organization_unit_id(Some("OuClinic001")).expect("org unit");
        match writable.validate() {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("\"Name\"")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        writable
            .set_value(&code("Name"), &ScriptValue::String("Jane".into()), None)
            .expect("name");
        writable.validate().expect("valid");
    }
}
