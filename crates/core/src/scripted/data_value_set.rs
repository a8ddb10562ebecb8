use super::{checked_option_code, is_newer_foreign_value};
use crate::context::TransformerContext;
use crate::convert::convert_to_text;
use crate::script::ScriptValue;
use crate::store::{DataSetMetadataStore, OrganizationUnitRepository};
use crate::{TransformerError, TransformerResult};
use chrono::{DateTime, Utc};
use dhis::{DataSet, DataValueSet, Reference};
use std::sync::Arc;
use tracing::debug;

/// Read access to an aggregate data value set.
pub trait ScriptedDataValueSet {
    fn id(&self) -> Option<&str>;

    fn data_set_id(&self) -> Option<&str>;

    fn organization_unit_id(&self) -> Option<&str>;

    fn period(&self) -> Option<&str>;

    /// Stored text of the data element's value.
    fn data_value(&self, data_element_id: &str) -> Option<&str>;

    fn is_new_resource(&self) -> bool;
}

/// Script-facing wrapper that validates and dirty-tracks writes to a data value set.
///
/// Data set and organization unit references are resolved against the DHIS2 metadata when set.
pub struct WritableDataValueSet<'a> {
    context: &'a TransformerContext,
    data_sets: &'a dyn DataSetMetadataStore,
    organization_units: &'a dyn OrganizationUnitRepository,
    data_set: Option<Arc<DataSet>>,
    data_value_set: &'a mut DataValueSet,
    new_resource: bool,
    modified: bool,
}

impl<'a> WritableDataValueSet<'a> {
    pub fn new(
        context: &'a TransformerContext,
        data_sets: &'a dyn DataSetMetadataStore,
        organization_units: &'a dyn OrganizationUnitRepository,
        data_value_set: &'a mut DataValueSet,
        new_resource: bool,
    ) -> Self {
        Self {
            context,
            data_sets,
            organization_units,
            data_set: None,
            data_value_set,
            new_resource,
            modified: false,
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified || self.data_value_set.data_values.iter().any(|v| v.modified)
    }

    pub fn set_data_set_id(&mut self, reference: Option<&Reference>) -> TransformerResult<bool> {
        let reference = reference.ok_or_else(|| {
            TransformerError::Mapping("Data set of data value set cannot be null.".into())
        })?;
        let data_set = self.data_sets.find_data_set(reference)?.ok_or_else(|| {
            TransformerError::Mapping(format!("Data set \"{reference}\" does not exist."))
        })?;
        if self.data_value_set.data_set_id.as_deref() != Some(data_set.id.as_str()) {
            self.data_value_set.data_set_id = Some(data_set.id.clone());
            self.modified = true;
        }
        self.data_set = Some(data_set);
        Ok(true)
    }

    pub fn set_organization_unit_id(
        &mut self,
        reference: Option<&Reference>,
    ) -> TransformerResult<bool> {
        let reference = reference.ok_or_else(|| {
            TransformerError::Mapping(
                "Organization unit of data value set cannot be null.".into(),
            )
        })?;
        let unit = self
            .organization_units
            .find_by_reference(reference)?
            .ok_or_else(|| {
                TransformerError::Mapping(format!(
                    "Organization unit \"{reference}\" does not exist."
                ))
            })?;
        if self.data_value_set.org_unit_id.as_deref() != Some(unit.id.as_str()) {
            self.data_value_set.org_unit_id = Some(unit.id);
            self.modified = true;
        }
        Ok(true)
    }

    pub fn set_period(&mut self, period: Option<&str>) -> TransformerResult<bool> {
        let period = period.ok_or_else(|| {
            TransformerError::Mapping("Period of data value set cannot be null.".into())
        })?;
        if self.data_value_set.period.as_deref() != Some(period) {
            self.data_value_set.period = Some(period.to_owned());
            self.modified = true;
        }
        Ok(true)
    }

    pub fn set_complete_date(&mut self, value: &ScriptValue) -> TransformerResult<bool> {
        let date = crate::convert::convert_date_time(value, "complete date")?;
        if self.data_value_set.complete_date != date {
            self.data_value_set.complete_date = date;
            self.modified = true;
        }
        Ok(true)
    }

    /// Sets the value of a data element of the data set.
    ///
    /// Returns false if the stored value is more recent than `last_updated` and was not written
    /// by the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if no data set has been set, the data set does not
    /// include the data element, or the value is null or cannot be converted.
    pub fn set_data_value(
        &mut self,
        reference: &Reference,
        value: &ScriptValue,
        last_updated: Option<DateTime<Utc>>,
    ) -> TransformerResult<bool> {
        let data_set = self.data_set.clone().ok_or_else(|| {
            TransformerError::Mapping(
                "Data set of data value set must be set before its data values.".into(),
            )
        })?;
        let data_element = data_set.data_element(reference).ok_or_else(|| {
            TransformerError::Mapping(format!(
                "Data set \"{}\" does not include data element \"{reference}\".",
                data_set.name
            ))
        })?;
        if value.is_null() {
            return Err(TransformerError::Mapping(format!(
                "Value of data element \"{}\" cannot be null.",
                data_element.name
            )));
        }
        let field = format!("data element \"{}\"", data_element.name);
        let text = convert_to_text(value, data_element.value_type, &field)?;
        let text = checked_option_code(data_element.option_set.as_ref(), text, &field)?;

        let context = self.context;
        let username = context.config().adapter_username();
        if let Some(stored) = self.data_value_set.data_value(&data_element.id) {
            if is_newer_foreign_value(
                stored.last_updated,
                stored.stored_by.as_deref(),
                last_updated,
                username,
            ) {
                debug!(data_element = %data_element.name, "Stored data value is newer, not overwritten");
                return Ok(false);
            }
        }
        let slot = self.data_value_set.data_value_mut(&data_element.id);
        if slot.value != text {
            slot.value = text;
            slot.last_updated = Some(context.now());
            slot.stored_by = Some(username.to_owned());
            slot.modified = true;
        }
        Ok(true)
    }

    /// Checks that the data value set can be saved.
    pub fn validate(&self) -> TransformerResult<()> {
        let set = &*self.data_value_set;
        let missing = if set.org_unit_id.is_none() {
            Some("Organization unit")
        } else if set.data_set_id.is_none() {
            Some("Data set")
        } else if set.period.is_none() {
            Some("Period")
        } else {
            None
        };
        if let Some(field) = missing {
            return Err(TransformerError::Mapping(format!(
                "{field} of data value set has not been specified."
            )));
        }
        if !set.data_values.iter().any(|v| v.value.is_some()) {
            return Err(TransformerError::Mapping(
                "Data value set does not include any data values.".into(),
            ));
        }
        Ok(())
    }
}

impl ScriptedDataValueSet for WritableDataValueSet<'_> {
    fn id(&self) -> Option<&str> {
        self.data_value_set.id.as_deref()
    }

    fn data_set_id(&self) -> Option<&str> {
        self.data_value_set.data_set_id.as_deref()
    }

    fn organization_unit_id(&self) -> Option<&str> {
        self.data_value_set.org_unit_id.as_deref()
    }

    fn period(&self) -> Option<&str> {
        self.data_value_set.period.as_deref()
    }

    fn data_value(&self, data_element_id: &str) -> Option<&str> {
        self.data_value_set
            .data_value(data_element_id)
            .and_then(|v| v.value.as_deref())
    }

    fn is_new_resource(&self) -> bool {
        self.new_resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDhisStore;
    use crate::test_support::{context, data_element, organization_unit};
    use dhis::ValueType;

    fn store() -> InMemoryDhisStore {
        let store = InMemoryDhisStore::default();
        store.add_data_set(DataSet {
            id: "DsMonthly01".into(),
            name: "Monthly Report".into(),
            code: Some("MONTHLY".into()),
            period_type: "Monthly".into(),
            data_elements: vec![data_element("DeCases0001", "Cases", ValueType::IntegerZeroOrPositive)],
        });
        store.add_organization_unit(organization_unit("OuClinic001", "CLINIC_1", None));
        store
    }

    #[test]
    fn builds_a_valid_data_value_set() {
        let context = context();
        let store = store();
        let mut set = DataValueSet::new(None);
        let mut writable = WritableDataValueSet::new(&context, &store, &store, &mut set, true);

        writable
            .set_data_set_id(Some(&Reference::code("MONTHLY").expect("reference")))
            .expect("data set");
        writable
            .set_organization_unit_id(Some(&Reference::code("CLINIC_1").expect("reference")))
            .expect("org unit");
        writable.set_period(Some("202603")).expect("period");
        match writable.validate() {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("any data values")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        writable
            .set_data_value(
                &Reference::name("Cases").expect("reference"),
                &ScriptValue::Integer(4),
                None,
            )
            .expect("value");
        writable.validate().expect("valid");
        assert!(writable.is_modified());
        drop(writable);

        assert_eq!(set.org_unit_id.as_deref(), Some("OuClinic001"));
        assert_eq!(
            set.data_value("DeCases0001").and_then(|v| v.value.as_deref()),
            Some("4")
        );
    }

    #[test]
    fn rejects_unknown_references_and_null_values() {
        let context = context();
        let store = store();
        let mut set = DataValueSet::new(None);
        let mut writable = WritableDataValueSet::new(&context, &store, &store, &mut set, true);

        let cases = Reference::name("Cases").expect("reference");
        match writable.set_data_value(&cases, &ScriptValue::Integer(1), None) {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("must be set before")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        match writable.set_organization_unit_id(Some(&Reference::code("NOPE").expect("reference"))) {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        assert!(writable.set_period(None).is_err());
        writable
            .set_data_set_id(Some(&Reference::id("DsMonthly01").expect("reference")))
            .expect("data set");
        match writable.set_data_value(&cases, &ScriptValue::Null, None) {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("cannot be null")),
            other => panic!("expected Mapping, got {other:?}"),
        }
    }
}
