//! Tracker entities: tracked entity instances, enrollments and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Geographic point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
}

/// Stored value of one attribute of a tracked entity instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntityAttributeValue {
    pub attribute_id: String,
    pub value: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stored_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntityInstance {
    pub id: Option<String>,
    pub tracked_entity_type_id: String,
    pub org_unit_id: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Location>,
    #[serde(default)]
    pub attributes: Vec<TrackedEntityAttributeValue>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl TrackedEntityInstance {
    /// A new instance of the given type without any values.
    pub fn new(id: Option<String>, tracked_entity_type_id: impl Into<String>) -> Self {
        Self {
            id,
            tracked_entity_type_id: tracked_entity_type_id.into(),
            org_unit_id: None,
            coordinates: None,
            attributes: Vec::new(),
            last_updated: None,
        }
    }

    pub fn attribute(&self, attribute_id: &str) -> Option<&TrackedEntityAttributeValue> {
        self.attributes.iter().find(|a| a.attribute_id == attribute_id)
    }

    /// The stored value of the attribute, creating an empty slot if there is none.
    pub fn attribute_mut(&mut self, attribute_id: &str) -> &mut TrackedEntityAttributeValue {
        let index = match self
            .attributes
            .iter()
            .position(|a| a.attribute_id == attribute_id)
        {
            Some(index) => index,
            None => {
                self.attributes.push(TrackedEntityAttributeValue {
                    attribute_id: attribute_id.to_owned(),
                    value: None,
                    last_updated: None,
                    stored_by: None,
                });
                self.attributes.len() - 1
            }
        };
        &mut self.attributes[index]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: Option<String>,
    pub program_id: String,
    pub tracked_entity_instance_id: Option<String>,
    pub org_unit_id: Option<String>,
    pub status: EnrollmentStatus,
    #[serde(default)]
    pub enrollment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub incident_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub coordinate: Option<Location>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn new(id: Option<String>, program_id: impl Into<String>) -> Self {
        Self {
            id,
            program_id: program_id.into(),
            tracked_entity_instance_id: None,
            org_unit_id: None,
            status: EnrollmentStatus::Active,
            enrollment_date: None,
            incident_date: None,
            coordinate: None,
            last_updated: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Active,
    Completed,
    Visited,
    Schedule,
    Overdue,
    Skipped,
}

/// Stored value of one data element of an event, with its own dirty flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDataValue {
    pub data_element_id: String,
    pub value: Option<String>,
    #[serde(default)]
    pub provided_elsewhere: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stored_by: Option<String>,
    #[serde(skip)]
    pub modified: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Option<String>,
    pub program_id: String,
    pub program_stage_id: String,
    pub enrollment_id: Option<String>,
    pub tracked_entity_instance_id: Option<String>,
    pub org_unit_id: Option<String>,
    pub status: EventStatus,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub coordinate: Option<Location>,
    #[serde(default)]
    pub data_values: Vec<EventDataValue>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(
        id: Option<String>,
        program_id: impl Into<String>,
        program_stage_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            program_id: program_id.into(),
            program_stage_id: program_stage_id.into(),
            enrollment_id: None,
            tracked_entity_instance_id: None,
            org_unit_id: None,
            status: EventStatus::Active,
            event_date: None,
            due_date: None,
            coordinate: None,
            data_values: Vec::new(),
            last_updated: None,
        }
    }

    pub fn data_value(&self, data_element_id: &str) -> Option<&EventDataValue> {
        self.data_values
            .iter()
            .find(|v| v.data_element_id == data_element_id)
    }

    /// The stored value of the data element, creating an empty slot if there is none.
    pub fn data_value_mut(&mut self, data_element_id: &str) -> &mut EventDataValue {
        let index = match self
            .data_values
            .iter()
            .position(|v| v.data_element_id == data_element_id)
        {
            Some(index) => index,
            None => {
                self.data_values.push(EventDataValue {
                    data_element_id: data_element_id.to_owned(),
                    value: None,
                    provided_elsewhere: false,
                    last_updated: None,
                    stored_by: None,
                    modified: false,
                });
                self.data_values.len() - 1
            }
        };
        &mut self.data_values[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_mut_creates_slot_once() {
        let mut tei = TrackedEntityInstance::new(None, "tetPerson01");
        tei.attribute_mut("teaNatId001").value = Some("12345".into());
        tei.attribute_mut("teaNatId001").stored_by = Some("admin".into());
        assert_eq!(tei.attributes.len(), 1);
        assert_eq!(
            tei.attribute("teaNatId001").and_then(|a| a.value.as_deref()),
            Some("12345")
        );
    }

    #[test]
    fn data_value_mut_creates_unmodified_slot() {
        let mut event = Event::new(None, "prChild0001", "psVisit0001");
        let value = event.data_value_mut("deWeight001");
        assert!(!value.modified);
        assert!(value.value.is_none());
        assert_eq!(event.data_values.len(), 1);
        assert_eq!(event.status, EventStatus::Active);
    }

    #[test]
    fn modified_flag_is_not_serialised() {
        let value = EventDataValue {
            data_element_id: "deWeight001".into(),
            value: Some("12".into()),
            provided_elsewhere: false,
            last_updated: None,
            stored_by: None,
            modified: true,
        };
        let json = serde_json::to_value(&value).expect("serialise");
        assert!(json.get("modified").is_none());
        assert_eq!(json["dataElementId"], "deWeight001");
    }
}
