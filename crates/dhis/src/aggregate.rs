//! Aggregate data value sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One aggregate value of a data value set, with its own dirty flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    pub data_element_id: String,
    pub value: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stored_by: Option<String>,
    #[serde(skip)]
    pub modified: bool,
}

/// Values of one data set for one organisation unit and period.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValueSet {
    pub id: Option<String>,
    pub data_set_id: Option<String>,
    pub org_unit_id: Option<String>,
    /// ISO period, for example `202601` or `2026W3`.
    pub period: Option<String>,
    #[serde(default)]
    pub complete_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_values: Vec<DataValue>,
}

impl DataValueSet {
    pub fn new(id: Option<String>) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn data_value(&self, data_element_id: &str) -> Option<&DataValue> {
        self.data_values
            .iter()
            .find(|v| v.data_element_id == data_element_id)
    }

    /// The stored value of the data element, creating an empty slot if there is none.
    pub fn data_value_mut(&mut self, data_element_id: &str) -> &mut DataValue {
        let index = match self
            .data_values
            .iter()
            .position(|v| v.data_element_id == data_element_id)
        {
            Some(index) => index,
            None => {
                self.data_values.push(DataValue {
                    data_element_id: data_element_id.to_owned(),
                    value: None,
                    comment: None,
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
