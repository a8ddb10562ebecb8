use super::ScriptUtils;
use crate::constants::VALUE_TYPE_UTILS;
use crate::convert::convert_date_time;
use crate::script::ScriptValue;
use crate::{TransformerError, TransformerResult};
use dhis::ValueType;
use fhir::FhirResource;
use serde_json::Value;
use std::any::Any;

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) if value.get("code").is_some() => "Coding",
        Value::Object(_) => "complex type",
    }
}

/// The code of a `Coding`.
fn coding_code(value: &Value) -> Option<String> {
    value.get("code").and_then(Value::as_str).map(str::to_owned)
}

/// Conversion of FHIR element values into DHIS2 text values.
pub struct ValueTypeUtils;

impl ValueTypeUtils {
    /// The DHIS2 text of a FHIR primitive or `Coding` for `value_type`.
    ///
    /// Date/time values are written as local date/times in UTC, e.g. `2026-03-04T10:00:00`.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Data`] if the value type is not supported or the FHIR value does
    /// not fit it, and [`TransformerError::Mapping`] for an unparsable date/time.
    pub fn convert(
        &self,
        value: Option<&Value>,
        value_type: ValueType,
    ) -> TransformerResult<Option<String>> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let converted = match value_type {
            t if t.is_integer() => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
                Value::Object(_) => coding_code(value),
                _ => None,
            },
            t if t.is_numeric() => match value {
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            },
            t if t.is_boolean() => value.as_bool().map(|b| b.to_string()),
            t if t.is_date() => match value {
                Value::String(text) => {
                    convert_date_time(&ScriptValue::String(text.clone()), "date/time")?
                        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
                }
                _ => None,
            },
            ValueType::Time => value.as_str().map(str::to_owned),
            ValueType::Text
            | ValueType::LongText
            | ValueType::Letter
            | ValueType::PhoneNumber
            | ValueType::Email
            | ValueType::Username
            | ValueType::Url
            | ValueType::TrackerAssociate
            | ValueType::OrganisationUnit => match value {
                Value::String(text) => Some(text.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                Value::Object(_) => coding_code(value),
                _ => None,
            },
            other => {
                return Err(TransformerError::Data(format!(
                    "Unsupported DHIS2 value type: {other:?}"
                )))
            }
        };
        converted.map(Some).ok_or_else(|| {
            TransformerError::Data(format!(
                "Unsupported FHIR type {} for DHIS2 value type {value_type:?}",
                json_kind(value)
            ))
        })
    }

    /// Converts the choice element `name[x]` of `resource`, e.g. `valueQuantity` for `value`.
    ///
    /// A `Quantity` contributes its `value`.
    pub fn convert_choice(
        &self,
        resource: &FhirResource,
        name: &str,
        value_type: ValueType,
    ) -> TransformerResult<Option<String>> {
        let Some(object) = resource.json().as_object() else {
            return Ok(None);
        };
        let element = object.iter().find(|(key, _)| {
            key.strip_prefix(name)
                .and_then(|suffix| suffix.chars().next())
                .is_some_and(char::is_uppercase)
        });
        match element {
            Some((key, value)) if key.ends_with("Quantity") => {
                self.convert(value.get("value"), value_type)
            }
            Some((key, value)) if key.ends_with("CodeableConcept") => self.convert(
                value
                    .get("coding")
                    .and_then(Value::as_array)
                    .and_then(|codings| codings.first()),
                value_type,
            ),
            Some((_, value)) => self.convert(Some(value), value_type),
            None => Ok(None),
        }
    }
}

impl ScriptUtils for ValueTypeUtils {
    fn name(&self) -> &'static str {
        VALUE_TYPE_UTILS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fhir_resource;
    use serde_json::json;

    fn convert(value: Value, value_type: ValueType) -> TransformerResult<Option<String>> {
        ValueTypeUtils.convert(Some(&value), value_type)
    }

    #[test]
    fn primitives_convert_to_their_text() {
        assert_eq!(convert(json!("Jane"), ValueType::Text).expect("text").as_deref(), Some("Jane"));
        assert_eq!(convert(json!(3), ValueType::IntegerPositive).expect("int").as_deref(), Some("3"));
        assert_eq!(convert(json!(72.5), ValueType::Number).expect("number").as_deref(), Some("72.5"));
        assert_eq!(convert(json!(true), ValueType::TrueOnly).expect("bool").as_deref(), Some("true"));
        assert_eq!(convert(json!("10:15"), ValueType::Time).expect("time").as_deref(), Some("10:15"));
        assert_eq!(
            convert(json!("2026-03-04T10:00:00+02:00"), ValueType::DateTime)
                .expect("date")
                .as_deref(),
            Some("2026-03-04T08:00:00")
        );
        assert!(ValueTypeUtils.convert(None, ValueType::Text).expect("none").is_none());
    }

    #[test]
    fn codings_give_their_code() {
        let coding = json!({"system": "http://example.org/doses", "code": "2"});
        assert_eq!(convert(coding.clone(), ValueType::Integer).expect("int").as_deref(), Some("2"));
        assert_eq!(convert(coding, ValueType::Text).expect("text").as_deref(), Some("2"));
    }

    #[test]
    fn mismatching_values_are_data_errors() {
        match convert(json!(1.5), ValueType::Integer) {
            Err(TransformerError::Data(msg)) => assert!(msg.contains("number")),
            other => panic!("expected Data, got {other:?}"),
        }
        match convert(json!("[1,2]"), ValueType::Coordinate) {
            Err(TransformerError::Data(msg)) => assert!(msg.contains("Unsupported DHIS2 value type")),
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn choice_elements_are_found_by_prefix() {
        let observation = fhir_resource(
            r#"{"resourceType": "Observation", "id": "o1",
                "valueQuantity": {"value": 72.5, "unit": "kg"}}"#,
        );
        assert_eq!(
            ValueTypeUtils
                .convert_choice(&observation, "value", ValueType::Number)
                .expect("weight")
                .as_deref(),
            Some("72.5")
        );
        assert!(ValueTypeUtils
            .convert_choice(&observation, "effective", ValueType::Date)
            .expect("date")
            .is_none());
    }
}
