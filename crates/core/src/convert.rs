//! Conversion between script values and the text form DHIS2 stores values in.

use crate::error::ConversionError;
use crate::script::ScriptValue;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use dhis::{Location, ValueType};

/// Text form of `value` for a field of the given value type. Null converts to no value.
pub fn convert_to_text(
    value: &ScriptValue,
    value_type: ValueType,
    field: &str,
) -> Result<Option<String>, ConversionError> {
    if value.is_null() {
        return Ok(None);
    }
    let fail = |message: String| ConversionError::new(field, message);

    if value_type.is_integer() {
        let number = match value {
            ScriptValue::Integer(i) => *i,
            ScriptValue::Double(d) if d.fract() == 0.0 && d.abs() < i64::MAX as f64 => *d as i64,
            ScriptValue::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| fail(format!("not an integer: {s}")))?,
            other => return Err(fail(format!("{} is not an integer", other.type_name()))),
        };
        let in_range = match value_type {
            ValueType::IntegerPositive => number > 0,
            ValueType::IntegerNegative => number < 0,
            ValueType::IntegerZeroOrPositive => number >= 0,
            _ => true,
        };
        if !in_range {
            return Err(fail(format!("{number} is out of range")));
        }
        return Ok(Some(number.to_string()));
    }

    match value_type {
        ValueType::Number | ValueType::UnitInterval | ValueType::Percentage => {
            let number = match value {
                ScriptValue::Integer(i) => *i as f64,
                ScriptValue::Double(d) => *d,
                ScriptValue::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| fail(format!("not a number: {s}")))?,
                other => return Err(fail(format!("{} is not a number", other.type_name()))),
            };
            if !number.is_finite() {
                return Err(fail(format!("not a finite number: {number}")));
            }
            let in_range = match value_type {
                ValueType::UnitInterval => (0.0..=1.0).contains(&number),
                ValueType::Percentage => (0.0..=100.0).contains(&number),
                _ => true,
            };
            if !in_range {
                return Err(fail(format!("{number} is out of range")));
            }
            Ok(Some(format_number(number)))
        }
        ValueType::Boolean | ValueType::TrueOnly => {
            let flag = match value {
                ScriptValue::Boolean(b) => *b,
                ScriptValue::String(s) if s.eq_ignore_ascii_case("true") => true,
                ScriptValue::String(s) if s.eq_ignore_ascii_case("false") => false,
                other => return Err(fail(format!("{} is not a boolean", type_label(other)))),
            };
            if value_type == ValueType::TrueOnly && !flag {
                return Ok(None);
            }
            Ok(Some(flag.to_string()))
        }
        ValueType::Date | ValueType::Age => {
            let date = convert_date_time(value, field)?
                .ok_or_else(|| fail("no date".into()))?;
            Ok(Some(date.format("%Y-%m-%d").to_string()))
        }
        ValueType::DateTime => {
            let date_time = convert_date_time(value, field)?
                .ok_or_else(|| fail("no date/time".into()))?;
            Ok(Some(date_time.to_rfc3339_opts(SecondsFormat::Millis, true)))
        }
        ValueType::Coordinate => {
            let location = convert_location(value, field)?
                .ok_or_else(|| fail("no coordinate".into()))?;
            Ok(Some(format_location(location)))
        }
        _ => match value {
            ScriptValue::String(s) => Ok(Some(s.clone())),
            ScriptValue::Integer(i) => Ok(Some(i.to_string())),
            ScriptValue::Double(d) => Ok(Some(format_number(*d))),
            ScriptValue::Boolean(b) => Ok(Some(b.to_string())),
            ScriptValue::Reference(r) => Ok(Some(r.value().to_owned())),
            other => Err(fail(format!("{} cannot be stored as text", other.type_name()))),
        },
    }
}

fn type_label(value: &ScriptValue) -> String {
    match value {
        ScriptValue::String(s) => format!("'{s}'"),
        other => other.type_name().to_owned(),
    }
}

/// Script value of a stored text value.
pub fn convert_from_text(text: Option<&str>, value_type: ValueType) -> ScriptValue {
    let Some(text) = text else {
        return ScriptValue::Null;
    };
    let string = || ScriptValue::String(text.to_owned());
    if value_type.is_integer() {
        return text.parse().map(ScriptValue::Integer).unwrap_or_else(|_| string());
    }
    match value_type {
        ValueType::Number | ValueType::UnitInterval | ValueType::Percentage => {
            text.parse().map(ScriptValue::Double).unwrap_or_else(|_| string())
        }
        ValueType::Boolean | ValueType::TrueOnly => match text {
            "true" => ScriptValue::Boolean(true),
            "false" => ScriptValue::Boolean(false),
            _ => string(),
        },
        ValueType::Date | ValueType::DateTime | ValueType::Age => parse_date_time(text)
            .map(ScriptValue::DateTime)
            .unwrap_or_else(string),
        ValueType::Coordinate => parse_location(text)
            .map(ScriptValue::Location)
            .unwrap_or_else(|_| string()),
        _ => string(),
    }
}

/// A timestamp from a date/time value or its text. Dates are taken at midnight UTC.
pub fn convert_date_time(
    value: &ScriptValue,
    field: &str,
) -> Result<Option<DateTime<Utc>>, ConversionError> {
    match value {
        ScriptValue::Null => Ok(None),
        ScriptValue::DateTime(dt) => Ok(Some(*dt)),
        ScriptValue::String(s) => parse_date_time(s)
            .map(Some)
            .ok_or_else(|| ConversionError::new(field, format!("not a date/time: {s}"))),
        other => Err(ConversionError::new(
            field,
            format!("{} is not a date/time", other.type_name()),
        )),
    }
}

fn parse_date_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub fn convert_location(
    value: &ScriptValue,
    field: &str,
) -> Result<Option<Location>, ConversionError> {
    match value {
        ScriptValue::Null => Ok(None),
        ScriptValue::Location(location) => Ok(Some(*location)),
        ScriptValue::String(s) => parse_location(s)
            .map(Some)
            .map_err(|err| ConversionError::new(field, err.message)),
        other => Err(ConversionError::new(
            field,
            format!("{} is not a location", other.type_name()),
        )),
    }
}

/// Parses `[longitude,latitude]`.
pub fn parse_location(text: &str) -> Result<Location, ConversionError> {
    let invalid = || ConversionError::new("location", format!("not a coordinate: {text}"));
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(invalid)?;
    let (longitude, latitude) = inner.split_once(',').ok_or_else(invalid)?;
    Ok(Location {
        longitude: longitude.trim().parse().map_err(|_| invalid())?,
        latitude: latitude.trim().parse().map_err(|_| invalid())?,
    })
}

pub fn format_location(location: Location) -> String {
    format!("[{},{}]", location.longitude, location.latitude)
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}
