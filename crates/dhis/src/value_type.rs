//! Value types of data elements and tracked entity attributes.

use serde::{Deserialize, Serialize};

/// Declared type of a stored value. Values are always stored as text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Text,
    LongText,
    Letter,
    PhoneNumber,
    Email,
    Boolean,
    TrueOnly,
    Date,
    DateTime,
    Time,
    Number,
    UnitInterval,
    Percentage,
    Integer,
    IntegerPositive,
    IntegerNegative,
    IntegerZeroOrPositive,
    TrackerAssociate,
    Username,
    Coordinate,
    OrganisationUnit,
    Age,
    Url,
    File,
    Image,
}

impl ValueType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ValueType::Integer
                | ValueType::IntegerPositive
                | ValueType::IntegerNegative
                | ValueType::IntegerZeroOrPositive
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer()
            || matches!(
                self,
                ValueType::Number | ValueType::UnitInterval | ValueType::Percentage
            )
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, ValueType::Boolean | ValueType::TrueOnly)
    }

    pub fn is_date(self) -> bool {
        matches!(self, ValueType::Date | ValueType::DateTime | ValueType::Age)
    }

    pub fn is_text(self) -> bool {
        matches!(
            self,
            ValueType::Text
                | ValueType::LongText
                | ValueType::Letter
                | ValueType::PhoneNumber
                | ValueType::Email
                | ValueType::Username
                | ValueType::Url
                | ValueType::TrackerAssociate
                | ValueType::OrganisationUnit
                | ValueType::File
                | ValueType::Image
                | ValueType::Time
        )
    }
}
