//! Validated text types shared by the adapter crates.
//!
//! - [`NonEmptyText`] for names, codes and coding-system URIs that must carry content
//! - [`SystemCodeValue`] for a `(system URI, code)` pair in its `system|code` textual form

use std::fmt;
use std::str::FromStr;

/// Separator between the system URI and the code in the textual form of a [`SystemCodeValue`].
pub const SYSTEM_CODE_SEPARATOR: char = '|';

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input is not of the form `system|code`
    #[error("Invalid system code value: {0}")]
    InvalidSystemCode(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Like [`NonEmptyText::new`] but maps empty input to `None`.
    pub fn optional(input: Option<impl AsRef<str>>) -> Option<Self> {
        input.and_then(|value| Self::new(value).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for NonEmptyText {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// An immutable pair of coding-system URI and code.
///
/// Two values are equal when both system and code are equal; the textual form is `system|code`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemCodeValue {
    system: NonEmptyText,
    code: NonEmptyText,
}

impl SystemCodeValue {
    /// Creates a value from its two parts.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] if either part is blank.
    pub fn new(system: impl AsRef<str>, code: impl AsRef<str>) -> Result<Self, TextError> {
        Ok(Self {
            system: NonEmptyText::new(system)?,
            code: NonEmptyText::new(code)?,
        })
    }

    /// Parses the `system|code` form. The code may itself contain the separator.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::InvalidSystemCode`] if there is no separator or a part is blank.
    pub fn parse(value: &str) -> Result<Self, TextError> {
        let (system, code) = value
            .split_once(SYSTEM_CODE_SEPARATOR)
            .ok_or_else(|| TextError::InvalidSystemCode(value.to_owned()))?;
        Self::new(system, code).map_err(|_| TextError::InvalidSystemCode(value.to_owned()))
    }

    pub fn system(&self) -> &str {
        self.system.as_str()
    }

    pub fn code(&self) -> &str {
        self.code.as_str()
    }
}

impl fmt::Display for SystemCodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.system, SYSTEM_CODE_SEPARATOR, self.code)
    }
}

impl FromStr for SystemCodeValue {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for SystemCodeValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for SystemCodeValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SystemCodeValue::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_input() {
        let text = NonEmptyText::new("  nat-id  ").expect("should accept padded text");
        assert_eq!(text.as_str(), "nat-id");
    }

    #[test]
    fn non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new(" \t ").unwrap_err(), TextError::Empty);
        assert!(NonEmptyText::optional(Some("   ")).is_none());
        assert!(NonEmptyText::optional(None::<&str>).is_none());
    }

    #[test]
    fn parses_system_code_value_at_first_separator() {
        let value = SystemCodeValue::parse("http://loinc.org|8302-2|x").expect("should parse");
        assert_eq!(value.system(), "http://loinc.org");
        assert_eq!(value.code(), "8302-2|x");
        assert_eq!(value.to_string(), "http://loinc.org|8302-2|x");
    }

    #[test]
    fn rejects_system_code_value_without_code() {
        let err = SystemCodeValue::parse("http://loinc.org|").expect_err("should reject");
        match err {
            TextError::InvalidSystemCode(msg) => assert!(msg.contains("loinc")),
            other => panic!("expected InvalidSystemCode, got {other:?}"),
        }
        assert!(SystemCodeValue::parse("no-separator").is_err());
    }

    #[test]
    fn system_code_value_serialises_as_text() {
        let value = SystemCodeValue::new("nat-id", "12345").expect("valid");
        let json = serde_json::to_string(&value).expect("serialise");
        assert_eq!(json, "\"nat-id|12345\"");
        let back: SystemCodeValue = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, value);
    }
}
