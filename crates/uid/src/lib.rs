//! DHIS2 identifier utilities.
//!
//! Every DHIS2 object is identified by a UID with a fixed shape:
//! - Length: 11
//! - First character: ASCII letter
//! - Remaining characters: ASCII letters or digits
//! - Example: `Ab3xZ0kPq9W`
//!
//! [`Uid`] guarantees that shape once constructed. New identifiers for entities created by the
//! adapter are allocated with [`Uid::generate`].

use rand::Rng;
use std::fmt;
use std::str::FromStr;

/// Length of every DHIS2 UID.
pub const UID_LENGTH: usize = 11;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Error type for UID operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for UID operations.
pub type UidResult<T> = Result<T, UidError>;

/// A validated DHIS2 UID.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(String);

impl Uid {
    /// Generates a new random UID.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut value = String::with_capacity(UID_LENGTH);
        value.push(LETTERS[rng.gen_range(0..LETTERS.len())] as char);
        for _ in 1..UID_LENGTH {
            value.push(ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char);
        }
        Self(value)
    }

    /// Validates an externally supplied UID.
    ///
    /// # Errors
    ///
    /// Returns [`UidError::InvalidInput`] if `input` does not have the UID shape.
    pub fn parse(input: &str) -> UidResult<Self> {
        if Self::is_valid(input) {
            return Ok(Self(input.to_owned()));
        }
        Err(UidError::InvalidInput(format!(
            "UID must be 11 alphanumeric characters starting with a letter, got: '{input}'"
        )))
    }

    /// Returns true if `input` has the UID shape. Purely syntactic.
    pub fn is_valid(input: &str) -> bool {
        let bytes = input.as_bytes();
        bytes.len() == UID_LENGTH
            && bytes[0].is_ascii_alphabetic()
            && bytes[1..].iter().all(u8::is_ascii_alphanumeric)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Uid {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Uid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Uid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Uid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Uid::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_uids_are_valid_and_distinct() {
        let a = Uid::generate();
        let b = Uid::generate();
        assert!(Uid::is_valid(a.as_str()), "{a} should be valid");
        assert!(Uid::is_valid(b.as_str()), "{b} should be valid");
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_leading_digit_and_wrong_length() {
        assert!(!Uid::is_valid("1b3xZ0kPq9W"));
        assert!(!Uid::is_valid("Ab3xZ0kPq9"));
        assert!(!Uid::is_valid("Ab3xZ0kPq9WW"));
        assert!(!Uid::is_valid("Ab3x-0kPq9W"));
    }

    #[test]
    fn parse_reports_offending_input() {
        let err = Uid::parse("nope").expect_err("should reject");
        match err {
            UidError::InvalidInput(msg) => assert!(msg.contains("nope")),
        }
        let uid = Uid::parse("Ab3xZ0kPq9W").expect("should accept");
        assert_eq!(uid.to_string(), "Ab3xZ0kPq9W");
    }

    #[test]
    fn serde_validates_on_deserialise() {
        let uid: Uid = serde_json::from_str("\"Ab3xZ0kPq9W\"").expect("valid uid");
        assert_eq!(uid.as_str(), "Ab3xZ0kPq9W");
        assert!(serde_json::from_str::<Uid>("\"bad\"").is_err());
    }
}
