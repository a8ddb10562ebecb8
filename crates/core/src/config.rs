//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the engine as
//! `Arc<CoreConfig>`. Nothing in the transformation path reads environment variables, so two
//! concurrent transformations always see the same settings.

use crate::constants::{DEFAULT_HIERARCHY_MAX_DEPTH, DEFAULT_INTERNAL_IDENTIFIER_URI};
use crate::{TransformerError, TransformerResult};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    adapter_username: String,
    internal_identifier_uri: String,
    creation_disabled: bool,
    hierarchy_max_depth: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Config`] if the username or identifier URI is blank or the
    /// hierarchy depth is zero.
    pub fn new(
        adapter_username: String,
        internal_identifier_uri: String,
        creation_disabled: bool,
        hierarchy_max_depth: usize,
    ) -> TransformerResult<Self> {
        if adapter_username.trim().is_empty() {
            return Err(TransformerError::Config(
                "adapter_username cannot be empty".into(),
            ));
        }
        if internal_identifier_uri.trim().is_empty() {
            return Err(TransformerError::Config(
                "internal_identifier_uri cannot be empty".into(),
            ));
        }
        if hierarchy_max_depth == 0 {
            return Err(TransformerError::Config(
                "hierarchy_max_depth must be at least 1".into(),
            ));
        }

        Ok(Self {
            adapter_username,
            internal_identifier_uri,
            creation_disabled,
            hierarchy_max_depth,
        })
    }

    /// A configuration with every optional setting at its default.
    pub fn with_defaults(adapter_username: impl Into<String>) -> TransformerResult<Self> {
        Self::new(
            adapter_username.into(),
            DEFAULT_INTERNAL_IDENTIFIER_URI.to_owned(),
            false,
            DEFAULT_HIERARCHY_MAX_DEPTH,
        )
    }

    /// The adapter's own service account on the target system.
    pub fn adapter_username(&self) -> &str {
        &self.adapter_username
    }

    pub fn internal_identifier_uri(&self) -> &str {
        &self.internal_identifier_uri
    }

    pub fn creation_disabled(&self) -> bool {
        self.creation_disabled
    }

    pub fn hierarchy_max_depth(&self) -> usize {
        self.hierarchy_max_depth
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the internal identifier URI from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default URI.
pub fn internal_identifier_uri_from_env_value(value: Option<String>) -> String {
    trimmed(value).unwrap_or_else(|| DEFAULT_INTERNAL_IDENTIFIER_URI.to_owned())
}

/// Parse the creation switch from an optional string value (`true`/`false`, `1`/`0`).
///
/// If `value` is `None` or empty/whitespace, creation stays enabled.
pub fn creation_disabled_from_env_value(value: Option<String>) -> TransformerResult<bool> {
    match trimmed(value).map(|v| v.to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(v) => Err(TransformerError::Config(format!(
            "creation_disabled must be true or false, got '{v}'"
        ))),
    }
}

/// Parse the hierarchy depth bound from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default depth.
pub fn hierarchy_max_depth_from_env_value(value: Option<String>) -> TransformerResult<usize> {
    trimmed(value)
        .map(|v| {
            v.parse::<usize>().map_err(|_| {
                TransformerError::Config(format!(
                    "hierarchy_max_depth must be a positive integer, got '{v}'"
                ))
            })
        })
        .transpose()
        .map(|depth| depth.unwrap_or(DEFAULT_HIERARCHY_MAX_DEPTH))
}
