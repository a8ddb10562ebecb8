//! Scripts and their executable, argument-overriding variants.

use crate::{TransformerError, TransformerResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptType {
    Evaluate,
    TransformToDhis,
    TransformToFhir,
}

/// Declared type of a script argument or return value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Boolean,
    String,
    Integer,
    Double,
    DateTime,
    Pattern,
    Code,
    Location,
    DhisRef,
    FhirResource,
    EventDecisionType,
}

/// An argument declared by a script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptArg {
    pub name: String,
    pub data_type: DataType,
    pub mandatory: bool,
    /// Values are `|`-separated lists.
    pub array: bool,
    pub default_value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Script {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub script_type: ScriptType,
    pub return_type: DataType,
    pub source: String,
    pub arguments: Vec<ScriptArg>,
}

impl Script {
    pub fn argument(&self, name: &str) -> Option<&ScriptArg> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

/// Override of one declared argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutableScriptArg {
    pub name: String,
    pub override_value: Option<String>,
    pub enabled: bool,
}

/// A script bound to concrete argument values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutableScript {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub script: Arc<Script>,
    pub override_arguments: Vec<ExecutableScriptArg>,
}

impl ExecutableScript {
    /// # Errors
    ///
    /// Returns [`TransformerError::Metadata`] if an override names an argument the script does not
    /// declare, or a mandatory argument without default has no enabled, non-null override.
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        code: impl Into<String>,
        script: Arc<Script>,
        override_arguments: Vec<ExecutableScriptArg>,
    ) -> TransformerResult<Self> {
        let executable = Self {
            id,
            name: name.into(),
            code: code.into(),
            script,
            override_arguments,
        };
        executable.validate()?;
        Ok(executable)
    }

    /// An executable script that uses the script's defaults.
    pub fn of(script: Arc<Script>) -> Self {
        Self {
            id: script.id,
            name: script.name.clone(),
            code: script.code.clone(),
            script,
            override_arguments: Vec::new(),
        }
    }

    fn validate(&self) -> TransformerResult<()> {
        for arg in &self.override_arguments {
            if self.script.argument(&arg.name).is_none() {
                return Err(TransformerError::Metadata(format!(
                    "Executable script {} overrides argument '{}' that is not declared by script {}.",
                    self.code, arg.name, self.script.code
                )));
            }
        }
        for declared in &self.script.arguments {
            if declared.mandatory
                && declared.default_value.is_none()
                && self.argument_value(declared).is_none()
            {
                return Err(TransformerError::Metadata(format!(
                    "Mandatory argument '{}' of script {} has no value in executable script {}.",
                    declared.name, self.script.code, self.code
                )));
            }
        }
        Ok(())
    }

    /// The effective raw value of a declared argument: an enabled override wins over the default.
    pub fn argument_value<'s>(&'s self, declared: &'s ScriptArg) -> Option<&'s str> {
        let overridden = self
            .override_arguments
            .iter()
            .find(|a| a.enabled && a.name == declared.name);
        match overridden {
            Some(arg) => arg.override_value.as_deref(),
            None => declared.default_value.as_deref(),
        }
    }
}
