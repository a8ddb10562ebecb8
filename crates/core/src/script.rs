//! Values exchanged with scripts and the environment a script runs in.
//!
//! Scripts are executed by a pluggable [`ScriptExecutor`]. The engine hands it a [`ScriptEnv`]
//! that exposes the transformation context, the registered utilities, the input resource, the
//! resolved script arguments and, for transform scripts, the target entity wrapped in its
//! scripted façade. The wrapped entity can only be reached through the façade, so every write is
//! dirty-tracked.

use crate::constants::SCRIPT_ARG_ARRAY_SEPARATOR;
use crate::context::TransformerContext;
use crate::metadata::{DataType, ExecutableScript};
use crate::scripted::{
    EnrollmentView, OrganizationUnitView, TrackedEntityInstanceView, WritableDataValueSet,
    WritableEnrollment, WritableEvent, WritableTrackedEntityInstance,
};
use crate::store::ScriptExecutor;
use crate::utils::TransformerUtils;
use crate::{TransformerError, TransformerResult};
use chrono::{DateTime, Utc};
use dhis::{Location, Reference, ReferenceType};
use fhir::FhirResource;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Decision of a program stage's before script about an existing event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventDecisionType {
    /// Do not process the input any further.
    Break,
    /// Continue the most recent existing event.
    Continue,
    /// Create a new event if the stage is repeatable.
    NewEvent,
}

impl FromStr for EventDecisionType {
    type Err = TransformerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BREAK" => Ok(EventDecisionType::Break),
            "CONTINUE" => Ok(EventDecisionType::Continue),
            "NEW_EVENT" => Ok(EventDecisionType::NewEvent),
            other => Err(TransformerError::Script(format!(
                "Unknown event decision type: {other}"
            ))),
        }
    }
}

/// A dynamically typed script value.
#[derive(Clone, Debug)]
pub enum ScriptValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Reference(Reference),
    Location(Location),
    Resource(Arc<FhirResource>),
    Resources(Vec<Arc<FhirResource>>),
    EventDecision(EventDecisionType),
    List(Vec<ScriptValue>),
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScriptValue::Null, ScriptValue::Null) => true,
            (ScriptValue::Boolean(a), ScriptValue::Boolean(b)) => a == b,
            (ScriptValue::Integer(a), ScriptValue::Integer(b)) => a == b,
            (ScriptValue::Double(a), ScriptValue::Double(b)) => a == b,
            (ScriptValue::String(a), ScriptValue::String(b)) => a == b,
            (ScriptValue::DateTime(a), ScriptValue::DateTime(b)) => a == b,
            (ScriptValue::Reference(a), ScriptValue::Reference(b)) => a == b,
            (ScriptValue::Location(a), ScriptValue::Location(b)) => a == b,
            (ScriptValue::Resource(a), ScriptValue::Resource(b)) => Arc::ptr_eq(a, b),
            (ScriptValue::Resources(a), ScriptValue::Resources(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
            }
            (ScriptValue::EventDecision(a), ScriptValue::EventDecision(b)) => a == b,
            (ScriptValue::List(a), ScriptValue::List(b)) => a == b,
            _ => false,
        }
    }
}

impl ScriptValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScriptValue::Null)
    }

    /// Only boolean `true` is true.
    pub fn is_true(&self) -> bool {
        matches!(self, ScriptValue::Boolean(true))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScriptValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            ScriptValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Arc<FhirResource>> {
        match self {
            ScriptValue::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Boolean(_) => "boolean",
            ScriptValue::Integer(_) => "integer",
            ScriptValue::Double(_) => "double",
            ScriptValue::String(_) => "string",
            ScriptValue::DateTime(_) => "date/time",
            ScriptValue::Reference(_) => "reference",
            ScriptValue::Location(_) => "location",
            ScriptValue::Resource(_) => "FHIR resource",
            ScriptValue::Resources(_) => "FHIR resources",
            ScriptValue::EventDecision(_) => "event decision",
            ScriptValue::List(_) => "list",
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Boolean(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.to_owned())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::String(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Integer(value)
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ScriptValue::Null, Into::into)
    }
}

/// Parses the `TYPE:value` form of a DHIS2 reference.
pub fn parse_reference(text: &str) -> TransformerResult<Reference> {
    let (reference_type, value) = text.split_once(':').ok_or_else(|| {
        TransformerError::Script(format!("Reference does not have the form TYPE:value: {text}"))
    })?;
    let reference_type = ReferenceType::from_str(reference_type)
        .map_err(|err| TransformerError::Script(err.to_string()))?;
    Reference::new(value, reference_type).map_err(|err| TransformerError::Script(err.to_string()))
}

fn convert_argument(
    script: &ExecutableScript,
    name: &str,
    data_type: DataType,
    raw: &str,
) -> TransformerResult<ScriptValue> {
    let invalid = |message: String| {
        TransformerError::Script(format!(
            "Argument '{name}' of script {} has invalid value '{raw}': {message}",
            script.code
        ))
    };
    match data_type {
        DataType::Boolean => match raw.trim() {
            "true" => Ok(ScriptValue::Boolean(true)),
            "false" => Ok(ScriptValue::Boolean(false)),
            _ => Err(invalid("expected true or false".into())),
        },
        DataType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(ScriptValue::Integer)
            .map_err(|err| invalid(err.to_string())),
        DataType::Double => raw
            .trim()
            .parse::<f64>()
            .map(ScriptValue::Double)
            .map_err(|err| invalid(err.to_string())),
        DataType::DateTime => DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| ScriptValue::DateTime(dt.with_timezone(&Utc)))
            .map_err(|err| invalid(err.to_string())),
        DataType::DhisRef => parse_reference(raw).map(ScriptValue::Reference),
        DataType::Location => crate::convert::parse_location(raw)
            .map(ScriptValue::Location)
            .map_err(|err| invalid(err.message)),
        DataType::EventDecisionType => EventDecisionType::from_str(raw).map(ScriptValue::EventDecision),
        DataType::String | DataType::Pattern | DataType::Code | DataType::FhirResource => {
            Ok(ScriptValue::String(raw.to_owned()))
        }
    }
}

/// The argument values of an executable script, typed by their declarations.
///
/// Array arguments are split at `|`. Arguments without value are null.
pub fn resolve_arguments(
    script: &ExecutableScript,
) -> TransformerResult<BTreeMap<String, ScriptValue>> {
    let mut args = BTreeMap::new();
    for declared in &script.script.arguments {
        let value = match script.argument_value(declared) {
            None => ScriptValue::Null,
            Some(raw) if declared.array => ScriptValue::List(
                raw.split(SCRIPT_ARG_ARRAY_SEPARATOR)
                    .map(|item| convert_argument(script, &declared.name, declared.data_type, item))
                    .collect::<TransformerResult<Vec<_>>>()?,
            ),
            Some(raw) => convert_argument(script, &declared.name, declared.data_type, raw)?,
        };
        args.insert(declared.name.clone(), value);
    }
    Ok(args)
}

/// The target entity a transform script writes to.
pub enum ScriptOutput<'a> {
    TrackedEntity(WritableTrackedEntityInstance<'a>),
    Enrollment(WritableEnrollment<'a>),
    Event(WritableEvent<'a>),
    OrganizationUnit(OrganizationUnitView<'a>),
    DataValueSet(WritableDataValueSet<'a>),
}

fn wrong_output(expected: &str) -> TransformerError {
    TransformerError::Script(format!("Script output is not {expected}."))
}

/// Variables visible to one script execution frame.
pub struct ScriptEnv<'a> {
    context: &'a TransformerContext,
    utils: &'a TransformerUtils,
    input: Option<Arc<FhirResource>>,
    args: BTreeMap<String, ScriptValue>,
    variables: BTreeMap<String, ScriptValue>,
    tracked_entity_instance: Option<TrackedEntityInstanceView<'a>>,
    enrollment: Option<EnrollmentView<'a>>,
    output: Option<ScriptOutput<'a>>,
}

impl<'a> ScriptEnv<'a> {
    pub fn new(
        context: &'a TransformerContext,
        utils: &'a TransformerUtils,
        input: Option<Arc<FhirResource>>,
    ) -> Self {
        Self {
            context,
            utils,
            input,
            args: BTreeMap::new(),
            variables: BTreeMap::new(),
            tracked_entity_instance: None,
            enrollment: None,
            output: None,
        }
    }

    pub fn with_output(mut self, output: ScriptOutput<'a>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_tracked_entity_instance(mut self, view: TrackedEntityInstanceView<'a>) -> Self {
        self.tracked_entity_instance = Some(view);
        self
    }

    pub fn with_enrollment(mut self, view: EnrollmentView<'a>) -> Self {
        self.enrollment = Some(view);
        self
    }

    pub fn context(&self) -> &'a TransformerContext {
        self.context
    }

    pub fn utils(&self) -> &'a TransformerUtils {
        self.utils
    }

    pub fn input(&self) -> Option<&Arc<FhirResource>> {
        self.input.as_ref()
    }

    pub fn args(&self) -> &BTreeMap<String, ScriptValue> {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&ScriptValue> {
        self.args.get(name)
    }

    pub fn variable(&self, name: &str) -> Option<&ScriptValue> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: ScriptValue) {
        self.variables.insert(name.into(), value);
    }

    pub fn tracked_entity_instance(&self) -> Option<&TrackedEntityInstanceView<'a>> {
        self.tracked_entity_instance.as_ref()
    }

    pub fn enrollment(&self) -> Option<&EnrollmentView<'a>> {
        self.enrollment.as_ref()
    }

    pub fn output(&self) -> Option<&ScriptOutput<'a>> {
        self.output.as_ref()
    }

    pub fn output_mut(&mut self) -> Option<&mut ScriptOutput<'a>> {
        self.output.as_mut()
    }

    pub fn into_output(self) -> Option<ScriptOutput<'a>> {
        self.output
    }

    pub fn tracked_entity_output(
        &mut self,
    ) -> TransformerResult<&mut WritableTrackedEntityInstance<'a>> {
        match self.output.as_mut() {
            Some(ScriptOutput::TrackedEntity(output)) => Ok(output),
            _ => Err(wrong_output("a tracked entity instance")),
        }
    }

    pub fn enrollment_output(&mut self) -> TransformerResult<&mut WritableEnrollment<'a>> {
        match self.output.as_mut() {
            Some(ScriptOutput::Enrollment(output)) => Ok(output),
            _ => Err(wrong_output("an enrollment")),
        }
    }

    pub fn event_output(&mut self) -> TransformerResult<&mut WritableEvent<'a>> {
        match self.output.as_mut() {
            Some(ScriptOutput::Event(output)) => Ok(output),
            _ => Err(wrong_output("an event")),
        }
    }

    pub fn organization_unit_output(&self) -> TransformerResult<&OrganizationUnitView<'a>> {
        match self.output.as_ref() {
            Some(ScriptOutput::OrganizationUnit(output)) => Ok(output),
            _ => Err(wrong_output("an organization unit")),
        }
    }

    pub fn data_value_set_output(&mut self) -> TransformerResult<&mut WritableDataValueSet<'a>> {
        match self.output.as_mut() {
            Some(ScriptOutput::DataValueSet(output)) => Ok(output),
            _ => Err(wrong_output("a data value set")),
        }
    }

    /// Executes `script` with its arguments bound in this environment.
    pub fn run(
        &mut self,
        executor: &dyn ScriptExecutor,
        script: &ExecutableScript,
    ) -> TransformerResult<ScriptValue> {
        self.args = resolve_arguments(script)?;
        debug!(script = %script.code, "Executing script");
        executor.execute(script, self.context.request().version(), self)
    }

    pub fn run_boolean(
        &mut self,
        executor: &dyn ScriptExecutor,
        script: &ExecutableScript,
    ) -> TransformerResult<bool> {
        Ok(self.run(executor, script)?.is_true())
    }

    pub fn run_resource(
        &mut self,
        executor: &dyn ScriptExecutor,
        script: &ExecutableScript,
    ) -> TransformerResult<Option<Arc<FhirResource>>> {
        match self.run(executor, script)? {
            ScriptValue::Null => Ok(None),
            ScriptValue::Resource(resource) => Ok(Some(resource)),
            other => Err(unexpected(script, "a FHIR resource", &other)),
        }
    }

    pub fn run_reference(
        &mut self,
        executor: &dyn ScriptExecutor,
        script: &ExecutableScript,
    ) -> TransformerResult<Option<Reference>> {
        match self.run(executor, script)? {
            ScriptValue::Null => Ok(None),
            ScriptValue::Reference(reference) => Ok(Some(reference)),
            other => Err(unexpected(script, "a reference", &other)),
        }
    }

    pub fn run_date_time(
        &mut self,
        executor: &dyn ScriptExecutor,
        script: &ExecutableScript,
    ) -> TransformerResult<Option<DateTime<Utc>>> {
        let value = self.run(executor, script)?;
        crate::convert::convert_date_time(&value, &format!("result of script {}", script.code))
            .map_err(|err| TransformerError::Script(err.to_string()))
    }

    pub fn run_location(
        &mut self,
        executor: &dyn ScriptExecutor,
        script: &ExecutableScript,
    ) -> TransformerResult<Option<Location>> {
        let value = self.run(executor, script)?;
        crate::convert::convert_location(&value, &format!("result of script {}", script.code))
            .map_err(|err| TransformerError::Script(err.to_string()))
    }

    pub fn run_event_decision(
        &mut self,
        executor: &dyn ScriptExecutor,
        script: &ExecutableScript,
    ) -> TransformerResult<Option<EventDecisionType>> {
        match self.run(executor, script)? {
            ScriptValue::Null => Ok(None),
            ScriptValue::EventDecision(decision) => Ok(Some(decision)),
            ScriptValue::String(text) => EventDecisionType::from_str(&text).map(Some),
            other => Err(unexpected(script, "an event decision", &other)),
        }
    }
}

fn unexpected(script: &ExecutableScript, expected: &str, value: &ScriptValue) -> TransformerError {
    TransformerError::Script(format!(
        "Script {} returned a {} instead of {expected}.",
        script.code,
        value.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ExecutableScriptArg, Script, ScriptArg, ScriptType};
    use uuid::Uuid;

    fn arg(name: &str, data_type: DataType, array: bool, default: Option<&str>) -> ScriptArg {
        ScriptArg {
            name: name.into(),
            data_type,
            mandatory: false,
            array,
            default_value: default.map(str::to_owned),
        }
    }

    fn executable(arguments: Vec<ScriptArg>, overrides: Vec<ExecutableScriptArg>) -> ExecutableScript {
        let script = Arc::new(Script {
            id: Uuid::new_v4(),
            name: "s".into(),
            code: "S".into(),
            script_type: ScriptType::TransformToDhis,
            return_type: DataType::Boolean,
            source: String::new(),
            arguments,
        });
        ExecutableScript::new(Uuid::new_v4(), "e", "E", script, overrides).expect("valid script")
    }

    #[test]
    fn arguments_are_typed_and_arrays_split() {
        let script = executable(
            vec![
                arg("codes", DataType::Code, true, Some("A|B|C")),
                arg("base", DataType::Integer, false, Some("1")),
                arg("element", DataType::DhisRef, false, None),
                arg("missing", DataType::String, false, None),
            ],
            vec![ExecutableScriptArg {
                name: "element".into(),
                override_value: Some("CODE:DOSE".into()),
                enabled: true,
            }],
        );
        let args = resolve_arguments(&script).expect("arguments");
        assert_eq!(
            args["codes"],
            ScriptValue::List(vec!["A".into(), "B".into(), "C".into()])
        );
        assert_eq!(args["base"], ScriptValue::Integer(1));
        assert_eq!(
            args["element"],
            ScriptValue::Reference(Reference::code("DOSE").expect("reference"))
        );
        assert!(args["missing"].is_null());
    }

    #[test]
    fn invalid_argument_value_is_script_error() {
        let script = executable(vec![arg("base", DataType::Integer, false, Some("one"))], vec![]);
        let err = resolve_arguments(&script).expect_err("not an integer");
        match err {
            TransformerError::Script(msg) => assert!(msg.contains("'base'")),
            other => panic!("expected Script, got {other:?}"),
        }
    }

    #[test]
    fn only_boolean_true_is_true() {
        assert!(ScriptValue::Boolean(true).is_true());
        assert!(!ScriptValue::String("true".into()).is_true());
        assert!(!ScriptValue::Null.is_true());
    }

    #[test]
    fn parses_event_decisions() {
        assert_eq!(
            EventDecisionType::from_str("new_event").expect("decision"),
            EventDecisionType::NewEvent
        );
        assert!(EventDecisionType::from_str("later").is_err());
    }
}
