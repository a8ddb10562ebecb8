//! Fixtures shared by the unit tests.

use crate::config::CoreConfig;
use crate::context::{FhirRequest, TransformerContext};
use crate::memory::{
    transformer_services, BundleRemoteRepository, InMemoryAssignmentStore, InMemoryDhisStore,
    InMemoryMetadataStore,
};
use crate::metadata::{parse_metadata, DataType, ExecutableScript, Rule, Script, ScriptType, SystemCode};
use crate::script::{ScriptEnv, ScriptValue};
use crate::store::{CodeStore, OrganizationUnitRepository, ScriptExecutor};
use crate::transform::TransformerServices;
use crate::utils::TransformerUtils;
use crate::{TransformerError, TransformerResult};
use dhis::{
    DataElement, DhisOption, OptionSet, OrganizationUnit, Program, ProgramStage,
    ProgramStageDataElement, TrackedEntityAttribute, ValueType,
};
use fhir::{FhirResource, FhirVersion};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub fn config() -> Arc<CoreConfig> {
    Arc::new(CoreConfig::with_defaults("adapter-admin").expect("config"))
}

pub fn context() -> TransformerContext {
    TransformerContext::new(FhirRequest::new(FhirVersion::R4), config())
}

pub fn fhir_resource(json: &str) -> Arc<FhirResource> {
    FhirResource::parse(json).expect("FHIR resource")
}

pub fn option_set(name: &str, codes: &[&str]) -> OptionSet {
    OptionSet {
        id: format!("Os{name}"),
        name: name.into(),
        code: None,
        options: codes
            .iter()
            .map(|code| DhisOption {
                code: (*code).into(),
                name: (*code).into(),
            })
            .collect(),
    }
}

pub fn tracked_entity_attribute(id: &str, name: &str, value_type: ValueType) -> TrackedEntityAttribute {
    TrackedEntityAttribute {
        id: id.into(),
        name: name.into(),
        code: None,
        value_type,
        option_set: None,
        generated: false,
        unique: false,
    }
}

pub fn data_element(id: &str, name: &str, value_type: ValueType) -> DataElement {
    DataElement {
        id: id.into(),
        name: name.into(),
        code: None,
        value_type,
        option_set: None,
    }
}

pub fn program_stage(id: &str, name: &str, data_elements: Vec<DataElement>) -> ProgramStage {
    ProgramStage {
        id: id.into(),
        name: name.into(),
        code: None,
        repeatable: false,
        data_elements: data_elements
            .into_iter()
            .map(|data_element| ProgramStageDataElement {
                data_element,
                compulsory: false,
                allow_provided_elsewhere: false,
            })
            .collect(),
    }
}

pub fn program(id: &str, name: &str, stages: Vec<ProgramStage>) -> Program {
    Program {
        id: id.into(),
        name: name.into(),
        code: None,
        tracked_entity_type_id: None,
        select_enrollment_dates_in_future: false,
        select_incident_dates_in_future: false,
        stages,
    }
}

pub fn organization_unit(id: &str, code: &str, parent_id: Option<&str>) -> OrganizationUnit {
    OrganizationUnit {
        id: id.into(),
        name: code.into(),
        code: Some(code.into()),
        short_name: None,
        parent_id: parent_id.map(str::to_owned),
        level: if parent_id.is_some() { 2 } else { 1 },
        leaf: false,
    }
}

pub fn system_code(
    system_uri: &str,
    system_code: &str,
    code: &str,
    mapped_code: Option<&str>,
) -> SystemCode {
    SystemCode {
        system_uri: system_uri.into(),
        system_code: system_code.into(),
        code: code.into(),
        mapped_code: mapped_code.map(str::to_owned),
    }
}

/// An executable script without arguments. Its behaviour comes from the executor.
pub fn script(code: &str) -> Arc<ExecutableScript> {
    Arc::new(ExecutableScript::of(Arc::new(Script {
        id: Uuid::new_v4(),
        name: code.into(),
        code: code.into(),
        script_type: ScriptType::Evaluate,
        return_type: DataType::Boolean,
        source: code.into(),
        arguments: Vec::new(),
    })))
}

type ScriptFn = Box<dyn Fn(&mut ScriptEnv<'_>) -> TransformerResult<ScriptValue> + Send + Sync>;

/// Simulates scripts with closures keyed by executable or script code.
#[derive(Default)]
pub struct ClosureScriptExecutor {
    scripts: HashMap<String, ScriptFn>,
    executed: Mutex<Vec<String>>,
}

impl ClosureScriptExecutor {
    pub fn with(
        mut self,
        code: &str,
        script: impl Fn(&mut ScriptEnv<'_>) -> TransformerResult<ScriptValue> + Send + Sync + 'static,
    ) -> Self {
        self.scripts.insert(code.to_owned(), Box::new(script));
        self
    }

    /// Codes of the executed scripts, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("lock").clone()
    }
}

impl ScriptExecutor for ClosureScriptExecutor {
    fn execute(
        &self,
        script: &ExecutableScript,
        _version: FhirVersion,
        env: &mut ScriptEnv<'_>,
    ) -> TransformerResult<ScriptValue> {
        let (code, closure) = [&script.code, &script.script.code]
            .into_iter()
            .find_map(|code| self.scripts.get(code).map(|closure| (code, closure)))
            .ok_or_else(|| {
                TransformerError::Script(format!("Script {} is not available.", script.code))
            })?;
        self.executed.lock().expect("lock").push(code.clone());
        closure(env)
    }

    fn compile(&self, source: &str) -> TransformerResult<()> {
        if source.trim().is_empty() {
            return Err(TransformerError::Script("Script source is empty.".into()));
        }
        Ok(())
    }
}

/// Stores, utilities and services built from one metadata document.
pub struct Harness {
    pub metadata: Arc<InMemoryMetadataStore>,
    pub dhis: Arc<InMemoryDhisStore>,
    pub executor: Arc<ClosureScriptExecutor>,
    pub services: Arc<TransformerServices>,
    pub utils: TransformerUtils,
}

impl Harness {
    pub fn new(document: &str, executor: ClosureScriptExecutor) -> Self {
        let metadata = parse_metadata(document).expect("metadata document");
        let dhis = Arc::new(InMemoryDhisStore::from_metadata(&metadata.dhis));
        let metadata = Arc::new(InMemoryMetadataStore::new(metadata));
        let executor = Arc::new(executor);
        let utils = TransformerUtils::standard(
            Arc::clone(&metadata) as Arc<dyn CodeStore>,
            Arc::new(BundleRemoteRepository::default()),
            Arc::clone(&dhis) as Arc<dyn OrganizationUnitRepository>,
            Arc::new(InMemoryAssignmentStore::default()),
        );
        let services = Arc::new(transformer_services(
            Arc::clone(&metadata),
            Arc::clone(&dhis),
            Arc::clone(&executor) as Arc<dyn ScriptExecutor>,
        ));
        Self {
            metadata,
            dhis,
            executor,
            services,
            utils,
        }
    }

    pub fn context(&self) -> TransformerContext {
        self.context_with(FhirRequest::new(FhirVersion::R4))
    }

    /// A context over `request` that knows the document's resource systems.
    pub fn context_with(&self, request: FhirRequest) -> TransformerContext {
        TransformerContext::new(
            request.with_resource_systems(self.metadata.metadata().resource_systems.clone()),
            config(),
        )
    }

    pub fn rule(&self, name: &str) -> Arc<Rule> {
        self.metadata
            .metadata()
            .rules
            .iter()
            .find(|rule| rule.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("rule {name}"))
    }
}
