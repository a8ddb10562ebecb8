//! YAML metadata documents.
//!
//! A document describes all static metadata of one adapter deployment: scripts, rules, code
//! systems, resource systems, FHIR clients and optionally the DHIS2 metadata the rules refer to.
//! Objects refer to each other by code (scripts, systems, codes) or name (mapped tracked entities,
//! programs and program stages). Ids that are left out are generated.

use crate::metadata::client::{FhirClient, FhirClientResource, ResourceUpdate};
use crate::metadata::rule::{
    FhirResourceMapping, MappedProgram, MappedProgramStage, MappedTrackedEntity, Rule,
    RuleDataReference, RuleKind,
};
use crate::metadata::script::{
    DataType, ExecutableScript, ExecutableScriptArg, Script, ScriptArg, ScriptType,
};
use crate::metadata::system::{Code, CodeSet, CodeSetValue, ResourceSystem, System, SystemCode};
use crate::{TransformerError, TransformerResult};
use chrono::{DateTime, Utc};
use dhis::{
    DataSet, EnrollmentStatus, EventStatus, OrganizationUnit, Program, Reference,
    TrackedEntityAttribute, TrackedEntityType,
};
use fhir::{FhirResourceType, FhirVersion};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// DHIS2 metadata known to the adapter without asking DHIS2.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DhisMetadata {
    #[serde(default)]
    pub organization_units: Vec<OrganizationUnit>,
    #[serde(default)]
    pub tracked_entity_attributes: Vec<TrackedEntityAttribute>,
    #[serde(default)]
    pub tracked_entity_types: Vec<TrackedEntityType>,
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub data_sets: Vec<DataSet>,
}

/// Resolved content of a metadata document.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    pub scripts: Vec<Arc<Script>>,
    pub rules: Vec<Arc<Rule>>,
    pub resource_mappings: Vec<Arc<FhirResourceMapping>>,
    pub systems: Vec<System>,
    pub codes: Vec<Code>,
    pub system_codes: Vec<SystemCode>,
    pub code_sets: Vec<Arc<CodeSet>>,
    pub resource_systems: Vec<ResourceSystem>,
    pub clients: Vec<FhirClient>,
    pub dhis: DhisMetadata,
}

/// Parses a metadata document.
///
/// # Errors
///
/// Returns [`TransformerError::InvalidYaml`] with the failing path if the text does not match the
/// document schema, and [`TransformerError::Metadata`] if objects refer to unknown codes or names.
pub fn parse_metadata(yaml_text: &str) -> TransformerResult<Metadata> {
    let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
    let wire: DocumentWire = match serde_path_to_error::deserialize(deserializer) {
        Ok(parsed) => parsed,
        Err(err) => {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() || path == "." {
                "<root>"
            } else {
                path.as_str()
            };
            return Err(TransformerError::InvalidYaml(format!(
                "metadata schema mismatch at {path}: {source}"
            )));
        }
    };
    wire.resolve()
}

/// Reads and parses a metadata document file.
pub fn load_metadata_file(path: &Path) -> TransformerResult<Metadata> {
    let text = std::fs::read_to_string(path).map_err(TransformerError::FileRead)?;
    parse_metadata(&text)
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DocumentWire {
    #[serde(default)]
    scripts: Vec<ScriptWire>,
    #[serde(default)]
    executable_scripts: Vec<ExecutableScriptWire>,
    #[serde(default)]
    tracked_entities: Vec<MappedTrackedEntityWire>,
    #[serde(default)]
    programs: Vec<MappedProgramWire>,
    #[serde(default)]
    program_stages: Vec<MappedProgramStageWire>,
    #[serde(default)]
    rules: Vec<RuleWire>,
    #[serde(default)]
    systems: Vec<SystemWire>,
    #[serde(default)]
    codes: Vec<CodeWire>,
    #[serde(default)]
    system_codes: Vec<SystemCodeWire>,
    #[serde(default)]
    code_sets: Vec<CodeSetWire>,
    #[serde(default)]
    resource_systems: Vec<ResourceSystemWire>,
    #[serde(default)]
    resource_mappings: Vec<ResourceMappingWire>,
    #[serde(default)]
    clients: Vec<ClientWire>,
    #[serde(default)]
    dhis: DhisMetadata,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScriptWire {
    #[serde(default)]
    id: Option<Uuid>,
    code: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    script_type: ScriptType,
    return_type: DataType,
    source: String,
    #[serde(default)]
    arguments: Vec<ScriptArgWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScriptArgWire {
    name: String,
    data_type: DataType,
    #[serde(default)]
    mandatory: bool,
    #[serde(default)]
    array: bool,
    #[serde(default)]
    default_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ExecutableScriptWire {
    #[serde(default)]
    id: Option<Uuid>,
    code: String,
    #[serde(default)]
    name: Option<String>,
    /// Code of the script.
    script: String,
    #[serde(default)]
    override_arguments: Vec<OverrideArgWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct OverrideArgWire {
    name: String,
    #[serde(default)]
    override_value: Option<String>,
    #[serde(default = "enabled")]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MappedTrackedEntityWire {
    name: String,
    #[serde(default = "enabled")]
    enabled: bool,
    tracked_entity_type_reference: Reference,
    tracked_entity_identifier_reference: Reference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MappedProgramWire {
    name: String,
    program_reference: Reference,
    #[serde(default = "enabled")]
    enabled: bool,
    #[serde(default)]
    creation_enabled: bool,
    #[serde(default)]
    creation_applicable_script: Option<String>,
    #[serde(default)]
    creation_script: Option<String>,
    #[serde(default)]
    enrollment_date_is_incident: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MappedProgramStageWire {
    name: String,
    program_stage_reference: Reference,
    #[serde(default = "enabled")]
    enabled: bool,
    #[serde(default)]
    creation_enabled: bool,
    #[serde(default)]
    creation_applicable_script: Option<String>,
    #[serde(default)]
    creation_script: Option<String>,
    #[serde(default)]
    before_script: Option<String>,
    #[serde(default)]
    after_script: Option<String>,
    #[serde(default)]
    event_date_is_incident: bool,
    /// Name of the mapped program.
    program: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RuleWire {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "enabled")]
    enabled: bool,
    #[serde(default)]
    evaluation_order: i32,
    fhir_resource_type: FhirResourceType,
    #[serde(default = "enabled")]
    imp_enabled: bool,
    #[serde(default)]
    stop: bool,
    #[serde(default)]
    contained_allowed: bool,
    #[serde(default)]
    applicable_script: Option<String>,
    #[serde(default)]
    applicable_code_set: Option<String>,
    transform_script: String,
    #[serde(default)]
    data_references: Vec<DataReferenceWire>,
    target: TargetWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DataReferenceWire {
    reference: Reference,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    required: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum TargetWire {
    #[serde(rename_all = "camelCase")]
    TrackedEntity {
        tracked_entity: String,
        #[serde(default)]
        org_unit_lookup_script: Option<String>,
        #[serde(default)]
        location_lookup_script: Option<String>,
        #[serde(default)]
        tei_lookup_script: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Enrollment { program: String },
    #[serde(rename_all = "camelCase")]
    ProgramStage {
        program_stage: String,
        #[serde(default)]
        update_event_date: bool,
        #[serde(default)]
        applicable_enrollment_statuses: Vec<EnrollmentStatus>,
        #[serde(default)]
        applicable_event_statuses: Vec<EventStatus>,
    },
    #[serde(rename_all = "camelCase")]
    OrganizationUnit {
        #[serde(default)]
        identifier_lookup_script: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DataValueSet {
        #[serde(default)]
        data_set_reference: Option<Reference>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SystemWire {
    #[serde(default)]
    id: Option<Uuid>,
    code: String,
    #[serde(default)]
    name: Option<String>,
    system_uri: String,
    #[serde(default = "enabled")]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CodeWire {
    #[serde(default)]
    id: Option<Uuid>,
    code: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mapped_code: Option<String>,
    #[serde(default = "enabled")]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SystemCodeWire {
    /// Code of the system.
    system: String,
    system_code: String,
    /// Code of the adapter code.
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CodeSetWire {
    code: String,
    #[serde(default)]
    name: Option<String>,
    codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ResourceSystemWire {
    fhir_resource_type: FhirResourceType,
    /// Code of the system.
    system: String,
    #[serde(default)]
    code_prefix: Option<String>,
    #[serde(default)]
    default_value: Option<String>,
    #[serde(default)]
    fhir_id: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ResourceMappingWire {
    fhir_resource_type: FhirResourceType,
    #[serde(default)]
    tei_lookup_script: Option<String>,
    #[serde(default)]
    enrollment_org_lookup_script: Option<String>,
    #[serde(default)]
    event_org_lookup_script: Option<String>,
    #[serde(default)]
    enrollment_date_lookup_script: Option<String>,
    #[serde(default)]
    event_date_lookup_script: Option<String>,
    #[serde(default)]
    effective_date_lookup_script: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ClientWire {
    #[serde(default)]
    id: Option<Uuid>,
    code: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "enabled")]
    enabled: bool,
    fhir_version: FhirVersion,
    #[serde(default)]
    tolerance_millis: u64,
    #[serde(default)]
    remote_sync_enabled: bool,
    #[serde(default)]
    auto_created_resource_types: BTreeSet<FhirResourceType>,
    #[serde(default)]
    resources: Vec<ClientResourceWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ClientResourceWire {
    #[serde(default)]
    id: Option<Uuid>,
    fhir_resource_type: FhirResourceType,
    #[serde(default)]
    criteria_parameters: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "virtual")]
    virtual_resource: bool,
    #[serde(default)]
    exp_only: bool,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

// ============================================================================
// Resolution of references between objects
// ============================================================================

fn unknown(kind: &str, code: &str, owner: &str) -> TransformerError {
    TransformerError::Metadata(format!("{owner} refers to unknown {kind} '{code}'."))
}

struct Resolver {
    scripts: HashMap<String, Arc<Script>>,
    executable_scripts: HashMap<String, Arc<ExecutableScript>>,
}

impl Resolver {
    fn script(
        &self,
        code: Option<&String>,
        owner: &str,
    ) -> TransformerResult<Option<Arc<ExecutableScript>>> {
        code.map(|c| self.required_script(c, owner)).transpose()
    }

    /// Executable scripts are looked up first; a plain script code runs with its defaults.
    fn required_script(
        &self,
        code: &str,
        owner: &str,
    ) -> TransformerResult<Arc<ExecutableScript>> {
        if let Some(executable) = self.executable_scripts.get(code) {
            return Ok(Arc::clone(executable));
        }
        match self.scripts.get(code) {
            Some(script) => Ok(Arc::new(ExecutableScript::of(Arc::clone(script)))),
            None => Err(unknown("script", code, owner)),
        }
    }
}

impl DocumentWire {
    fn resolve(self) -> TransformerResult<Metadata> {
        let mut scripts = HashMap::new();
        let mut script_list = Vec::new();
        for wire in self.scripts {
            let script = Arc::new(Script {
                id: wire.id.unwrap_or_else(Uuid::new_v4),
                name: wire.name.unwrap_or_else(|| wire.code.clone()),
                code: wire.code.clone(),
                script_type: wire.script_type,
                return_type: wire.return_type,
                source: wire.source,
                arguments: wire
                    .arguments
                    .into_iter()
                    .map(|a| ScriptArg {
                        name: a.name,
                        data_type: a.data_type,
                        mandatory: a.mandatory,
                        array: a.array,
                        default_value: a.default_value,
                    })
                    .collect(),
            });
            if scripts.insert(wire.code.clone(), Arc::clone(&script)).is_some() {
                return Err(TransformerError::Metadata(format!(
                    "Script code '{}' is used more than once.",
                    wire.code
                )));
            }
            script_list.push(script);
        }

        let mut executable_scripts = HashMap::new();
        for wire in self.executable_scripts {
            let owner = format!("Executable script {}", wire.code);
            let script = scripts
                .get(&wire.script)
                .cloned()
                .ok_or_else(|| unknown("script", &wire.script, &owner))?;
            let executable = ExecutableScript::new(
                wire.id.unwrap_or_else(Uuid::new_v4),
                wire.name.unwrap_or_else(|| wire.code.clone()),
                wire.code.clone(),
                script,
                wire.override_arguments
                    .into_iter()
                    .map(|a| ExecutableScriptArg {
                        name: a.name,
                        override_value: a.override_value,
                        enabled: a.enabled,
                    })
                    .collect(),
            )?;
            executable_scripts.insert(wire.code, Arc::new(executable));
        }

        let resolver = Resolver {
            scripts,
            executable_scripts,
        };

        let tracked_entities: HashMap<String, MappedTrackedEntity> = self
            .tracked_entities
            .into_iter()
            .map(|w| {
                (
                    w.name.clone(),
                    MappedTrackedEntity {
                        name: w.name,
                        enabled: w.enabled,
                        tracked_entity_type_reference: w.tracked_entity_type_reference,
                        tracked_entity_identifier_reference: w.tracked_entity_identifier_reference,
                    },
                )
            })
            .collect();

        let mut programs = HashMap::new();
        for w in self.programs {
            let owner = format!("Program {}", w.name);
            let program = MappedProgram {
                creation_applicable_script: resolver
                    .script(w.creation_applicable_script.as_ref(), &owner)?,
                creation_script: resolver.script(w.creation_script.as_ref(), &owner)?,
                name: w.name.clone(),
                program_reference: w.program_reference,
                enabled: w.enabled,
                creation_enabled: w.creation_enabled,
                enrollment_date_is_incident: w.enrollment_date_is_incident,
            };
            programs.insert(w.name, program);
        }

        let mut program_stages = HashMap::new();
        for w in self.program_stages {
            let owner = format!("Program stage {}", w.name);
            let program = programs
                .get(&w.program)
                .cloned()
                .ok_or_else(|| unknown("program", &w.program, &owner))?;
            let stage = MappedProgramStage {
                creation_applicable_script: resolver
                    .script(w.creation_applicable_script.as_ref(), &owner)?,
                creation_script: resolver.script(w.creation_script.as_ref(), &owner)?,
                before_script: resolver.script(w.before_script.as_ref(), &owner)?,
                after_script: resolver.script(w.after_script.as_ref(), &owner)?,
                name: w.name.clone(),
                program_stage_reference: w.program_stage_reference,
                enabled: w.enabled,
                creation_enabled: w.creation_enabled,
                event_date_is_incident: w.event_date_is_incident,
                program,
            };
            program_stages.insert(w.name, stage);
        }

        let mut rules = Vec::new();
        for w in self.rules {
            let owner = format!("Rule {}", w.name);
            let id = w.id.unwrap_or_else(Uuid::new_v4);
            let kind = match w.target {
                TargetWire::TrackedEntity {
                    tracked_entity,
                    org_unit_lookup_script,
                    location_lookup_script,
                    tei_lookup_script,
                } => RuleKind::TrackedEntity {
                    tracked_entity: tracked_entities
                        .get(&tracked_entity)
                        .cloned()
                        .ok_or_else(|| unknown("tracked entity", &tracked_entity, &owner))?,
                    org_unit_lookup_script: resolver
                        .script(org_unit_lookup_script.as_ref(), &owner)?,
                    location_lookup_script: resolver
                        .script(location_lookup_script.as_ref(), &owner)?,
                    tei_lookup_script: resolver.script(tei_lookup_script.as_ref(), &owner)?,
                },
                TargetWire::Enrollment { program } => RuleKind::Enrollment {
                    program: programs
                        .get(&program)
                        .cloned()
                        .ok_or_else(|| unknown("program", &program, &owner))?,
                },
                TargetWire::ProgramStage {
                    program_stage,
                    update_event_date,
                    applicable_enrollment_statuses,
                    applicable_event_statuses,
                } => RuleKind::ProgramStage {
                    program_stage: program_stages
                        .get(&program_stage)
                        .cloned()
                        .ok_or_else(|| unknown("program stage", &program_stage, &owner))?,
                    update_event_date,
                    applicable_enrollment_statuses,
                    applicable_event_statuses,
                },
                TargetWire::OrganizationUnit {
                    identifier_lookup_script,
                } => RuleKind::OrganizationUnit {
                    identifier_lookup_script: resolver
                        .script(identifier_lookup_script.as_ref(), &owner)?,
                },
                TargetWire::DataValueSet { data_set_reference } => {
                    RuleKind::DataValueSet { data_set_reference }
                }
            };
            let rule = Rule {
                id,
                applicable_script: resolver.script(w.applicable_script.as_ref(), &owner)?,
                transform_script: resolver.required_script(&w.transform_script, &owner)?,
                name: w.name,
                description: w.description,
                enabled: w.enabled,
                evaluation_order: w.evaluation_order,
                fhir_resource_type: w.fhir_resource_type,
                imp_enabled: w.imp_enabled,
                stop: w.stop,
                contained_allowed: w.contained_allowed,
                applicable_code_set: w.applicable_code_set,
                data_references: w
                    .data_references
                    .into_iter()
                    .map(|d| RuleDataReference {
                        rule_id: id,
                        reference: d.reference,
                        description: d.description,
                        required: d.required,
                    })
                    .collect(),
                kind,
            };
            rule.validate()?;
            rules.push(Arc::new(rule));
        }

        let systems: Vec<System> = self
            .systems
            .into_iter()
            .map(|w| System {
                id: w.id.unwrap_or_else(Uuid::new_v4),
                name: w.name.unwrap_or_else(|| w.code.clone()),
                code: w.code,
                system_uri: w.system_uri,
                enabled: w.enabled,
            })
            .collect();
        let system_uri = |code: &str, owner: &str| {
            systems
                .iter()
                .find(|s| s.code == code)
                .map(|s| s.system_uri.clone())
                .ok_or_else(|| unknown("system", code, owner))
        };

        let codes: Vec<Code> = self
            .codes
            .into_iter()
            .map(|w| Code {
                id: w.id.unwrap_or_else(Uuid::new_v4),
                name: w.name.unwrap_or_else(|| w.code.clone()),
                code: w.code,
                mapped_code: w.mapped_code,
                enabled: w.enabled,
            })
            .collect();

        let mut system_codes = Vec::new();
        let mut seen = HashSet::new();
        for w in self.system_codes {
            let owner = format!("System code {}", w.system_code);
            let uri = system_uri(&w.system, &owner)?;
            let code = codes
                .iter()
                .find(|c| c.code == w.code)
                .ok_or_else(|| unknown("code", &w.code, &owner))?;
            if !seen.insert((uri.clone(), w.system_code.clone())) {
                return Err(TransformerError::Metadata(format!(
                    "System code '{}' of system {} is defined more than once.",
                    w.system_code, uri
                )));
            }
            system_codes.push(SystemCode {
                system_uri: uri,
                system_code: w.system_code,
                code: code.code.clone(),
                mapped_code: code.mapped_code.clone(),
            });
        }

        let code_sets = self
            .code_sets
            .into_iter()
            .map(|w| {
                let owner = format!("Code set {}", w.code);
                let values = w
                    .codes
                    .into_iter()
                    .map(|c| {
                        if codes.iter().any(|known| known.code == c) {
                            Ok(CodeSetValue {
                                code: c,
                                enabled: true,
                            })
                        } else {
                            Err(unknown("code", &c, &owner))
                        }
                    })
                    .collect::<TransformerResult<Vec<_>>>()?;
                Ok(Arc::new(CodeSet {
                    name: w.name.unwrap_or_else(|| w.code.clone()),
                    code: w.code,
                    codes: values,
                }))
            })
            .collect::<TransformerResult<Vec<_>>>()?;

        let resource_systems = self
            .resource_systems
            .into_iter()
            .map(|w| {
                let owner = format!("Resource system of {}", w.fhir_resource_type);
                Ok(ResourceSystem {
                    fhir_resource_type: w.fhir_resource_type,
                    system: system_uri(&w.system, &owner)?,
                    code_prefix: w.code_prefix,
                    default_value: w.default_value,
                    fhir_id: w.fhir_id,
                })
            })
            .collect::<TransformerResult<Vec<_>>>()?;

        let resource_mappings = self
            .resource_mappings
            .into_iter()
            .map(|w| {
                let owner = format!("Resource mapping of {}", w.fhir_resource_type);
                Ok(Arc::new(FhirResourceMapping {
                    fhir_resource_type: Some(w.fhir_resource_type),
                    tei_lookup_script: resolver.script(w.tei_lookup_script.as_ref(), &owner)?,
                    enrollment_org_lookup_script: resolver
                        .script(w.enrollment_org_lookup_script.as_ref(), &owner)?,
                    event_org_lookup_script: resolver
                        .script(w.event_org_lookup_script.as_ref(), &owner)?,
                    enrollment_date_lookup_script: resolver
                        .script(w.enrollment_date_lookup_script.as_ref(), &owner)?,
                    event_date_lookup_script: resolver
                        .script(w.event_date_lookup_script.as_ref(), &owner)?,
                    effective_date_lookup_script: resolver
                        .script(w.effective_date_lookup_script.as_ref(), &owner)?,
                }))
            })
            .collect::<TransformerResult<Vec<_>>>()?;

        let now = Utc::now();
        let clients = self
            .clients
            .into_iter()
            .map(|w| FhirClient {
                id: w.id.unwrap_or_else(Uuid::new_v4),
                name: w.name.unwrap_or_else(|| w.code.clone()),
                code: w.code,
                enabled: w.enabled,
                fhir_version: w.fhir_version,
                tolerance_millis: w.tolerance_millis,
                remote_sync_enabled: w.remote_sync_enabled,
                auto_created_resource_types: w.auto_created_resource_types,
                systems: resource_systems
                    .iter()
                    .map(|rs| (rs.fhir_resource_type, rs.system.clone()))
                    .collect(),
                resources: w
                    .resources
                    .into_iter()
                    .map(|r| FhirClientResource {
                        id: r.id.unwrap_or_else(Uuid::new_v4),
                        fhir_resource_type: r.fhir_resource_type,
                        criteria_parameters: r.criteria_parameters,
                        description: r.description,
                        virtual_resource: r.virtual_resource,
                        exp_only: r.exp_only,
                        resource_update: ResourceUpdate {
                            last_updated: r.last_updated.unwrap_or(now),
                        },
                    })
                    .collect(),
            })
            .collect();

        Ok(Metadata {
            scripts: script_list,
            rules,
            resource_mappings,
            systems,
            codes,
            system_codes,
            code_sets,
            resource_systems,
            clients,
            dhis: self.dhis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhis::ReferenceType;
    use std::io::Write;

    const DOCUMENT: &str = r#"
scripts:
  - code: ALWAYS
    type: EVALUATE
    returnType: BOOLEAN
    source: "true"
  - code: SET_ATTRIBUTE
    type: TRANSFORM_TO_DHIS
    returnType: BOOLEAN
    source: "output.setValue(args.attribute, input.value)"
    arguments:
      - name: attribute
        dataType: DHIS_REF
        mandatory: true
executableScripts:
  - code: SET_NATIONAL_ID
    script: SET_ATTRIBUTE
    overrideArguments:
      - name: attribute
        overrideValue: "CODE:NATIONAL_ID"
trackedEntities:
  - name: Person
    trackedEntityTypeReference: {value: Person, type: NAME}
    trackedEntityIdentifierReference: {value: NATIONAL_ID, type: CODE}
rules:
  - name: Patients
    fhirResourceType: Patient
    evaluationOrder: 10
    transformScript: SET_NATIONAL_ID
    applicableScript: ALWAYS
    dataReferences:
      - reference: {value: NATIONAL_ID, type: CODE}
        required: true
    target:
      type: TRACKED_ENTITY
      trackedEntity: Person
systems:
  - code: NATIONAL_ID
    systemUri: "http://example.org/national-id"
codes:
  - code: VACCINE_MMR
    mappedCode: MMR
systemCodes:
  - system: NATIONAL_ID
    systemCode: "03"
    code: VACCINE_MMR
resourceSystems:
  - fhirResourceType: Patient
    system: NATIONAL_ID
    codePrefix: "NI_"
clients:
  - code: DEFAULT
    fhirVersion: R4
    autoCreatedResourceTypes: [Patient, Observation]
    resources:
      - fhirResourceType: Patient
        virtual: true
"#;

    #[test]
    fn parses_complete_document() {
        let metadata = parse_metadata(DOCUMENT).expect("valid document");

        assert_eq!(metadata.rules.len(), 1);
        let rule = &metadata.rules[0];
        assert_eq!(rule.evaluation_order, 10);
        assert_eq!(rule.transform_script.code, "SET_NATIONAL_ID");
        assert_eq!(rule.data_references[0].rule_id, rule.id);
        match &rule.kind {
            RuleKind::TrackedEntity { tracked_entity, .. } => {
                assert_eq!(
                    tracked_entity
                        .tracked_entity_identifier_reference
                        .reference_type(),
                    ReferenceType::Code
                );
            }
            other => panic!("expected tracked entity rule, got {other:?}"),
        }

        assert_eq!(metadata.system_codes[0].system_uri, "http://example.org/national-id");
        assert_eq!(metadata.system_codes[0].mapped_code.as_deref(), Some("MMR"));
        assert_eq!(metadata.resource_systems[0].code_prefix.as_deref(), Some("NI_"));
        assert!(metadata.clients[0].resources[0].virtual_resource);
        assert_eq!(metadata.clients[0].auto_created_resource_types.len(), 2);
    }

    #[test]
    fn schema_mismatch_reports_path() {
        let err = parse_metadata("rules:\n  - name: x\n    fhirResourceType: Nonsense\n")
            .expect_err("unknown resource type");
        match err {
            TransformerError::InvalidYaml(msg) => assert!(msg.contains("rules[0]")),
            other => panic!("expected InvalidYaml, got {other:?}"),
        }
    }

    #[test]
    fn unknown_script_code_is_metadata_error() {
        let text = r#"
rules:
  - name: Orgs
    fhirResourceType: Organization
    transformScript: MISSING
    target:
      type: ORGANIZATION_UNIT
"#;
        let err = parse_metadata(text).expect_err("unknown script");
        match err {
            TransformerError::Metadata(msg) => assert!(msg.contains("MISSING")),
            other => panic!("expected Metadata, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_system_code_is_rejected() {
        let text = r#"
systems:
  - code: S
    systemUri: "urn:s"
codes:
  - code: A
systemCodes:
  - {system: S, systemCode: "1", code: A}
  - {system: S, systemCode: "1", code: A}
"#;
        let err = parse_metadata(text).expect_err("duplicate");
        assert!(matches!(err, TransformerError::Metadata(_)));
    }

    #[test]
    fn loads_document_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(DOCUMENT.as_bytes()).expect("write");
        let metadata = load_metadata_file(file.path()).expect("load");
        assert_eq!(metadata.scripts.len(), 2);
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load_metadata_file(&dir.path().join("missing.yml")).expect_err("missing");
        assert!(matches!(err, TransformerError::FileRead(_)));
    }
}
