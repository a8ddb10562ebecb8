//! Static adapter metadata: scripts, rules, code systems and FHIR clients.

pub mod client;
pub mod document;
pub mod rule;
pub mod script;
pub mod system;

pub use client::{FhirClient, FhirClientResource, ResourceUpdate};
pub use document::{load_metadata_file, parse_metadata, DhisMetadata, Metadata};
pub use rule::{
    FhirResourceMapping, MappedProgram, MappedProgramStage, MappedTrackedEntity, Rule,
    RuleDataReference, RuleKind,
};
pub use script::{DataType, ExecutableScript, ExecutableScriptArg, Script, ScriptArg, ScriptType};
pub use system::{Code, CodeSet, CodeSetValue, ResourceSystem, System, SystemCode};
