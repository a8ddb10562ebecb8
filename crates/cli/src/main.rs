use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dhis_fhir_core::config::{
    creation_disabled_from_env_value, hierarchy_max_depth_from_env_value,
    internal_identifier_uri_from_env_value,
};
use dhis_fhir_core::context::{FhirRequest, TransformerContext};
use dhis_fhir_core::memory::{
    BundleRemoteRepository, InMemoryAssignmentStore, InMemoryDhisStore, InMemoryMetadataStore,
};
use dhis_fhir_core::metadata::{load_metadata_file, Metadata};
use dhis_fhir_core::store::{CodeStore, RuleStore};
use dhis_fhir_core::transform::business_identifier;
use dhis_fhir_core::utils::TransformerUtils;
use dhis_fhir_core::CoreConfig;
use fhir::{Bundle, FhirResource, FhirResourceType, FhirVersion};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dhis-fhir")]
#[command(about = "Offline inspection of DHIS2 FHIR adapter metadata")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the candidate rules of a FHIR resource type in evaluation order
    Rules {
        /// Metadata document (YAML)
        #[arg(long)]
        metadata: PathBuf,
        /// FHIR resource type, e.g. Immunization
        #[arg(long)]
        resource_type: String,
        /// Resource (JSON) whose codes select rules with an applicable code set
        #[arg(long)]
        resource: Option<PathBuf>,
    },
    /// Print the business identifier of a FHIR resource
    Identifier {
        /// Metadata document (YAML)
        #[arg(long)]
        metadata: PathBuf,
        /// Resource (JSON)
        #[arg(long)]
        resource: PathBuf,
    },
    /// Print the organization hierarchy of a reference, resolved against a bundle
    Hierarchy {
        /// Bundle (JSON) that holds the organizations or locations
        #[arg(long)]
        bundle: PathBuf,
        /// Reference of the child, e.g. Organization/ward-1
        #[arg(long)]
        reference: String,
    },
}

/// Settings from the environment.
///
/// # Environment Variables
/// - `DHIS_FHIR_ADAPTER_USERNAME`: the adapter's own DHIS2 account (default: "adapter")
/// - `DHIS_FHIR_INTERNAL_IDENTIFIER_URI`: reconciliation identifier system
/// - `DHIS_FHIR_CREATION_DISABLED`: never create DHIS2 entities
/// - `DHIS_FHIR_HIERARCHY_MAX_DEPTH`: bound on organization hierarchies (default: 100)
fn config_from_env() -> anyhow::Result<Arc<CoreConfig>> {
    let var = |name: &str| std::env::var(name).ok();
    let config = CoreConfig::new(
        var("DHIS_FHIR_ADAPTER_USERNAME").unwrap_or_else(|| "adapter".into()),
        internal_identifier_uri_from_env_value(var("DHIS_FHIR_INTERNAL_IDENTIFIER_URI")),
        creation_disabled_from_env_value(var("DHIS_FHIR_CREATION_DISABLED"))?,
        hierarchy_max_depth_from_env_value(var("DHIS_FHIR_HIERARCHY_MAX_DEPTH"))?,
    )?;
    Ok(Arc::new(config))
}

fn read_resource(path: &Path) -> anyhow::Result<Arc<FhirResource>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(FhirResource::parse(&text)?)
}

fn load_metadata(path: &Path) -> anyhow::Result<Metadata> {
    let metadata = load_metadata_file(path)
        .with_context(|| format!("failed to load metadata {}", path.display()))?;
    info!(
        rules = metadata.rules.len(),
        scripts = metadata.scripts.len(),
        "Loaded metadata document"
    );
    Ok(metadata)
}

/// Utilities over in-memory stores of the metadata document.
fn utils(
    metadata: &Arc<InMemoryMetadataStore>,
    remote: Arc<BundleRemoteRepository>,
) -> TransformerUtils {
    let dhis = Arc::new(InMemoryDhisStore::from_metadata(&metadata.metadata().dhis));
    let codes: Arc<dyn CodeStore> = metadata.clone();
    TransformerUtils::standard(codes, remote, dhis, Arc::new(InMemoryAssignmentStore::default()))
}

/// Candidate rules of a resource type, one line per rule in evaluation order.
fn rules(
    metadata: &Path,
    resource_type: &str,
    resource: Option<&Path>,
) -> anyhow::Result<Vec<String>> {
    let resource_type = FhirResourceType::from_name(resource_type)?;
    let store = Arc::new(InMemoryMetadataStore::new(load_metadata(metadata)?));
    let codes = match resource {
        Some(path) => {
            let utils = utils(&store, Arc::new(BundleRemoteRepository::default()));
            let resource = read_resource(path)?;
            utils.code_utils()?.get_resource_codes(&resource)?
        }
        None => Vec::new(),
    };

    let rules = store.find_applicable_rules(resource_type, &codes)?;
    if rules.is_empty() {
        return Ok(vec![format!("No rules for {resource_type}.")]);
    }
    Ok(rules
        .iter()
        .map(|rule| {
            let status = match (rule.enabled, rule.imp_enabled) {
                (false, _) => "disabled",
                (true, false) => "import disabled",
                (true, true) => "enabled",
            };
            format!(
                "{:>5}  {:<20} {} ({status}{})",
                rule.evaluation_order,
                rule.dhis_resource_type().to_string(),
                rule.name,
                if rule.stop { ", stop" } else { "" }
            )
        })
        .collect())
}

fn identifier(config: Arc<CoreConfig>, metadata: &Path, resource: &Path) -> anyhow::Result<String> {
    let store = Arc::new(InMemoryMetadataStore::new(load_metadata(metadata)?));
    let utils = utils(&store, Arc::new(BundleRemoteRepository::default()));
    let context = TransformerContext::new(
        FhirRequest::new(FhirVersion::R4)
            .with_resource_systems(store.metadata().resource_systems.clone()),
        config,
    );
    let resource = read_resource(resource)?;
    Ok(business_identifier(&context, &utils, &resource)?
        .unwrap_or_else(|| "Resource has no business identifier.".into()))
}

/// The hierarchy of `reference`, child first and indented by level.
fn hierarchy(config: Arc<CoreConfig>, bundle: &Path, reference: &str) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(bundle)
        .with_context(|| format!("failed to read {}", bundle.display()))?;
    let bundle = Bundle::parse(&text)?;

    let client_id = Uuid::new_v4();
    let remote = Arc::new(BundleRemoteRepository::default());
    remote.add(client_id, bundle);
    let store = Arc::new(InMemoryMetadataStore::default());
    let utils = utils(&store, remote);
    let context = TransformerContext::new(
        FhirRequest::new(FhirVersion::R4).with_fhir_client(client_id),
        config,
    );

    let child = fhir::Reference::new(reference);
    let hierarchy = utils
        .organization_utils()?
        .find_hierarchy(&context, Some(&child))?
        .unwrap_or_default();
    if hierarchy.is_empty() {
        return Ok(vec![format!("{reference} could not be found.")]);
    }
    Ok(hierarchy
        .iter()
        .enumerate()
        .map(|(level, resource)| {
            format!(
                "{}{}/{}",
                "  ".repeat(level),
                resource.resource_type_name(),
                resource.id().unwrap_or("?")
            )
        })
        .collect())
}

/// Entry point of the `dhis-fhir` inspection tool.
///
/// Logging is configured through `RUST_LOG` (default: info), settings through the environment or
/// a `.env` file.
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let lines = match cli.command {
        Commands::Rules {
            metadata,
            resource_type,
            resource,
        } => rules(&metadata, &resource_type, resource.as_deref())?,
        Commands::Identifier { metadata, resource } => {
            vec![identifier(config_from_env()?, &metadata, &resource)?]
        }
        Commands::Hierarchy { bundle, reference } => {
            hierarchy(config_from_env()?, &bundle, &reference)?
        }
    };
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const METADATA: &str = r#"
scripts:
  - {code: TRANSFORM_PATIENT, type: TRANSFORM_TO_DHIS, returnType: BOOLEAN, source: "true"}
trackedEntities:
  - name: Person
    trackedEntityTypeReference: {value: Person, type: NAME}
    trackedEntityIdentifierReference: {value: NATIONAL_ID, type: CODE}
rules:
  - name: Patients
    fhirResourceType: Patient
    evaluationOrder: 10
    transformScript: TRANSFORM_PATIENT
    target: {type: TRACKED_ENTITY, trackedEntity: Person}
systems:
  - {code: NATIONAL_ID, systemUri: "http://example.org/national-id"}
resourceSystems:
  - {fhirResourceType: Patient, system: NATIONAL_ID, codePrefix: "NI_"}
"#;

    const PATIENT: &str = r#"{"resourceType": "Patient", "id": "p1",
        "identifier": [{"system": "http://example.org/national-id", "value": "4711"}]}"#;

    fn file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write");
        file
    }

    fn config() -> Arc<CoreConfig> {
        Arc::new(CoreConfig::with_defaults("adapter").expect("config"))
    }

    #[test]
    fn lists_rules_of_resource_type() {
        let metadata = file(METADATA);
        let patient = file(PATIENT);
        let lines = rules(metadata.path(), "Patient", Some(patient.path())).expect("rules");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Patients (enabled)"));
        assert!(lines[0].trim_start().starts_with("10"));

        let none = rules(metadata.path(), "Immunization", None).expect("rules");
        assert_eq!(none, vec!["No rules for Immunization.".to_owned()]);
    }

    #[test]
    fn prints_prefixed_business_identifier() {
        let metadata = file(METADATA);
        let patient = file(PATIENT);
        let identifier = identifier(config(), metadata.path(), patient.path()).expect("identifier");
        assert_eq!(identifier, "NI_4711");
    }

    #[test]
    fn walks_hierarchy_in_bundle() {
        let bundle = file(
            r#"{"resourceType": "Bundle", "entry": [
                {"resource": {"resourceType": "Organization", "id": "ward-1",
                    "partOf": {"reference": "Organization/hospital"}}},
                {"resource": {"resourceType": "Organization", "id": "hospital"}}]}"#,
        );
        let lines = hierarchy(config(), bundle.path(), "Organization/ward-1").expect("hierarchy");
        assert_eq!(lines, vec!["Organization/ward-1", "  Organization/hospital"]);

        let missing = hierarchy(config(), bundle.path(), "Organization/none").expect("hierarchy");
        assert_eq!(missing, vec!["Organization/none could not be found."]);
    }

    #[test]
    fn unknown_resource_type_is_an_error() {
        let metadata = file(METADATA);
        assert!(rules(metadata.path(), "NotAType", None).is_err());
    }
}
