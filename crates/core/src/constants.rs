//! Constants shared across the engine.

/// Identifier system under which the adapter records target ids on source resources.
pub const DEFAULT_INTERNAL_IDENTIFIER_URI: &str =
    "http://www.dhis2.org/dhis2-fhir-adapter/systems/DHIS2-FHIR-Identifier";

/// Default bound on the number of parents walked or fetched for one hierarchy.
pub const DEFAULT_HIERARCHY_MAX_DEPTH: usize = 100;

/// Separator of array values in script argument defaults and overrides.
pub const SCRIPT_ARG_ARRAY_SEPARATOR: char = '|';

pub const AUTO_CREATED_DESCRIPTION_PREFIX: &str =
    "Automatically created subscription for FHIR Resource";

// Names under which utilities are registered in the script environment.
pub const IDENTIFIER_UTILS: &str = "identifierUtils";
pub const CODE_UTILS: &str = "codeUtils";
pub const REFERENCE_UTILS: &str = "referenceUtils";
pub const FHIR_RESOURCE_UTILS: &str = "fhirResourceUtils";
pub const ORGANIZATION_UTILS: &str = "organizationUtils";
pub const OPTION_SET_UTILS: &str = "optionSetUtils";
pub const ASSIGNMENT_UTILS: &str = "assignmentUtils";
pub const DATE_TIME_UTILS: &str = "dateTimeUtils";
pub const VALUE_TYPE_UTILS: &str = "valueTypeUtils";
