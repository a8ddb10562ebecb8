//! DHIS2 metadata that constrains tracker and aggregate values.
//!
//! Metadata objects are read-only from the adapter's point of view. They are looked up by
//! [`Reference`] through the [`Identifiable`] trait.

use crate::reference::{Reference, ReferenceType};
use crate::value_type::ValueType;
use serde::{Deserialize, Serialize};

/// Metadata objects addressable by id, code or name.
pub trait Identifiable {
    fn id(&self) -> &str;

    fn code(&self) -> Option<&str>;

    fn name(&self) -> &str;

    /// True if `reference` designates this object.
    fn is_reference(&self, reference: &Reference) -> bool {
        match reference.reference_type() {
            ReferenceType::Id => self.id() == reference.value(),
            ReferenceType::Code => self.code() == Some(reference.value()),
            ReferenceType::Name => self.name() == reference.value(),
        }
    }
}

macro_rules! identifiable {
    ($($t:ty),+ $(,)?) => {
        $(
            impl Identifiable for $t {
                fn id(&self) -> &str {
                    &self.id
                }

                fn code(&self) -> Option<&str> {
                    self.code.as_deref()
                }

                fn name(&self) -> &str {
                    &self.name
                }
            }
        )+
    };
}

identifiable!(
    OptionSet,
    DataElement,
    TrackedEntityAttribute,
    TrackedEntityType,
    Program,
    ProgramStage,
    DataSet,
    OrganizationUnit,
);

fn find_by_reference<'a, T: Identifiable>(
    items: impl IntoIterator<Item = &'a T>,
    reference: &Reference,
) -> Option<&'a T>
where
    T: 'a,
{
    items.into_iter().find(|item| item.is_reference(reference))
}

// ============================================================================
// Option sets
// ============================================================================

/// One permitted value of an option set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhisOption {
    pub code: String,
    pub name: String,
}

/// Closed list of permitted codes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub options: Vec<DhisOption>,
}

// ============================================================================
// Data elements and attributes
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataElement {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub value_type: ValueType,
    #[serde(default)]
    pub option_set: Option<OptionSet>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntityAttribute {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub value_type: ValueType,
    #[serde(default)]
    pub option_set: Option<OptionSet>,
    /// Values are generated by DHIS2 and must not be written by the adapter.
    #[serde(default)]
    pub generated: bool,
    #[serde(default)]
    pub unique: bool,
}

/// All tracked entity attributes known to the target system.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackedEntityAttributes {
    attributes: Vec<TrackedEntityAttribute>,
}

impl TrackedEntityAttributes {
    pub fn new(attributes: Vec<TrackedEntityAttribute>) -> Self {
        Self { attributes }
    }

    pub fn find(&self, reference: &Reference) -> Option<&TrackedEntityAttribute> {
        find_by_reference(&self.attributes, reference)
    }

    pub fn by_id(&self, id: &str) -> Option<&TrackedEntityAttribute> {
        self.attributes.iter().find(|a| a.id == id)
    }
}

/// Attribute assignment on a tracked entity type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntityTypeAttribute {
    pub attribute_id: String,
    #[serde(default)]
    pub mandatory: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntityType {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub attributes: Vec<TrackedEntityTypeAttribute>,
}

impl TrackedEntityType {
    pub fn type_attribute(&self, attribute_id: &str) -> Option<&TrackedEntityTypeAttribute> {
        self.attributes.iter().find(|a| a.attribute_id == attribute_id)
    }
}

// ============================================================================
// Programs
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramStageDataElement {
    pub data_element: DataElement,
    #[serde(default)]
    pub compulsory: bool,
    #[serde(default)]
    pub allow_provided_elsewhere: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramStage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub repeatable: bool,
    #[serde(default)]
    pub data_elements: Vec<ProgramStageDataElement>,
}

impl ProgramStage {
    pub fn data_element(&self, reference: &Reference) -> Option<&ProgramStageDataElement> {
        self.data_elements
            .iter()
            .find(|e| e.data_element.is_reference(reference))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub tracked_entity_type_id: Option<String>,
    #[serde(default)]
    pub select_enrollment_dates_in_future: bool,
    #[serde(default)]
    pub select_incident_dates_in_future: bool,
    #[serde(default)]
    pub stages: Vec<ProgramStage>,
}

impl Program {
    pub fn stage(&self, reference: &Reference) -> Option<&ProgramStage> {
        find_by_reference(&self.stages, reference)
    }
}

// ============================================================================
// Aggregate and organisation units
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub period_type: String,
    #[serde(default)]
    pub data_elements: Vec<DataElement>,
}

impl DataSet {
    pub fn data_element(&self, reference: &Reference) -> Option<&DataElement> {
        find_by_reference(&self.data_elements, reference)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUnit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub leaf: bool,
}
