//! Scripted façades over DHIS2 entities.
//!
//! Each kind has a read-only trait (`Scripted*`) and a writable wrapper that implements it.
//! Writable wrappers borrow the entity mutably for the duration of one script frame and track
//! whether any write changed it. Entities that a script may only inspect are handed out as views.

pub mod data_value_set;
pub mod enrollment;
pub mod event;
pub mod organization_unit;
pub mod tracked_entity;

pub use data_value_set::{ScriptedDataValueSet, WritableDataValueSet};
pub use enrollment::{EnrollmentView, ScriptedEnrollment, WritableEnrollment};
pub use event::{ScriptedEvent, WritableEvent};
pub use organization_unit::{OrganizationUnitView, ScriptedOrganizationUnit};
pub use tracked_entity::{
    ScriptedTrackedEntityInstance, TrackedEntityInstanceView, WritableTrackedEntityInstance,
};

use crate::utils::option_set::resolve_integer_option_codes;
use crate::{TransformerError, TransformerResult};
use chrono::{DateTime, Utc};
use dhis::OptionSet;

/// The option code `value` stands for.
///
/// An exact match wins over the upper-cased value, which wins over a case-insensitive match.
pub(crate) fn match_option_code<'o>(option_set: &'o OptionSet, value: &str) -> Option<&'o str> {
    let options = &option_set.options;
    if let Some(option) = options.iter().find(|o| o.code == value) {
        return Some(&option.code);
    }
    let upper = value.to_uppercase();
    if let Some(option) = options.iter().find(|o| o.code == upper) {
        return Some(&option.code);
    }
    options
        .iter()
        .find(|o| o.code.to_uppercase() == upper)
        .map(|o| o.code.as_str())
}

/// Replaces `value` by the option code it matches, if the field has an option set.
pub(crate) fn checked_option_code(
    option_set: Option<&OptionSet>,
    value: Option<String>,
    field: &str,
) -> TransformerResult<Option<String>> {
    match (option_set, value) {
        (Some(option_set), Some(value)) => match match_option_code(option_set, &value) {
            Some(code) => Ok(Some(code.to_owned())),
            None => Err(TransformerError::Mapping(format!(
                "Code \"{value}\" is not a valid option of \"{}\" for {field}.",
                option_set.name
            ))),
        },
        (_, value) => Ok(value),
    }
}

/// True if the stored value was written after `last_updated` by someone else than the adapter.
///
/// Such a value must not be overwritten with older data.
pub(crate) fn is_newer_foreign_value(
    stored_last_updated: Option<DateTime<Utc>>,
    stored_by: Option<&str>,
    last_updated: Option<DateTime<Utc>>,
    adapter_username: &str,
) -> bool {
    match (stored_last_updated, last_updated) {
        (Some(stored), Some(incoming)) => stored > incoming && stored_by != Some(adapter_username),
        _ => false,
    }
}

/// The option code for an integer value counted from `value_base`.
///
/// Returns none if the value is below the base, or if decrementing is not allowed and the
/// currently stored option is ordered after the requested one. Values beyond the last option
/// select the last option.
pub(crate) fn integer_option_code(
    option_set: &OptionSet,
    value: i64,
    value_base: i64,
    decrement_allowed: bool,
    pattern: Option<&str>,
    current: Option<&str>,
) -> TransformerResult<Option<String>> {
    let codes = resolve_integer_option_codes(option_set, pattern)?;
    if value < value_base {
        return Ok(None);
    }
    let offset = usize::try_from(value - value_base).unwrap_or(usize::MAX);
    let new_index = offset.min(codes.len() - 1);

    if !decrement_allowed {
        let current_index = current.and_then(|code| codes.iter().position(|c| c == code));
        if matches!(current_index, Some(index) if index > new_index) {
            return Ok(None);
        }
    }
    Ok(Some(codes[new_index].clone()))
}
