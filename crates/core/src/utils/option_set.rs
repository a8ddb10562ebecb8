use super::ScriptUtils;
use crate::constants::OPTION_SET_UTILS;
use crate::{TransformerError, TransformerResult};
use dhis::OptionSet;
use regex::Regex;
use std::any::Any;
use std::collections::BTreeMap;

/// The codes of an option set whose options stand for consecutive integers, ordered by integer.
///
/// Without a pattern the whole code is the integer. A pattern must match the whole code and
/// capture the integer in its only group; codes it does not match are ignored.
///
/// # Errors
///
/// Returns [`TransformerError::Script`] if the pattern is invalid or does not have exactly one
/// group, or if the integers are not unique, not integers or not consecutive, or there are none.
pub fn resolve_integer_option_codes(
    option_set: &OptionSet,
    pattern: Option<&str>,
) -> TransformerResult<Vec<String>> {
    let shown = pattern.unwrap_or("(.*)");
    let regex = match pattern {
        Some(p) => {
            let regex = Regex::new(&format!("^(?:{p})$")).map_err(|err| {
                TransformerError::Script(format!(
                    "Pattern to resolve integer options is invalid: {err}"
                ))
            })?;
            if regex.captures_len() != 2 {
                return Err(TransformerError::Script(format!(
                    "Pattern to resolve integer options must have exactly one group: {p}"
                )));
            }
            Some(regex)
        }
        None => None,
    };

    let mut options = BTreeMap::new();
    for option in &option_set.options {
        let key = match &regex {
            None => option.code.as_str(),
            Some(regex) => match regex.captures(&option.code).and_then(|c| c.get(1)) {
                Some(group) => group.as_str(),
                None => continue,
            },
        };
        let key: i64 = key.trim().parse().map_err(|_| {
            TransformerError::Script(format!(
                "Pattern to resolve integer options results in non-integer value \"{key}\": {shown}"
            ))
        })?;
        if options.insert(key, option.code.clone()).is_some() {
            return Err(TransformerError::Script(format!(
                "Pattern to resolve integer options results in duplicate integer value {key}: {shown}"
            )));
        }
    }

    if options.is_empty() {
        return Err(TransformerError::Script(format!(
            "Pattern to resolve integer options does not result in any option: {shown}"
        )));
    }
    let keys: Vec<i64> = options.keys().copied().collect();
    if keys.windows(2).any(|pair| pair[0].checked_add(1) != Some(pair[1])) {
        return Err(TransformerError::Script(format!(
            "Pattern to resolve integer options does not result in consecutive integer values: {shown}"
        )));
    }
    Ok(options.into_values().collect())
}

/// Script access to [`resolve_integer_option_codes`].
pub struct OptionSetUtils;

impl OptionSetUtils {
    pub fn resolve_integer_option_codes(
        &self,
        option_set: &OptionSet,
        pattern: Option<&str>,
    ) -> TransformerResult<Vec<String>> {
        resolve_integer_option_codes(option_set, pattern)
    }
}

impl ScriptUtils for OptionSetUtils {
    fn name(&self) -> &'static str {
        OPTION_SET_UTILS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
