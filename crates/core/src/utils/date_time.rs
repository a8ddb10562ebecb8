use super::ScriptUtils;
use crate::constants::DATE_TIME_UTILS;
use crate::context::TransformerContext;
use crate::convert::convert_date_time;
use crate::script::ScriptValue;
use crate::{TransformerError, TransformerResult};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::any::Any;
use std::str::FromStr;

/// Unit in which an age is counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateUnit {
    Days,
    Weeks,
    Months,
    Years,
}

impl FromStr for DateUnit {
    type Err = TransformerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAYS" => Ok(DateUnit::Days),
            "WEEKS" => Ok(DateUnit::Weeks),
            "MONTHS" => Ok(DateUnit::Months),
            "YEARS" => Ok(DateUnit::Years),
            _ => Err(TransformerError::Script(format!("Invalid date unit: {s}"))),
        }
    }
}

/// Whether a FHIR date or date/time names at least a day, e.g. not just `2026` or `2026-03`.
pub fn has_day_precision(text: &str) -> bool {
    let date = text.trim().split('T').next().unwrap_or_default();
    date.split('-').filter(|part| !part.is_empty()).count() >= 3
}

/// Whole `unit`s from `date` up to `relative`. Dates after `relative` have age zero.
fn age_between(relative: NaiveDate, date: NaiveDate, unit: DateUnit) -> i64 {
    if date >= relative {
        return 0;
    }
    let months = || {
        let mut months = i64::from(relative.year() - date.year()) * 12
            + i64::from(relative.month()) - i64::from(date.month());
        if relative.day() < date.day() {
            months -= 1;
        }
        months
    };
    match unit {
        DateUnit::Days => (relative - date).num_days(),
        DateUnit::Weeks => (relative - date).num_weeks(),
        DateUnit::Months => months(),
        DateUnit::Years => months() / 12,
    }
}

/// Dates and ages of FHIR date/time values.
pub struct DateTimeUtils;

impl DateTimeUtils {
    /// The date/time if it is at least day precise, otherwise none.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if the value is not a date/time.
    pub fn get_precise_date(&self, value: &ScriptValue) -> TransformerResult<Option<DateTime<Utc>>> {
        if let ScriptValue::String(text) = value {
            if !has_day_precision(text) {
                return Ok(None);
            }
        }
        Ok(convert_date_time(value, "date/time")?)
    }

    /// As [`Self::get_precise_date`], but none for a date/time in the future.
    pub fn get_precise_past_date(
        &self,
        context: &TransformerContext,
        value: &ScriptValue,
    ) -> TransformerResult<Option<DateTime<Utc>>> {
        Ok(self
            .get_precise_date(value)?
            .filter(|date| *date <= context.now()))
    }

    /// The age of `value` at `relative` in whole units of `unit`, e.g. `YEARS`.
    ///
    /// Returns none if either value is missing or not day precise.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Script`] if the unit is unknown.
    pub fn get_age(
        &self,
        relative: &ScriptValue,
        value: &ScriptValue,
        unit: &str,
    ) -> TransformerResult<Option<i64>> {
        let unit: DateUnit = unit.parse()?;
        let (Some(relative), Some(date)) =
            (self.get_precise_date(relative)?, self.get_precise_date(value)?)
        else {
            return Ok(None);
        };
        Ok(Some(age_between(relative.date_naive(), date.date_naive(), unit)))
    }

    /// The age of `value` now.
    pub fn get_current_age(
        &self,
        context: &TransformerContext,
        value: &ScriptValue,
        unit: &str,
    ) -> TransformerResult<Option<i64>> {
        self.get_age(&ScriptValue::DateTime(context.now()), value, unit)
    }

    pub fn is_younger_than(
        &self,
        relative: &ScriptValue,
        value: &ScriptValue,
        amount: i64,
        unit: &str,
    ) -> TransformerResult<bool> {
        Ok(self
            .get_age(relative, value, unit)?
            .is_some_and(|age| age < amount))
    }

    pub fn is_older_than(
        &self,
        relative: &ScriptValue,
        value: &ScriptValue,
        amount: i64,
        unit: &str,
    ) -> TransformerResult<bool> {
        Ok(self
            .get_age(relative, value, unit)?
            .is_some_and(|age| age > amount))
    }
}

impl ScriptUtils for DateTimeUtils {
    fn name(&self) -> &'static str {
        DATE_TIME_UTILS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;
    use chrono::Duration;

    fn text(value: &str) -> ScriptValue {
        ScriptValue::String(value.into())
    }

    #[test]
    fn only_day_precise_dates_are_precise() {
        assert!(has_day_precision("2026-03-04"));
        assert!(has_day_precision("2026-03-04T10:00:00Z"));
        assert!(!has_day_precision("2026-03"));
        assert!(!has_day_precision("2026"));

        let utils = DateTimeUtils;
        assert!(utils.get_precise_date(&text("2026-03")).expect("date").is_none());
        assert!(utils.get_precise_date(&ScriptValue::Null).expect("date").is_none());
        let date = utils
            .get_precise_date(&text("2026-03-04"))
            .expect("date")
            .expect("precise");
        assert_eq!(date.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 4).expect("date"));
    }

    #[test]
    fn future_dates_are_not_past_dates() {
        let context = context();
        let utils = DateTimeUtils;
        let tomorrow = ScriptValue::DateTime(context.now() + Duration::days(1));
        assert!(utils
            .get_precise_past_date(&context, &tomorrow)
            .expect("date")
            .is_none());
        let yesterday = ScriptValue::DateTime(context.now() - Duration::days(1));
        assert!(utils
            .get_precise_past_date(&context, &yesterday)
            .expect("date")
            .is_some());
    }

    #[test]
    fn ages_count_whole_units() {
        let utils = DateTimeUtils;
        let relative = text("2026-03-04");
        let born = text("2024-03-05");
        assert_eq!(utils.get_age(&relative, &born, "YEARS").expect("age"), Some(1));
        assert_eq!(utils.get_age(&relative, &born, "months").expect("age"), Some(23));
        assert_eq!(
            utils.get_age(&relative, &text("2026-02-25"), "WEEKS").expect("age"),
            Some(1)
        );
        assert_eq!(
            utils.get_age(&relative, &text("2026-03-01"), "DAYS").expect("age"),
            Some(3)
        );
        assert_eq!(
            utils.get_age(&relative, &text("2027-01-01"), "DAYS").expect("age"),
            Some(0)
        );
        assert!(utils.get_age(&relative, &text("2024"), "YEARS").expect("age").is_none());

        assert!(utils.is_younger_than(&relative, &born, 2, "YEARS").expect("younger"));
        assert!(!utils.is_older_than(&relative, &born, 1, "YEARS").expect("older"));
        assert!(!utils
            .is_older_than(&relative, &ScriptValue::Null, 0, "YEARS")
            .expect("older"));
    }

    #[test]
    fn unknown_unit_is_script_error() {
        match DateTimeUtils.get_age(&text("2026-03-04"), &text("2020-01-01"), "DECADES") {
            Err(TransformerError::Script(msg)) => assert!(msg.contains("DECADES")),
            other => panic!("expected Script, got {other:?}"),
        }
    }
}
