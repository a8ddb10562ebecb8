use crate::context::TransformerContext;
use crate::convert::{convert_date_time, convert_location};
use crate::script::ScriptValue;
use crate::{TransformerError, TransformerResult};
use chrono::{DateTime, Utc};
use dhis::{Enrollment, EnrollmentStatus, Location, Program};

/// Read access to an enrollment.
pub trait ScriptedEnrollment {
    fn id(&self) -> Option<&str>;

    fn program_id(&self) -> &str;

    fn tracked_entity_instance_id(&self) -> Option<&str>;

    fn organization_unit_id(&self) -> Option<&str>;

    fn status(&self) -> EnrollmentStatus;

    fn enrollment_date(&self) -> Option<DateTime<Utc>>;

    fn incident_date(&self) -> Option<DateTime<Utc>>;

    fn coordinate(&self) -> Option<Location>;

    fn is_new_resource(&self) -> bool;
}

macro_rules! scripted_enrollment {
    ($t:ty) => {
        impl ScriptedEnrollment for $t {
            fn id(&self) -> Option<&str> {
                self.enrollment.id.as_deref()
            }

            fn program_id(&self) -> &str {
                &self.enrollment.program_id
            }

            fn tracked_entity_instance_id(&self) -> Option<&str> {
                self.enrollment.tracked_entity_instance_id.as_deref()
            }

            fn organization_unit_id(&self) -> Option<&str> {
                self.enrollment.org_unit_id.as_deref()
            }

            fn status(&self) -> EnrollmentStatus {
                self.enrollment.status
            }

            fn enrollment_date(&self) -> Option<DateTime<Utc>> {
                self.enrollment.enrollment_date
            }

            fn incident_date(&self) -> Option<DateTime<Utc>> {
                self.enrollment.incident_date
            }

            fn coordinate(&self) -> Option<Location> {
                self.enrollment.coordinate
            }

            fn is_new_resource(&self) -> bool {
                self.new_resource
            }
        }
    };
}

/// An enrollment that scripts may inspect but not change.
pub struct EnrollmentView<'a> {
    enrollment: &'a Enrollment,
    new_resource: bool,
}

impl<'a> EnrollmentView<'a> {
    pub fn new(enrollment: &'a Enrollment, new_resource: bool) -> Self {
        Self {
            enrollment,
            new_resource,
        }
    }
}

scripted_enrollment!(EnrollmentView<'_>);

/// Script-facing wrapper that validates and dirty-tracks writes to an enrollment.
pub struct WritableEnrollment<'a> {
    context: &'a TransformerContext,
    program: &'a Program,
    enrollment: &'a mut Enrollment,
    new_resource: bool,
    modified: bool,
}

scripted_enrollment!(WritableEnrollment<'_>);

impl<'a> WritableEnrollment<'a> {
    pub fn new(
        context: &'a TransformerContext,
        program: &'a Program,
        enrollment: &'a mut Enrollment,
        new_resource: bool,
    ) -> Self {
        Self {
            context,
            program,
            enrollment,
            new_resource,
            modified: false,
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Returns false if `value` is null.
    pub fn set_enrollment_date(&mut self, value: &ScriptValue) -> TransformerResult<bool> {
        let date = convert_date_time(value, "enrollment date")?;
        Ok(self.replace_date(date, |e| &mut e.enrollment_date))
    }

    /// Returns false if `value` is null.
    pub fn set_incident_date(&mut self, value: &ScriptValue) -> TransformerResult<bool> {
        let date = convert_date_time(value, "incident date")?;
        Ok(self.replace_date(date, |e| &mut e.incident_date))
    }

    fn replace_date(
        &mut self,
        date: Option<DateTime<Utc>>,
        field: impl FnOnce(&mut Enrollment) -> &mut Option<DateTime<Utc>>,
    ) -> bool {
        let Some(date) = date else {
            return false;
        };
        let slot = field(&mut *self.enrollment);
        if *slot != Some(date) {
            *slot = Some(date);
            self.modified = true;
        }
        true
    }

    pub fn set_coordinate(&mut self, value: &ScriptValue) -> TransformerResult<bool> {
        let location = convert_location(value, "enrollment coordinate")?;
        if self.enrollment.coordinate != location {
            self.enrollment.coordinate = location;
            self.modified = true;
        }
        Ok(true)
    }

    pub fn set_status(&mut self, status: EnrollmentStatus) -> bool {
        if self.enrollment.status != status {
            self.enrollment.status = status;
            self.modified = true;
        }
        true
    }

    pub fn set_organization_unit_id(&mut self, id: Option<&str>) -> TransformerResult<bool> {
        let id = id.ok_or_else(|| {
            TransformerError::Mapping("Organization unit ID of enrollment cannot be null.".into())
        })?;
        if self.enrollment.org_unit_id.as_deref() != Some(id) {
            self.enrollment.org_unit_id = Some(id.to_owned());
            self.modified = true;
        }
        Ok(true)
    }

    /// Checks that the enrollment can be saved.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if the organization unit or a date is missing, or if
    /// a date lies in the future and the program does not allow that.
    pub fn validate(&self) -> TransformerResult<()> {
        if self.enrollment.org_unit_id.is_none() {
            return Err(TransformerError::Mapping(
                "Organization unit ID of enrollment has not been specified.".into(),
            ));
        }
        let now = self.context.now();
        let checks = [
            (
                "Enrollment date",
                self.enrollment.enrollment_date,
                self.program.select_enrollment_dates_in_future,
            ),
            (
                "Incident date",
                self.enrollment.incident_date,
                self.program.select_incident_dates_in_future,
            ),
        ];
        for (label, date, future_allowed) in checks {
            let Some(date) = date else {
                return Err(TransformerError::Mapping(format!(
                    "{label} of enrollment has not been specified."
                )));
            };
            if !future_allowed && date > now {
                return Err(TransformerError::Mapping(format!(
                    "{label} of enrollment is in the future and program \"{}\" does not allow dates in the future.",
                    self.program.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, program};
    use chrono::Duration;

    #[test]
    fn null_dates_are_not_written() {
        let context = context();
        let program = program("PrImmun0001", "Immunization", vec![]);
        let mut enrollment = Enrollment::new(None, "PrImmun0001");
        let mut writable = WritableEnrollment::new(&context, &program, &mut enrollment, true);
        assert!(!writable.set_enrollment_date(&ScriptValue::Null).expect("null"));
        assert!(!writable.is_modified());
        assert!(writable
            .set_incident_date(&ScriptValue::String("2026-01-15".into()))
            .expect("date"));
        assert!(writable.is_modified());
        assert!(writable.incident_date().is_some());
    }

    #[test]
    fn validation_checks_dates() {
        let context = context();
        let program = program("PrImmun0001", "Immunization", vec![]);
        let tomorrow = Utc::now() + Duration::days(1);
        let mut enrollment = Enrollment::new(None, "PrImmun0001");
        let mut writable = WritableEnrollment::new(&context, &program, &mut enrollment, true);
        writable.set_organization_unit_id(Some("OuClinic001")).expect("org unit");
        match writable.validate() {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("Enrollment date")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        writable
            .set_enrollment_date(&ScriptValue::DateTime(tomorrow))
            .expect("date");
        writable
            .set_incident_date(&ScriptValue::DateTime(Utc::now() - Duration::days(1)))
            .expect("date");
        match writable.validate() {
            Err(TransformerError::Mapping(msg)) => assert!(msg.contains("in the future")),
            other => panic!("expected Mapping, got {other:?}"),
        }
        writable
            .set_enrollment_date(&ScriptValue::DateTime(Utc::now() - Duration::hours(1)))
            .expect("date");
        writable.validate().expect("valid");
    }

    #[test]
    fn status_changes_mark_modified() {
        let context = context();
        let program = program("PrImmun0001", "Immunization", vec![]);
        let mut enrollment = Enrollment::new(Some("EnAbc000001".into()), "PrImmun0001");
        let mut writable = WritableEnrollment::new(&context, &program, &mut enrollment, false);
        writable.set_status(EnrollmentStatus::Active);
        assert!(!writable.is_modified());
        writable.set_status(EnrollmentStatus::Completed);
        assert!(writable.is_modified());
        assert_eq!(writable.status(), EnrollmentStatus::Completed);
    }
}
