use super::{checked_option_code, integer_option_code, is_newer_foreign_value};
use crate::context::TransformerContext;
use crate::convert::{convert_date_time, convert_from_text, convert_location, convert_to_text};
use crate::script::ScriptValue;
use crate::{TransformerError, TransformerResult};
use chrono::{DateTime, Utc};
use dhis::{Event, EventStatus, Location, Program, ProgramStage, ProgramStageDataElement, Reference};
use tracing::debug;

/// Read access to a program stage event.
pub trait ScriptedEvent {
    fn id(&self) -> Option<&str>;

    fn program_id(&self) -> &str;

    fn program_stage_id(&self) -> &str;

    fn enrollment_id(&self) -> Option<&str>;

    fn organization_unit_id(&self) -> Option<&str>;

    fn status(&self) -> EventStatus;

    fn event_date(&self) -> Option<DateTime<Utc>>;

    fn due_date(&self) -> Option<DateTime<Utc>>;

    fn coordinate(&self) -> Option<Location>;

    /// Typed value of a data element of the stage, null if the event has none.
    fn value(&self, data_element: &Reference) -> TransformerResult<ScriptValue>;

    fn is_new_resource(&self) -> bool;
}

/// Script-facing wrapper that validates and dirty-tracks writes to an event.
///
/// Entity fields and data values are tracked separately; each data value carries its own flag.
pub struct WritableEvent<'a> {
    context: &'a TransformerContext,
    program: &'a Program,
    program_stage: &'a ProgramStage,
    event: &'a mut Event,
    new_resource: bool,
    modified: bool,
}

impl<'a> WritableEvent<'a> {
    pub fn new(
        context: &'a TransformerContext,
        program: &'a Program,
        program_stage: &'a ProgramStage,
        event: &'a mut Event,
        new_resource: bool,
    ) -> Self {
        Self {
            context,
            program,
            program_stage,
            event,
            new_resource,
            modified: false,
        }
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    pub fn program_stage(&self) -> &'a ProgramStage {
        self.program_stage
    }

    /// True if an entity field other than a data value was changed.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_any_data_value_modified(&self) -> bool {
        self.event.data_values.iter().any(|v| v.modified)
    }

    fn stage_data_element(
        &self,
        reference: &Reference,
    ) -> TransformerResult<&'a ProgramStageDataElement> {
        let stage: &'a ProgramStage = self.program_stage;
        stage.data_element(reference).ok_or_else(|| {
            TransformerError::Mapping(format!(
                "Program stage \"{}\" does not include data element \"{reference}\"",
                stage.name
            ))
        })
    }

    /// Sets the value of a data element.
    ///
    /// Returns false without writing if the event already has a value and `override_existing` is
    /// false, or if the stored value is more recent than `last_updated` and was not written by the
    /// adapter. `provided_elsewhere` is only applied if the stage permits it for the element.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if the stage does not include the data element or the
    /// value cannot be converted to its value type or option set.
    pub fn set_value(
        &mut self,
        reference: &Reference,
        value: &ScriptValue,
        provided_elsewhere: Option<bool>,
        override_existing: bool,
        last_updated: Option<DateTime<Utc>>,
    ) -> TransformerResult<bool> {
        let element = self.stage_data_element(reference)?;
        let data_element = &element.data_element;
        let field = format!("data element \"{}\"", data_element.name);
        let text = convert_to_text(value, data_element.value_type, &field)?;
        let text = checked_option_code(data_element.option_set.as_ref(), text, &field)?;

        let context = self.context;
        let username = context.config().adapter_username();
        if let Some(stored) = self.event.data_value(&data_element.id) {
            if !override_existing && stored.value.is_some() {
                return Ok(false);
            }
            if is_newer_foreign_value(
                stored.last_updated,
                stored.stored_by.as_deref(),
                last_updated,
                username,
            ) {
                debug!(data_element = %data_element.name, "Stored data value is newer, not overwritten");
                return Ok(false);
            }
        }

        let provided_elsewhere = provided_elsewhere.filter(|_| element.allow_provided_elsewhere);
        if text.is_none()
            && provided_elsewhere != Some(true)
            && self.event.data_value(&data_element.id).is_none()
        {
            return Ok(false);
        }
        let slot = self.event.data_value_mut(&data_element.id);
        if slot.value != text {
            slot.value = text;
            slot.last_updated = Some(context.now());
            slot.stored_by = Some(username.to_owned());
            slot.modified = true;
        }
        if let Some(provided_elsewhere) = provided_elsewhere {
            if slot.provided_elsewhere != provided_elsewhere {
                slot.provided_elsewhere = provided_elsewhere;
                slot.modified = true;
            }
        }
        Ok(true)
    }

    /// Sets an option-set data element to the option at position `value - value_base`.
    #[allow(clippy::too_many_arguments)]
    pub fn set_integer_option_value(
        &mut self,
        reference: &Reference,
        value: i64,
        value_base: i64,
        decrement_allowed: bool,
        pattern: Option<&str>,
        provided_elsewhere: Option<bool>,
        last_updated: Option<DateTime<Utc>>,
    ) -> TransformerResult<bool> {
        let data_element = &self.stage_data_element(reference)?.data_element;
        let option_set = data_element.option_set.as_ref().ok_or_else(|| {
            TransformerError::Mapping(format!(
                "Data element \"{}\" does not have an option set.",
                data_element.name
            ))
        })?;
        let current = self
            .event
            .data_value(&data_element.id)
            .and_then(|v| v.value.as_deref());
        match integer_option_code(option_set, value, value_base, decrement_allowed, pattern, current)? {
            Some(code) => self.set_value(
                reference,
                &ScriptValue::String(code),
                provided_elsewhere,
                true,
                last_updated,
            ),
            None => Ok(false),
        }
    }

    /// Returns false if `value` is null.
    pub fn set_event_date(&mut self, value: &ScriptValue) -> TransformerResult<bool> {
        let date = convert_date_time(value, "event date")?;
        Ok(self.replace_date(date, |e| &mut e.event_date))
    }

    /// Returns false if `value` is null.
    pub fn set_due_date(&mut self, value: &ScriptValue) -> TransformerResult<bool> {
        let date = convert_date_time(value, "due date")?;
        Ok(self.replace_date(date, |e| &mut e.due_date))
    }

    fn replace_date(
        &mut self,
        date: Option<DateTime<Utc>>,
        field: impl FnOnce(&mut Event) -> &mut Option<DateTime<Utc>>,
    ) -> bool {
        let Some(date) = date else {
            return false;
        };
        let slot = field(&mut *self.event);
        if *slot != Some(date) {
            *slot = Some(date);
            self.modified = true;
        }
        true
    }

    pub fn set_status(&mut self, status: EventStatus) -> bool {
        if self.event.status != status {
            self.event.status = status;
            self.modified = true;
        }
        true
    }

    pub fn set_coordinate(&mut self, value: &ScriptValue) -> TransformerResult<bool> {
        let location = convert_location(value, "event coordinate")?;
        if self.event.coordinate != location {
            self.event.coordinate = location;
            self.modified = true;
        }
        Ok(true)
    }

    pub fn set_organization_unit_id(&mut self, id: Option<&str>) -> TransformerResult<bool> {
        let id = id.ok_or_else(|| {
            TransformerError::Mapping("Organization unit ID of event cannot be null.".into())
        })?;
        if self.event.org_unit_id.as_deref() != Some(id) {
            self.event.org_unit_id = Some(id.to_owned());
            self.modified = true;
        }
        Ok(true)
    }

    /// Checks that the event can be saved.
    ///
    /// # Errors
    ///
    /// Returns [`TransformerError::Mapping`] if the organization unit, the event date or the due
    /// date is missing.
    pub fn validate(&self) -> TransformerResult<()> {
        let missing = if self.event.org_unit_id.is_none() {
            Some("Organization unit ID")
        } else if self.event.event_date.is_none() {
            Some("Event date")
        } else if self.event.due_date.is_none() {
            Some("Due date")
        } else {
            None
        };
        match missing {
            Some(field) => Err(TransformerError::Mapping(format!(
                "{field} of event of program stage \"{}\" has not been specified.",
                self.program_stage.name
            ))),
            None => Ok(()),
        }
    }
}

impl ScriptedEvent for WritableEvent<'_> {
    fn id(&self) -> Option<&str> {
        self.event.id.as_deref()
    }

    fn program_id(&self) -> &str {
        &self.event.program_id
    }

    fn program_stage_id(&self) -> &str {
        &self.event.program_stage_id
    }

    fn enrollment_id(&self) -> Option<&str> {
        self.event.enrollment_id.as_deref()
    }

    fn organization_unit_id(&self) -> Option<&str> {
        self.event.org_unit_id.as_deref()
    }

    fn status(&self) -> EventStatus {
        self.event.status
    }

    fn event_date(&self) -> Option<DateTime<Utc>> {
        self.event.event_date
    }

    fn due_date(&self) -> Option<DateTime<Utc>> {
        self.event.due_date
    }

    fn coordinate(&self) -> Option<Location> {
        self.event.coordinate
    }

    fn value(&self, data_element: &Reference) -> TransformerResult<ScriptValue> {
        let data_element = &self.stage_data_element(data_element)?.data_element;
        let text = self
            .event
            .data_value(&data_element.id)
            .and_then(|v| v.value.as_deref());
        Ok(convert_from_text(text, data_element.value_type))
    }

    fn is_new_resource(&self) -> bool {
        self.new_resource
    }
}
