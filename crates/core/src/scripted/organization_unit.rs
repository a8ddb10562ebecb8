use dhis::OrganizationUnit;

/// Read access to an organization unit. Organization units are never written by the adapter.
pub trait ScriptedOrganizationUnit {
    fn id(&self) -> &str;

    fn code(&self) -> Option<&str>;

    fn name(&self) -> &str;

    fn short_name(&self) -> Option<&str>;

    fn parent_id(&self) -> Option<&str>;

    fn level(&self) -> u32;

    fn is_leaf(&self) -> bool;
}

pub struct OrganizationUnitView<'a> {
    unit: &'a OrganizationUnit,
}

impl<'a> OrganizationUnitView<'a> {
    pub fn new(unit: &'a OrganizationUnit) -> Self {
        Self { unit }
    }
}

impl ScriptedOrganizationUnit for OrganizationUnitView<'_> {
    fn id(&self) -> &str {
        &self.unit.id
    }

    fn code(&self) -> Option<&str> {
        self.unit.code.as_deref()
    }

    fn name(&self) -> &str {
        &self.unit.name
    }

    fn short_name(&self) -> Option<&str> {
        self.unit.short_name.as_deref()
    }

    fn parent_id(&self) -> Option<&str> {
        self.unit.parent_id.as_deref()
    }

    fn level(&self) -> u32 {
        self.unit.level
    }

    fn is_leaf(&self) -> bool {
        self.unit.leaf
    }
}
