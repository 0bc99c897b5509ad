pub mod plant;
pub mod roles;

pub use plant::{
    check_single, filter_auto, filter_list, filter_page, Filterable, Page, PlantScoped,
};
pub use roles::{RoleCategory, RoleRequirement};

use crate::audit::{AuditEvent, AuditSink};
use crate::auth::Principal;
use crate::error::AppResult;

/// Role guard entry point for handlers: checks the declared requirement and
/// makes any denial observable through the audit sink. A denial here happens
/// before any mutation is attempted.
pub fn authorize(
    audit: &dyn AuditSink,
    principal: &Principal,
    requirement: &RoleRequirement,
    resource: &str,
) -> AppResult<()> {
    match requirement.check(&principal.roles) {
        Ok(()) => Ok(()),
        Err(err) => {
            audit.record(AuditEvent::denial(
                principal.username.clone(),
                resource,
                err.message(),
            ));
            Err(err)
        }
    }
}
