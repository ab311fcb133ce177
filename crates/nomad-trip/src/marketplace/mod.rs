//! Company and driver onboarding, moderation, and the driver/company
//! affiliation workflow.

pub mod access;
pub mod affiliation;
pub mod company;
pub mod domain;
pub mod driver;
pub mod error;
pub mod moderation;
pub mod router;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};

use crate::repository::StoreTx;

pub use access::Actor;
pub use affiliation::{AffiliationService, COOLDOWN_DAYS};
pub use company::{CompanyChanges, CompanyData, CompanySearch, CompanyService};
pub use domain::{
    Affiliation, Company, CompanyId, Driver, DriverId, Moderation, ModerationStatus, Page,
    PageRequest, Role, User, UserId,
};
pub use driver::{DriverChanges, DriverData, DriverService, DriverView};
pub use error::{ErrorKind, ServiceError};
pub use moderation::{can_transition, StatusChange};
pub use router::{marketplace_router, MarketplaceServices};

pub(crate) fn checked_page(page: PageRequest) -> Result<PageRequest, ServiceError> {
    if page.is_valid() {
        Ok(page)
    } else {
        Err(ServiceError::invalid(format!(
            "page must be at least 1 and per_page between 1 and {}",
            domain::MAX_PER_PAGE
        )))
    }
}

/// Flip a user's role inside the transaction that creates or removes the
/// profile driving it.
pub(crate) fn assign_role(
    tx: &mut dyn StoreTx,
    user_id: UserId,
    role: Role,
    at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let mut user = tx
        .user(user_id)?
        .ok_or_else(|| ServiceError::not_found("User not found"))?;
    user.role = role;
    user.updated_at = at;
    tx.save_user(&user)?;
    Ok(())
}

/// Blank-after-trim check shared by every text field on the marketplace forms.
pub(crate) fn require_text(field: &str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        Err(ServiceError::invalid(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}
