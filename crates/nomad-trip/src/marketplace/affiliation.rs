//! Driver applications to companies.
//!
//! A driver has at most one row per company. After any status change the row
//! is frozen for [`COOLDOWN_DAYS`]; applying again after that resets it to
//! `waiting` in place, whatever the previous decision was.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::access::{is_admin, is_company_owner, is_driver, is_driver_owner, Actor};
use super::domain::{
    Affiliation, CompanyId, DriverId, Moderation, ModerationStatus, Page, PageRequest,
};
use super::error::ServiceError;
use super::moderation::{moderate, StatusChange};
use super::checked_page;
use crate::clock::Clock;
use crate::repository::{AffiliationFilter, AffiliationScope, RepositoryError, Store};

pub const COOLDOWN_DAYS: i64 = 30;

/// Earliest moment a driver may apply to the same company again.
pub fn cooldown_ends(affiliation: &Affiliation) -> DateTime<Utc> {
    affiliation.updated_at + Duration::days(COOLDOWN_DAYS)
}

/// Renders a remaining wait as `N days, H hours, M minutes`.
pub fn format_remaining(remaining: Duration) -> String {
    let total_minutes = remaining.num_minutes().max(0);
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;
    format!("{days} days, {hours} hours, {minutes} minutes")
}

fn driver_profile_not_found() -> ServiceError {
    ServiceError::not_found("Driver profile not found")
}

pub struct AffiliationService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> AffiliationService<S>
where
    S: Store,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Apply the caller's driver profile to `company_id`.
    pub fn apply(&self, actor: &Actor, company_id: CompanyId) -> Result<Affiliation, ServiceError> {
        let driver_id = self.own_driver_id(actor)?;
        let now = self.clock.now();

        let outcome = match self.try_apply(driver_id, company_id, now) {
            Err(ServiceError::Repository(RepositoryError::Conflict)) => {
                debug!(%driver_id, %company_id, "application insert raced, retrying as update");
                self.try_apply(driver_id, company_id, now)
            }
            other => other,
        }?;

        info!(
            %driver_id,
            %company_id,
            "driver applied to company"
        );
        Ok(outcome)
    }

    fn try_apply(
        &self,
        driver_id: DriverId,
        company_id: CompanyId,
        now: DateTime<Utc>,
    ) -> Result<Affiliation, ServiceError> {
        self.store.write(|tx| {
            if tx.company(company_id)?.is_none() {
                return Err(ServiceError::not_found("Company not found"));
            }

            match tx.affiliation(driver_id, company_id)? {
                None => {
                    let affiliation = Affiliation {
                        driver_id,
                        company_id,
                        moderation: Moderation::Waiting,
                        created_at: now,
                        updated_at: now,
                    };
                    tx.insert_affiliation(affiliation.clone())?;
                    Ok(affiliation)
                }
                Some(mut existing) => {
                    let ends = cooldown_ends(&existing);
                    if now < ends {
                        return Err(ServiceError::conflict(format!(
                            "You already applied to this company, try again in {}",
                            format_remaining(ends - now)
                        )));
                    }
                    existing.moderation = Moderation::Waiting;
                    existing.updated_at = now;
                    tx.save_affiliation(&existing)?;
                    Ok(existing)
                }
            }
        })
    }

    pub fn list_for_driver(
        &self,
        actor: &Actor,
        driver_id: DriverId,
        status: Option<ModerationStatus>,
        page: PageRequest,
    ) -> Result<Page<Affiliation>, ServiceError> {
        let page = checked_page(page)?;
        self.store.read(|tx| {
            let driver = tx.driver(driver_id)?.ok_or_else(driver_profile_not_found)?;
            if !(is_admin(actor) || is_driver_owner(actor, &driver)) {
                return Err(ServiceError::forbidden(
                    "Only the driver or an admin can list these applications",
                ));
            }
            let filter = AffiliationFilter {
                scope: AffiliationScope::Driver(driver_id),
                status,
            };
            Ok(tx.list_affiliations(&filter, page)?)
        })
    }

    pub fn list_for_company(
        &self,
        actor: &Actor,
        company_id: CompanyId,
        status: Option<ModerationStatus>,
        page: PageRequest,
    ) -> Result<Page<Affiliation>, ServiceError> {
        let page = checked_page(page)?;
        self.store.read(|tx| {
            let company = tx
                .company(company_id)?
                .ok_or_else(|| ServiceError::not_found("Company not found"))?;
            if !(is_admin(actor) || is_company_owner(actor, &company)) {
                return Err(ServiceError::forbidden(
                    "Only the company owner or an admin can list these applications",
                ));
            }
            let filter = AffiliationFilter {
                scope: AffiliationScope::Company(company_id),
                status,
            };
            Ok(tx.list_affiliations(&filter, page)?)
        })
    }

    /// Decide an application as the company owner or an admin. The change
    /// stamps `updated_at`, which restarts the cooldown.
    pub fn update_status(
        &self,
        actor: &Actor,
        driver_id: DriverId,
        company_id: CompanyId,
        change: StatusChange,
    ) -> Result<Affiliation, ServiceError> {
        let now = self.clock.now();
        let affiliation = self.store.write(|tx| {
            let company = tx
                .company(company_id)?
                .ok_or_else(|| ServiceError::not_found("Company not found"))?;
            if !(is_admin(actor) || is_company_owner(actor, &company)) {
                return Err(ServiceError::forbidden(
                    "Only the company owner or an admin can moderate applications",
                ));
            }
            let mut affiliation = tx
                .affiliation(driver_id, company_id)?
                .ok_or_else(application_not_found)?;
            moderate(&mut affiliation, change, now)?;
            tx.save_affiliation(&affiliation)?;
            Ok(affiliation)
        })?;

        info!(
            %driver_id,
            %company_id,
            status = %affiliation.moderation.status(),
            "application moderated"
        );
        Ok(affiliation)
    }

    pub fn get_one(
        &self,
        actor: &Actor,
        driver_id: DriverId,
        company_id: CompanyId,
    ) -> Result<Affiliation, ServiceError> {
        self.store.read(|tx| {
            let affiliation = tx
                .affiliation(driver_id, company_id)?
                .ok_or_else(application_not_found)?;
            if is_admin(actor) {
                return Ok(affiliation);
            }
            let owns_driver = tx
                .driver(driver_id)?
                .is_some_and(|driver| is_driver_owner(actor, &driver));
            let owns_company = tx
                .company(company_id)?
                .is_some_and(|company| is_company_owner(actor, &company));
            if owns_driver || owns_company {
                Ok(affiliation)
            } else {
                Err(ServiceError::forbidden("Application belongs to someone else"))
            }
        })
    }

    /// Driver profile id of the caller.
    pub fn own_driver_id(&self, actor: &Actor) -> Result<DriverId, ServiceError> {
        if !is_driver(actor) {
            return Err(driver_profile_not_found());
        }
        self.store
            .read(|tx| tx.driver_by_user(actor.user_id))?
            .map(|driver| driver.id)
            .ok_or_else(driver_profile_not_found)
    }

    /// Company id owned by the caller.
    pub fn own_company_id(&self, actor: &Actor) -> Result<CompanyId, ServiceError> {
        self.store
            .read(|tx| tx.company_by_owner(actor.user_id))?
            .map(|company| company.id)
            .ok_or_else(|| ServiceError::not_found("Company not found"))
    }
}

fn application_not_found() -> ServiceError {
    ServiceError::not_found("Application not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_time_is_split_into_days_hours_minutes() {
        assert_eq!(format_remaining(Duration::days(20)), "20 days, 0 hours, 0 minutes");
        assert_eq!(
            format_remaining(Duration::days(2) + Duration::hours(5) + Duration::minutes(7)),
            "2 days, 5 hours, 7 minutes"
        );
        assert_eq!(format_remaining(Duration::seconds(59)), "0 days, 0 hours, 0 minutes");
    }
}
