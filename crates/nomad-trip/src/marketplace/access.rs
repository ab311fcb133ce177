//! Who may touch what. These checks are independent of moderation state; a
//! moderation action has to pass both.

use super::domain::{Company, Driver, Role, UserId};
use super::error::ServiceError;

/// Authenticated caller, with the role as currently stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}

pub fn is_admin(actor: &Actor) -> bool {
    actor.role == Role::Admin
}

pub fn is_passenger(actor: &Actor) -> bool {
    actor.role == Role::Passenger
}

pub fn is_driver(actor: &Actor) -> bool {
    actor.role == Role::Driver
}

pub fn is_company_owner(actor: &Actor, company: &Company) -> bool {
    company.owner_id == actor.user_id
}

pub fn is_driver_owner(actor: &Actor, driver: &Driver) -> bool {
    driver.user_id == actor.user_id
}

pub fn require_admin(actor: &Actor) -> Result<(), ServiceError> {
    if is_admin(actor) {
        Ok(())
    } else {
        Err(ServiceError::forbidden("Admin access required"))
    }
}

pub fn require_passenger(actor: &Actor) -> Result<(), ServiceError> {
    if is_passenger(actor) {
        Ok(())
    } else {
        Err(ServiceError::forbidden(
            "Only passengers can create a company or driver profile",
        ))
    }
}
