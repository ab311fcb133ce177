//! Persistence seam. Services never hold rows across calls: every operation
//! runs one closure inside [`Store::read`] or [`Store::write`], and a write
//! either commits all of its mutations or none of them.

use crate::marketplace::domain::{
    Affiliation, Company, CompanyId, Driver, DriverId, ModerationStatus, NewCompany, NewDriver,
    NewUser, Page, PageRequest, User, UserId,
};

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Company search criteria. `text` is matched case-insensitively against the
/// name and description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyFilter {
    pub text: Option<String>,
    pub status: Option<ModerationStatus>,
}

impl CompanyFilter {
    pub fn matches(&self, company: &Company) -> bool {
        if let Some(status) = self.status {
            if company.moderation.status() != status {
                return false;
            }
        }

        match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let needle = text.to_lowercase();
                company.name.to_lowercase().contains(&needle)
                    || company.description.to_lowercase().contains(&needle)
            }
            _ => true,
        }
    }
}

/// Which side of the driver/company relation a listing is anchored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffiliationScope {
    Driver(DriverId),
    Company(CompanyId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffiliationFilter {
    pub scope: AffiliationScope,
    pub status: Option<ModerationStatus>,
}

impl AffiliationFilter {
    pub fn matches(&self, affiliation: &Affiliation) -> bool {
        let in_scope = match self.scope {
            AffiliationScope::Driver(driver_id) => affiliation.driver_id == driver_id,
            AffiliationScope::Company(company_id) => affiliation.company_id == company_id,
        };
        in_scope
            && self
                .status
                .map_or(true, |status| affiliation.moderation.status() == status)
    }
}

/// Row-level operations available inside a transaction.
pub trait StoreTx {
    fn user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    fn user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    /// Fails with `Conflict` when the email is taken.
    fn insert_user(&mut self, user: NewUser) -> Result<User, RepositoryError>;
    fn save_user(&mut self, user: &User) -> Result<(), RepositoryError>;
    /// Removes the user together with their company, driver profile and every
    /// affiliation that referenced either.
    fn delete_user(&mut self, id: UserId) -> Result<User, RepositoryError>;

    fn company(&self, id: CompanyId) -> Result<Option<Company>, RepositoryError>;
    fn company_by_owner(&self, owner_id: UserId) -> Result<Option<Company>, RepositoryError>;
    fn search_companies(
        &self,
        filter: &CompanyFilter,
        page: PageRequest,
    ) -> Result<Page<Company>, RepositoryError>;
    /// Fails with `Conflict` when the owner already has a company.
    fn insert_company(&mut self, company: NewCompany) -> Result<Company, RepositoryError>;
    fn save_company(&mut self, company: &Company) -> Result<(), RepositoryError>;
    fn delete_company(&mut self, id: CompanyId) -> Result<Company, RepositoryError>;

    fn driver(&self, id: DriverId) -> Result<Option<Driver>, RepositoryError>;
    fn driver_by_user(&self, user_id: UserId) -> Result<Option<Driver>, RepositoryError>;
    fn driver_by_license(&self, license_number: &str) -> Result<Option<Driver>, RepositoryError>;
    fn list_drivers(
        &self,
        status: Option<ModerationStatus>,
        page: PageRequest,
    ) -> Result<Page<Driver>, RepositoryError>;
    /// Fails with `Conflict` when the user already has a profile or the
    /// license number is taken.
    fn insert_driver(&mut self, driver: NewDriver) -> Result<Driver, RepositoryError>;
    fn save_driver(&mut self, driver: &Driver) -> Result<(), RepositoryError>;
    fn delete_driver(&mut self, id: DriverId) -> Result<Driver, RepositoryError>;

    fn affiliation(
        &self,
        driver_id: DriverId,
        company_id: CompanyId,
    ) -> Result<Option<Affiliation>, RepositoryError>;
    /// The composite key is the duplicate guard: a second insert for the same
    /// pair fails with `Conflict`.
    fn insert_affiliation(&mut self, affiliation: Affiliation) -> Result<(), RepositoryError>;
    fn save_affiliation(&mut self, affiliation: &Affiliation) -> Result<(), RepositoryError>;
    fn list_affiliations(
        &self,
        filter: &AffiliationFilter,
        page: PageRequest,
    ) -> Result<Page<Affiliation>, RepositoryError>;
}

/// Transaction boundary over the marketplace tables.
pub trait Store: Send + Sync + 'static {
    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn StoreTx) -> Result<T, E>,
        E: From<RepositoryError>;

    /// Runs `f` atomically: when it returns `Err` nothing it did is kept.
    fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<RepositoryError>;
}
