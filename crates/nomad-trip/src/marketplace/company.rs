use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info};

use super::access::{is_admin, is_company_owner, require_admin, require_passenger, Actor};
use super::domain::{
    Company, CompanyId, Moderation, ModerationStatus, NewCompany, Page, PageRequest, Role, UserId,
};
use super::error::ServiceError;
use super::moderation::{moderate, StatusChange};
use super::{assign_role, checked_page, require_text};
use crate::clock::Clock;
use crate::repository::{CompanyFilter, RepositoryError, Store};
use crate::storage::{AssetGateway, ImageUpload, ObjectStorage, LOGO_FOLDER};

/// Fields supplied when a passenger registers a company.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompanyData {
    pub name: String,
    pub bin: String,
    pub description: String,
    pub address: String,
}

impl CompanyData {
    fn validate(&self) -> Result<(), ServiceError> {
        require_text("name", &self.name)?;
        require_text("bin", &self.bin)?;
        require_text("description", &self.description)?;
        require_text("address", &self.address)
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CompanyChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
}

impl CompanyChanges {
    fn validate(&self) -> Result<(), ServiceError> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if let Some(description) = &self.description {
            require_text("description", description)?;
        }
        if let Some(address) = &self.address {
            require_text("address", address)?;
        }
        Ok(())
    }

    fn apply(self, company: &mut Company) {
        if let Some(name) = self.name {
            company.name = name;
        }
        if let Some(description) = self.description {
            company.description = description;
        }
        if let Some(address) = self.address {
            company.address = address;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanySearch {
    pub text: Option<String>,
    pub status: Option<ModerationStatus>,
    pub page: PageRequest,
}

/// Company onboarding, owner self-service, and admin moderation.
pub struct CompanyService<S, O> {
    store: Arc<S>,
    assets: AssetGateway<O>,
    clock: Arc<dyn Clock>,
}

impl<S, O> CompanyService<S, O>
where
    S: Store,
    O: ObjectStorage + 'static,
{
    pub fn new(store: Arc<S>, assets: AssetGateway<O>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            assets,
            clock,
        }
    }

    /// Register a company for a passenger. The logo is uploaded first; if the
    /// insert then fails the upload is removed again.
    pub async fn create(
        &self,
        actor: &Actor,
        data: CompanyData,
        logo: ImageUpload,
    ) -> Result<CompanyId, ServiceError> {
        let owned = self
            .store
            .read(|tx| tx.company_by_owner(actor.user_id))?;
        if owned.is_some() {
            return Err(already_owns_company());
        }
        require_passenger(actor)?;
        data.validate()?;
        self.assets.check(&logo)?;

        let logo_url = self.upload_logo(logo).await?;
        let now = self.clock.now();
        let created = self.store.write(|tx| {
            if tx.company_by_owner(actor.user_id)?.is_some() {
                return Err(already_owns_company());
            }
            let user = tx
                .user(actor.user_id)?
                .ok_or_else(|| ServiceError::not_found("User not found"))?;
            if user.role != Role::Passenger {
                return Err(ServiceError::forbidden(
                    "Only passengers can create a company or driver profile",
                ));
            }
            let company = tx
                .insert_company(NewCompany {
                    owner_id: actor.user_id,
                    name: data.name,
                    bin: data.bin,
                    description: data.description,
                    address: data.address,
                    logo_url: logo_url.clone(),
                    created_at: now,
                })
                .map_err(|err| match err {
                    RepositoryError::Conflict => already_owns_company(),
                    other => other.into(),
                })?;
            assign_role(tx, actor.user_id, Role::Company, now)?;
            Ok::<_, ServiceError>(company)
        });

        match created {
            Ok(company) => {
                info!(company_id = %company.id, owner_id = %actor.user_id, "company created");
                Ok(company.id)
            }
            Err(err) => {
                self.assets.discard(&[logo_url]).await;
                Err(err)
            }
        }
    }

    pub fn get_own(&self, user_id: UserId) -> Result<Company, ServiceError> {
        self.store
            .read(|tx| tx.company_by_owner(user_id))?
            .ok_or_else(company_not_found)
    }

    /// Approved companies are public; anything else only to admins and the owner.
    pub fn get_by_id(&self, actor: &Actor, company_id: CompanyId) -> Result<Company, ServiceError> {
        let company = self
            .store
            .read(|tx| tx.company(company_id))?
            .ok_or_else(company_not_found)?;
        if company.moderation.is_approved() || is_admin(actor) || is_company_owner(actor, &company) {
            Ok(company)
        } else {
            Err(ServiceError::forbidden("Company is not approved"))
        }
    }

    /// Non-admins only ever see approved companies, whatever status they ask for.
    pub fn search(&self, actor: &Actor, search: CompanySearch) -> Result<Page<Company>, ServiceError> {
        let page = checked_page(search.page)?;
        let status = if is_admin(actor) {
            search.status
        } else {
            Some(ModerationStatus::Approved)
        };
        let filter = CompanyFilter {
            text: search.text,
            status,
        };
        Ok(self.store.read(|tx| tx.search_companies(&filter, page))?)
    }

    /// Owner edit. Any change sends the company back to review.
    pub async fn update(
        &self,
        actor: &Actor,
        changes: CompanyChanges,
        logo: Option<ImageUpload>,
    ) -> Result<Company, ServiceError> {
        let current = self.get_own(actor.user_id)?;
        changes.validate()?;
        if let Some(logo) = &logo {
            self.assets.check(logo)?;
        }

        let new_logo = match logo {
            Some(logo) => Some(self.upload_logo(logo).await?),
            None => None,
        };

        let now = self.clock.now();
        let updated = self.store.write(|tx| {
            let mut company = tx
                .company_by_owner(actor.user_id)?
                .ok_or_else(company_not_found)?;
            changes.apply(&mut company);
            if let Some(url) = &new_logo {
                company.logo_url = url.clone();
            }
            company.moderation = Moderation::Waiting;
            company.updated_at = now;
            tx.save_company(&company)?;
            Ok::<_, ServiceError>(company)
        });

        match updated {
            Ok(company) => {
                if new_logo.is_some() && current.logo_url != company.logo_url {
                    self.assets.discard(&[current.logo_url]).await;
                }
                info!(company_id = %company.id, "company updated, back to review");
                Ok(company)
            }
            Err(err) => {
                if let Some(url) = new_logo {
                    self.assets.discard(&[url]).await;
                }
                Err(err)
            }
        }
    }

    /// Remove the owner's company with its affiliations and make them a passenger again.
    pub async fn delete(&self, actor: &Actor) -> Result<(), ServiceError> {
        let company = self.get_own(actor.user_id)?;
        self.assets.discard(&[company.logo_url.clone()]).await;

        let now = self.clock.now();
        self.store.write(|tx| {
            tx.delete_company(company.id)?;
            assign_role(tx, actor.user_id, Role::Passenger, now)
        })?;
        info!(company_id = %company.id, owner_id = %actor.user_id, "company deleted");
        Ok(())
    }

    pub fn update_status(
        &self,
        actor: &Actor,
        company_id: CompanyId,
        change: StatusChange,
    ) -> Result<Company, ServiceError> {
        require_admin(actor)?;
        let now = self.clock.now();
        let company = self.store.write(|tx| {
            let mut company = tx.company(company_id)?.ok_or_else(company_not_found)?;
            moderate(&mut company, change, now)?;
            tx.save_company(&company)?;
            Ok::<_, ServiceError>(company)
        })?;
        info!(
            company_id = %company.id,
            status = %company.moderation.status(),
            "company moderated"
        );
        Ok(company)
    }

    async fn upload_logo(&self, logo: ImageUpload) -> Result<String, ServiceError> {
        self.assets.upload(logo, LOGO_FOLDER).await.map_err(|err| {
            error!(error = %err, "logo upload failed");
            ServiceError::from(err)
        })
    }
}

fn company_not_found() -> ServiceError {
    ServiceError::not_found("Company not found")
}

fn already_owns_company() -> ServiceError {
    ServiceError::conflict("Company already exists")
}
