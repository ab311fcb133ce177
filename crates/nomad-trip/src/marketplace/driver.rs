use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::access::{is_admin, is_driver_owner, require_admin, require_passenger, Actor};
use super::domain::{
    Driver, DriverId, Moderation, ModerationStatus, NewDriver, Page, PageRequest, Role, UserId,
};
use super::error::ServiceError;
use super::moderation::{moderate, StatusChange};
use super::{assign_role, checked_page, require_text};
use crate::clock::Clock;
use crate::repository::{RepositoryError, Store, StoreTx};
use crate::storage::{
    AssetGateway, ImageUpload, ObjectStorage, ID_PHOTO_FOLDER, LICENSE_PHOTO_FOLDER,
};

lazy_static! {
    // Optional leading plus, no leading zero, 10 to 15 digits.
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[1-9][0-9]{9,14}$").unwrap();
}

pub fn is_valid_phone(phone_number: &str) -> bool {
    PHONE_REGEX.is_match(phone_number)
}

fn check_license_dates(issued: NaiveDate, expires: NaiveDate) -> Result<(), ServiceError> {
    if issued < expires {
        Ok(())
    } else {
        Err(ServiceError::invalid(
            "license_issued_at must be earlier than license_expires_at",
        ))
    }
}

fn check_phone(phone_number: &str) -> Result<(), ServiceError> {
    if is_valid_phone(phone_number) {
        Ok(())
    } else {
        Err(ServiceError::invalid("phone_number has an invalid format"))
    }
}

/// Fields supplied when a passenger registers as a driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriverData {
    pub phone_number: String,
    pub license_number: String,
    pub license_issued_at: NaiveDate,
    pub license_expires_at: NaiveDate,
}

impl DriverData {
    fn validate(&self) -> Result<(), ServiceError> {
        check_phone(&self.phone_number)?;
        require_text("license_number", &self.license_number)?;
        check_license_dates(self.license_issued_at, self.license_expires_at)
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DriverChanges {
    pub phone_number: Option<String>,
    pub license_number: Option<String>,
    pub license_issued_at: Option<NaiveDate>,
    pub license_expires_at: Option<NaiveDate>,
}

impl DriverChanges {
    /// Dates are checked against the stored values when only one side changes.
    fn validate(&self, current: &Driver) -> Result<(), ServiceError> {
        if let Some(phone_number) = &self.phone_number {
            check_phone(phone_number)?;
        }
        if let Some(license_number) = &self.license_number {
            require_text("license_number", license_number)?;
        }
        check_license_dates(
            self.license_issued_at.unwrap_or(current.license_issued_at),
            self.license_expires_at.unwrap_or(current.license_expires_at),
        )
    }

    fn apply(self, driver: &mut Driver) {
        if let Some(phone_number) = self.phone_number {
            driver.phone_number = phone_number;
        }
        if let Some(license_number) = self.license_number {
            driver.license_number = license_number;
        }
        if let Some(issued) = self.license_issued_at {
            driver.license_issued_at = issued;
        }
        if let Some(expires) = self.license_expires_at {
            driver.license_expires_at = expires;
        }
    }
}

/// Driver profile as seen by someone else. Document photos are withheld
/// depending on who is looking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverView {
    pub id: DriverId,
    pub user_id: UserId,
    pub phone_number: String,
    pub license_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_photo_url: Option<String>,
    pub license_issued_at: NaiveDate,
    pub license_expires_at: NaiveDate,
    #[serde(flatten)]
    pub moderation: Moderation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DriverView {
    /// Admins and the owner see both photos, companies only the license photo,
    /// everyone else neither.
    pub fn for_actor(driver: Driver, actor: &Actor) -> Self {
        let (license_visible, id_visible) = if is_admin(actor) || is_driver_owner(actor, &driver) {
            (true, true)
        } else if actor.role == Role::Company {
            (true, false)
        } else {
            (false, false)
        };

        Self {
            id: driver.id,
            user_id: driver.user_id,
            phone_number: driver.phone_number,
            license_number: driver.license_number,
            license_photo_url: license_visible.then_some(driver.license_photo_url),
            id_photo_url: id_visible.then_some(driver.id_photo_url),
            license_issued_at: driver.license_issued_at,
            license_expires_at: driver.license_expires_at,
            moderation: driver.moderation,
            created_at: driver.created_at,
            updated_at: driver.updated_at,
        }
    }
}

/// Driver onboarding, owner self-service, and admin moderation.
pub struct DriverService<S, O> {
    store: Arc<S>,
    assets: AssetGateway<O>,
    clock: Arc<dyn Clock>,
}

impl<S, O> DriverService<S, O>
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

    /// Register a driver profile for a passenger. Both photos are validated
    /// before either is uploaded.
    pub async fn create(
        &self,
        actor: &Actor,
        data: DriverData,
        id_photo: ImageUpload,
        license_photo: ImageUpload,
    ) -> Result<DriverId, ServiceError> {
        if self.store.read(|tx| tx.driver_by_user(actor.user_id))?.is_some() {
            return Err(profile_exists());
        }
        require_passenger(actor)?;
        data.validate()?;
        self.store
            .read(|tx| ensure_license_free(tx, &data.license_number, None))?;
        self.assets.check(&id_photo)?;
        self.assets.check(&license_photo)?;

        let urls = self
            .upload(vec![
                (id_photo, ID_PHOTO_FOLDER),
                (license_photo, LICENSE_PHOTO_FOLDER),
            ])
            .await?;
        let (id_photo_url, license_photo_url) = (urls[0].clone(), urls[1].clone());

        let now = self.clock.now();
        let created = self.store.write(|tx| {
            if tx.driver_by_user(actor.user_id)?.is_some() {
                return Err(profile_exists());
            }
            let user = tx
                .user(actor.user_id)?
                .ok_or_else(|| ServiceError::not_found("User not found"))?;
            if user.role != Role::Passenger {
                return Err(ServiceError::forbidden(
                    "Only passengers can create a company or driver profile",
                ));
            }
            let driver = tx
                .insert_driver(NewDriver {
                    user_id: actor.user_id,
                    phone_number: data.phone_number,
                    license_number: data.license_number,
                    license_photo_url,
                    id_photo_url,
                    license_issued_at: data.license_issued_at,
                    license_expires_at: data.license_expires_at,
                    created_at: now,
                })
                .map_err(license_conflict)?;
            assign_role(tx, actor.user_id, Role::Driver, now)?;
            Ok::<_, ServiceError>(driver)
        });

        match created {
            Ok(driver) => {
                info!(driver_id = %driver.id, user_id = %actor.user_id, "driver profile created");
                Ok(driver.id)
            }
            Err(err) => {
                self.assets.discard(&urls).await;
                Err(err)
            }
        }
    }

    pub fn get_own(&self, user_id: UserId) -> Result<Driver, ServiceError> {
        self.store
            .read(|tx| tx.driver_by_user(user_id))?
            .ok_or_else(driver_not_found)
    }

    /// A profile that is not approved is only shown to admins, its owner, and
    /// companies the driver has applied to.
    pub fn get_by_id(&self, actor: &Actor, driver_id: DriverId) -> Result<DriverView, ServiceError> {
        let driver = self.store.read(|tx| {
            let driver = tx.driver(driver_id)?.ok_or_else(driver_not_found)?;
            if driver.moderation.is_approved()
                || is_admin(actor)
                || is_driver_owner(actor, &driver)
                || applied_to_actor_company(tx, actor, driver.id)?
            {
                Ok(driver)
            } else {
                Err(ServiceError::forbidden("Driver profile is not approved"))
            }
        })?;
        Ok(DriverView::for_actor(driver, actor))
    }

    /// Owner edit. Replaced photos are removed once the new ones are saved;
    /// any change sends the profile back to review.
    pub async fn update(
        &self,
        actor: &Actor,
        changes: DriverChanges,
        id_photo: Option<ImageUpload>,
        license_photo: Option<ImageUpload>,
    ) -> Result<Driver, ServiceError> {
        let current = self.get_own(actor.user_id)?;
        changes.validate(&current)?;
        if let Some(license_number) = &changes.license_number {
            self.store
                .read(|tx| ensure_license_free(tx, license_number, Some(current.id)))?;
        }
        for photo in [&id_photo, &license_photo].into_iter().flatten() {
            self.assets.check(photo)?;
        }

        let replace_id = id_photo.is_some();
        let replace_license = license_photo.is_some();
        let mut files = Vec::new();
        if let Some(photo) = id_photo {
            files.push((photo, ID_PHOTO_FOLDER));
        }
        if let Some(photo) = license_photo {
            files.push((photo, LICENSE_PHOTO_FOLDER));
        }
        let mut uploaded = self.upload(files).await?.into_iter();
        let new_id_url = if replace_id { uploaded.next() } else { None };
        let new_license_url = if replace_license { uploaded.next() } else { None };
        let fresh: Vec<String> = new_id_url.iter().chain(&new_license_url).cloned().collect();

        let now = self.clock.now();
        let updated = self.store.write(|tx| {
            let mut driver = tx
                .driver_by_user(actor.user_id)?
                .ok_or_else(driver_not_found)?;
            changes.apply(&mut driver);
            if let Some(url) = &new_id_url {
                driver.id_photo_url = url.clone();
            }
            if let Some(url) = &new_license_url {
                driver.license_photo_url = url.clone();
            }
            driver.moderation = Moderation::Waiting;
            driver.updated_at = now;
            tx.save_driver(&driver).map_err(license_conflict)?;
            Ok::<_, ServiceError>(driver)
        });

        match updated {
            Ok(driver) => {
                let mut replaced = Vec::new();
                if new_id_url.is_some() {
                    replaced.push(current.id_photo_url);
                }
                if new_license_url.is_some() {
                    replaced.push(current.license_photo_url);
                }
                self.assets.discard(&replaced).await;
                info!(driver_id = %driver.id, "driver profile updated, back to review");
                Ok(driver)
            }
            Err(err) => {
                self.assets.discard(&fresh).await;
                Err(err)
            }
        }
    }

    /// Remove the caller's profile with its affiliations and make them a
    /// passenger again.
    pub async fn delete(&self, actor: &Actor) -> Result<(), ServiceError> {
        let driver = self.get_own(actor.user_id)?;
        self.assets
            .discard(&[driver.id_photo_url.clone(), driver.license_photo_url.clone()])
            .await;

        let now = self.clock.now();
        self.store.write(|tx| {
            tx.delete_driver(driver.id)?;
            assign_role(tx, actor.user_id, Role::Passenger, now)
        })?;
        info!(driver_id = %driver.id, user_id = %actor.user_id, "driver profile deleted");
        Ok(())
    }

    pub fn update_status(
        &self,
        actor: &Actor,
        driver_id: DriverId,
        change: StatusChange,
    ) -> Result<Driver, ServiceError> {
        require_admin(actor)?;
        let now = self.clock.now();
        let driver = self.store.write(|tx| {
            let mut driver = tx.driver(driver_id)?.ok_or_else(driver_not_found)?;
            moderate(&mut driver, change, now)?;
            tx.save_driver(&driver)?;
            Ok::<_, ServiceError>(driver)
        })?;
        info!(
            driver_id = %driver.id,
            status = %driver.moderation.status(),
            "driver moderated"
        );
        Ok(driver)
    }

    /// Moderation queue for admins.
    pub fn list(
        &self,
        actor: &Actor,
        status: Option<ModerationStatus>,
        page: PageRequest,
    ) -> Result<Page<Driver>, ServiceError> {
        require_admin(actor)?;
        let page = checked_page(page)?;
        Ok(self.store.read(|tx| tx.list_drivers(status, page))?)
    }

    async fn upload(
        &self,
        files: Vec<(ImageUpload, &'static str)>,
    ) -> Result<Vec<String>, ServiceError> {
        self.assets.upload_all(files).await.map_err(|err| {
            error!(error = %err, "driver document upload failed");
            ServiceError::from(err)
        })
    }
}

fn applied_to_actor_company(
    tx: &dyn StoreTx,
    actor: &Actor,
    driver_id: DriverId,
) -> Result<bool, ServiceError> {
    if actor.role != Role::Company {
        return Ok(false);
    }
    match tx.company_by_owner(actor.user_id)? {
        Some(company) => Ok(tx.affiliation(driver_id, company.id)?.is_some()),
        None => Ok(false),
    }
}

fn ensure_license_free(
    tx: &dyn StoreTx,
    license_number: &str,
    except: Option<DriverId>,
) -> Result<(), ServiceError> {
    match tx.driver_by_license(license_number)? {
        Some(existing) if Some(existing.id) != except => Err(license_taken()),
        _ => Ok(()),
    }
}

fn license_conflict(err: RepositoryError) -> ServiceError {
    match err {
        RepositoryError::Conflict => license_taken(),
        other => other.into(),
    }
}

fn driver_not_found() -> ServiceError {
    ServiceError::not_found("Driver profile not found")
}

fn profile_exists() -> ServiceError {
    ServiceError::conflict("Driver profile already exists")
}

fn license_taken() -> ServiceError {
    ServiceError::conflict("License number is already registered")
}
