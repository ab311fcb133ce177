//! In-process implementations of the store and object storage collaborators.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::marketplace::domain::{
    Affiliation, Company, CompanyId, Driver, DriverId, Moderation, ModerationStatus, NewCompany,
    NewDriver, NewUser, Page, PageRequest, User, UserId,
};
use crate::repository::{
    AffiliationFilter, CompanyFilter, RepositoryError, Store, StoreTx,
};
use crate::storage::{ImageUpload, ObjectStorage, StorageError};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    companies: BTreeMap<CompanyId, Company>,
    drivers: BTreeMap<DriverId, Driver>,
    affiliations: BTreeMap<(DriverId, CompanyId), Affiliation>,
    next_user: u64,
    next_company: u64,
    next_driver: u64,
}

impl Tables {
    fn allocate(counter: &mut u64) -> u64 {
        *counter += 1;
        *counter
    }

    fn drop_affiliations(&mut self, keep: impl Fn(&Affiliation) -> bool) {
        self.affiliations.retain(|_, affiliation| keep(affiliation));
    }
}

impl StoreTx for Tables {
    fn user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.get(&id).cloned())
    }

    fn user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn insert_user(&mut self, user: NewUser) -> Result<User, RepositoryError> {
        if self.user_by_email(&user.email)?.is_some() {
            return Err(RepositoryError::Conflict);
        }
        let id = UserId(Self::allocate(&mut self.next_user));
        let record = User {
            id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            password_hash: user.password_hash,
            role: user.role,
            avatar_url: None,
            created_at: user.created_at,
            updated_at: user.created_at,
        };
        self.users.insert(id, record.clone());
        Ok(record)
    }

    fn save_user(&mut self, user: &User) -> Result<(), RepositoryError> {
        match self.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn delete_user(&mut self, id: UserId) -> Result<User, RepositoryError> {
        let user = self.users.remove(&id).ok_or(RepositoryError::NotFound)?;
        if let Some(company) = self.company_by_owner(id)? {
            self.delete_company(company.id)?;
        }
        if let Some(driver) = self.driver_by_user(id)? {
            self.delete_driver(driver.id)?;
        }
        Ok(user)
    }

    fn company(&self, id: CompanyId) -> Result<Option<Company>, RepositoryError> {
        Ok(self.companies.get(&id).cloned())
    }

    fn company_by_owner(&self, owner_id: UserId) -> Result<Option<Company>, RepositoryError> {
        Ok(self
            .companies
            .values()
            .find(|company| company.owner_id == owner_id)
            .cloned())
    }

    fn search_companies(
        &self,
        filter: &CompanyFilter,
        page: PageRequest,
    ) -> Result<Page<Company>, RepositoryError> {
        let matches = self
            .companies
            .values()
            .filter(|company| filter.matches(company))
            .cloned()
            .collect();
        Ok(page.slice(matches))
    }

    fn insert_company(&mut self, company: NewCompany) -> Result<Company, RepositoryError> {
        if self.company_by_owner(company.owner_id)?.is_some() {
            return Err(RepositoryError::Conflict);
        }
        let id = CompanyId(Self::allocate(&mut self.next_company));
        let record = Company {
            id,
            owner_id: company.owner_id,
            name: company.name,
            bin: company.bin,
            description: company.description,
            address: company.address,
            logo_url: company.logo_url,
            moderation: Moderation::Waiting,
            created_at: company.created_at,
            updated_at: company.created_at,
        };
        self.companies.insert(id, record.clone());
        Ok(record)
    }

    fn save_company(&mut self, company: &Company) -> Result<(), RepositoryError> {
        match self.companies.get_mut(&company.id) {
            Some(existing) => {
                *existing = company.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn delete_company(&mut self, id: CompanyId) -> Result<Company, RepositoryError> {
        let company = self.companies.remove(&id).ok_or(RepositoryError::NotFound)?;
        self.drop_affiliations(|affiliation| affiliation.company_id != id);
        Ok(company)
    }

    fn driver(&self, id: DriverId) -> Result<Option<Driver>, RepositoryError> {
        Ok(self.drivers.get(&id).cloned())
    }

    fn driver_by_user(&self, user_id: UserId) -> Result<Option<Driver>, RepositoryError> {
        Ok(self
            .drivers
            .values()
            .find(|driver| driver.user_id == user_id)
            .cloned())
    }

    fn driver_by_license(&self, license_number: &str) -> Result<Option<Driver>, RepositoryError> {
        Ok(self
            .drivers
            .values()
            .find(|driver| driver.license_number == license_number)
            .cloned())
    }

    fn list_drivers(
        &self,
        status: Option<ModerationStatus>,
        page: PageRequest,
    ) -> Result<Page<Driver>, RepositoryError> {
        let matches = self
            .drivers
            .values()
            .filter(|driver| status.map_or(true, |status| driver.moderation.status() == status))
            .cloned()
            .collect();
        Ok(page.slice(matches))
    }

    fn insert_driver(&mut self, driver: NewDriver) -> Result<Driver, RepositoryError> {
        if self.driver_by_user(driver.user_id)?.is_some()
            || self.driver_by_license(&driver.license_number)?.is_some()
        {
            return Err(RepositoryError::Conflict);
        }
        let id = DriverId(Self::allocate(&mut self.next_driver));
        let record = Driver {
            id,
            user_id: driver.user_id,
            phone_number: driver.phone_number,
            license_number: driver.license_number,
            license_photo_url: driver.license_photo_url,
            id_photo_url: driver.id_photo_url,
            license_issued_at: driver.license_issued_at,
            license_expires_at: driver.license_expires_at,
            moderation: Moderation::Waiting,
            created_at: driver.created_at,
            updated_at: driver.created_at,
        };
        self.drivers.insert(id, record.clone());
        Ok(record)
    }

    fn save_driver(&mut self, driver: &Driver) -> Result<(), RepositoryError> {
        let taken = self
            .drivers
            .values()
            .any(|other| other.id != driver.id && other.license_number == driver.license_number);
        if taken {
            return Err(RepositoryError::Conflict);
        }
        match self.drivers.get_mut(&driver.id) {
            Some(existing) => {
                *existing = driver.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn delete_driver(&mut self, id: DriverId) -> Result<Driver, RepositoryError> {
        let driver = self.drivers.remove(&id).ok_or(RepositoryError::NotFound)?;
        self.drop_affiliations(|affiliation| affiliation.driver_id != id);
        Ok(driver)
    }

    fn affiliation(
        &self,
        driver_id: DriverId,
        company_id: CompanyId,
    ) -> Result<Option<Affiliation>, RepositoryError> {
        Ok(self.affiliations.get(&(driver_id, company_id)).cloned())
    }

    fn insert_affiliation(&mut self, affiliation: Affiliation) -> Result<(), RepositoryError> {
        if !self.drivers.contains_key(&affiliation.driver_id)
            || !self.companies.contains_key(&affiliation.company_id)
        {
            return Err(RepositoryError::NotFound);
        }
        if self.affiliations.contains_key(&affiliation.key()) {
            return Err(RepositoryError::Conflict);
        }
        self.affiliations.insert(affiliation.key(), affiliation);
        Ok(())
    }

    fn save_affiliation(&mut self, affiliation: &Affiliation) -> Result<(), RepositoryError> {
        match self.affiliations.get_mut(&affiliation.key()) {
            Some(existing) => {
                *existing = affiliation.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn list_affiliations(
        &self,
        filter: &AffiliationFilter,
        page: PageRequest,
    ) -> Result<Page<Affiliation>, RepositoryError> {
        let matches = self
            .affiliations
            .values()
            .filter(|affiliation| filter.matches(affiliation))
            .cloned()
            .collect();
        Ok(page.slice(matches))
    }
}

/// Store backed by a single mutex. Writes run against a draft copy of the
/// tables that replaces the committed copy only when the closure succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn StoreTx) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let guard = self.lock()?;
        f(&*guard)
    }

    fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut guard = self.lock()?;
        let mut draft = guard.clone();
        let value = f(&mut draft)?;
        *guard = draft;
        Ok(value)
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    content_type: String,
    size: usize,
}

/// Bucket kept in memory. URLs take the form `/{bucket}/{folder}/{uuid}-{name}`.
#[derive(Debug)]
pub struct MemoryObjectStorage {
    bucket: String,
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl Default for MemoryObjectStorage {
    fn default() -> Self {
        Self::new("nomad-trip")
    }
}

impl MemoryObjectStorage {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(url))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_type(&self, url: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(url).map(|object| object.content_type.clone()))
    }

    fn object_name(file_name: &str) -> String {
        let cleaned: String = file_name
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        let cleaned = cleaned.trim_matches('.');
        if cleaned.is_empty() {
            "upload".to_string()
        } else {
            cleaned.to_string()
        }
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(&self, file: ImageUpload, folder: &str) -> Result<String, StorageError> {
        let url = format!(
            "/{}/{}/{}-{}",
            self.bucket,
            folder.trim_matches('/'),
            Uuid::new_v4(),
            Self::object_name(&file.file_name)
        );
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Upload("bucket mutex poisoned".to_string()))?;
        objects.insert(
            url.clone(),
            StoredObject {
                content_type: file.content_type,
                size: file.bytes.len(),
            },
        );
        tracing::debug!(%url, size = file.bytes.len(), "object stored");
        Ok(url)
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Delete("bucket mutex poisoned".to_string()))?;
        if let Some(object) = objects.remove(url) {
            tracing::debug!(%url, size = object.size, "object deleted");
        }
        Ok(())
    }
}
