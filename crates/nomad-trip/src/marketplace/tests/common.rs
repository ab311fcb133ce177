use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::{Extension, Router};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::accounts::{ActorResolver, SharedResolver};
use crate::clock::ManualClock;
use crate::config::StorageConfig;
use crate::marketplace::domain::{
    Affiliation, Company, Driver, ModerationStatus, NewCompany, NewDriver, NewUser, Page,
    PageRequest, User,
};
use crate::marketplace::{
    marketplace_router, Actor, CompanyData, CompanyId, DriverData, DriverId, MarketplaceServices,
    Role, ServiceError, StatusChange, UserId,
};
use crate::memory::{MemoryObjectStorage, MemoryStore};
use crate::repository::{AffiliationFilter, CompanyFilter, RepositoryError, Store, StoreTx};
use crate::storage::{ImageUpload, ObjectStorage, StorageError};

pub(super) const BOUNDARY: &str = "nomad-trip-test-boundary";

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub(super) fn storage_config() -> StorageConfig {
    StorageConfig {
        max_upload_bytes: 1024,
        ..StorageConfig::default()
    }
}

pub(super) struct Harness<O = MemoryObjectStorage> {
    pub store: Arc<MemoryStore>,
    pub storage: Arc<O>,
    pub clock: Arc<ManualClock>,
    pub services: MarketplaceServices<MemoryStore, O>,
}

pub(super) fn harness() -> Harness {
    harness_with(Arc::new(MemoryObjectStorage::default()))
}

pub(super) fn harness_with<O: ObjectStorage + 'static>(storage: Arc<O>) -> Harness<O> {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let services =
        MarketplaceServices::new(store.clone(), storage.clone(), &storage_config(), clock.clone());
    Harness {
        store,
        storage,
        clock,
        services,
    }
}

impl<O> Harness<O>
where
    O: ObjectStorage + 'static,
{
    pub(super) fn user(&self, email: &str, role: Role) -> Actor {
        let user = self
            .store
            .write(|tx| {
                tx.insert_user(NewUser {
                    email: email.to_string(),
                    first_name: "Aruzhan".to_string(),
                    last_name: Some("Sarsenova".to_string()),
                    password_hash: "not-a-real-hash".to_string(),
                    role,
                    created_at: start(),
                })
            })
            .map_err(ServiceError::from)
            .expect("user inserted");
        Actor::new(user.id, user.role)
    }

    pub(super) fn admin(&self) -> Actor {
        self.user("admin@nomad-trip.kz", Role::Admin)
    }

    /// Role as stored, which is what the resolver would hand to the next request.
    pub(super) fn current(&self, user_id: UserId) -> Actor {
        let user = self
            .store
            .read(|tx| tx.user(user_id))
            .map_err(ServiceError::from)
            .expect("read succeeds")
            .expect("user present");
        Actor::new(user.id, user.role)
    }

    pub(super) async fn company(&self, email: &str) -> (Actor, CompanyId) {
        let passenger = self.user(email, Role::Passenger);
        let company_id = self
            .services
            .companies
            .create(&passenger, company_data("Steppe Shuttle"), png("logo.png"))
            .await
            .expect("company created");
        (self.current(passenger.user_id), company_id)
    }

    pub(super) async fn approved_company(&self, email: &str, admin: &Actor) -> (Actor, CompanyId) {
        let (owner, company_id) = self.company(email).await;
        self.services
            .companies
            .update_status(admin, company_id, StatusChange::approve())
            .expect("company approved");
        (owner, company_id)
    }

    pub(super) async fn driver(&self, email: &str, license_number: &str) -> (Actor, DriverId) {
        let passenger = self.user(email, Role::Passenger);
        let driver_id = self
            .services
            .drivers
            .create(
                &passenger,
                driver_data(license_number),
                png("id.png"),
                jpeg("license.jpg"),
            )
            .await
            .expect("driver created");
        (self.current(passenger.user_id), driver_id)
    }
}

pub(super) fn png(name: &str) -> ImageUpload {
    ImageUpload::new(name, "image/png", vec![0x89, b'P', b'N', b'G'])
}

pub(super) fn jpeg(name: &str) -> ImageUpload {
    ImageUpload::new(name, "image/jpeg", vec![0xFF, 0xD8, 0xFF])
}

pub(super) fn company_data(name: &str) -> CompanyData {
    CompanyData {
        name: name.to_string(),
        bin: "990140000123".to_string(),
        description: "Intercity transfers across the steppe".to_string(),
        address: "Almaty, Abay ave 10".to_string(),
    }
}

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn driver_data(license_number: &str) -> DriverData {
    DriverData {
        phone_number: "+77011234567".to_string(),
        license_number: license_number.to_string(),
        license_issued_at: date(2020, 5, 1),
        license_expires_at: date(2030, 5, 1),
    }
}

/// Storage whose uploads always fail.
#[derive(Debug, Default)]
pub(super) struct FailingStorage;

#[async_trait]
impl ObjectStorage for FailingStorage {
    async fn upload(&self, _file: ImageUpload, _folder: &str) -> Result<String, StorageError> {
        Err(StorageError::Upload("bucket offline".to_string()))
    }

    async fn delete(&self, _url: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Storage that accepts the first `allowed` uploads, then fails.
#[derive(Debug)]
pub(super) struct FlakyStorage {
    pub inner: MemoryObjectStorage,
    allowed: std::sync::atomic::AtomicUsize,
}

impl FlakyStorage {
    pub(super) fn new(allowed: usize) -> Self {
        Self {
            inner: MemoryObjectStorage::default(),
            allowed: std::sync::atomic::AtomicUsize::new(allowed),
        }
    }
}

#[async_trait]
impl ObjectStorage for FlakyStorage {
    async fn upload(&self, file: ImageUpload, folder: &str) -> Result<String, StorageError> {
        use std::sync::atomic::Ordering;

        let left = self.allowed.load(Ordering::SeqCst);
        if left == 0 {
            return Err(StorageError::Upload("quota exceeded".to_string()));
        }
        self.allowed.store(left - 1, Ordering::SeqCst);
        self.inner.upload(file, folder).await
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        self.inner.delete(url).await
    }
}

/// Store that is never reachable.
pub(super) struct UnavailableStore;

impl Store for UnavailableStore {
    fn read<T, E, F>(&self, _f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn StoreTx) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        Err(RepositoryError::Unavailable("database offline".to_string()).into())
    }

    fn write<T, E, F>(&self, _f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        Err(RepositoryError::Unavailable("database offline".to_string()).into())
    }
}

/// Store in which a competing request commits `rival` between this request's
/// lookup and its insert, so the first `insert_affiliation` hits the
/// composite-key guard.
pub(super) struct RacingStore {
    inner: Arc<MemoryStore>,
    rival: Mutex<Option<Affiliation>>,
}

impl RacingStore {
    pub(super) fn new(inner: Arc<MemoryStore>, rival: Affiliation) -> Self {
        Self {
            inner,
            rival: Mutex::new(Some(rival)),
        }
    }
}

impl Store for RacingStore {
    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn StoreTx) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        self.inner.read(f)
    }

    fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let Some(rival) = self.rival.lock().unwrap().take() else {
            return self.inner.write(f);
        };

        let mut raced = false;
        let outcome = self.inner.write(|tx| {
            f(&mut RacingTx {
                inner: tx,
                raced: &mut raced,
            })
        });
        if raced {
            self.inner
                .write(|tx| tx.insert_affiliation(rival))
                .map_err(E::from)?;
        } else {
            *self.rival.lock().unwrap() = Some(rival);
        }
        outcome
    }
}

struct RacingTx<'a> {
    inner: &'a mut dyn StoreTx,
    raced: &'a mut bool,
}

impl StoreTx for RacingTx<'_> {
    fn user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        self.inner.user(id)
    }
    fn user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        self.inner.user_by_email(email)
    }
    fn insert_user(&mut self, user: NewUser) -> Result<User, RepositoryError> {
        self.inner.insert_user(user)
    }
    fn save_user(&mut self, user: &User) -> Result<(), RepositoryError> {
        self.inner.save_user(user)
    }
    fn delete_user(&mut self, id: UserId) -> Result<User, RepositoryError> {
        self.inner.delete_user(id)
    }
    fn company(&self, id: CompanyId) -> Result<Option<Company>, RepositoryError> {
        self.inner.company(id)
    }
    fn company_by_owner(&self, owner_id: UserId) -> Result<Option<Company>, RepositoryError> {
        self.inner.company_by_owner(owner_id)
    }
    fn search_companies(
        &self,
        filter: &CompanyFilter,
        page: PageRequest,
    ) -> Result<Page<Company>, RepositoryError> {
        self.inner.search_companies(filter, page)
    }
    fn insert_company(&mut self, company: NewCompany) -> Result<Company, RepositoryError> {
        self.inner.insert_company(company)
    }
    fn save_company(&mut self, company: &Company) -> Result<(), RepositoryError> {
        self.inner.save_company(company)
    }
    fn delete_company(&mut self, id: CompanyId) -> Result<Company, RepositoryError> {
        self.inner.delete_company(id)
    }
    fn driver(&self, id: DriverId) -> Result<Option<Driver>, RepositoryError> {
        self.inner.driver(id)
    }
    fn driver_by_user(&self, user_id: UserId) -> Result<Option<Driver>, RepositoryError> {
        self.inner.driver_by_user(user_id)
    }
    fn driver_by_license(&self, license_number: &str) -> Result<Option<Driver>, RepositoryError> {
        self.inner.driver_by_license(license_number)
    }
    fn list_drivers(
        &self,
        status: Option<ModerationStatus>,
        page: PageRequest,
    ) -> Result<Page<Driver>, RepositoryError> {
        self.inner.list_drivers(status, page)
    }
    fn insert_driver(&mut self, driver: NewDriver) -> Result<Driver, RepositoryError> {
        self.inner.insert_driver(driver)
    }
    fn save_driver(&mut self, driver: &Driver) -> Result<(), RepositoryError> {
        self.inner.save_driver(driver)
    }
    fn delete_driver(&mut self, id: DriverId) -> Result<Driver, RepositoryError> {
        self.inner.delete_driver(id)
    }
    fn affiliation(
        &self,
        driver_id: DriverId,
        company_id: CompanyId,
    ) -> Result<Option<Affiliation>, RepositoryError> {
        self.inner.affiliation(driver_id, company_id)
    }
    fn insert_affiliation(&mut self, _affiliation: Affiliation) -> Result<(), RepositoryError> {
        *self.raced = true;
        Err(RepositoryError::Conflict)
    }
    fn save_affiliation(&mut self, affiliation: &Affiliation) -> Result<(), RepositoryError> {
        self.inner.save_affiliation(affiliation)
    }
    fn list_affiliations(
        &self,
        filter: &AffiliationFilter,
        page: PageRequest,
    ) -> Result<Page<Affiliation>, RepositoryError> {
        self.inner.list_affiliations(filter, page)
    }
}

/// Resolver that maps fixed tokens to actors.
#[derive(Default)]
pub(super) struct StaticResolver {
    actors: HashMap<String, Actor>,
}

impl StaticResolver {
    pub(super) fn with(mut self, token: &str, actor: Actor) -> Self {
        self.actors.insert(token.to_string(), actor);
        self
    }
}

impl ActorResolver for StaticResolver {
    fn resolve(&self, token: &str) -> Result<Actor, ServiceError> {
        self.actors
            .get(token)
            .copied()
            .ok_or_else(|| ServiceError::unauthorized("Invalid token"))
    }
}

pub(super) fn router_with<O: ObjectStorage + 'static>(
    harness: &Harness<O>,
    resolver: StaticResolver,
) -> Router {
    let resolver: SharedResolver = Arc::new(resolver);
    marketplace_router(harness.services.clone()).layer(Extension(resolver))
}

pub(super) enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a str, &'a [u8]),
}

pub(super) fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, content_type, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub(super) fn multipart_request(
    method: Method,
    uri: &str,
    token: &str,
    parts: &[Part<'_>],
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub(super) fn json_request(method: Method, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

pub(super) fn get_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
