use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::{Extension, Router};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::accounts::{
    account_router, AccountService, AccountSettings, MailError, Mailer, MemoryMailer,
    MemoryOtpStore, Registration, SharedResolver, TokenAuthenticator, TokenService,
};
use crate::clock::ManualClock;
use crate::config::{AuthConfig, StorageConfig};
use crate::marketplace::PageRequest;
use crate::memory::{MemoryObjectStorage, MemoryStore};
use crate::repository::{CompanyFilter, RepositoryError, Store};
use crate::storage::{AssetGateway, ImageUpload, ObjectStorage, StorageError};

pub(super) const PASSWORD: &str = "steppe-wind-42";

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub(super) fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "accounts-test-secret".to_string(),
        issuer: "nomad-trip-test".to_string(),
        access_token_minutes: 30,
        otp_ttl_seconds: 300,
    }
}

pub(super) fn settings() -> AccountSettings {
    AccountSettings {
        otp_ttl: Duration::seconds(300),
        mail_timeout: StdDuration::from_millis(200),
    }
}

pub(super) type Accounts<M = MemoryMailer> = AccountService<MemoryStore, MemoryObjectStorage, M>;

pub(super) struct Harness<M = MemoryMailer> {
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryObjectStorage>,
    pub mailer: Arc<M>,
    pub clock: Arc<ManualClock>,
    pub tokens: Arc<TokenService>,
    pub service: Arc<Accounts<M>>,
}

pub(super) fn harness() -> Harness {
    harness_with(Arc::new(MemoryMailer::new()))
}

pub(super) fn harness_with<M: Mailer + 'static>(mailer: Arc<M>) -> Harness<M> {
    let store = Arc::new(MemoryStore::new());
    let storage = Arc::new(MemoryObjectStorage::default());
    let clock = Arc::new(ManualClock::new(start()));
    let tokens = Arc::new(TokenService::new(&auth_config(), clock.clone()));
    let service = Arc::new(AccountService::new(
        store.clone(),
        AssetGateway::new(storage.clone(), &StorageConfig::default()),
        mailer.clone(),
        Arc::new(MemoryOtpStore::new()),
        tokens.clone(),
        clock.clone(),
        settings(),
    ));
    Harness {
        store,
        storage,
        mailer,
        clock,
        tokens,
        service,
    }
}

impl Harness {
    /// Full sign-up through an emailed code.
    pub(super) async fn sign_up(&self, email: &str) -> crate::accounts::Registered {
        self.service.send_otp(email).await.expect("otp sent");
        let code = self.mailer.last_code_for(email).expect("code mailed");
        self.service
            .register(registration(email, &code))
            .expect("registered")
    }

    pub(super) fn router(&self) -> Router {
        let resolver: SharedResolver = Arc::new(TokenAuthenticator::new(
            self.store.clone(),
            self.tokens.clone(),
        ));
        account_router(self.service.clone()).layer(Extension(resolver))
    }
}

pub(super) fn registration(email: &str, code: &str) -> Registration {
    Registration {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        first_name: "Aigerim".to_string(),
        last_name: Some("Bekova".to_string()),
        code: code.to_string(),
    }
}

/// Mailer whose relay always refuses.
#[derive(Debug, Default)]
pub(super) struct BrokenMailer;

#[async_trait]
impl Mailer for BrokenMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        Err(MailError::Delivery("relay refused".to_string()))
    }
}

/// Mailer that never answers within the configured timeout.
#[derive(Debug, Default)]
pub(super) struct StalledMailer;

#[async_trait]
impl Mailer for StalledMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        tokio::time::sleep(StdDuration::from_secs(5)).await;
        Ok(())
    }
}

/// Storage that notes, on every delete, whether any company row still exists.
pub(super) struct WatchingStorage {
    pub inner: MemoryObjectStorage,
    store: Arc<MemoryStore>,
    companies_at_delete: Mutex<Vec<u64>>,
}

impl WatchingStorage {
    pub(super) fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            inner: MemoryObjectStorage::default(),
            store,
            companies_at_delete: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn companies_at_delete(&self) -> Vec<u64> {
        self.companies_at_delete.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for WatchingStorage {
    async fn upload(&self, file: ImageUpload, folder: &str) -> Result<String, StorageError> {
        self.inner.upload(file, folder).await
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let companies = self
            .store
            .read::<_, RepositoryError, _>(|tx| {
                tx.search_companies(&CompanyFilter::default(), PageRequest::default())
            })
            .map(|page| page.total)
            .unwrap_or_default();
        self.companies_at_delete.lock().unwrap().push(companies);
        self.inner.delete(url).await
    }
}

pub(super) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

pub(super) fn empty_request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
