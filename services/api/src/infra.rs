use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use nomad_trip::accounts::{
    AccountService, AccountSettings, Mailer, MemoryOtpStore, SharedResolver, TokenAuthenticator,
    TokenService,
};
use nomad_trip::clock::Clock;
use nomad_trip::config::AppConfig;
use nomad_trip::marketplace::MarketplaceServices;
use nomad_trip::memory::{MemoryObjectStorage, MemoryStore};
use nomad_trip::storage::AssetGateway;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type Accounts<M> = AccountService<MemoryStore, MemoryObjectStorage, M>;

/// Every service wired against the in-process store and bucket.
pub(crate) struct Backend<M> {
    pub(crate) accounts: Arc<Accounts<M>>,
    pub(crate) marketplace: MarketplaceServices<MemoryStore, MemoryObjectStorage>,
    pub(crate) resolver: SharedResolver,
}

impl<M> Backend<M>
where
    M: Mailer + 'static,
{
    pub(crate) fn in_memory(config: &AppConfig, mailer: Arc<M>, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryObjectStorage::new(config.storage.bucket.clone()));
        let tokens = Arc::new(TokenService::new(&config.auth, clock.clone()));

        let accounts = Arc::new(AccountService::new(
            store.clone(),
            AssetGateway::new(storage.clone(), &config.storage),
            mailer,
            Arc::new(MemoryOtpStore::new()),
            tokens.clone(),
            clock.clone(),
            AccountSettings::from_config(&config.auth, &config.mail),
        ));
        let marketplace =
            MarketplaceServices::new(store.clone(), storage, &config.storage, clock);
        let resolver: SharedResolver = Arc::new(TokenAuthenticator::new(store, tokens));

        Self {
            accounts,
            marketplace,
            resolver,
        }
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
