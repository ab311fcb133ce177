use crate::cli::ServeArgs;
use crate::infra::{AppState, Backend};
use crate::routes::with_platform_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use nomad_trip::accounts::LogMailer;
use nomad_trip::clock::SystemClock;
use nomad_trip::config::AppConfig;
use nomad_trip::error::AppError;
use nomad_trip::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let backend = Backend::in_memory(
        &config,
        Arc::new(LogMailer::new(config.mail.from.clone())),
        Arc::new(SystemClock),
    );
    if let Some(seed) = &config.admin {
        let admin = backend.accounts.seed_admin(seed)?;
        info!(user_id = %admin.id, "administrator account available");
    }

    let app = with_platform_routes(&backend)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "nomad trip marketplace ready");

    axum::serve(listener, app).await?;
    Ok(())
}
