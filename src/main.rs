use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sms_campaign_backend::{
    build_router,
    config::{Config, DeliveryBackend, RateLimitBackend},
    database::{
        pool::{create_pool, run_migrations},
        MessageStore, PgMessageStore,
    },
    services::{
        delivery_service::{DeliveryWorker, RetryPolicy},
        provider::Provider,
        queue_service::DeliveryQueue,
        rate_limiter::RateLimiter,
    },
    AppState,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = ?e, "failed to listen for SIGTERM"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url)
        .await
        .context("connecting to database")?;
    run_migrations(&pool).await.context("running migrations")?;

    let provider = Provider::from_settings(&config.provider, config.provider_timeout)?;
    if config.skip_provider_probe {
        tracing::warn!(provider = provider.name(), "skipping SMS provider probe");
    } else {
        provider
            .probe()
            .await
            .with_context(|| format!("SMS provider {} failed its startup probe", provider.name()))?;
        info!(provider = provider.name(), "SMS provider reachable");
    }

    let store: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pool.clone()));
    let limiter = match config.rate_limit.backend {
        RateLimitBackend::Memory => RateLimiter::memory(),
        RateLimitBackend::Postgres => RateLimiter::postgres(pool.clone()),
    };
    let queue = match config.delivery.backend {
        DeliveryBackend::InProcess => DeliveryQueue::in_process(config.delivery.concurrency),
        DeliveryBackend::Postgres => DeliveryQueue::postgres(
            pool.clone(),
            config.delivery.concurrency,
            config.delivery.poll_interval,
        ),
    };

    let mut worker = DeliveryWorker::new(
        store.clone(),
        provider.clone(),
        RetryPolicy::from_settings(&config.delivery),
        config.delivery.claim_lease,
    );
    if let Some(rps) = config.rate_limit.outbound_rps {
        worker = worker.with_outbound_limit(limiter.clone(), rps);
    }

    let shutdown = CancellationToken::new();
    let workers = queue.start(worker, shutdown.clone()).await?;
    info!(backend = queue.backend(), "delivery queue running");

    let addr: SocketAddr = config.server_address.parse()?;
    let app = build_router(AppState::new(config, store, queue, limiter, provider));

    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, workers.wait()).await.is_err() {
        tracing::warn!("delivery workers still busy after shutdown grace period");
    }
    info!("server stopped");
    Ok(())
}
