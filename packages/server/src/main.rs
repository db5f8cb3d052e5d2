mod config;
mod error_response;
mod server;

use std::sync::Arc;

use payhub_core::chain::evm::EvmAdapter;
use payhub_core::chain::tron::TronAdapter;
use payhub_core::chain::ChainAdapters;
use payhub_core::crypto::CryptoContext;
use payhub_core::domain::Network;
use payhub_core::monitor::Monitor;
use payhub_core::ofac::OfacScreener;
use payhub_core::payment::PaymentEngine;
use payhub_core::scheduler::{shutdown_all, Scheduler};
use payhub_core::storage::Storage;
use payhub_core::subscription::SubscriptionEngine;
use payhub_core::webhook::WebhookEngine;

use config::Config;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();
    tracing::info!("starting payhub");

    let config = Config::load()?;
    tracing::info!(?config, "configuration loaded");

    let storage: Arc<dyn Storage> = match &config.database_url {
        Some(url) => {
            let pool = payhub_storage_postgres::create_pool(url).await?;
            payhub_storage_postgres::run_migrations(&pool).await?;
            tracing::info!("connected to Postgres, migrations applied");
            Arc::new(payhub_storage_postgres::PostgresStorage::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running against in-memory storage");
            Arc::new(payhub_storage_memory::MemoryStorage::new())
        }
    };

    let crypto = CryptoContext::new(&config.session_secret)?;

    let adapters = build_chain_adapters(&config)?;

    let monitor = Monitor::new(storage.clone(), adapters);
    let ofac = Arc::new(OfacScreener::new(storage.clone()));
    let subscriptions = Arc::new(SubscriptionEngine::new(storage.clone()));
    let webhooks = Arc::new(WebhookEngine::new(storage.clone()));
    let payment_engine = Arc::new(PaymentEngine::new(
        storage.clone(),
        crypto,
        ofac.clone(),
        monitor.clone(),
        subscriptions.clone(),
        webhooks.clone(),
    ));

    let scheduler = Arc::new(Scheduler::new(
        storage.clone(),
        monitor.clone(),
        payment_engine.clone(),
        webhooks.clone(),
        ofac.clone(),
    ));
    let shutdown_handles = scheduler.spawn_all();

    let app_state = server::AppState {
        storage,
        payment_engine,
        subscriptions,
        ofac,
        monitor,
    };

    let bind_addr = config.bind_addr.clone();
    let app = server::build_router(app_state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping background tasks");
            shutdown_all(&shutdown_handles).await;
        }
    }

    tracing::info!("payhub stopped");
    Ok(())
}

fn build_chain_adapters(config: &Config) -> eyre::Result<ChainAdapters> {
    let (arbitrum, ethereum) = match &config.alchemy_api_key {
        Some(key) => (
            Some(Arc::new(EvmAdapter::new(Network::Arbitrum, key)?)),
            Some(Arc::new(EvmAdapter::new(Network::Ethereum, key)?)),
        ),
        None => {
            tracing::warn!("ALCHEMY_API_KEY not set, EVM monitoring disabled");
            (None, None)
        }
    };

    let tron = Some(Arc::new(TronAdapter::new(
        config.rpc_tron.clone(),
        config.trongrid_api_key.clone(),
    )?));

    Ok(ChainAdapters {
        arbitrum,
        ethereum,
        tron,
    })
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,payhub=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, initiating shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, initiating shutdown"),
    }
}
