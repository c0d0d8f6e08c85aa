use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use polymarket_core::blockchain::BlockchainClient;
use polymarket_core::clock::{Clock, SystemClock};
use polymarket_core::config::AppConfig;
use polymarket_core::db::{Database, MemoryRepository, PgRepository, Repository};
use polymarket_core::metrics;
use polymarket_core::services::matching::MatchingEngine;
use polymarket_core::services::resolution::ResolutionTracker;
use polymarket_core::services::settlement::SettlementBatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "polymarket_core=debug,sqlx=warn".into());
    if config.environment == "production" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Polymarket core v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    if let Some(port) = config.metrics_port {
        metrics::init_metrics(SocketAddr::from(([0, 0, 0, 0], port)))?;
    }

    // Initialize repository
    let repo: Arc<dyn Repository> = match config.database_url.as_deref() {
        Some(url) if !url.is_empty() => {
            let db = Database::connect(url).await?;
            db.migrate().await?;
            tracing::info!("Database connected");
            Arc::new(PgRepository::new(db.pool.clone()))
        }
        _ => {
            tracing::warn!("DATABASE_URL not set, using in-memory repository (state is lost on exit)");
            Arc::new(MemoryRepository::new())
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Initialize matching engine and rebuild books from the store
    let engine = Arc::new(MatchingEngine::new(repo.clone(), clock.clone(), config.matching_config()));
    match engine.recover().await {
        Ok(0) => tracing::info!("No open orders to recover"),
        Ok(count) => tracing::info!("Recovered {} open orders to orderbooks", count),
        Err(e) => {
            tracing::error!("Failed to recover orders: {}", e);
            return Err(e.into());
        }
    }

    let mut tasks = vec![engine.clone().start_expiry_sweeper(config.expiry_sweep_interval())];

    let mut trades = engine.subscribe_trades();
    tasks.push(tokio::spawn(async move {
        loop {
            match trades.recv().await {
                Ok(event) => tracing::debug!(
                    trade_id = %event.trade_id,
                    market_id = %event.market_id,
                    price = %event.price,
                    amount = %event.amount,
                    "Trade executed"
                ),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Trade log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }));

    // Settlement and resolution need the chain
    if config.has_chain_config() {
        let rpc_url = config.rpc_url.clone().unwrap_or_default();
        let key = config.operator_private_key.clone().unwrap_or_default();
        let client = Arc::new(
            BlockchainClient::new(&rpc_url, &key, config.contract_addresses()?, config.chain_id)?
                .with_oracle_reward(config.oracle_reward()),
        );

        let batcher = Arc::new(SettlementBatcher::new(
            repo.clone(),
            client.clone(),
            clock.clone(),
            config.settlement_config()?,
        ));
        batcher.recover_interrupted().await?;
        if let Some(handle) = batcher.start_worker() {
            tasks.push(handle);
        }

        let tracker = Arc::new(ResolutionTracker::new(
            repo.clone(),
            client,
            clock.clone(),
            config.resolution_config(),
        ));
        tasks.push(tracker.start_worker());
    } else {
        tracing::warn!("RPC_URL or OPERATOR_PRIVATE_KEY not set, settlement and resolution disabled");
    }

    tracing::info!("Core running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    for task in tasks {
        task.abort();
    }
    Ok(())
}
