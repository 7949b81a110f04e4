use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crypto_tracker_indexer::config::Config;
use crypto_tracker_indexer::db::store::PgTransferStore;
use crypto_tracker_indexer::events::publisher::NatsPublisher;
use crypto_tracker_indexer::indexer::chain::ChainWorker;
use crypto_tracker_indexer::indexer::client::AlloyChainClient;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Local runs read a .env file; a missing one is fine
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.is_production() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        otlp_endpoint = %config.otlp_endpoint,
        chains = config.chains.len(),
        batch_size = config.sync.block_batch_size,
        worker_count = config.sync.worker_count,
        "Indexer starting"
    );

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");

    let store = PgTransferStore::new(pool);
    let publisher = NatsPublisher::connect(&config.nats_url).await?;

    // Create shutdown signal
    let shutdown = CancellationToken::new();

    // Spawn one worker per configured chain
    let mut handles = Vec::new();
    for chain_config in config.chains {
        let chain = chain_config.chain;
        let client = match AlloyChainClient::connect_http(chain, &chain_config.rpc_http) {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(%chain, error = %e, "Failed to create RPC client, chain disabled");
                continue;
            }
        };

        let worker = ChainWorker::new(
            chain,
            client.clone(),
            store.clone(),
            publisher.clone(),
            config.sync.clone(),
        );
        let shutdown = shutdown.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = client.verify_chain_id().await {
                tracing::error!(%chain, error = %e, "Chain id check failed, worker not started");
                return;
            }
            worker.run(shutdown).await;
        });

        handles.push(handle);
    }

    if handles.is_empty() {
        return Err(eyre::eyre!("No chain worker could be started"));
    }

    tracing::info!(workers = handles.len(), "All chain workers started. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping all workers...");
    shutdown.cancel();

    // Wait for all tasks to finish
    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("Indexer stopped gracefully");
    Ok(())
}
