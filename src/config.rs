use std::str::FromStr;
use std::time::Duration;

use crate::indexer::types::Chain;

#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub environment: String,
    pub database: DatabaseConfig,
    pub nats_url: String,
    pub otlp_endpoint: String,
    pub chains: Vec<ChainConfig>,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// One worker per entry.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain: Chain,
    pub rpc_http: String,
}

/// Knobs shared by every chain worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub block_batch_size: u64,
    /// Concurrent block fetches inside one cycle.
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub rollback_depth: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            block_batch_size: 100,
            worker_count: 4,
            poll_interval: Duration::from_secs(15),
            rollback_depth: 12,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> eyre::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| eyre::eyre!("Missing required environment variable {}", key))
        };

        let defaults = SyncConfig::default();

        // Ethereum is mandatory, the rest are opt-in
        let mut chains = Vec::new();
        for chain in Chain::ALL {
            let url = if chain == Chain::Ethereum {
                Some(required(chain.rpc_url_var())?)
            } else {
                get(chain.rpc_url_var())
            };
            if let Some(rpc_http) = url {
                chains.push(ChainConfig { chain, rpc_http });
            }
        }

        let config = Config {
            service_name: get("SERVICE_NAME")
                .unwrap_or_else(|| "crypto-tracker-indexer".to_string()),
            environment: get("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", get("DATABASE_MAX_CONNECTIONS"), 10)?,
            },
            nats_url: get("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string()),
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|| "http://localhost:4318".to_string()),
            chains,
            sync: SyncConfig {
                block_batch_size: parse_or(
                    "BLOCK_BATCH_SIZE",
                    get("BLOCK_BATCH_SIZE"),
                    defaults.block_batch_size,
                )?,
                worker_count: parse_or("WORKER_COUNT", get("WORKER_COUNT"), defaults.worker_count)?,
                poll_interval: Duration::from_secs(parse_or(
                    "POLL_INTERVAL_SECS",
                    get("POLL_INTERVAL_SECS"),
                    defaults.poll_interval.as_secs(),
                )?),
                rollback_depth: parse_or(
                    "REORG_ROLLBACK_DEPTH",
                    get("REORG_ROLLBACK_DEPTH"),
                    defaults.rollback_depth,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.sync.block_batch_size == 0 {
            return Err(eyre::eyre!("BLOCK_BATCH_SIZE must be greater than 0"));
        }
        if self.sync.worker_count == 0 {
            return Err(eyre::eyre!("WORKER_COUNT must be greater than 0"));
        }
        if self.sync.poll_interval.is_zero() {
            return Err(eyre::eyre!("POLL_INTERVAL_SECS must be greater than 0"));
        }
        if self.sync.rollback_depth == 0 {
            return Err(eyre::eyre!("REORG_ROLLBACK_DEPTH must be greater than 0"));
        }
        if self.database.max_connections == 0 {
            return Err(eyre::eyre!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }
        for chain in &self.chains {
            if !chain.rpc_http.starts_with("http://") && !chain.rpc_http.starts_with("https://") {
                return Err(eyre::eyre!(
                    "Invalid RPC URL '{}' for {}: expected http:// or https://",
                    chain.rpc_http,
                    chain.chain
                ));
            }
        }
        Ok(())
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> eyre::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| eyre::eyre!("Invalid value '{}' for {}: {}", raw, key, e)),
        None => Ok(default),
    }
}
