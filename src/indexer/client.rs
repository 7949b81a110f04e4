use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::Transaction as _;
use alloy::consensus::TxEnvelope;
use alloy::eips::BlockNumberOrTag;
use alloy::network::{AnyNetwork, AnyRpcBlock, AnyTxEnvelope};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::types::{Chain, ChainBlock, ChainTransaction};

/// Everything the sync engine asks of a node. Implemented over JSON-RPC for
/// production and by in-memory fakes in tests.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Height of the latest block header.
    async fn latest_height(&self) -> eyre::Result<u64>;

    /// Block at `number` with its transactions and timestamp. A block the
    /// node does not know yet is an error.
    async fn block_by_height(&self, number: u64) -> eyre::Result<ChainBlock>;

    /// Logs in `[from_block, to_block]` whose first topic is `topic0`.
    async fn logs_by_topic(
        &self,
        from_block: u64,
        to_block: u64,
        topic0: B256,
    ) -> eyre::Result<Vec<Log>>;

    /// Hash of the canonical block at `number`.
    async fn block_hash_by_height(&self, number: u64) -> eyre::Result<B256>;

    /// Native balance of `address` at the latest block.
    async fn balance_at(&self, address: Address) -> eyre::Result<U256>;
}

#[async_trait]
impl<T: ChainClient + ?Sized> ChainClient for Arc<T> {
    async fn latest_height(&self) -> eyre::Result<u64> {
        (**self).latest_height().await
    }

    async fn block_by_height(&self, number: u64) -> eyre::Result<ChainBlock> {
        (**self).block_by_height(number).await
    }

    async fn logs_by_topic(
        &self,
        from_block: u64,
        to_block: u64,
        topic0: B256,
    ) -> eyre::Result<Vec<Log>> {
        (**self).logs_by_topic(from_block, to_block, topic0).await
    }

    async fn block_hash_by_height(&self, number: u64) -> eyre::Result<B256> {
        (**self).block_hash_by_height(number).await
    }

    async fn balance_at(&self, address: Address) -> eyre::Result<U256> {
        (**self).balance_at(address).await
    }
}

/// JSON-RPC chain client backed by an alloy HTTP provider. Uses the catch-all
/// network so L2 blocks with their own transaction types still decode.
#[derive(Clone)]
pub struct AlloyChainClient {
    chain: Chain,
    provider: DynProvider<AnyNetwork>,
}

impl AlloyChainClient {
    pub fn connect_http(chain: Chain, rpc_url: &str) -> eyre::Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| eyre::eyre!("Invalid RPC URL for {}: {}", chain, e))?;
        let provider = ProviderBuilder::new()
            .network::<AnyNetwork>()
            .connect_http(url)
            .erased();
        Ok(Self { chain, provider })
    }

    /// Fails when the node serves a different network than `chain`.
    pub async fn verify_chain_id(&self) -> eyre::Result<()> {
        let reported = retry_rpc(|| async { self.provider.get_chain_id().await }).await?;
        if reported != self.chain.chain_id() {
            return Err(eyre::eyre!(
                "RPC endpoint for {} reports chain id {}, expected {}",
                self.chain,
                reported,
                self.chain.chain_id()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn latest_height(&self) -> eyre::Result<u64> {
        retry_rpc(|| async { self.provider.get_block_number().await }).await
    }

    async fn block_by_height(&self, number: u64) -> eyre::Result<ChainBlock> {
        let block = retry_rpc(|| async {
            self.provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .full()
                .await
        })
        .await?
        .ok_or_else(|| eyre::eyre!("Block {} not found on {}", number, self.chain))?;

        Ok(chain_block_from_rpc(self.chain, number, block))
    }

    async fn logs_by_topic(
        &self,
        from_block: u64,
        to_block: u64,
        topic0: B256,
    ) -> eyre::Result<Vec<Log>> {
        let filter = Filter::new()
            .event_signature(topic0)
            .from_block(from_block)
            .to_block(to_block);

        retry_rpc(|| self.provider.get_logs(&filter)).await
    }

    async fn block_hash_by_height(&self, number: u64) -> eyre::Result<B256> {
        let block = retry_rpc(|| async {
            self.provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .await
        })
        .await?
        .ok_or_else(|| eyre::eyre!("Block {} not found on {}", number, self.chain))?;

        Ok(block.header.hash)
    }

    async fn balance_at(&self, address: Address) -> eyre::Result<U256> {
        retry_rpc(|| async { self.provider.get_balance(address).await }).await
    }
}

/// Keep the fields the extractor reads. Transactions that are not Ethereum
/// envelopes (OP deposits, Arbitrum system transactions) are skipped.
fn chain_block_from_rpc(chain: Chain, number: u64, block: AnyRpcBlock) -> ChainBlock {
    let block = block.into_inner();

    let mut transactions = Vec::new();
    for tx in block.transactions.into_transactions() {
        match tx.inner.inner.inner() {
            AnyTxEnvelope::Ethereum(envelope) => {
                transactions.push(chain_transaction(chain, number, envelope));
            }
            AnyTxEnvelope::Unknown(unknown) => {
                tracing::debug!(
                    %chain,
                    block = number,
                    tx = %unknown.hash,
                    tx_type = unknown.inner.ty.0,
                    "Skipping non-Ethereum transaction type"
                );
            }
        }
    }

    ChainBlock {
        number,
        hash: block.header.hash,
        parent_hash: block.header.inner.parent_hash,
        timestamp: block.header.inner.timestamp,
        transactions,
    }
}

fn chain_transaction(chain: Chain, number: u64, envelope: &TxEnvelope) -> ChainTransaction {
    // The node reports a sender too; recover it ourselves so a bad
    // signature drops the transaction instead of trusting the node.
    let from = match envelope.recover_signer() {
        Ok(address) => Some(address),
        Err(e) => {
            tracing::debug!(
                %chain,
                block = number,
                tx = %envelope.tx_hash(),
                error = %e,
                "Sender recovery failed"
            );
            None
        }
    };

    ChainTransaction {
        hash: *envelope.tx_hash(),
        from,
        to: envelope.to(),
        value: envelope.value(),
    }
}

/// Retry an async operation with exponential backoff.
/// Handles transient RPC errors (rate limits, network issues).
pub async fn retry_rpc<F, Fut, T, E>(f: F) -> eyre::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff(f, 3, Duration::from_millis(500)).await
}

async fn retry_with_backoff<F, Fut, T, E>(
    mut f: F,
    max_retries: u32,
    initial_delay: Duration,
) -> eyre::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = initial_delay;

    for attempt in 0..max_retries {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "RPC call failed, retrying..."
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(10));
            }
        }
    }

    // Final attempt; its error is the one reported
    f().await
        .map_err(|e| eyre::eyre!("RPC call failed after {} retries: {}", max_retries, e))
}
