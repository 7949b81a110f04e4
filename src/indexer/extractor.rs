//! Turns raw chain data for a block range into wallet-attributed transfer rows.
//!
//! Native transfers come first, in block-then-position order, followed by
//! token transfers in log order.

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use uuid::Uuid;

use super::client::ChainClient;
use super::decoder::{decode_transfer_log, TRANSFER_TOPIC};
use super::types::{Chain, ChainBlock, TransferKind, TransferRecord, TransferStatus};
use crate::watch::set::WatchSet;

/// Result of a fully successful extraction.
#[derive(Debug)]
pub struct Extraction {
    pub transfers: Vec<TransferRecord>,
    pub blocks_fetched: u64,
    /// Hash of the last block in the range; becomes the new cursor hash.
    pub last_block_hash: B256,
}

#[derive(Debug)]
pub enum ExtractError {
    /// A block in the range could not be fetched or read. Nothing is returned.
    Block { number: u64, error: eyre::Report },
    /// The chain changed while the range was being read: a block does not
    /// build on the one before it (or on the cursor), or a log names a
    /// different block than the one fetched at its height.
    Discontinuity {
        number: u64,
        expected: B256,
        found: B256,
    },
    /// The Transfer log query failed after the native pass completed.
    Logs {
        native: Vec<TransferRecord>,
        error: eyre::Report,
    },
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::Block { number, error } => {
                write!(f, "failed to fetch block {number}: {error}")
            }
            ExtractError::Discontinuity {
                number,
                expected,
                found,
            } => write!(
                f,
                "chain changed at block {number}: expected {expected:#x}, found {found:#x}"
            ),
            ExtractError::Logs { native, error } => write!(
                f,
                "Transfer log query failed ({} native transfers collected): {error}",
                native.len()
            ),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract every watched transfer in `range`.
///
/// Up to `concurrency` block fetches run at once; results are consumed in
/// block order so the output order does not depend on RPC timing.
///
/// `parent_hash` is the hash the block before `range` is known by, if any.
/// The fetched blocks must form a chain on top of it.
pub async fn extract<C>(
    client: &C,
    chain: Chain,
    range: RangeInclusive<u64>,
    parent_hash: Option<B256>,
    watch_set: &WatchSet,
    concurrency: usize,
) -> Result<Extraction, ExtractError>
where
    C: ChainClient + ?Sized,
{
    let (start, end) = (*range.start(), *range.end());
    let mut transfers = Vec::new();
    let mut block_times: HashMap<u64, (DateTime<Utc>, B256)> = HashMap::new();
    let mut last_block_hash = B256::ZERO;
    let mut expected_parent = parent_hash;
    let mut blocks_fetched = 0u64;

    let mut blocks = stream::iter(range)
        .map(|number| async move { (number, client.block_by_height(number).await) })
        .buffered(concurrency.max(1));

    while let Some((number, result)) = blocks.next().await {
        let block = result.map_err(|error| ExtractError::Block { number, error })?;
        blocks_fetched += 1;

        if let Some(expected) = expected_parent {
            if block.parent_hash != expected {
                return Err(ExtractError::Discontinuity {
                    number,
                    expected,
                    found: block.parent_hash,
                });
            }
        }
        expected_parent = Some(block.hash);

        let time = block_time(&block).ok_or_else(|| ExtractError::Block {
            number,
            error: eyre::eyre!("Block timestamp {} is out of range", block.timestamp),
        })?;
        block_times.insert(number, (time, block.hash));
        last_block_hash = block.hash;

        collect_native_transfers(&block, chain, time, watch_set, &mut transfers);
    }

    let logs = match client.logs_by_topic(start, end, TRANSFER_TOPIC).await {
        Ok(logs) => logs,
        Err(error) => {
            return Err(ExtractError::Logs {
                native: transfers,
                error,
            })
        }
    };

    for log in &logs {
        if let (Some(number), Some(log_block_hash)) = (log.block_number, log.block_hash) {
            if let Some(&(_, block_hash)) = block_times.get(&number) {
                if log_block_hash != block_hash {
                    return Err(ExtractError::Discontinuity {
                        number,
                        expected: block_hash,
                        found: log_block_hash,
                    });
                }
            }
        }

        let Some(decoded) = decode_transfer_log(log) else {
            continue;
        };

        let from = decoded.from.to_checksum(None);
        let to = decoded.to.to_checksum(None);
        let Some(wallet_id) = watch_set.attribute(&from, &to) else {
            continue;
        };

        let contract = format!("{:#x}", decoded.token_address);
        let Some(token_id) = watch_set.token_for(&contract) else {
            tracing::trace!(%chain, contract = %contract, "Transfer from unknown token, skipping");
            continue;
        };

        let Some(block_number) = decoded.block_number else {
            tracing::warn!(%chain, tx = %decoded.tx_hash, "Transfer log without block number, skipping");
            continue;
        };
        let Some(&(time, block_hash)) = block_times.get(&block_number) else {
            tracing::warn!(
                %chain,
                block = block_number,
                start,
                end,
                "Transfer log outside the requested range, skipping"
            );
            continue;
        };

        transfers.push(TransferRecord {
            id: Uuid::new_v4(),
            time,
            wallet_id,
            hash: format!("{:#x}", decoded.tx_hash),
            chain,
            from_address: from,
            to_address: to,
            token_id: Some(token_id),
            amount: decoded.amount.to_string(),
            block_number,
            block_hash: format!("{block_hash:#x}"),
            log_index: decoded.log_index.map(|i| i as u32),
            status: TransferStatus::Confirmed,
            kind: TransferKind::Erc20,
        });
    }

    Ok(Extraction {
        transfers,
        blocks_fetched,
        last_block_hash,
    })
}

fn block_time(block: &ChainBlock) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(block.timestamp).ok()?;
    DateTime::from_timestamp(secs, 0)
}

fn collect_native_transfers(
    block: &ChainBlock,
    chain: Chain,
    time: DateTime<Utc>,
    watch_set: &WatchSet,
    out: &mut Vec<TransferRecord>,
) {
    for tx in &block.transactions {
        // Unrecoverable sender: drop the transaction, keep the block
        let Some(from) = tx.from else {
            continue;
        };

        let from = from.to_checksum(None);
        let to = tx
            .to
            .as_ref()
            .map(|a: &Address| a.to_checksum(None))
            .unwrap_or_default();

        let Some(wallet_id) = watch_set.attribute(&from, &to) else {
            continue;
        };

        out.push(TransferRecord {
            id: Uuid::new_v4(),
            time,
            wallet_id,
            hash: format!("{:#x}", tx.hash),
            chain,
            from_address: from,
            to_address: to,
            token_id: None,
            amount: tx.value.to_string(),
            block_number: block.number,
            block_hash: format!("{:#x}", block.hash),
            log_index: None,
            status: TransferStatus::Confirmed,
            kind: TransferKind::Native,
        });
    }
}
