use alloy::primitives::B256;
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing::Span;

use crate::config::SyncConfig;
use crate::db::store::TransferStore;
use crate::events::publisher::{publish_committed, EventPublisher};
use crate::indexer::client::ChainClient;
use crate::indexer::extractor::{self, ExtractError};
use crate::indexer::reorg::{self, ReorgCheck};
use crate::indexer::types::{Chain, ChainCursor, TransferRecord};
use crate::watch::set::WatchSet;

/// Why a cycle stopped before extracting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoWatchedWallets,
    UpToDate,
}

/// What one sync cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub reorg: ReorgCheck,
    pub wallet_count: usize,
    pub token_count: usize,
    pub chain_head: Option<u64>,
    pub persisted_head: Option<u64>,
    pub range: Option<RangeInclusive<u64>>,
    pub blocks_processed: u64,
    pub transfers_found: usize,
    pub inserted: usize,
    pub published: usize,
    pub skipped: Option<SkipReason>,
}

impl CycleReport {
    fn new(reorg: ReorgCheck) -> Self {
        Self {
            reorg,
            wallet_count: 0,
            token_count: 0,
            chain_head: None,
            persisted_head: None,
            range: None,
            blocks_processed: 0,
            transfers_found: 0,
            inserted: 0,
            published: 0,
            skipped: None,
        }
    }
}

/// Next block range to sync: `[P + 1, min(P + batch, H)]`, or `None` when
/// the persisted head `P` has caught up with the chain head `H`.
pub fn next_range(persisted_head: u64, chain_head: u64, batch_size: u64) -> Option<RangeInclusive<u64>> {
    let start = persisted_head.checked_add(1)?;
    if start > chain_head || batch_size == 0 {
        return None;
    }
    let end = start.saturating_add(batch_size - 1).min(chain_head);
    Some(start..=end)
}

/// Drives one chain: reorg check, watch set, range, extract, commit, publish.
pub struct ChainWorker<C, S, P> {
    chain: Chain,
    client: C,
    store: S,
    publisher: P,
    settings: SyncConfig,
}

impl<C, S, P> ChainWorker<C, S, P>
where
    C: ChainClient,
    S: TransferStore,
    P: EventPublisher,
{
    pub fn new(chain: Chain, client: C, store: S, publisher: P, settings: SyncConfig) -> Self {
        Self {
            chain,
            client,
            store,
            publisher,
            settings,
        }
    }

    /// Tick until `shutdown` fires. A cycle in flight is abandoned at its
    /// next suspension point; nothing it did is half-committed.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            chain = %self.chain,
            batch_size = self.settings.block_batch_size,
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            rollback_depth = self.settings.rollback_depth,
            "Starting chain worker"
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => {
                    tracing::info!(chain = %self.chain, "Shutdown received, stopping worker");
                    break;
                }
            }

            tokio::select! {
                result = self.sync_once() => {
                    if let Err(e) = result {
                        tracing::error!(chain = %self.chain, error = %e, "Sync cycle failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!(chain = %self.chain, "Shutdown received, abandoning sync cycle");
                    break;
                }
            }
        }

        tracing::info!(chain = %self.chain, "Chain worker stopped");
    }

    /// Run a single cycle. Any error leaves the persisted head where it was.
    #[tracing::instrument(
        name = "sync_cycle",
        skip_all,
        fields(
            chain = %self.chain,
            reorg_detected = Empty,
            wallet_count = Empty,
            token_count = Empty,
            chain_head = Empty,
            persisted_head = Empty,
            blocks_processed = Empty,
            transfers_found = Empty,
        )
    )]
    pub async fn sync_once(&self) -> eyre::Result<CycleReport> {
        let started = Instant::now();
        let span = Span::current();

        // Phase 1: reorg check
        let reorg = reorg::check_and_rollback(
            &self.client,
            &self.store,
            self.chain,
            self.settings.rollback_depth,
        )
        .await?;
        span.record("reorg_detected", reorg.rolled_back());
        let mut report = CycleReport::new(reorg);

        // Phase 2: watch set
        let watch_set = WatchSet::load(&self.store, self.chain).await?;
        report.wallet_count = watch_set.wallet_count();
        report.token_count = watch_set.token_count();
        span.record("wallet_count", report.wallet_count);
        span.record("token_count", report.token_count);

        if !watch_set.has_wallets() {
            tracing::debug!(chain = %self.chain, "No watched wallets, nothing to sync");
            report.skipped = Some(SkipReason::NoWatchedWallets);
            return Ok(report);
        }

        // Phase 3: range
        let chain_head = self.client.latest_height().await?;
        let cursor = self.store.head(self.chain).await?;
        let persisted_head = cursor.last_block;
        report.chain_head = Some(chain_head);
        report.persisted_head = Some(persisted_head);
        span.record("chain_head", chain_head);
        span.record("persisted_head", persisted_head);

        let Some(range) = next_range(persisted_head, chain_head, self.settings.block_batch_size)
        else {
            tracing::debug!(chain = %self.chain, chain_head, persisted_head, "No new blocks to sync");
            report.skipped = Some(SkipReason::UpToDate);
            return Ok(report);
        };
        report.range = Some(range.clone());

        tracing::info!(
            chain = %self.chain,
            from = range.start(),
            to = range.end(),
            behind = chain_head - range.end(),
            "Syncing block range"
        );

        // Phase 4: extract
        let end = *range.end();
        let parent_hash = match cursor.last_block_hash.as_deref().map(str::parse::<B256>) {
            Some(Ok(hash)) => Some(hash),
            Some(Err(e)) => {
                tracing::warn!(
                    chain = %self.chain,
                    block = persisted_head,
                    error = %e,
                    "Unreadable cursor hash, range continuity not checked"
                );
                None
            }
            None => None,
        };
        let extraction = match extractor::extract(
            &self.client,
            self.chain,
            range.clone(),
            parent_hash,
            &watch_set,
            self.settings.worker_count,
        )
        .await
        {
            Ok(extraction) => extraction,
            Err(ExtractError::Logs { native, error }) => {
                tracing::warn!(
                    chain = %self.chain,
                    native_collected = native.len(),
                    "Log query failed, discarding partial extraction"
                );
                return Err(error.wrap_err("Transfer log query failed"));
            }
            Err(e @ ExtractError::Discontinuity { .. }) => {
                tracing::warn!(
                    chain = %self.chain,
                    error = %e,
                    "Chain changed during extraction, leaving it to the next reorg check"
                );
                return Err(eyre::Report::new(e));
            }
            Err(e) => return Err(eyre::Report::new(e)),
        };
        report.blocks_processed = extraction.blocks_fetched;
        report.transfers_found = extraction.transfers.len();
        span.record("blocks_processed", report.blocks_processed);
        span.record("transfers_found", report.transfers_found);

        // Phase 5: commit rows and advance the head together
        let cursor = ChainCursor {
            last_block: end,
            last_block_hash: Some(format!("{:#x}", extraction.last_block_hash)),
        };
        let inserted_ids: HashSet<_> = self
            .store
            .commit_batch(self.chain, &extraction.transfers, &cursor)
            .await?
            .into_iter()
            .collect();
        report.inserted = inserted_ids.len();

        if report.inserted < report.transfers_found {
            tracing::debug!(
                chain = %self.chain,
                duplicates = report.transfers_found - report.inserted,
                "Skipped transfers that were already persisted"
            );
        }

        // Phase 6: publish what the commit made visible
        let committed: Vec<TransferRecord> = extraction
            .transfers
            .into_iter()
            .filter(|t| inserted_ids.contains(&t.id))
            .collect();
        let publish = publish_committed(&self.publisher, &committed).await;
        report.published = publish.published;

        tracing::info!(
            chain = %self.chain,
            from = report.range.as_ref().map(|r| *r.start()),
            to = end,
            blocks = report.blocks_processed,
            transfers = report.transfers_found,
            inserted = report.inserted,
            published = publish.published,
            publish_failures = publish.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync cycle complete"
        );

        Ok(report)
    }
}
