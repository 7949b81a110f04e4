use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::repository;
use crate::indexer::types::{Chain, ChainCursor, TransferRecord, WatchedToken, WatchedWallet};

/// Persistence capabilities the sync engine relies on.
#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn active_wallets(&self, chain: Chain) -> eyre::Result<Vec<WatchedWallet>>;

    async fn tracked_tokens(&self, chain: Chain) -> eyre::Result<Vec<WatchedToken>>;

    /// Persisted head for `chain`; `last_block == 0` when nothing was indexed.
    async fn head(&self, chain: Chain) -> eyre::Result<ChainCursor>;

    /// Write `transfers` and advance the head to `cursor`, all or nothing.
    /// Rows whose idempotence key already exists are skipped; the returned
    /// ids are the rows that were actually written.
    async fn commit_batch(
        &self,
        chain: Chain,
        transfers: &[TransferRecord],
        cursor: &ChainCursor,
    ) -> eyre::Result<Vec<Uuid>>;

    /// Delete every transfer above `pivot` and move the head back to it,
    /// all or nothing. Returns the number of rows deleted.
    async fn rollback_above(&self, chain: Chain, pivot: u64) -> eyre::Result<u64>;
}

#[async_trait]
impl<T: TransferStore + ?Sized> TransferStore for Arc<T> {
    async fn active_wallets(&self, chain: Chain) -> eyre::Result<Vec<WatchedWallet>> {
        (**self).active_wallets(chain).await
    }

    async fn tracked_tokens(&self, chain: Chain) -> eyre::Result<Vec<WatchedToken>> {
        (**self).tracked_tokens(chain).await
    }

    async fn head(&self, chain: Chain) -> eyre::Result<ChainCursor> {
        (**self).head(chain).await
    }

    async fn commit_batch(
        &self,
        chain: Chain,
        transfers: &[TransferRecord],
        cursor: &ChainCursor,
    ) -> eyre::Result<Vec<Uuid>> {
        (**self).commit_batch(chain, transfers, cursor).await
    }

    async fn rollback_above(&self, chain: Chain, pivot: u64) -> eyre::Result<u64> {
        (**self).rollback_above(chain, pivot).await
    }
}

/// Postgres-backed store. The pool is shared across chain workers.
#[derive(Clone)]
pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn active_wallets(&self, chain: Chain) -> eyre::Result<Vec<WatchedWallet>> {
        repository::get_active_wallets(&self.pool, chain).await
    }

    async fn tracked_tokens(&self, chain: Chain) -> eyre::Result<Vec<WatchedToken>> {
        repository::get_tracked_tokens(&self.pool, chain).await
    }

    async fn head(&self, chain: Chain) -> eyre::Result<ChainCursor> {
        if let Some(cursor) = repository::get_cursor(&self.pool, chain).await? {
            return Ok(cursor);
        }

        // No cursor yet: derive the head from the rows themselves
        let last_block = repository::get_max_transfer_block(&self.pool, chain).await?;
        if last_block == 0 {
            return Ok(ChainCursor::default());
        }
        let last_block_hash =
            repository::get_representative_block_hash(&self.pool, chain, last_block).await?;

        Ok(ChainCursor {
            last_block,
            last_block_hash,
        })
    }

    async fn commit_batch(
        &self,
        chain: Chain,
        transfers: &[TransferRecord],
        cursor: &ChainCursor,
    ) -> eyre::Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        let inserted = repository::insert_transfers_batch(&mut tx, transfers).await?;
        repository::upsert_cursor(&mut tx, chain, cursor).await?;
        tx.commit().await?;

        Ok(inserted)
    }

    async fn rollback_above(&self, chain: Chain, pivot: u64) -> eyre::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let deleted = repository::delete_transfers_above(&mut tx, chain, pivot).await?;
        repository::upsert_cursor(
            &mut tx,
            chain,
            &ChainCursor {
                last_block: pivot,
                last_block_hash: None,
            },
        )
        .await?;
        tx.commit().await?;

        Ok(deleted)
    }
}
