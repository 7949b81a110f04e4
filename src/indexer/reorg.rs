use super::client::ChainClient;
use super::types::Chain;
use crate::db::store::TransferStore;

/// What the reorg check found at the persisted head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgCheck {
    /// Nothing persisted yet.
    NoHead,
    /// The head has no recorded hash (e.g. right after a rollback).
    Unverifiable { head: u64 },
    Consistent { head: u64 },
    RolledBack {
        head: u64,
        pivot: u64,
        deleted: u64,
    },
}

impl ReorgCheck {
    pub fn rolled_back(&self) -> bool {
        matches!(self, ReorgCheck::RolledBack { .. })
    }
}

/// Compare the stored hash at the persisted head with the chain's hash at
/// that height and, on mismatch, drop everything above `head - depth`.
///
/// Any RPC or store failure is returned before anything is deleted, and the
/// rollback itself is a single all-or-nothing store call.
pub async fn check_and_rollback<C, S>(
    client: &C,
    store: &S,
    chain: Chain,
    depth: u64,
) -> eyre::Result<ReorgCheck>
where
    C: ChainClient + ?Sized,
    S: TransferStore + ?Sized,
{
    let cursor = store.head(chain).await?;
    let head = cursor.last_block;
    if head == 0 {
        return Ok(ReorgCheck::NoHead);
    }

    let Some(stored_hash) = cursor.last_block_hash else {
        tracing::debug!(%chain, head, "No stored hash at head, skipping reorg check");
        return Ok(ReorgCheck::Unverifiable { head });
    };

    let chain_hash = format!("{:#x}", client.block_hash_by_height(head).await?);
    if stored_hash.eq_ignore_ascii_case(&chain_hash) {
        return Ok(ReorgCheck::Consistent { head });
    }

    tracing::warn!(
        %chain,
        block = head,
        stored_hash = %stored_hash,
        chain_hash = %chain_hash,
        "Reorg detected! Head hash mismatch. Rolling back..."
    );

    let pivot = head.saturating_sub(depth);
    let deleted = store.rollback_above(chain, pivot).await?;

    tracing::info!(%chain, rollback_to = pivot, deleted_transfers = deleted, "Reorg rollback complete");

    Ok(ReorgCheck::RolledBack {
        head,
        pivot,
        deleted,
    })
}
