use bigdecimal::BigDecimal;
use sqlx::{PgConnection, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use crate::indexer::types::{Chain, ChainCursor, TransferRecord, WatchedToken, WatchedWallet};

/// Rows per INSERT statement: 14 binds each keeps us well under the 65535 limit.
const INSERT_CHUNK_SIZE: usize = 1000;

/// Active wallets for a chain.
pub async fn get_active_wallets(pool: &PgPool, chain: Chain) -> eyre::Result<Vec<WatchedWallet>> {
    let rows: Vec<(Uuid, String)> =
        sqlx::query_as("SELECT id, address FROM wallets WHERE is_active AND chain = $1")
            .bind(chain.as_str())
            .fetch_all(pool)
            .await?;

    Ok(rows
        .into_iter()
        .map(|(id, address)| WatchedWallet { id, address })
        .collect())
}

/// Tokens with a contract address on a chain (native assets have none).
pub async fn get_tracked_tokens(pool: &PgPool, chain: Chain) -> eyre::Result<Vec<WatchedToken>> {
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT id, contract_address FROM tokens WHERE chain = $1 AND contract_address IS NOT NULL",
    )
    .bind(chain.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, contract_address)| WatchedToken {
            id,
            contract_address,
        })
        .collect())
}

/// Get the cursor row for a chain. Returns None if never indexed.
pub async fn get_cursor(pool: &PgPool, chain: Chain) -> eyre::Result<Option<ChainCursor>> {
    let row: Option<(i64, Option<String>)> = sqlx::query_as(
        "SELECT last_block, last_block_hash FROM chain_cursor WHERE chain = $1",
    )
    .bind(chain.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(last_block, last_block_hash)| ChainCursor {
        last_block: last_block as u64,
        last_block_hash,
    }))
}

/// Highest block with a persisted transfer, 0 if none.
pub async fn get_max_transfer_block(pool: &PgPool, chain: Chain) -> eyre::Result<u64> {
    let (max,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(block_number), 0) FROM transfers WHERE chain = $1",
    )
    .bind(chain.as_str())
    .fetch_one(pool)
    .await?;

    Ok(max as u64)
}

/// Block hash recorded on any one transfer at `block_number`.
pub async fn get_representative_block_hash(
    pool: &PgPool,
    chain: Chain,
    block_number: u64,
) -> eyre::Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT block_hash FROM transfers WHERE block_number = $1 AND chain = $2 LIMIT 1",
    )
    .bind(block_number as i64)
    .bind(chain.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(h,)| h))
}

/// Insert a batch of transfers using multi-row INSERT with ON CONFLICT DO NOTHING.
/// Returns the ids of the rows that were actually written.
pub async fn insert_transfers_batch(
    conn: &mut PgConnection,
    transfers: &[TransferRecord],
) -> eyre::Result<Vec<Uuid>> {
    let mut inserted = Vec::with_capacity(transfers.len());

    for chunk in transfers.chunks(INSERT_CHUNK_SIZE) {
        let amounts = chunk
            .iter()
            .map(|t| {
                BigDecimal::from_str(&t.amount)
                    .map_err(|e| eyre::eyre!("Invalid amount '{}' in tx {}: {}", t.amount, t.hash, e))
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "INSERT INTO transfers (id, time, wallet_id, hash, chain, from_address, to_address, \
             token_id, amount, block_number, block_hash, log_index, status, type) ",
        );

        query_builder.push_values(chunk.iter().zip(amounts), |mut b, (t, amount)| {
            b.push_bind(t.id)
                .push_bind(t.time)
                .push_bind(t.wallet_id)
                .push_bind(&t.hash)
                .push_bind(t.chain.as_str())
                .push_bind(&t.from_address)
                .push_bind(&t.to_address)
                .push_bind(t.token_id)
                .push_bind(amount)
                .push_bind(t.block_number as i64)
                .push_bind(&t.block_hash)
                .push_bind(t.log_index.map(|i| i as i32))
                .push_bind(t.status.as_str())
                .push_bind(t.kind.as_str());
        });

        query_builder.push(" ON CONFLICT DO NOTHING RETURNING id");
        let rows: Vec<(Uuid,)> = query_builder
            .build_query_as()
            .fetch_all(&mut *conn)
            .await?;
        inserted.extend(rows.into_iter().map(|(id,)| id));
    }

    Ok(inserted)
}

/// Upsert the cursor for a chain.
pub async fn upsert_cursor(
    conn: &mut PgConnection,
    chain: Chain,
    cursor: &ChainCursor,
) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO chain_cursor (chain, last_block, last_block_hash, updated_at)
         VALUES ($1, $2, $3, NOW())
         ON CONFLICT (chain) DO UPDATE
         SET last_block = $2, last_block_hash = $3, updated_at = NOW()",
    )
    .bind(chain.as_str())
    .bind(cursor.last_block as i64)
    .bind(cursor.last_block_hash.as_deref())
    .execute(conn)
    .await?;

    Ok(())
}

/// Delete all transfers strictly above a block number (reorg rollback).
pub async fn delete_transfers_above(
    conn: &mut PgConnection,
    chain: Chain,
    block_number: u64,
) -> eyre::Result<u64> {
    let result = sqlx::query("DELETE FROM transfers WHERE chain = $1 AND block_number > $2")
        .bind(chain.as_str())
        .bind(block_number as i64)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
