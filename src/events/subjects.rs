use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::indexer::types::TransferRecord;

/// One message per committed transfer row.
pub const SUBJECT_TRANSACTION_FOUND: &str = "indexer.transaction.found";

// Reserved for other platform services; the sync engine does not publish these.
pub const SUBJECT_TOKEN_TRANSFER_FOUND: &str = "indexer.token_transfer.found";
pub const SUBJECT_WALLET_BALANCE_UPDATE: &str = "indexer.wallet.balance_update";
pub const SUBJECT_BLOCK_PROCESSED: &str = "indexer.block.processed";
pub const SUBJECT_INDEXER_STATUS: &str = "indexer.status";

/// Payload on `indexer.transaction.found`. Consumers deduplicate on
/// `(chain, hash, wallet_id, token_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFoundEvent {
    pub chain: String,
    pub hash: String,
    pub block_number: u64,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub timestamp: DateTime<Utc>,
    pub wallet_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<&TransferRecord> for TransactionFoundEvent {
    fn from(t: &TransferRecord) -> Self {
        Self {
            chain: t.chain.as_str().to_string(),
            hash: t.hash.clone(),
            block_number: t.block_number,
            from: t.from_address.clone(),
            to: t.to_address.clone(),
            amount: t.amount.clone(),
            timestamp: t.time,
            wallet_id: t.wallet_id,
            token_id: t.token_id,
            kind: t.kind.as_str().to_string(),
        }
    }
}
