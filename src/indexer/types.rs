use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Chains a worker can be pointed at. Stored as upper-case text on every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Ethereum,
    Polygon,
    Arbitrum,
    Base,
}

impl Chain {
    pub const ALL: [Chain; 4] = [Chain::Ethereum, Chain::Polygon, Chain::Arbitrum, Chain::Base];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETHEREUM",
            Chain::Polygon => "POLYGON",
            Chain::Arbitrum => "ARBITRUM",
            Chain::Base => "BASE",
        }
    }

    /// EIP-155 chain id reported by a mainnet node of this chain.
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Polygon => 137,
            Chain::Arbitrum => 42161,
            Chain::Base => 8453,
        }
    }

    /// Environment variable holding this chain's RPC endpoint.
    pub fn rpc_url_var(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETHEREUM_RPC_URL",
            Chain::Polygon => "POLYGON_RPC_URL",
            Chain::Arbitrum => "ARBITRUM_RPC_URL",
            Chain::Base => "BASE_RPC_URL",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An active wallet row as read from the `wallets` table.
#[derive(Debug, Clone)]
pub struct WatchedWallet {
    pub id: Uuid,
    pub address: String,
}

/// A non-native token row as read from the `tokens` table.
#[derive(Debug, Clone)]
pub struct WatchedToken {
    pub id: Uuid,
    pub contract_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Value carried in a transaction's `value` field.
    Native,
    /// Standard fungible-token `Transfer` log.
    Erc20,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Native => "TRANSFER",
            TransferKind::Erc20 => "ERC20_TRANSFER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Confirmed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Confirmed => "CONFIRMED",
        }
    }
}

/// A wallet-attributed transfer, ready for DB insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub wallet_id: Uuid,
    pub hash: String,
    pub chain: Chain,
    /// Checksummed for display; matching always happens on the lower-cased form.
    pub from_address: String,
    /// Empty for contract creations.
    pub to_address: String,
    /// `None` for the chain's native asset.
    pub token_id: Option<Uuid>,
    /// Exact base-unit integer in decimal.
    pub amount: String,
    pub block_number: u64,
    pub block_hash: String,
    /// `None` for native transfers.
    pub log_index: Option<u32>,
    pub status: TransferStatus,
    pub kind: TransferKind,
}

/// A transaction as the extractor needs it. `from` is `None` when the
/// signature did not recover to a sender.
#[derive(Debug, Clone)]
pub struct ChainTransaction {
    pub hash: B256,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: U256,
}

/// A block with its full transaction list.
#[derive(Debug, Clone)]
pub struct ChainBlock {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
    pub transactions: Vec<ChainTransaction>,
}

/// Persisted high-water mark for a chain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChainCursor {
    pub last_block: u64,
    /// Block hash at `last_block`; `None` right after a rollback or when no
    /// hash was ever recorded.
    pub last_block_hash: Option<String>,
}

/// Lower-case `0x` hex, the form used for every lookup key.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}
