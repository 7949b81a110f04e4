use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;

// Generate the Transfer event ABI using alloy's sol! macro.
// This gives us Transfer::SIGNATURE_HASH (0xddf252ad...b3ef).
sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// topic0 of the standard fungible-token Transfer event.
pub const TRANSFER_TOPIC: B256 = Transfer::SIGNATURE_HASH;

/// Decoded transfer data before attribution and block info are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTransfer {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub token_address: Address,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub tx_hash: B256,
}

/// Attempt to decode a log as a fungible-token Transfer event.
///
/// Returns `None` if:
/// - The log doesn't carry exactly three topics with the Transfer signature first
/// - The data is longer than one 256-bit word
pub fn decode_transfer_log(log: &Log) -> Option<DecodedTransfer> {
    let inner = &log.inner;
    let topics = inner.data.topics();

    // Signature + from + to. Four topics means an ERC-721 style Transfer.
    if topics.len() != 3 || topics[0] != TRANSFER_TOPIC {
        return None;
    }

    // Indexed addresses are the low 20 bytes of their topic
    let from = Address::from_word(topics[1]);
    let to = Address::from_word(topics[2]);

    // Big-endian over the whole data section; empty data is zero
    let amount = U256::try_from_be_slice(inner.data.data.as_ref())?;

    Some(DecodedTransfer {
        from,
        to,
        amount,
        token_address: inner.address,
        block_number: log.block_number,
        log_index: log.log_index,
        tx_hash: log.transaction_hash.unwrap_or_default(),
    })
}
