//! In-memory stand-ins for the chain, the store and the bus.

use alloy::primitives::{Address, Bytes, LogData, B256, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use chrono::DateTime;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::db::store::TransferStore;
use crate::events::publisher::EventPublisher;
use crate::events::subjects::TransactionFoundEvent;
use crate::indexer::client::ChainClient;
use crate::indexer::decoder::TRANSFER_TOPIC;
use crate::indexer::types::{
    Chain, ChainBlock, ChainCursor, ChainTransaction, TransferKind, TransferRecord,
    TransferStatus, WatchedToken, WatchedWallet,
};

pub const GENESIS_TIME: u64 = 1_700_000_000;

pub fn addr(s: &str) -> Address {
    s.parse().expect("valid test address")
}

/// A Transfer log emitted by `contract` in `block`.
pub fn token_log(
    contract: &str,
    from: &str,
    to: &str,
    amount: U256,
    block: u64,
    log_index: u64,
) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: addr(contract),
            data: LogData::new_unchecked(
                vec![TRANSFER_TOPIC, addr(from).into_word(), addr(to).into_word()],
                Bytes::from(amount.to_be_bytes::<32>().to_vec()),
            ),
        },
        block_number: Some(block),
        log_index: Some(log_index),
        transaction_hash: Some(B256::from(U256::from(block) << 64usize | U256::from(log_index))),
        ..Default::default()
    }
}

/// A persisted-looking row at `block`, consistent with `chain`'s hashes.
pub fn transfer_at(chain: Chain, block: u64, wallet_id: Uuid, fake: &FakeChain) -> TransferRecord {
    TransferRecord {
        id: Uuid::new_v4(),
        time: DateTime::from_timestamp(fake.timestamp_of(block) as i64, 0).unwrap_or_default(),
        wallet_id,
        hash: format!("0x{}", Uuid::new_v4().simple()),
        chain,
        from_address: "0x00000000000000000000000000000000000000A1".to_string(),
        to_address: "0x00000000000000000000000000000000000000B2".to_string(),
        token_id: None,
        amount: "1".to_string(),
        block_number: block,
        block_hash: format!("{:#x}", fake.hash_of(block)),
        log_index: None,
        status: TransferStatus::Confirmed,
        kind: TransferKind::Native,
    }
}

#[derive(Default)]
struct FakeChainState {
    head: u64,
    fork: u64,
    blocks: BTreeMap<u64, ChainBlock>,
    logs: Vec<Log>,
    balances: HashMap<Address, U256>,
    fail_logs: bool,
    fetched: Vec<u64>,
    /// `(fetches left, height)`: reorganize from `height` once that many
    /// more blocks have been served.
    pending_reorg: Option<(usize, u64)>,
}

impl FakeChainState {
    fn reorg_from(&mut self, number: u64) {
        self.fork += 1;
        let fork = self.fork;
        for (n, block) in self.blocks.range_mut(number..) {
            block.hash = fake_hash(*n, fork);
        }
    }
}

/// Scripted chain. Blocks `0..=head` exist; their hashes change when the
/// chain is reorganized.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<FakeChainState>,
}

fn fake_hash(number: u64, fork: u64) -> B256 {
    B256::from(U256::from(fork + 1) << 128usize | U256::from(number))
}

impl FakeChain {
    pub fn with_empty_blocks(head: u64) -> Self {
        let chain = Self::default();
        chain.extend_to(head);
        chain
    }

    pub fn extend_to(&self, head: u64) {
        let mut state = self.state.lock().unwrap();
        let fork = state.fork;
        for number in 0..=head {
            state.blocks.entry(number).or_insert_with(|| ChainBlock {
                number,
                hash: fake_hash(number, fork),
                parent_hash: B256::ZERO,
                timestamp: GENESIS_TIME + number * 12,
                transactions: Vec::new(),
            });
        }
        state.head = state.head.max(head);
    }

    pub fn set_transactions(&self, number: u64, transactions: Vec<ChainTransaction>) {
        let mut state = self.state.lock().unwrap();
        if let Some(block) = state.blocks.get_mut(&number) {
            block.transactions = transactions;
        }
    }

    pub fn push_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn fail_logs(&self, fail: bool) {
        self.state.lock().unwrap().fail_logs = fail;
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert(address, balance);
    }

    /// Replace every block from `number` upward with a sibling of a new fork.
    pub fn reorg_from(&self, number: u64) {
        self.state.lock().unwrap().reorg_from(number);
    }

    /// Reorganize from `number` after `after` more blocks have been fetched.
    pub fn reorg_during_fetch(&self, after: usize, number: u64) {
        self.state.lock().unwrap().pending_reorg = Some((after, number));
    }

    pub fn set_timestamp(&self, number: u64, timestamp: u64) {
        if let Some(block) = self.state.lock().unwrap().blocks.get_mut(&number) {
            block.timestamp = timestamp;
        }
    }

    pub fn hash_of(&self, number: u64) -> B256 {
        self.state
            .lock()
            .unwrap()
            .blocks
            .get(&number)
            .map(|b| b.hash)
            .unwrap_or_default()
    }

    pub fn timestamp_of(&self, number: u64) -> u64 {
        self.state
            .lock()
            .unwrap()
            .blocks
            .get(&number)
            .map(|b| b.timestamp)
            .unwrap_or(GENESIS_TIME + number * 12)
    }

    /// Block numbers fetched by `block_by_height` since the last call.
    pub fn take_fetched(&self) -> Vec<u64> {
        std::mem::take(&mut self.state.lock().unwrap().fetched)
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn latest_height(&self) -> eyre::Result<u64> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_by_height(&self, number: u64) -> eyre::Result<ChainBlock> {
        let mut state = self.state.lock().unwrap();
        match state.pending_reorg.take() {
            Some((0, from)) => state.reorg_from(from),
            Some((left, from)) => state.pending_reorg = Some((left - 1, from)),
            None => {}
        }
        state.fetched.push(number);

        let parent_hash = number
            .checked_sub(1)
            .and_then(|parent| state.blocks.get(&parent))
            .map(|b| b.hash)
            .unwrap_or_default();
        let mut block = state
            .blocks
            .get(&number)
            .cloned()
            .ok_or_else(|| eyre::eyre!("block {} not found", number))?;
        block.parent_hash = parent_hash;
        Ok(block)
    }

    async fn logs_by_topic(
        &self,
        from_block: u64,
        to_block: u64,
        topic0: B256,
    ) -> eyre::Result<Vec<Log>> {
        let state = self.state.lock().unwrap();
        if state.fail_logs {
            return Err(eyre::eyre!("eth_getLogs: query timeout exceeded"));
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                let in_range = log
                    .block_number
                    .is_some_and(|n| (from_block..=to_block).contains(&n));
                in_range && log.inner.data.topics().first() == Some(&topic0)
            })
            .cloned()
            .collect())
    }

    async fn block_hash_by_height(&self, number: u64) -> eyre::Result<B256> {
        self.state
            .lock()
            .unwrap()
            .blocks
            .get(&number)
            .map(|b| b.hash)
            .ok_or_else(|| eyre::eyre!("block {} not found", number))
    }

    async fn balance_at(&self, address: Address) -> eyre::Result<U256> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct MemoryState {
    wallets: Vec<(Chain, WatchedWallet)>,
    tokens: Vec<(Chain, WatchedToken)>,
    rows: Vec<TransferRecord>,
    cursors: HashMap<Chain, ChainCursor>,
    fail_commits: bool,
    fail_rollbacks: bool,
}

/// Store with the same all-or-nothing and uniqueness rules as Postgres.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

type IdempotenceKey = (Chain, String, Option<u32>, Uuid);

fn key_of(t: &TransferRecord) -> IdempotenceKey {
    (t.chain, t.hash.to_ascii_lowercase(), t.log_index, t.wallet_id)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_wallet(&self, chain: Chain, address: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().wallets.push((
            chain,
            WatchedWallet {
                id,
                address: address.to_string(),
            },
        ));
        id
    }

    pub fn add_token(&self, chain: Chain, contract_address: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().tokens.push((
            chain,
            WatchedToken {
                id,
                contract_address: contract_address.to_string(),
            },
        ));
        id
    }

    pub fn insert_row(&self, row: TransferRecord) {
        self.state.lock().unwrap().rows.push(row);
    }

    pub fn set_cursor(&self, chain: Chain, cursor: ChainCursor) {
        self.state.lock().unwrap().cursors.insert(chain, cursor);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().unwrap().fail_commits = fail;
    }

    pub fn fail_rollbacks(&self, fail: bool) {
        self.state.lock().unwrap().fail_rollbacks = fail;
    }

    pub fn rows(&self, chain: Chain) -> Vec<TransferRecord> {
        self.state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|t| t.chain == chain)
            .cloned()
            .collect()
    }

    pub fn contains(&self, chain: &str, hash: &str, wallet_id: Uuid) -> bool {
        self.state.lock().unwrap().rows.iter().any(|t| {
            t.chain.as_str() == chain && t.hash.eq_ignore_ascii_case(hash) && t.wallet_id == wallet_id
        })
    }

    pub fn head_now(&self, chain: Chain) -> ChainCursor {
        Self::head_of(&self.state.lock().unwrap(), chain)
    }

    fn head_of(state: &MemoryState, chain: Chain) -> ChainCursor {
        if let Some(cursor) = state.cursors.get(&chain) {
            return cursor.clone();
        }
        let rows = state.rows.iter().filter(|t| t.chain == chain);
        match rows.max_by_key(|t| t.block_number) {
            Some(top) => ChainCursor {
                last_block: top.block_number,
                last_block_hash: Some(top.block_hash.clone()),
            },
            None => ChainCursor::default(),
        }
    }
}

#[async_trait]
impl TransferStore for MemoryStore {
    async fn active_wallets(&self, chain: Chain) -> eyre::Result<Vec<WatchedWallet>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .wallets
            .iter()
            .filter(|(c, _)| *c == chain)
            .map(|(_, w)| w.clone())
            .collect())
    }

    async fn tracked_tokens(&self, chain: Chain) -> eyre::Result<Vec<WatchedToken>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tokens
            .iter()
            .filter(|(c, _)| *c == chain)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn head(&self, chain: Chain) -> eyre::Result<ChainCursor> {
        Ok(Self::head_of(&self.state.lock().unwrap(), chain))
    }

    async fn commit_batch(
        &self,
        chain: Chain,
        transfers: &[TransferRecord],
        cursor: &ChainCursor,
    ) -> eyre::Result<Vec<Uuid>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commits {
            return Err(eyre::eyre!("connection reset by peer"));
        }

        let mut seen: HashSet<IdempotenceKey> = state.rows.iter().map(key_of).collect();
        let mut inserted = Vec::new();
        for transfer in transfers {
            if seen.insert(key_of(transfer)) {
                state.rows.push(transfer.clone());
                inserted.push(transfer.id);
            }
        }
        state.cursors.insert(chain, cursor.clone());
        Ok(inserted)
    }

    async fn rollback_above(&self, chain: Chain, pivot: u64) -> eyre::Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.fail_rollbacks {
            return Err(eyre::eyre!("canceling statement due to lock timeout"));
        }

        let before = state.rows.len();
        state
            .rows
            .retain(|t| t.chain != chain || t.block_number <= pivot);
        let deleted = (before - state.rows.len()) as u64;
        state.cursors.insert(
            chain,
            ChainCursor {
                last_block: pivot,
                last_block_hash: None,
            },
        );
        Ok(deleted)
    }
}

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    /// Whether the row behind the event was already in the store.
    pub visible_in_store: Option<bool>,
}

/// Publisher that keeps every message. When given a store, it records
/// whether each event's row was committed at the moment of publishing.
#[derive(Default)]
pub struct RecordingPublisher {
    store: Option<Arc<MemoryStore>>,
    messages: Mutex<Vec<PublishedMessage>>,
    fail: AtomicBool,
    flushes: AtomicUsize,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watching(store: Arc<MemoryStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<TransactionFoundEvent> {
        self.messages()
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).expect("valid event payload"))
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, subject: &'static str, payload: Vec<u8>) -> eyre::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(eyre::eyre!("nats: no responders"));
        }

        let visible_in_store = self.store.as_ref().map(|store| {
            let event: TransactionFoundEvent =
                serde_json::from_slice(&payload).expect("valid event payload");
            store.contains(&event.chain, &event.hash, event.wallet_id)
        });

        self.messages.lock().unwrap().push(PublishedMessage {
            subject: subject.to_string(),
            payload,
            visible_in_store,
        });
        Ok(())
    }

    async fn flush(&self) -> eyre::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
