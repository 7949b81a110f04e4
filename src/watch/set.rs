use std::collections::HashMap;
use uuid::Uuid;

use crate::db::store::TransferStore;
use crate::indexer::types::{normalize_address, Chain, WatchedToken, WatchedWallet};

/// Addresses and token contracts monitored on one chain, keyed by
/// lower-cased hex. Built once per cycle and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    wallet_by_address: HashMap<String, Uuid>,
    token_by_contract: HashMap<String, Uuid>,
}

impl WatchSet {
    pub fn new(wallets: &[WatchedWallet], tokens: &[WatchedToken]) -> Self {
        let mut wallet_by_address = HashMap::with_capacity(wallets.len());
        for wallet in wallets {
            let key = normalize_address(&wallet.address);
            if let Some(existing) = wallet_by_address.get(&key) {
                tracing::warn!(
                    address = %key,
                    kept = %existing,
                    ignored = %wallet.id,
                    "Duplicate watched wallet address, keeping the first"
                );
                continue;
            }
            wallet_by_address.insert(key, wallet.id);
        }

        let mut token_by_contract = HashMap::with_capacity(tokens.len());
        for token in tokens {
            token_by_contract
                .entry(normalize_address(&token.contract_address))
                .or_insert(token.id);
        }

        Self {
            wallet_by_address,
            token_by_contract,
        }
    }

    /// Load the watch set for `chain` from the store.
    pub async fn load<S>(store: &S, chain: Chain) -> eyre::Result<Self>
    where
        S: TransferStore + ?Sized,
    {
        let wallets = store.active_wallets(chain).await?;
        let tokens = store.tracked_tokens(chain).await?;
        Ok(Self::new(&wallets, &tokens))
    }

    pub fn wallet_for(&self, address: &str) -> Option<Uuid> {
        self.wallet_by_address
            .get(&normalize_address(address))
            .copied()
    }

    /// Wallet a transfer is attributed to: the sender if watched, else the
    /// recipient. An empty `to` (contract creation) never matches.
    pub fn attribute(&self, from: &str, to: &str) -> Option<Uuid> {
        self.wallet_for(from).or_else(|| {
            if to.is_empty() {
                None
            } else {
                self.wallet_for(to)
            }
        })
    }

    pub fn token_for(&self, contract: &str) -> Option<Uuid> {
        self.token_by_contract
            .get(&normalize_address(contract))
            .copied()
    }

    pub fn wallet_count(&self) -> usize {
        self.wallet_by_address.len()
    }

    pub fn token_count(&self) -> usize {
        self.token_by_contract.len()
    }

    pub fn has_wallets(&self) -> bool {
        !self.wallet_by_address.is_empty()
    }
}
