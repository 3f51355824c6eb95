use crate::{
    data_sources::{LedgerSource, dedup_hashes},
    error::LedgerError,
    types::*,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use std::{cell::RefCell, collections::HashMap, fmt::Display, time::Duration};
use tokio::runtime::Runtime;
use tracing::{debug, info};

pub const DEFAULT_API_BASE: &str = "https://blockchain.info";

const SATOSHI_PER_BTC: f64 = 1e8;

#[derive(Debug, Clone, Deserialize)]
struct ApiOutput {
    addr: Option<String>,
    #[serde(default)]
    value: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiInput {
    prev_out: Option<ApiOutput>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiTransaction {
    hash: String,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    inputs: Vec<ApiInput>,
    #[serde(default)]
    out: Vec<ApiOutput>,
}

impl ApiTransaction {
    fn input_outputs(&self) -> impl Iterator<Item = &ApiOutput> {
        self.inputs.iter().filter_map(|input| input.prev_out.as_ref())
    }

    fn spends_from(&self, address: &str) -> bool {
        self.input_outputs()
            .any(|prev| prev.addr.as_deref() == Some(address))
    }

    fn mentions(&self, address: &str) -> bool {
        self.spends_from(address) || self.out.iter().any(|o| o.addr.as_deref() == Some(address))
    }
}

#[derive(Debug, Deserialize)]
struct ApiAddress {
    #[serde(default)]
    txs: Vec<ApiTransaction>,
}

fn btc(satoshi: u64) -> f64 {
    satoshi as f64 / SATOSHI_PER_BTC
}

/// BlockchainInfoSource
///
/// Fetches transactions from the blockchain.info JSON API (`rawtx`, `rawaddr`).
///
/// Responses are cached for the lifetime of the source, so a traversal asks for
/// every transaction and address at most once. Values are converted from satoshi
/// to BTC. The API does not name the spender of an input, so inputs carry no
/// `spending_transaction`; successors come from the address history instead.
pub struct BlockchainInfoSource {
    runtime: Runtime,
    client: Client,
    base_url: String,
    tx_limit: usize,
    transactions: RefCell<HashMap<TxHash, Option<ApiTransaction>>>,
    addresses: RefCell<HashMap<Address, Vec<TxHash>>>,
}

impl Display for BlockchainInfoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockchainInfoSource({})", self.base_url)
    }
}

impl BlockchainInfoSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, LedgerError> {
        let runtime = Runtime::new()
            .map_err(|e| LedgerError::Malformed(format!("failed to start runtime: {}", e)))?;
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let base_url: String = base_url.into();

        Ok(Self {
            runtime,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tx_limit: 50,
            transactions: RefCell::new(HashMap::new()),
            addresses: RefCell::new(HashMap::new()),
        })
    }

    /// Maximum number of transactions requested per address.
    pub fn with_tx_limit(mut self, tx_limit: usize) -> Self {
        self.tx_limit = tx_limit;
        self
    }

    /// GETs `url` and decodes the JSON body. A 404 is `Ok(None)`.
    fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, LedgerError> {
        debug!("GET {}", url);
        self.runtime.block_on(async {
            let response = self.client.get(url).send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let body = response.error_for_status()?.json::<T>().await?;
            Ok::<_, LedgerError>(Some(body))
        })
    }

    fn ingest_transaction(&self, tx_hash: &str, tx: Option<ApiTransaction>) {
        self.transactions.borrow_mut().insert(tx_hash.to_string(), tx);
    }

    fn ingest_address(&self, address: &str, history: Option<ApiAddress>) {
        let txs = history.map(|history| history.txs).unwrap_or_default();
        info!("Fetched {} transactions for {}", txs.len(), address);

        let hashes = txs.iter().map(|tx| tx.hash.clone()).collect();
        let mut cache = self.transactions.borrow_mut();
        for tx in txs {
            cache.entry(tx.hash.clone()).or_insert(Some(tx));
        }
        self.addresses
            .borrow_mut()
            .insert(address.to_string(), hashes);
    }

    fn transaction(&self, tx_hash: &str) -> Result<Option<ApiTransaction>, LedgerError> {
        if let Some(cached) = self.transactions.borrow().get(tx_hash) {
            return Ok(cached.clone());
        }
        let tx = self.fetch(&format!("{}/rawtx/{}", self.base_url, tx_hash))?;
        self.ingest_transaction(tx_hash, tx);
        Ok(self.transactions.borrow().get(tx_hash).cloned().flatten())
    }

    fn address_history(&self, address: &str) -> Result<Vec<ApiTransaction>, LedgerError> {
        if !self.addresses.borrow().contains_key(address) {
            let url = format!(
                "{}/rawaddr/{}?limit={}",
                self.base_url, address, self.tx_limit
            );
            let history = self.fetch(&url)?;
            self.ingest_address(address, history);
        }

        let addresses = self.addresses.borrow();
        let transactions = self.transactions.borrow();
        let history = addresses
            .get(address)
            .into_iter()
            .flatten()
            .filter_map(|hash| transactions.get(hash).cloned().flatten())
            .collect();
        Ok(history)
    }
}

impl LedgerSource for BlockchainInfoSource {
    fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>, LedgerError> {
        Ok(self.transaction(tx_hash)?.map(|tx| TransactionRecord {
            input_total: btc(tx.input_outputs().map(|prev| prev.value).sum()),
            output_total: btc(tx.out.iter().map(|o| o.value).sum()),
            timestamp: RawTimestamp::Epoch(tx.time),
            hash: tx.hash,
        }))
    }

    fn get_inputs(&self, tx_hash: &str) -> Result<Vec<InputRecord>, LedgerError> {
        let Some(tx) = self.transaction(tx_hash)? else {
            return Ok(Vec::new());
        };
        Ok(tx
            .input_outputs()
            .filter_map(|prev| {
                prev.addr
                    .as_ref()
                    .map(|addr| InputRecord::new(addr.clone(), btc(prev.value)))
            })
            .collect())
    }

    fn get_outputs(&self, tx_hash: &str) -> Result<Vec<OutputRecord>, LedgerError> {
        let Some(tx) = self.transaction(tx_hash)? else {
            return Ok(Vec::new());
        };
        Ok(tx
            .out
            .iter()
            .filter_map(|o| {
                o.addr
                    .as_ref()
                    .map(|addr| OutputRecord::new(addr.clone(), btc(o.value)))
            })
            .collect())
    }

    fn find_successor_transactions(&self, address: &str) -> Result<Vec<TxHash>, LedgerError> {
        Ok(self
            .address_history(address)?
            .into_iter()
            .filter(|tx| tx.spends_from(address))
            .map(|tx| tx.hash)
            .collect())
    }

    fn find_transactions_touching_address(
        &self,
        address: &str,
    ) -> Result<Vec<TxHash>, LedgerError> {
        let history = self.address_history(address)?;
        Ok(dedup_hashes(
            history
                .into_iter()
                .filter(|tx| tx.mentions(address))
                .map(|tx| tx.hash),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAWADDR: &str = r#"{
        "address": "addrA",
        "txs": [
            {
                "hash": "h2",
                "time": 1704153600,
                "inputs": [{"prev_out": {"addr": "addrA", "value": 150000000}}],
                "out": [{"addr": "addrC", "value": 100000000}, {"value": 50000000}]
            },
            {
                "hash": "h1",
                "time": 1704067200,
                "inputs": [{"prev_out": {"addr": "addrZ", "value": 200000000}}, {}],
                "out": [{"addr": "addrA", "value": 150000000}, {"addr": "addrZ", "value": 50000000}]
            }
        ]
    }"#;

    fn source() -> BlockchainInfoSource {
        let source = BlockchainInfoSource::new("http://127.0.0.1:9/").unwrap();
        let history: ApiAddress = serde_json::from_str(RAWADDR).unwrap();
        source.ingest_address("addrA", Some(history));
        source
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(source().to_string(), "BlockchainInfoSource(http://127.0.0.1:9)");
    }

    #[test]
    fn address_history_feeds_transaction_cache() {
        let source = source();
        let tx = source.get_transaction("h1").unwrap().unwrap();
        assert_eq!(tx.timestamp, RawTimestamp::Epoch(1_704_067_200));
        assert_eq!(tx.input_total, 2.0);
        assert_eq!(tx.output_total, 2.0);
    }

    #[test]
    fn records_drop_entries_without_address() {
        let source = source();
        assert_eq!(
            source.get_inputs("h1").unwrap(),
            vec![InputRecord::new("addrZ", 2.0)]
        );
        assert_eq!(
            source.get_outputs("h2").unwrap(),
            vec![OutputRecord::new("addrC", 1.0)]
        );
    }

    #[test]
    fn successors_are_transactions_spending_from_address() {
        let source = source();
        assert_eq!(
            source.find_successor_transactions("addrA").unwrap(),
            vec!["h2".to_string()]
        );
        assert_eq!(
            source.find_transactions_touching_address("addrA").unwrap(),
            vec!["h2".to_string(), "h1".to_string()]
        );
    }

    #[test]
    fn not_found_transaction_is_cached_as_missing() {
        let source = source();
        source.ingest_transaction("gone", None);
        assert!(source.get_transaction("gone").unwrap().is_none());
        assert!(source.get_outputs("gone").unwrap().is_empty());
    }
}
