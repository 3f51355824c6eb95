use petgraph::{Directed, graph::Graph};
use serde::Serialize;
use std::fmt::{Debug, Display};

/// Opaque wallet identifier. Nothing inspects its structure besides display truncation.
pub type Address = String;

/// Transaction identifier as stored in the ledger.
pub type TxHash = String;

/// Length of a canonical transaction hash (hex encoded SHA-256d).
pub const TX_HASH_LEN: usize = 64;

///
/// TransferGraph
///
/// A directed multigraph where the nodes are wallet addresses and the edges are
/// transfers observed in a single transaction. Parallel edges between the same
/// ordered pair are kept, one per contributing input/output pair.
/// For nodes, see `WalletNode`. For edges, see `TransferEdge`.
pub type TransferGraph = Graph<WalletNode, TransferEdge, Directed>;

///
/// RawTimestamp
///
/// The `time` column of a transaction as the store hands it over. Stores keep
/// either a formatted date-time string or a numeric epoch.
///
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    Text(String),
    Epoch(i64),
}

impl Display for RawTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawTimestamp::Text(text) => write!(f, "{}", text),
            RawTimestamp::Epoch(secs) => write!(f, "{}", secs),
        }
    }
}

impl From<&str> for RawTimestamp {
    fn from(value: &str) -> Self {
        RawTimestamp::Text(value.to_string())
    }
}

impl From<i64> for RawTimestamp {
    fn from(value: i64) -> Self {
        RawTimestamp::Epoch(value)
    }
}

///
/// TransactionRecord
///
/// A row of the transaction table. The totals are carried along for completeness
/// but the traversal only looks at the hash and the timestamp.
///
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub hash: TxHash,
    pub timestamp: RawTimestamp,
    pub input_total: f64,
    pub output_total: f64,
}

impl TransactionRecord {
    pub fn new(
        hash: impl Into<TxHash>,
        timestamp: impl Into<RawTimestamp>,
        input_total: f64,
        output_total: f64,
    ) -> Self {
        Self {
            hash: hash.into(),
            timestamp: timestamp.into(),
            input_total,
            output_total,
        }
    }
}

///
/// InputRecord
///
/// A spent prior output: the address that owned it and the value consumed.
/// `spending_transaction` points at the transaction that later spends the value
/// associated with this record, which is how successors are found.
///
#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    pub address: Address,
    pub value: f64,
    pub spending_transaction: Option<TxHash>,
}

impl InputRecord {
    pub fn new(address: impl Into<Address>, value: f64) -> Self {
        Self {
            address: address.into(),
            value,
            spending_transaction: None,
        }
    }

    pub fn spent_by(mut self, tx_hash: impl Into<TxHash>) -> Self {
        self.spending_transaction = Some(tx_hash.into());
        self
    }
}

///
/// OutputRecord
///
/// New spendable value credited to `address`.
///
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub address: Address,
    pub value: f64,
}

impl OutputRecord {
    pub fn new(address: impl Into<Address>, value: f64) -> Self {
        Self {
            address: address.into(),
            value,
        }
    }
}

///
/// WalletNode
///
/// Graph node. `balance` and `label` stay at their defaults until the builder
/// finalizes the graph.
///
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletNode {
    pub address: Address,
    pub balance: f64,
    pub label: String,
}

impl WalletNode {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            balance: 0.0,
            label: String::new(),
        }
    }
}

impl Display for WalletNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:.8})", self.address, self.balance)
    }
}

///
/// TransferEdge
///
/// One sender -> receiver relation inside a transaction. `value` is the value of
/// the output the edge points at, `date` is the transaction day (`%Y-%m-%d`).
///
#[derive(Clone, PartialEq, Serialize)]
pub struct TransferEdge {
    pub tx_id: TxHash,
    pub value: f64,
    pub date: String,
}

impl Debug for TransferEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TransferEdge {{ tx_id: {}, value: {}, date: {} }}",
            self.tx_id, self.value, self.date
        )
    }
}

impl Display for TransferEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} BTC on {} (tx {})", self.value, self.date, self.tx_id)
    }
}

///
/// TxStatus
///
/// What happened to a transaction once the traversal reached it. A hash that is
/// present in the visited set with any status is never expanded again.
///
#[derive(Debug, Clone, PartialEq)]
pub enum TxStatus {
    /// Marked visited, processing not finished yet.
    Pending,
    /// Inputs and outputs fetched and `edges` edges emitted.
    Expanded { edges: usize },
    /// The store has no such transaction.
    Missing,
    /// Processing was abandoned for this transaction only.
    Failed(String),
}

impl TxStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, TxStatus::Failed(_))
    }
}

/// Shortens an address for display, `1A1zP1...DivfNa` style.
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Node label written during finalization.
pub fn node_label(address: &str, balance: f64) -> String {
    format!("{}\nBalance: {:.8} BTC", short_address(address), balance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_address_keeps_head_and_tail() {
        assert_eq!(
            short_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            "1A1zP1...vfNa"
        );
        assert_eq!(short_address("tiny"), "tiny");
    }

    #[test]
    fn node_label_formats_balance_with_eight_decimals() {
        assert_eq!(node_label("A", -10.0), "A\nBalance: -10.00000000 BTC");
    }

    #[test]
    fn input_record_builder_sets_spender() {
        let input = InputRecord::new("A", 1.5).spent_by("tx9");
        assert_eq!(input.spending_transaction.as_deref(), Some("tx9"));
    }
}
