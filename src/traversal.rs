use crate::{
    balance::BalanceLedger,
    data_sources::LedgerSource,
    error::{ExpandError, GraphError, Result},
    timestamp::edge_date,
    types::*,
};
use petgraph::graph::NodeIndex;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

///
/// VisitedSet
///
/// Transactions reached by one traversal, with what happened to each of them.
/// Membership alone decides whether a transaction may be expanded; a hash is
/// inserted before its expansion starts and never removed.
///
#[derive(Debug, Default, Clone)]
pub struct VisitedSet {
    statuses: HashMap<TxHash, TxStatus>,
    order: Vec<TxHash>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tx_hash: &str) -> bool {
        self.statuses.contains_key(tx_hash)
    }

    /// Marks `tx_hash` as `Pending`. Returns false if it was already visited.
    pub fn mark(&mut self, tx_hash: &str) -> bool {
        if self.contains(tx_hash) {
            return false;
        }
        self.statuses.insert(tx_hash.to_string(), TxStatus::Pending);
        self.order.push(tx_hash.to_string());
        true
    }

    fn settle(&mut self, tx_hash: &str, status: TxStatus) {
        if let Some(entry) = self.statuses.get_mut(tx_hash) {
            *entry = status;
        }
    }

    pub fn status(&self, tx_hash: &str) -> Option<&TxStatus> {
        self.statuses.get(tx_hash)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Visited transactions in the order they were reached.
    pub fn iter(&self) -> impl Iterator<Item = (&TxHash, &TxStatus)> {
        self.order
            .iter()
            .filter_map(|hash| self.statuses.get_key_value(hash))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&TxHash, &TxStatus)> {
        self.iter().filter(|(_, status)| status.is_failed())
    }
}

///
/// TraversalContext
///
/// All mutable state of one traversal. Each `GraphBuilder` owns exactly one, so
/// independent builds never share a visited set, balances or graph.
///
#[derive(Debug, Default)]
pub struct TraversalContext {
    pub visited: VisitedSet,
    pub balances: BalanceLedger,
    pub graph: TransferGraph,
    // addr_idx_map maps addresses to their node index so edges can be added by address
    addr_idx_map: HashMap<Address, NodeIndex>,
}

impl TraversalContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, address: &str) -> NodeIndex {
        if let Some(idx) = self.addr_idx_map.get(address) {
            return *idx;
        }
        let idx = self.graph.add_node(WalletNode::new(address.to_string()));
        self.addr_idx_map.insert(address.to_string(), idx);
        idx
    }

    pub fn node_index(&self, address: &str) -> Option<NodeIndex> {
        self.addr_idx_map.get(address).copied()
    }

    /// Emits one edge per input/output pair and books both sides of every pair.
    ///
    /// A transaction with m inputs and n outputs yields m*n edges, and each input
    /// is debited n times. This over-counts against a real ledger whenever m or n
    /// exceeds one; it is the model the graph is defined by.
    fn add_transfers(
        &mut self,
        tx_hash: &str,
        date: &str,
        inputs: &[InputRecord],
        outputs: &[OutputRecord],
    ) -> usize {
        for input in inputs {
            for output in outputs {
                let from_idx = self.node(&input.address);
                let to_idx = self.node(&output.address);
                self.graph.add_edge(
                    from_idx,
                    to_idx,
                    TransferEdge {
                        tx_id: tx_hash.to_string(),
                        value: output.value,
                        date: date.to_string(),
                    },
                );
                self.balances.credit(&input.address, -input.value);
                self.balances.credit(&output.address, output.value);
            }
        }
        inputs.len() * outputs.len()
    }
}

///
/// Target
///
/// What a user-supplied seed refers to. A seed of exactly `TX_HASH_LEN`
/// characters is a transaction hash, anything else is an address.
///
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Transaction(TxHash),
    Address(Address),
}

impl Target {
    pub fn classify(seed: &str) -> Self {
        if seed.len() == TX_HASH_LEN {
            Target::Transaction(seed.to_string())
        } else {
            Target::Address(seed.to_string())
        }
    }

    /// Validates and classifies a seed. `address_lengths`, when not empty, lists
    /// the address lengths accepted for address seeds.
    pub fn parse(seed: &str, address_lengths: &[usize]) -> Result<Self> {
        let invalid = |reason: String| GraphError::InvalidSeed {
            seed: seed.to_string(),
            reason,
        };

        if seed.trim().is_empty() {
            return Err(invalid("seed is empty".into()));
        }
        if !seed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("seed must be ASCII alphanumeric".into()));
        }

        let target = Target::classify(seed);
        match &target {
            Target::Transaction(hash) => {
                if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(invalid("transaction hash must be hexadecimal".into()));
                }
            }
            Target::Address(address) => {
                if !address_lengths.is_empty() && !address_lengths.contains(&address.len()) {
                    return Err(invalid(format!(
                        "address length {} not in {:?}",
                        address.len(),
                        address_lengths
                    )));
                }
            }
        }
        Ok(target)
    }
}

/// Produces the transactions a build starts from, each to be expanded at depth 1.
///
/// A failing address query is logged and yields no seeds.
pub fn resolve_target<L: LedgerSource>(ledger: &L, target: &Target) -> Vec<TxHash> {
    match target {
        Target::Transaction(hash) => vec![hash.clone()],
        Target::Address(address) => match ledger.find_transactions_touching_address(address) {
            Ok(hashes) => {
                info!("Address {} appears in {} transactions", address, hashes.len());
                hashes
            }
            Err(e) => {
                warn!("Failed to get transactions of wallet {}: {}", address, e);
                Vec::new()
            }
        },
    }
}

/// Knobs for a whole build.
#[derive(Debug, Clone, Default)]
pub struct TraversalOptions {
    /// 0 means unbounded.
    pub max_depth: usize,
    /// Stop reaching new transactions once this many have been visited.
    pub max_transactions: Option<usize>,
    pub address_lengths: Vec<usize>,
}

/// Outcome of a finished build: the finalized graph plus the traversal state it came from.
#[derive(Debug)]
pub struct TraversalReport {
    pub graph: TransferGraph,
    pub balances: BalanceLedger,
    pub visited: VisitedSet,
}

// Successors of an expanded transaction that are still to be explored
struct Frame {
    depth: usize,
    pending: VecDeque<TxHash>,
}

///
/// GraphBuilder
///
/// Expands transactions depth-first from a seed, following outputs to the
/// transactions that later spend them.
///
/// The walk uses an explicit stack of frames instead of recursion but visits
/// transactions in the same order a recursive walk would: every successor of the
/// first output is explored completely before the second output's successors.
///
pub struct GraphBuilder<L: LedgerSource> {
    ledger: L,
    ctx: TraversalContext,
    max_transactions: Option<usize>,
}

impl<L: LedgerSource> GraphBuilder<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            ctx: TraversalContext::new(),
            max_transactions: None,
        }
    }

    pub fn with_max_transactions(mut self, max_transactions: Option<usize>) -> Self {
        self.max_transactions = max_transactions;
        self
    }

    pub fn context(&self) -> &TraversalContext {
        &self.ctx
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Expands `tx_hash` and everything reachable from it within the depth budget.
    ///
    /// `max_depth == 0` means unbounded. Already visited transactions are skipped,
    /// so calling this again for the same hash changes nothing. Failures are
    /// recorded on the failing transaction and never stop the walk.
    pub fn expand(&mut self, tx_hash: &str, current_depth: usize, max_depth: usize) {
        let mut stack: Vec<Frame> = Vec::new();
        if let Some(frame) = self.visit(tx_hash, current_depth, max_depth) {
            stack.push(frame);
        }

        while let Some(frame) = stack.last_mut() {
            let Some(next) = frame.pending.pop_front() else {
                stack.pop();
                continue;
            };
            let depth = frame.depth + 1;
            if let Some(child) = self.visit(&next, depth, max_depth) {
                stack.push(child);
            }
        }
    }

    fn visit(&mut self, tx_hash: &str, depth: usize, max_depth: usize) -> Option<Frame> {
        if self.ctx.visited.contains(tx_hash) {
            return None;
        }
        if let Some(limit) = self.max_transactions {
            if self.ctx.visited.len() >= limit {
                debug!("Transaction limit {} reached, not visiting {}", limit, tx_hash);
                return None;
            }
        }
        self.ctx.visited.mark(tx_hash);

        let outputs = match self.emit(tx_hash) {
            Ok(Some((edges, outputs))) => {
                debug!("Expanded {} at depth {}: {} edges", tx_hash, depth, edges);
                self.ctx.visited.settle(tx_hash, TxStatus::Expanded { edges });
                outputs
            }
            Ok(None) => {
                debug!("Transaction {} not found", tx_hash);
                self.ctx.visited.settle(tx_hash, TxStatus::Missing);
                return None;
            }
            Err(e) => {
                warn!("Skipping transaction {}: {}", tx_hash, e);
                self.ctx.visited.settle(tx_hash, TxStatus::Failed(e.to_string()));
                return None;
            }
        };

        if max_depth != 0 && depth >= max_depth {
            return None;
        }

        let mut pending = VecDeque::new();
        for output in &outputs {
            match self.ledger.find_successor_transactions(&output.address) {
                Ok(next_txs) => pending.extend(
                    next_txs
                        .into_iter()
                        .filter(|next| !self.ctx.visited.contains(next)),
                ),
                Err(e) => {
                    warn!("Failed to find next transactions for {}: {}", output.address, e);
                }
            }
        }
        Some(Frame { depth, pending })
    }

    // Fetches one transaction and writes its edges and balances
    fn emit(
        &mut self,
        tx_hash: &str,
    ) -> std::result::Result<Option<(usize, Vec<OutputRecord>)>, ExpandError> {
        let Some(tx) = self.ledger.get_transaction(tx_hash)? else {
            return Ok(None);
        };
        let date = edge_date(&tx.timestamp)?;
        let inputs = self.ledger.get_inputs(&tx.hash)?;
        let outputs = self.ledger.get_outputs(&tx.hash)?;

        let edges = self.ctx.add_transfers(&tx.hash, &date, &inputs, &outputs);
        Ok(Some((edges, outputs)))
    }

    /// Validates `seed`, expands every seed transaction at depth 1 and finalizes.
    pub fn build(mut self, seed: &str, options: &TraversalOptions) -> Result<TraversalReport> {
        let target = Target::parse(seed, &options.address_lengths)?;
        if options.max_transactions.is_some() {
            self.max_transactions = options.max_transactions;
        }

        let seeds = resolve_target(&self.ledger, &target);
        info!(
            "Building graph from {:?} with {} seed transactions, max depth {}",
            target,
            seeds.len(),
            options.max_depth
        );
        for tx_hash in &seeds {
            self.expand(tx_hash, 1, options.max_depth);
        }

        Ok(self.finish())
    }

    /// Copies final balances and display labels onto the graph nodes.
    ///
    /// Only addresses that became nodes are touched; the balance ledger may hold
    /// addresses that never got an edge.
    pub fn finish(self) -> TraversalReport {
        let mut ctx = self.ctx;
        for node in ctx.graph.node_weights_mut() {
            node.balance = ctx.balances.balance(&node.address);
            node.label = node_label(&node.address, node.balance);
        }

        let failed = ctx.visited.failed().count();
        info!(
            "Visited {} transactions ({} failed); graph has {} nodes and {} edges",
            ctx.visited.len(),
            failed,
            ctx.graph.node_count(),
            ctx.graph.edge_count()
        );

        TraversalReport {
            graph: ctx.graph,
            balances: ctx.balances,
            visited: ctx.visited,
        }
    }
}

/// Builds the transfer graph reachable from `seed`.
pub fn build_transfer_graph<L: LedgerSource>(
    ledger: L,
    seed: &str,
    options: &TraversalOptions,
) -> Result<TraversalReport> {
    GraphBuilder::new(ledger).build(seed, options)
}
