use crate::types::Address;
use std::collections::HashMap;

///
/// BalanceLedger
///
/// Running signed value per address, summed over the transactions visited by one
/// traversal. It is not a ledger-wide balance. Entries are never removed and an
/// unknown address reads as zero.
///
#[derive(Debug, Default, Clone)]
pub struct BalanceLedger {
    balances: HashMap<Address, f64>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `amount` (negative for debits) to the address' running balance.
    pub fn credit(&mut self, address: &str, amount: f64) {
        *self.balances.entry(address.to_string()).or_insert(0.0) += amount;
    }

    pub fn balance(&self, address: &str) -> f64 {
        self.balances.get(address).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.balances.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &f64)> {
        self.balances.iter()
    }
}
