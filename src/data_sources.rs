use crate::{error::LedgerError, types::*};
use polars::prelude::*;
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::Arc,
};
use tracing::{debug, info};

/// LedgerSource
///
/// Read-only access to a transaction ledger, generic across stores.
///
/// The graph builder never writes through this trait. A missing transaction is
/// `Ok(None)`, a store failure is `Err`.
///
pub trait LedgerSource {
    fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>, LedgerError>;

    /// Inputs in store order.
    fn get_inputs(&self, tx_hash: &str) -> Result<Vec<InputRecord>, LedgerError>;

    /// Outputs in store order.
    fn get_outputs(&self, tx_hash: &str) -> Result<Vec<OutputRecord>, LedgerError>;

    /// Transactions that later spend value credited to `address`.
    fn find_successor_transactions(&self, address: &str) -> Result<Vec<TxHash>, LedgerError>;

    /// Every transaction naming `address` in its inputs or outputs, each once.
    fn find_transactions_touching_address(&self, address: &str)
    -> Result<Vec<TxHash>, LedgerError>;
}

impl<L: LedgerSource + ?Sized> LedgerSource for &L {
    fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>, LedgerError> {
        (**self).get_transaction(tx_hash)
    }

    fn get_inputs(&self, tx_hash: &str) -> Result<Vec<InputRecord>, LedgerError> {
        (**self).get_inputs(tx_hash)
    }

    fn get_outputs(&self, tx_hash: &str) -> Result<Vec<OutputRecord>, LedgerError> {
        (**self).get_outputs(tx_hash)
    }

    fn find_successor_transactions(&self, address: &str) -> Result<Vec<TxHash>, LedgerError> {
        (**self).find_successor_transactions(address)
    }

    fn find_transactions_touching_address(
        &self,
        address: &str,
    ) -> Result<Vec<TxHash>, LedgerError> {
        (**self).find_transactions_touching_address(address)
    }
}

/// Keeps the first occurrence of every hash.
pub(crate) fn dedup_hashes(hashes: impl IntoIterator<Item = TxHash>) -> Vec<TxHash> {
    let mut seen = HashSet::new();
    hashes
        .into_iter()
        .filter(|hash| seen.insert(hash.clone()))
        .collect()
}

/// MemoryLedger
///
/// A ledger held entirely in process memory. Useful for embedding and for tests.
///
/// Records are kept in insertion order so query results are deterministic.
///
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    transactions: HashMap<TxHash, TransactionRecord>,
    inputs: HashMap<TxHash, Vec<InputRecord>>,
    outputs: HashMap<TxHash, Vec<OutputRecord>>,
    order: Vec<TxHash>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&mut self, tx_hash: &str) {
        if !self.transactions.contains_key(tx_hash)
            && !self.inputs.contains_key(tx_hash)
            && !self.outputs.contains_key(tx_hash)
        {
            self.order.push(tx_hash.to_string());
        }
    }

    pub fn insert_transaction(&mut self, record: TransactionRecord) -> &mut Self {
        self.track(&record.hash);
        self.transactions.insert(record.hash.clone(), record);
        self
    }

    pub fn add_input(&mut self, tx_hash: &str, input: InputRecord) -> &mut Self {
        self.track(tx_hash);
        self.inputs.entry(tx_hash.to_string()).or_default().push(input);
        self
    }

    pub fn add_output(&mut self, tx_hash: &str, output: OutputRecord) -> &mut Self {
        self.track(tx_hash);
        self.outputs
            .entry(tx_hash.to_string())
            .or_default()
            .push(output);
        self
    }

    /// Inserts a transaction together with all of its inputs and outputs.
    pub fn with_transaction(
        mut self,
        record: TransactionRecord,
        inputs: Vec<InputRecord>,
        outputs: Vec<OutputRecord>,
    ) -> Self {
        let hash = record.hash.clone();
        self.insert_transaction(record);
        for input in inputs {
            self.add_input(&hash, input);
        }
        for output in outputs {
            self.add_output(&hash, output);
        }
        self
    }
}

impl LedgerSource for MemoryLedger {
    fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>, LedgerError> {
        Ok(self.transactions.get(tx_hash).cloned())
    }

    fn get_inputs(&self, tx_hash: &str) -> Result<Vec<InputRecord>, LedgerError> {
        Ok(self.inputs.get(tx_hash).cloned().unwrap_or_default())
    }

    fn get_outputs(&self, tx_hash: &str) -> Result<Vec<OutputRecord>, LedgerError> {
        Ok(self.outputs.get(tx_hash).cloned().unwrap_or_default())
    }

    fn find_successor_transactions(&self, address: &str) -> Result<Vec<TxHash>, LedgerError> {
        let successors = self
            .order
            .iter()
            .filter_map(|hash| self.inputs.get(hash))
            .flatten()
            .filter(|input| input.address == address)
            .filter_map(|input| input.spending_transaction.clone())
            .collect();
        Ok(successors)
    }

    fn find_transactions_touching_address(
        &self,
        address: &str,
    ) -> Result<Vec<TxHash>, LedgerError> {
        let in_inputs = self.order.iter().filter(|hash| {
            self.inputs
                .get(*hash)
                .is_some_and(|inputs| inputs.iter().any(|i| i.address == address))
        });
        let in_outputs = self.order.iter().filter(|hash| {
            self.outputs
                .get(*hash)
                .is_some_and(|outputs| outputs.iter().any(|o| o.address == address))
        });
        Ok(dedup_hashes(in_inputs.chain(in_outputs).cloned()))
    }
}

/// FrameLedger
///
/// A ledger backed by three polars DataFrames, usually loaded from CSV exports of
/// the SQLite store.
///
/// Expected columns:
/// - transactions: `hash`, `time`, `input_total`, `output_total`
/// - inputs: `transaction_hash`, `recipient`, `value`, `spending_transaction_hash` (nullable)
/// - outputs: `transaction_hash`, `recipient`, `value`
///
/// `time` may be a formatted date-time or an epoch; it is handed to the builder as text.
///
pub struct FrameLedger {
    pub transactions: DataFrame,
    pub inputs: DataFrame,
    pub outputs: DataFrame,
}

impl FrameLedger {
    pub fn new(transactions: DataFrame, inputs: DataFrame, outputs: DataFrame) -> Self {
        Self {
            transactions,
            inputs,
            outputs,
        }
    }

    /// Loads `transactions.csv`, `inputs.csv` and `outputs.csv` from `dir`.
    pub fn from_csv_dir(dir: &Path) -> Result<Self, LedgerError> {
        // Hashes and addresses must stay strings even when they look numeric
        let transactions = read_csv(
            &dir.join("transactions.csv"),
            &[("hash", DataType::String), ("time", DataType::String)],
        )?;
        let inputs = read_csv(
            &dir.join("inputs.csv"),
            &[
                ("transaction_hash", DataType::String),
                ("recipient", DataType::String),
                ("spending_transaction_hash", DataType::String),
            ],
        )?;
        let outputs = read_csv(
            &dir.join("outputs.csv"),
            &[
                ("transaction_hash", DataType::String),
                ("recipient", DataType::String),
            ],
        )?;
        info!(
            "Loaded frames from {}: {} transactions, {} inputs, {} outputs",
            dir.display(),
            transactions.height(),
            inputs.height(),
            outputs.height()
        );
        Ok(Self::new(transactions, inputs, outputs))
    }
}

fn read_csv(path: &Path, column_types: &[(&str, DataType)]) -> Result<DataFrame, LedgerError> {
    let overrides = Schema::from_iter(
        column_types
            .iter()
            .map(|(name, dtype)| Field::new((*name).into(), dtype.clone())),
    );
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(Arc::new(overrides)))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

fn str_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, LedgerError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    let values = column
        .str()?
        .into_iter()
        .map(|value| value.filter(|v| !v.is_empty()).map(str::to_string))
        .collect();
    Ok(values)
}

fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, LedgerError> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

fn required<T>(value: Option<T>, column: &str, row: usize) -> Result<T, LedgerError> {
    value.ok_or_else(|| LedgerError::Malformed(format!("null {} in row {}", column, row)))
}

impl FrameLedger {
    fn records(
        frame: &DataFrame,
        tx_hash: &str,
    ) -> Result<(Vec<Option<String>>, Vec<Option<f64>>, DataFrame), LedgerError> {
        let rows = frame
            .clone()
            .lazy()
            .filter(col("transaction_hash").eq(lit(tx_hash.to_string())))
            .collect()?;
        let recipients = str_values(&rows, "recipient")?;
        let values = f64_values(&rows, "value")?;
        Ok((recipients, values, rows))
    }
}

impl LedgerSource for FrameLedger {
    fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>, LedgerError> {
        let rows = self
            .transactions
            .clone()
            .lazy()
            .filter(col("hash").eq(lit(tx_hash.to_string())))
            .collect()?;

        if rows.height() == 0 {
            return Ok(None);
        }

        let time = str_values(&rows, "time")?;
        let input_total = f64_values(&rows, "input_total")?;
        let output_total = f64_values(&rows, "output_total")?;

        Ok(Some(TransactionRecord {
            hash: tx_hash.to_string(),
            timestamp: RawTimestamp::Text(required(time[0].clone(), "time", 0)?),
            input_total: input_total[0].unwrap_or(0.0),
            output_total: output_total[0].unwrap_or(0.0),
        }))
    }

    fn get_inputs(&self, tx_hash: &str) -> Result<Vec<InputRecord>, LedgerError> {
        let (recipients, values, rows) = Self::records(&self.inputs, tx_hash)?;
        let spenders = str_values(&rows, "spending_transaction_hash")?;

        let mut inputs = Vec::with_capacity(rows.height());
        for row in 0..rows.height() {
            let Some(address) = recipients[row].clone() else {
                continue;
            };
            inputs.push(InputRecord {
                address,
                value: required(values[row], "value", row)?,
                spending_transaction: spenders[row].clone(),
            });
        }
        debug!("{} inputs for {}", inputs.len(), tx_hash);
        Ok(inputs)
    }

    fn get_outputs(&self, tx_hash: &str) -> Result<Vec<OutputRecord>, LedgerError> {
        let (recipients, values, rows) = Self::records(&self.outputs, tx_hash)?;

        let mut outputs = Vec::with_capacity(rows.height());
        for row in 0..rows.height() {
            let Some(address) = recipients[row].clone() else {
                continue;
            };
            outputs.push(OutputRecord {
                address,
                value: required(values[row], "value", row)?,
            });
        }
        debug!("{} outputs for {}", outputs.len(), tx_hash);
        Ok(outputs)
    }

    fn find_successor_transactions(&self, address: &str) -> Result<Vec<TxHash>, LedgerError> {
        let rows = self
            .inputs
            .clone()
            .lazy()
            .filter(
                col("recipient")
                    .eq(lit(address.to_string()))
                    .and(col("spending_transaction_hash").is_not_null()),
            )
            .collect()?;

        Ok(str_values(&rows, "spending_transaction_hash")?
            .into_iter()
            .flatten()
            .collect())
    }

    fn find_transactions_touching_address(
        &self,
        address: &str,
    ) -> Result<Vec<TxHash>, LedgerError> {
        let mut hashes = Vec::new();
        for frame in [&self.inputs, &self.outputs] {
            let rows = frame
                .clone()
                .lazy()
                .filter(col("recipient").eq(lit(address.to_string())))
                .collect()?;
            hashes.extend(str_values(&rows, "transaction_hash")?.into_iter().flatten());
        }
        Ok(dedup_hashes(hashes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_fixture() -> MemoryLedger {
        MemoryLedger::new()
            .with_transaction(
                TransactionRecord::new("t1", "2024-01-01 00:00:00", 5.0, 5.0),
                vec![InputRecord::new("A", 5.0)],
                vec![OutputRecord::new("B", 3.0), OutputRecord::new("A", 2.0)],
            )
            .with_transaction(
                TransactionRecord::new("t2", "2024-01-02 00:00:00", 3.0, 3.0),
                vec![InputRecord::new("B", 3.0).spent_by("t3")],
                vec![OutputRecord::new("C", 3.0)],
            )
    }

    #[test]
    fn memory_ledger_returns_none_for_unknown_hash() {
        let ledger = memory_fixture();
        assert!(ledger.get_transaction("nope").unwrap().is_none());
        assert!(ledger.get_inputs("nope").unwrap().is_empty());
    }

    #[test]
    fn memory_ledger_union_lists_each_transaction_once() {
        let ledger = memory_fixture();
        // A is both an input and an output of t1
        assert_eq!(
            ledger.find_transactions_touching_address("A").unwrap(),
            vec!["t1".to_string()]
        );
        assert_eq!(
            ledger.find_transactions_touching_address("B").unwrap(),
            vec!["t2".to_string(), "t1".to_string()]
        );
    }

    #[test]
    fn memory_ledger_successors_skip_unspent_inputs() {
        let ledger = memory_fixture();
        assert!(ledger.find_successor_transactions("A").unwrap().is_empty());
        assert_eq!(
            ledger.find_successor_transactions("B").unwrap(),
            vec!["t3".to_string()]
        );
    }

    fn frame_fixture() -> FrameLedger {
        let transactions = df!(
            "hash" => ["t1", "t2"],
            "time" => ["2024-01-01 00:00:00", "1704153600"],
            "input_total" => [5.0, 3.0],
            "output_total" => [5.0, 3.0]
        )
        .unwrap();
        let inputs = df!(
            "transaction_hash" => ["t1", "t2"],
            "recipient" => ["A", "B"],
            "value" => [5.0, 3.0],
            "spending_transaction_hash" => [None, Some("t3")]
        )
        .unwrap();
        let outputs = df!(
            "transaction_hash" => ["t1", "t1", "t2"],
            "recipient" => ["B", "A", "C"],
            "value" => [3.0, 2.0, 3.0]
        )
        .unwrap();
        FrameLedger::new(transactions, inputs, outputs)
    }

    #[test]
    fn frame_ledger_reads_transaction_and_records() {
        let ledger = frame_fixture();
        let tx = ledger.get_transaction("t2").unwrap().unwrap();
        assert_eq!(tx.timestamp, RawTimestamp::Text("1704153600".into()));
        assert_eq!(tx.input_total, 3.0);

        let outputs = ledger.get_outputs("t1").unwrap();
        assert_eq!(
            outputs,
            vec![OutputRecord::new("B", 3.0), OutputRecord::new("A", 2.0)]
        );
        assert!(ledger.get_transaction("t9").unwrap().is_none());
    }

    #[test]
    fn frame_ledger_queries_match_memory_ledger() {
        let frames = frame_fixture();
        let memory = memory_fixture();
        for address in ["A", "B", "C"] {
            assert_eq!(
                frames.find_successor_transactions(address).unwrap(),
                memory.find_successor_transactions(address).unwrap()
            );
        }
        assert_eq!(
            frames.find_transactions_touching_address("A").unwrap(),
            vec!["t1".to_string()]
        );
    }
}
