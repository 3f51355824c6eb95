use crate::{data_sources::LedgerSource, error::LedgerError, types::*};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, types::Value};
use std::path::Path;
use tracing::{debug, info};

/// Table layout of the ledger database.
///
/// `INPUTS.spending_transaction_hash` names the transaction that later spends the
/// value associated with the input's recipient.
pub const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS TRANSACT (
  hash         TEXT PRIMARY KEY,
  time,
  input_total  REAL,
  output_total REAL
);

CREATE TABLE IF NOT EXISTS INPUTS (
  id                        INTEGER PRIMARY KEY AUTOINCREMENT,
  transaction_hash          TEXT NOT NULL,
  recipient                 TEXT,
  value                     REAL,
  spending_transaction_hash TEXT
);

CREATE TABLE IF NOT EXISTS OUTPUTS (
  id               INTEGER PRIMARY KEY AUTOINCREMENT,
  transaction_hash TEXT NOT NULL,
  recipient        TEXT,
  value            REAL
);

CREATE INDEX IF NOT EXISTS idx_inputs_tx ON INPUTS(transaction_hash);
CREATE INDEX IF NOT EXISTS idx_inputs_recipient ON INPUTS(recipient);
CREATE INDEX IF NOT EXISTS idx_outputs_tx ON OUTPUTS(transaction_hash);
CREATE INDEX IF NOT EXISTS idx_outputs_recipient ON OUTPUTS(recipient);
"#;

/// Creates the ledger tables on a writable connection. Used to prepare fixture
/// databases; the graph builder itself only reads.
pub fn create_schema(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(LEDGER_SCHEMA)?;
    Ok(())
}

/// SqliteLedger
///
/// The persistent ledger store. One connection is shared by every query of a build.
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Opens an existing database read-only.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Opened ledger database {}", path.display());
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn records(
        &self,
        sql: &str,
        tx_hash: &str,
    ) -> Result<Vec<(String, f64, Option<String>)>, LedgerError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![tx_hash], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (recipient, value, spender) = row?;
            // Records without an address (coinbase inputs, non-standard outputs) cannot become edges
            let Some(recipient) = recipient else {
                debug!("Skipping record without recipient in {}", tx_hash);
                continue;
            };
            let value = value.ok_or_else(|| {
                LedgerError::Malformed(format!("null value for {} in {}", recipient, tx_hash))
            })?;
            records.push((recipient, value, spender));
        }
        Ok(records)
    }
}

fn raw_timestamp(value: Value, tx_hash: &str) -> Result<RawTimestamp, LedgerError> {
    match value {
        Value::Text(text) => Ok(RawTimestamp::Text(text)),
        Value::Integer(secs) => Ok(RawTimestamp::Epoch(secs)),
        Value::Real(secs) => Ok(RawTimestamp::Epoch(secs as i64)),
        Value::Null | Value::Blob(_) => Err(LedgerError::Malformed(format!(
            "unusable time column for {}",
            tx_hash
        ))),
    }
}

impl LedgerSource for SqliteLedger {
    fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>, LedgerError> {
        let row = self
            .conn
            .query_row(
                "SELECT hash, time, input_total, output_total FROM TRANSACT WHERE hash = ?1",
                params![tx_hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Value>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((hash, time, input_total, output_total)) = row else {
            return Ok(None);
        };

        Ok(Some(TransactionRecord {
            timestamp: raw_timestamp(time, &hash)?,
            hash,
            input_total: input_total.unwrap_or(0.0),
            output_total: output_total.unwrap_or(0.0),
        }))
    }

    fn get_inputs(&self, tx_hash: &str) -> Result<Vec<InputRecord>, LedgerError> {
        let records = self.records(
            "SELECT recipient, value, spending_transaction_hash FROM INPUTS \
             WHERE transaction_hash = ?1 ORDER BY id",
            tx_hash,
        )?;
        Ok(records
            .into_iter()
            .map(|(address, value, spending_transaction)| InputRecord {
                address,
                value,
                spending_transaction,
            })
            .collect())
    }

    fn get_outputs(&self, tx_hash: &str) -> Result<Vec<OutputRecord>, LedgerError> {
        let records = self.records(
            "SELECT recipient, value, NULL FROM OUTPUTS WHERE transaction_hash = ?1 ORDER BY id",
            tx_hash,
        )?;
        Ok(records
            .into_iter()
            .map(|(address, value, _)| OutputRecord { address, value })
            .collect())
    }

    fn find_successor_transactions(&self, address: &str) -> Result<Vec<TxHash>, LedgerError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT spending_transaction_hash FROM INPUTS \
             WHERE recipient = ?1 AND spending_transaction_hash IS NOT NULL ORDER BY id",
        )?;
        let hashes = stmt
            .query_map(params![address], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hashes)
    }

    fn find_transactions_touching_address(
        &self,
        address: &str,
    ) -> Result<Vec<TxHash>, LedgerError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT transaction_hash FROM INPUTS WHERE recipient = ?1 \
             UNION \
             SELECT transaction_hash FROM OUTPUTS WHERE recipient = ?1",
        )?;
        let hashes = stmt
            .query_map(params![address], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hashes)
    }
}
