//! The import entry point: raw file bytes to persisted transactions.

use rusqlite::Connection;
use serde::Serialize;

use crate::{
    Error,
    import::{
        csv::{SkippedRow, parse_ledger_csv},
        encoding::decode_ledger_bytes,
    },
    transaction::{Transaction, insert_transaction_batch},
};

/// The default cap on uploaded file size, in bytes.
const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Resource limits for ledger imports.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// The maximum accepted file size in bytes. Defaults to 10 MB.
    ///
    /// The transport layer is expected to enforce its own cap before the
    /// bytes reach this crate; this limit is checked again here regardless.
    pub max_file_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Summary of a ledger import.
///
/// An import always produces a summary, even when some rows were skipped:
/// a malformed row never blocks the rest of the file.
#[derive(Debug, Serialize)]
pub struct ImportResult {
    /// The transactions inserted by this import, in file order.
    pub inserted: Vec<Transaction>,
    /// Rows that could not be parsed, with reasons.
    pub skipped_rows: Vec<SkippedRow>,
    /// Rows whose external ID had already been imported.
    pub duplicates_skipped: usize,
}

/// Import a ledger CSV export from raw file bytes.
///
/// Checks the size cap, detects the text encoding, parses the rows, and
/// inserts the transactions that are not already present. Re-importing a
/// file with a previously seen export window is safe: rows whose external ID
/// already exists are counted in
/// [duplicates_skipped](ImportResult::duplicates_skipped) and not
/// re-inserted. No expense record is touched.
///
/// # Errors
/// This function will return a:
/// - [Error::PayloadTooLarge] if the file exceeds the configured size cap,
/// - [Error::UnsupportedEncoding] if the bytes cannot be decoded,
/// - [Error::InvalidCSV] if the header row is missing or malformed,
/// - or [Error::SqlError] if there is an unexpected SQL error.
pub fn import_ledger_file(
    bytes: &[u8],
    config: &ImportConfig,
    connection: &Connection,
) -> Result<ImportResult, Error> {
    if bytes.len() > config.max_file_size {
        return Err(Error::PayloadTooLarge {
            got: bytes.len(),
            cap: config.max_file_size,
        });
    }

    let text = decode_ledger_bytes(bytes)?;
    let parsed = parse_ledger_csv(&text)?;

    let sql_tx = connection.unchecked_transaction()?;
    let (inserted, duplicates_skipped) = insert_transaction_batch(parsed.rows, &sql_tx)?;
    sql_tx.commit()?;

    tracing::info!(
        "ledger import done: {} new, {} duplicates, {} rows skipped",
        inserted.len(),
        duplicates_skipped,
        parsed.skipped_rows.len()
    );

    Ok(ImportResult {
        inserted,
        skipped_rows: parsed.skipped_rows,
        duplicates_skipped,
    })
}
