//! Keihi is a reconciliation engine for personal expense tracking.
//!
//! It ingests ledger CSV exports (MoneyForward ME schema, unknown text
//! encoding) into a SQLite-backed transaction table, then reconciles the
//! imported transactions against independently recorded expenses in three
//! confidence tiers:
//!
//! - *Certain* matches are linked automatically.
//! - *Likely* matches are proposed and wait for explicit confirmation.
//! - *Uncertain* matches are listed for manual review only.
//!
//! This library provides the import, matching, and confirmation operations;
//! rendering the resulting reports to a user-facing channel is left to the
//! caller.

#![warn(missing_docs)]

mod classifier;
mod database_id;
mod db;
mod expense;
mod import;
mod matcher;
mod transaction;

pub use classifier::{
    Classification, Classifier, DEFAULT_CATEGORY, HistoryClassifier, KeywordClassifier,
    classify_with_fallback,
};
pub use database_id::{DatabaseId, ExpenseId, TransactionId};
pub use db::initialize as initialize_db;
pub use expense::{
    Expense, ExpenseBuilder, MatchConfidence, PaymentMethod, Provenance, create_expense,
    get_expense, promote_transaction,
};
pub use import::{ImportConfig, ImportResult, SkippedRow, import_ledger_file, parse_ledger_date};
pub use matcher::{MatchReport, confirm_proposal, reconcile};
pub use transaction::{
    Transaction, TransactionBuilder, get_transaction, get_unmatched_transactions,
};

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The uploaded ledger export exceeds the configured size cap.
    ///
    /// The file is rejected before any parsing happens, which guards both
    /// memory use and downstream parsing cost. The transport layer is
    /// expected to enforce its own cap as a first line of defense; this
    /// check is independent of it.
    #[error("the file is {got} bytes which exceeds the size cap of {cap} bytes")]
    PayloadTooLarge {
        /// The size of the rejected file in bytes.
        got: usize,
        /// The configured size cap in bytes.
        cap: usize,
    },

    /// The uploaded ledger export could not be decoded with any of the
    /// supported text encodings (UTF-8, Shift-JIS, CP932).
    ///
    /// The whole import is aborted and nothing is inserted.
    #[error("could not detect a supported text encoding for the CSV file")]
    UnsupportedEncoding,

    /// The CSV had issues that prevented it from being parsed.
    #[error("Could not parse the CSV file: {0}")]
    InvalidCSV(String),

    /// A link assignment found its target already matched at write time.
    ///
    /// This occurs when a concurrent write (e.g., a confirmation overlapping
    /// a second import) claimed one side of the pairing first. Only the
    /// individual pairing fails; the reconciliation batch continues.
    #[error("the record was claimed by another writer")]
    StaleCandidate,

    /// The requested resource could not be found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// Tried to confirm or reject a match that is not in the proposed state.
    #[error("transaction {0} does not have a proposed match")]
    NotProposed(TransactionId),

    /// Tried to promote a transaction that is already linked to an expense.
    #[error("transaction {0} is already matched to an expense")]
    AlreadyMatched(TransactionId),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}
