//! Ledger transactions imported from CSV exports.
//!
//! This module contains the `Transaction` model and `TransactionBuilder`,
//! plus the database functions for storing and querying transactions.
//! Transactions are created only by import; the matcher mutates nothing here
//! except the link field, and nothing deletes a transaction automatically.

mod core;

pub use core::{
    Transaction, TransactionBuilder, create_transaction_table, get_transaction,
    get_unmatched_transactions, insert_transaction_batch, map_transaction_row,
};
