//! Importing ledger CSV exports.
//!
//! The normalizer converts an uploaded export (raw bytes, encoding unknown)
//! into validated, deduplicated transaction records: size check, encoding
//! detection, header-mapped row parsing with per-row skip reasons, then an
//! idempotent batch insert.

mod csv;
mod encoding;
mod import_file;

pub use csv::{ParsedLedger, SkippedRow, parse_ledger_csv, parse_ledger_date};
pub use encoding::decode_ledger_bytes;
pub use import_file::{ImportConfig, ImportResult, import_ledger_file};
