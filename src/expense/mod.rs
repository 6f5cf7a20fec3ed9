//! Expense records and their match-confidence state machine.
//!
//! Expenses are recorded independently of the ledger (receipt capture,
//! manual entry, or promotion of an unmatched transaction) and carry a
//! durable confidence state that the matcher and the confirmation flow
//! drive: unmatched, auto-matched, proposed, manually-confirmed.

mod core;
mod promote;

pub use core::{
    Expense, ExpenseBuilder, MatchConfidence, PaymentMethod, Provenance, create_expense,
    create_expense_table, get_expense, map_expense_row,
};
pub use promote::promote_transaction;
