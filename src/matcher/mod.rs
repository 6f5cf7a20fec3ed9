//! Matching imported transactions to recorded expenses.
//!
//! Each newly imported, non-transfer transaction is evaluated against the
//! pool of unmatched expenses and assigned a confidence tier:
//!
//! - *Certain*: within one day, exact amount, and the vendor names agree.
//!   Linked automatically.
//! - *Likely*: within two days, exact amount. Proposed and held for
//!   explicit user confirmation.
//! - *Uncertain*: the amount alone lines up somewhere. Listed for manual
//!   review only; no link is created.
//!
//! Link writes are compare-and-set: both sides must still be unlinked at
//! write time, so concurrent confirmations or overlapping imports can never
//! leave a record linked twice.

mod confirm;
mod name_match;
mod reconcile;

pub use confirm::confirm_proposal;
pub use reconcile::{MatchReport, reconcile};
