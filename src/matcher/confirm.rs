//! Resolution of proposed matches.

use rusqlite::{Connection, named_params};

use crate::{
    Error,
    database_id::{ExpenseId, TransactionId},
    expense::MatchConfidence,
};

/// Resolve the proposed match on a transaction.
///
/// Accepting retains the link and marks the expense
/// [MatchConfidence::ManuallyConfirmed], making it final. Rejecting clears
/// the link on both sides and returns the expense to
/// [MatchConfidence::Unmatched], so it re-enters the candidate pool for
/// future reconciliation runs.
///
/// # Errors
/// This function will return a:
/// - [Error::NotProposed] if the transaction has no proposed match,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn confirm_proposal(
    transaction_id: TransactionId,
    accept: bool,
    connection: &Connection,
) -> Result<(), Error> {
    let sql_tx = connection.unchecked_transaction()?;

    let expense_id: ExpenseId = sql_tx
        .prepare(
            "SELECT id FROM expense
             WHERE matched_transaction_id = :transaction_id AND confidence = :confidence",
        )?
        .query_row(
            named_params! {
                ":transaction_id": transaction_id,
                ":confidence": MatchConfidence::Proposed,
            },
            |row| row.get(0),
        )
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::NotProposed(transaction_id),
            error => error.into(),
        })?;

    if accept {
        sql_tx.execute(
            "UPDATE expense SET confidence = ?1 WHERE id = ?2",
            (MatchConfidence::ManuallyConfirmed, expense_id),
        )?;
    } else {
        sql_tx.execute(
            "UPDATE expense SET matched_transaction_id = NULL, confidence = ?1 WHERE id = ?2",
            (MatchConfidence::Unmatched, expense_id),
        )?;
        sql_tx.execute(
            "UPDATE \"transaction\" SET matched_expense_id = NULL WHERE id = ?1",
            (transaction_id,),
        )?;
    }

    sql_tx.commit()?;

    tracing::info!(
        "proposal for transaction {} {}",
        transaction_id,
        if accept { "accepted" } else { "rejected" }
    );

    Ok(())
}
