//! Promotion of unmatched transactions into confirmed expenses.

use rusqlite::Connection;

use crate::{
    Error,
    database_id::TransactionId,
    expense::{Expense, MatchConfidence, PaymentMethod, Provenance, create_expense},
    transaction::get_transaction,
};

/// Convert an unmatched transaction into an expense.
///
/// The new expense copies the transaction's date, description, and absolute
/// amount, is tagged with provenance [Provenance::Import], and is linked to
/// its source transaction as [MatchConfidence::ManuallyConfirmed] since the
/// user explicitly asserted the pairing. Transfers become bank-transfer
/// expenses; everything else is assumed to be a card payment.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `transaction_id` does not refer to a valid
///   transaction,
/// - [Error::AlreadyMatched] if the transaction is already linked to an
///   expense,
/// - [Error::StaleCandidate] if a concurrent writer linked the transaction
///   between the read and the write,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn promote_transaction(
    transaction_id: TransactionId,
    category: &str,
    subcategory: Option<&str>,
    connection: &Connection,
) -> Result<Expense, Error> {
    let sql_tx = connection.unchecked_transaction()?;

    let transaction = get_transaction(transaction_id, &sql_tx)?;
    if transaction.matched_expense_id.is_some() {
        return Err(Error::AlreadyMatched(transaction_id));
    }

    let payment_method = if transaction.is_transfer {
        PaymentMethod::BankTransfer
    } else {
        PaymentMethod::Card
    };

    let expense = create_expense(
        Expense::build(
            transaction.amount.abs(),
            transaction.date,
            &transaction.description,
        )
        .category(category)
        .subcategory(subcategory)
        .payment_method(payment_method)
        .provenance(Provenance::Import),
        &sql_tx,
    )?;

    sql_tx.execute(
        "UPDATE expense SET matched_transaction_id = ?1, confidence = ?2 WHERE id = ?3",
        (transaction_id, MatchConfidence::ManuallyConfirmed, expense.id),
    )?;

    // Guard against a reconciliation pass claiming the transaction between
    // the read above and this write.
    let transaction_rows = sql_tx.execute(
        "UPDATE \"transaction\" SET matched_expense_id = ?1
         WHERE id = ?2 AND matched_expense_id IS NULL",
        (expense.id, transaction_id),
    )?;

    if transaction_rows == 0 {
        sql_tx.rollback()?;
        return Err(Error::StaleCandidate);
    }

    sql_tx.commit()?;

    tracing::info!(
        "promoted transaction {} into expense {}",
        transaction_id,
        expense.id
    );

    Ok(Expense {
        matched_transaction_id: Some(transaction_id),
        confidence: MatchConfidence::ManuallyConfirmed,
        ..expense
    })
}

#[cfg(test)]
mod promote_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        Error,
        db::initialize,
        expense::{MatchConfidence, PaymentMethod, Provenance, promote_transaction},
        transaction::{Transaction, get_transaction, insert_transaction_batch},
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn promote_links_both_records() {
        let conn = get_test_connection();
        let (inserted, _) = insert_transaction_batch(
            vec![
                Transaction::build("mf-001", date!(2024 - 03 - 10), -1200)
                    .description("STARBUCKS COFFEE"),
            ],
            &conn,
        )
        .expect("Could not insert transaction");

        let expense = promote_transaction(inserted[0].id, "会議費", None, &conn)
            .expect("Could not promote transaction");

        assert_eq!(expense.amount, 1200);
        assert_eq!(expense.provenance, Provenance::Import);
        assert_eq!(expense.payment_method, PaymentMethod::Card);
        assert_eq!(expense.confidence, MatchConfidence::ManuallyConfirmed);
        assert_eq!(expense.matched_transaction_id, Some(inserted[0].id));

        let transaction = get_transaction(inserted[0].id, &conn).unwrap();
        assert_eq!(transaction.matched_expense_id, Some(expense.id));
    }

    #[test]
    fn promote_twice_fails() {
        let conn = get_test_connection();
        let (inserted, _) = insert_transaction_batch(
            vec![Transaction::build("mf-001", date!(2024 - 03 - 10), -1200)],
            &conn,
        )
        .expect("Could not insert transaction");
        promote_transaction(inserted[0].id, "雑費", None, &conn)
            .expect("Could not promote transaction");

        let second = promote_transaction(inserted[0].id, "雑費", None, &conn);

        assert_eq!(second, Err(Error::AlreadyMatched(inserted[0].id)));
    }

    #[test]
    fn promote_missing_transaction_returns_not_found() {
        let conn = get_test_connection();

        let result = promote_transaction(42, "雑費", None, &conn);

        assert_eq!(result, Err(Error::NotFound));
    }
}
