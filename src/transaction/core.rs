//! Defines the core data model and database queries for ledger transactions.

use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    database_id::{DatabaseId, ExpenseId, TransactionId},
};

// ============================================================================
// MODELS
// ============================================================================

/// One row of a ledger export, after normalization.
///
/// Amounts are signed integers in minor currency units; a negative amount is
/// an outflow. To create a new `Transaction`, use [Transaction::build] and
/// [insert_transaction_batch].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: DatabaseId,
    /// The stable identifier assigned by the external ledger tool.
    ///
    /// This is the dedup key: the database enforces uniqueness on it, so
    /// re-importing a file containing a previously seen ID is a no-op for
    /// that row. This is what makes repeated uploads of overlapping export
    /// windows safe.
    pub external_id: String,
    /// When the transaction happened (calendar date, no time component).
    pub date: Date,
    /// A text description of what the transaction was for.
    ///
    /// For ledger imports this is the aggregator's content field, e.g.
    /// `"STARBUCKS COFFEE TOKYO"` or `"ＡＭＡＺＯＮ．ＣＯ．ＪＰ"`.
    pub description: String,
    /// The signed amount in minor currency units. Negative is an outflow.
    pub amount: i64,
    /// The account label the ledger tool sourced this row from.
    pub source_account: String,
    /// The coarse category label assigned by the ledger tool.
    ///
    /// This vocabulary belongs to the ledger tool and is independent of the
    /// tax categories used on expenses.
    pub category_coarse: String,
    /// The fine category label assigned by the ledger tool.
    pub category_fine: String,
    /// The free-text memo column of the export.
    pub memo: String,
    /// Whether this row is a transfer between the user's own accounts.
    ///
    /// Transfers are excluded from matching entirely; they do not represent
    /// deductible expenses.
    pub is_transfer: bool,
    /// The ledger tool's "included in calculations" flag.
    ///
    /// Informational only; it does not gate matching.
    pub in_calculations: bool,
    /// The expense this transaction is linked to, if any.
    pub matched_expense_id: Option<ExpenseId>,
    /// When this row was imported.
    pub imported_at: OffsetDateTime,
}

impl Transaction {
    /// Create a new transaction.
    ///
    /// Shortcut for [TransactionBuilder] for discoverability.
    pub fn build(external_id: &str, date: Date, amount: i64) -> TransactionBuilder {
        TransactionBuilder {
            external_id: external_id.to_owned(),
            date,
            amount,
            description: String::new(),
            source_account: String::new(),
            category_coarse: String::new(),
            category_fine: String::new(),
            memo: String::new(),
            is_transfer: false,
            in_calculations: true,
        }
    }
}

/// A builder for creating [Transaction] instances.
///
/// The CSV normalizer produces one builder per accepted row; pass the
/// builders to [insert_transaction_batch] to persist them.
#[derive(Debug, PartialEq, Clone)]
pub struct TransactionBuilder {
    /// The stable identifier assigned by the external ledger tool.
    pub external_id: String,
    /// The date when the transaction occurred.
    pub date: Date,
    /// The signed amount in minor currency units.
    pub amount: i64,
    /// A human-readable description of the transaction.
    pub description: String,
    /// The account label the row was sourced from.
    pub source_account: String,
    /// The ledger tool's coarse category label.
    pub category_coarse: String,
    /// The ledger tool's fine category label.
    pub category_fine: String,
    /// The free-text memo column.
    pub memo: String,
    /// Whether the row is a transfer between the user's own accounts.
    pub is_transfer: bool,
    /// The ledger tool's "included in calculations" flag.
    pub in_calculations: bool,
}

impl TransactionBuilder {
    /// Set the description for the transaction.
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }

    /// Set the source account label for the transaction.
    pub fn source_account(mut self, source_account: &str) -> Self {
        self.source_account = source_account.to_owned();
        self
    }

    /// Set the ledger tool's coarse and fine category labels.
    pub fn categories(mut self, coarse: &str, fine: &str) -> Self {
        self.category_coarse = coarse.to_owned();
        self.category_fine = fine.to_owned();
        self
    }

    /// Set the memo for the transaction.
    pub fn memo(mut self, memo: &str) -> Self {
        self.memo = memo.to_owned();
        self
    }

    /// Set whether the transaction is a transfer between own accounts.
    pub fn is_transfer(mut self, is_transfer: bool) -> Self {
        self.is_transfer = is_transfer;
        self
    }

    /// Set the ledger tool's "included in calculations" flag.
    pub fn in_calculations(mut self, in_calculations: bool) -> Self {
        self.in_calculations = in_calculations;
        self
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Insert many transactions, skipping rows whose external ID already exists.
///
/// Returns the transactions that were actually inserted, in input order, and
/// the number of rows skipped as duplicates. The insert is idempotent: a
/// retry after a partially completed import simply skips the rows that made
/// it in the first time.
///
/// **Note**: If you want transactional integrity (all or nothing), pass in a
/// transaction for `connection`.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an unexpected SQL error.
pub fn insert_transaction_batch(
    builders: Vec<TransactionBuilder>,
    connection: &Connection,
) -> Result<(Vec<Transaction>, usize), Error> {
    let imported_at = OffsetDateTime::now_utc();
    let mut inserted = Vec::new();
    let mut duplicates_skipped = 0;

    // Prepare the insert statement once for reuse
    let mut statement = connection.prepare(
        "INSERT INTO \"transaction\" (external_id, date, description, amount, source_account,
            category_coarse, category_fine, memo, is_transfer, in_calculations, imported_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(external_id) DO NOTHING
         RETURNING id, external_id, date, description, amount, source_account,
            category_coarse, category_fine, memo, is_transfer, in_calculations,
            matched_expense_id, imported_at",
    )?;

    for builder in builders {
        let result = statement.query_row(
            (
                &builder.external_id,
                builder.date,
                &builder.description,
                builder.amount,
                &builder.source_account,
                &builder.category_coarse,
                &builder.category_fine,
                &builder.memo,
                builder.is_transfer,
                builder.in_calculations,
                imported_at,
            ),
            map_transaction_row,
        );

        match result {
            Ok(transaction) => inserted.push(transaction),
            // DO NOTHING fired, meaning the external ID was already imported.
            Err(rusqlite::Error::QueryReturnedNoRows) => duplicates_skipped += 1,
            Err(error) => return Err(error.into()),
        }
    }

    Ok((inserted, duplicates_skipped))
}

/// Retrieve a transaction from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid transaction,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_transaction(id: TransactionId, connection: &Connection) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "SELECT id, external_id, date, description, amount, source_account,
                category_coarse, category_fine, memo, is_transfer, in_calculations,
                matched_expense_id, imported_at
             FROM \"transaction\" WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_transaction_row)?;

    Ok(transaction)
}

/// Retrieve all non-transfer transactions that are not linked to an expense,
/// in insertion order.
///
/// This is the input set for a standalone reconciliation pass.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_unmatched_transactions(connection: &Connection) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(
            "SELECT id, external_id, date, description, amount, source_account,
                category_coarse, category_fine, memo, is_transfer, in_calculations,
                matched_expense_id, imported_at
             FROM \"transaction\"
             WHERE matched_expense_id IS NULL AND is_transfer = 0
             ORDER BY id ASC",
        )?
        .query_map([], map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(|error| error.into()))
        .collect()
}

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT UNIQUE NOT NULL,
                date TEXT NOT NULL,
                description TEXT NOT NULL,
                amount INTEGER NOT NULL,
                source_account TEXT NOT NULL,
                category_coarse TEXT NOT NULL,
                category_fine TEXT NOT NULL,
                memo TEXT NOT NULL,
                is_transfer INTEGER NOT NULL,
                in_calculations INTEGER NOT NULL,
                matched_expense_id INTEGER,
                imported_at TEXT NOT NULL,
                FOREIGN KEY(matched_expense_id) REFERENCES expense(id) ON DELETE SET NULL
                )",
        (),
    )?;

    // Ensure the sequence starts at 1
    connection.execute(
        "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('transaction', 0)",
        (),
    )?;

    Ok(())
}

/// Map a database row to a Transaction.
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        external_id: row.get(1)?,
        date: row.get(2)?,
        description: row.get(3)?,
        amount: row.get(4)?,
        source_account: row.get(5)?,
        category_coarse: row.get(6)?,
        category_fine: row.get(7)?,
        memo: row.get(8)?,
        is_transfer: row.get(9)?,
        in_calculations: row.get(10)?,
        matched_expense_id: row.get(11)?,
        imported_at: row.get(12)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod database_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        db::initialize,
        transaction::{
            Transaction, get_transaction, get_unmatched_transactions, insert_transaction_batch,
        },
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn insert_batch_succeeds() {
        let conn = get_test_connection();

        let (inserted, duplicates) = insert_transaction_batch(
            vec![
                Transaction::build("mf-001", date!(2024 - 03 - 10), -1200)
                    .description("STARBUCKS COFFEE"),
                Transaction::build("mf-002", date!(2024 - 03 - 11), -880).description("BOOK STORE"),
            ],
            &conn,
        )
        .expect("Could not insert transactions");

        assert_eq!(inserted.len(), 2);
        assert_eq!(duplicates, 0);
        assert_eq!(inserted[0].external_id, "mf-001");
        assert_eq!(inserted[0].amount, -1200);
        assert_eq!(inserted[0].matched_expense_id, None);
    }

    #[test]
    fn insert_batch_skips_duplicate_external_ids() {
        let conn = get_test_connection();
        let builder = Transaction::build("mf-001", date!(2024 - 03 - 10), -1200);
        insert_transaction_batch(vec![builder.clone()], &conn)
            .expect("Could not insert transaction");

        let (inserted, duplicates) =
            insert_transaction_batch(vec![builder, Transaction::build("mf-002", date!(2024 - 03 - 10), -500)], &conn)
                .expect("Could not insert transactions");

        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].external_id, "mf-002");
        assert_eq!(duplicates, 1);
    }

    #[test]
    fn get_transaction_round_trips_all_fields() {
        let conn = get_test_connection();
        let (inserted, _) = insert_transaction_batch(
            vec![
                Transaction::build("mf-042", date!(2024 - 06 - 01), -3300)
                    .description("タクシー")
                    .source_account("三井住友カード")
                    .categories("交通費", "タクシー")
                    .memo("客先訪問")
                    .in_calculations(false),
            ],
            &conn,
        )
        .expect("Could not insert transaction");

        let got = get_transaction(inserted[0].id, &conn).expect("Could not get transaction");

        assert_eq!(got, inserted[0]);
        assert_eq!(got.source_account, "三井住友カード");
        assert!(!got.in_calculations);
    }

    #[test]
    fn get_unmatched_excludes_transfers() {
        let conn = get_test_connection();
        insert_transaction_batch(
            vec![
                Transaction::build("mf-001", date!(2024 - 03 - 10), -1200),
                Transaction::build("mf-002", date!(2024 - 03 - 10), -5000).is_transfer(true),
            ],
            &conn,
        )
        .expect("Could not insert transactions");

        let unmatched = get_unmatched_transactions(&conn).expect("Could not get transactions");

        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].external_id, "mf-001");
    }
}
