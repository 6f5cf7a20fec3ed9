//! Defines the core data model and database queries for expenses.

use rusqlite::{
    Connection, Row, ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    database_id::{DatabaseId, ExpenseId, TransactionId},
};

// ============================================================================
// MODELS
// ============================================================================

/// How confident the system is that an expense is matched to the right
/// transaction.
///
/// Only `Unmatched` expenses are eligible candidates for the matcher. A
/// `Proposed` expense leaves the candidate pool until the user resolves the
/// proposal. `AutoMatched` and `ManuallyConfirmed` links are final and never
/// overwritten by a later matching pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// No link; the expense is in the matcher's candidate pool.
    Unmatched,
    /// Linked automatically by a certain-tier match.
    AutoMatched,
    /// Tentatively linked; awaiting explicit user confirmation.
    Proposed,
    /// The user confirmed the link by hand.
    ManuallyConfirmed,
}

impl MatchConfidence {
    /// The stable text value stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            MatchConfidence::Unmatched => "unmatched",
            MatchConfidence::AutoMatched => "auto_matched",
            MatchConfidence::Proposed => "proposed",
            MatchConfidence::ManuallyConfirmed => "manually_confirmed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "unmatched" => Some(MatchConfidence::Unmatched),
            "auto_matched" => Some(MatchConfidence::AutoMatched),
            "proposed" => Some(MatchConfidence::Proposed),
            "manually_confirmed" => Some(MatchConfidence::ManuallyConfirmed),
            _ => None,
        }
    }
}

impl ToSql for MatchConfidence {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for MatchConfidence {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        MatchConfidence::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown match confidence {text:?}").into()))
    }
}

/// How an expense was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Paid in cash; no ledger transaction is expected.
    Cash,
    /// Paid by credit or debit card.
    Card,
    /// Paid by bank transfer.
    BankTransfer,
    /// Paid with electronic money (IC card, QR payment, etc.).
    Electronic,
}

impl PaymentMethod {
    /// The stable text value stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Electronic => "electronic",
        }
    }

    /// Parse the text value used in the database and on the command line.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(PaymentMethod::Cash),
            "card" => Some(PaymentMethod::Card),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "electronic" => Some(PaymentMethod::Electronic),
            _ => None,
        }
    }
}

impl ToSql for PaymentMethod {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for PaymentMethod {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        PaymentMethod::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown payment method {text:?}").into()))
    }
}

/// Where an expense record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Captured from a receipt photo.
    Photo,
    /// Entered by hand.
    Manual,
    /// Produced by promoting an imported transaction.
    Import,
}

impl Provenance {
    /// The stable text value stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Photo => "photo",
            Provenance::Manual => "manual",
            Provenance::Import => "import",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "photo" => Some(Provenance::Photo),
            "manual" => Some(Provenance::Manual),
            "import" => Some(Provenance::Import),
            _ => None,
        }
    }
}

impl ToSql for Provenance {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Provenance {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Provenance::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown provenance {text:?}").into()))
    }
}

/// A tax-relevant spending record tracked independently of the ledger.
///
/// Amounts are positive integers in minor currency units. To create a new
/// `Expense`, use [Expense::build] and [create_expense].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    /// The ID of the expense.
    pub id: DatabaseId,
    /// When the expense was incurred.
    pub date: Date,
    /// The store or vendor name.
    pub store_name: String,
    /// The total amount in minor currency units, always positive.
    pub amount: i64,
    /// The tax portion of the amount, if known.
    pub tax: Option<i64>,
    /// The tax-filing category, e.g. "会議費".
    pub category: String,
    /// The tax-filing subcategory, if any.
    pub subcategory: Option<String>,
    /// How the expense was paid.
    pub payment_method: PaymentMethod,
    /// Where this record came from.
    pub provenance: Provenance,
    /// The transaction this expense is linked to, if any.
    pub matched_transaction_id: Option<TransactionId>,
    /// The confidence state of the link.
    pub confidence: MatchConfidence,
    /// When this record was created.
    ///
    /// Used as the final tie-break during matching so that reconciliation
    /// runs are reproducible.
    pub created_at: OffsetDateTime,
}

impl Expense {
    /// Create a new expense.
    ///
    /// Shortcut for [ExpenseBuilder] for discoverability.
    pub fn build(amount: i64, date: Date, store_name: &str) -> ExpenseBuilder {
        ExpenseBuilder {
            amount,
            date,
            store_name: store_name.to_owned(),
            tax: None,
            category: String::new(),
            subcategory: None,
            payment_method: PaymentMethod::Cash,
            provenance: Provenance::Manual,
        }
    }
}

/// A builder for creating [Expense] instances.
#[derive(Debug, PartialEq, Clone)]
pub struct ExpenseBuilder {
    /// The total amount in minor currency units, always positive.
    pub amount: i64,
    /// When the expense was incurred.
    pub date: Date,
    /// The store or vendor name.
    pub store_name: String,
    /// The tax portion of the amount, if known.
    pub tax: Option<i64>,
    /// The tax-filing category.
    pub category: String,
    /// The tax-filing subcategory, if any.
    pub subcategory: Option<String>,
    /// How the expense was paid. Defaults to cash.
    pub payment_method: PaymentMethod,
    /// Where the record came from. Defaults to manual entry.
    pub provenance: Provenance,
}

impl ExpenseBuilder {
    /// Set the tax portion of the amount.
    pub fn tax(mut self, tax: Option<i64>) -> Self {
        self.tax = tax;
        self
    }

    /// Set the tax-filing category.
    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_owned();
        self
    }

    /// Set the tax-filing subcategory.
    pub fn subcategory(mut self, subcategory: Option<&str>) -> Self {
        self.subcategory = subcategory.map(str::to_owned);
        self
    }

    /// Set the payment method.
    pub fn payment_method(mut self, payment_method: PaymentMethod) -> Self {
        self.payment_method = payment_method;
        self
    }

    /// Set the provenance of the record.
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create a new expense in the database from a builder.
///
/// The expense starts unlinked, with confidence
/// [MatchConfidence::Unmatched], and enters the matcher's candidate pool.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn create_expense(builder: ExpenseBuilder, connection: &Connection) -> Result<Expense, Error> {
    let expense = connection
        .prepare(
            "INSERT INTO expense (date, store_name, amount, tax, category, subcategory,
                payment_method, provenance, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             RETURNING id, date, store_name, amount, tax, category, subcategory,
                payment_method, provenance, matched_transaction_id, confidence, created_at",
        )?
        .query_row(
            (
                builder.date,
                &builder.store_name,
                builder.amount,
                builder.tax,
                &builder.category,
                &builder.subcategory,
                builder.payment_method,
                builder.provenance,
                MatchConfidence::Unmatched,
                OffsetDateTime::now_utc(),
            ),
            map_expense_row,
        )?;

    Ok(expense)
}

/// Retrieve an expense from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid expense,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_expense(id: ExpenseId, connection: &Connection) -> Result<Expense, Error> {
    let expense = connection
        .prepare(
            "SELECT id, date, store_name, amount, tax, category, subcategory,
                payment_method, provenance, matched_transaction_id, confidence, created_at
             FROM expense WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_expense_row)?;

    Ok(expense)
}

/// Create the expense table and its indexes in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_expense_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS expense (
            id INTEGER PRIMARY KEY,
            date TEXT NOT NULL,
            store_name TEXT NOT NULL,
            amount INTEGER NOT NULL,
            tax INTEGER,
            category TEXT NOT NULL,
            subcategory TEXT,
            payment_method TEXT NOT NULL,
            provenance TEXT NOT NULL,
            matched_transaction_id INTEGER,
            confidence TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(matched_transaction_id) REFERENCES \"transaction\"(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_expense_candidates ON expense(amount, confidence, date);",
    )?;

    Ok(())
}

/// Map a database row to an Expense.
pub fn map_expense_row(row: &Row) -> Result<Expense, rusqlite::Error> {
    Ok(Expense {
        id: row.get(0)?,
        date: row.get(1)?,
        store_name: row.get(2)?,
        amount: row.get(3)?,
        tax: row.get(4)?,
        category: row.get(5)?,
        subcategory: row.get(6)?,
        payment_method: row.get(7)?,
        provenance: row.get(8)?,
        matched_transaction_id: row.get(9)?,
        confidence: row.get(10)?,
        created_at: row.get(11)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
