//! Row parsing for MoneyForward ME CSV exports.

use csv::StringRecord;
use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

use crate::{
    Error,
    transaction::{Transaction, TransactionBuilder},
};

const COLUMN_CALCULATION_TARGET: &str = "計算対象";
const COLUMN_DATE: &str = "日付";
const COLUMN_DESCRIPTION: &str = "内容";
const COLUMN_AMOUNT: &str = "金額（円）";
const COLUMN_SOURCE_ACCOUNT: &str = "保有金融機関";
const COLUMN_CATEGORY_COARSE: &str = "大項目";
const COLUMN_CATEGORY_FINE: &str = "中項目";
const COLUMN_MEMO: &str = "メモ";
const COLUMN_TRANSFER: &str = "振替";
const COLUMN_EXTERNAL_ID: &str = "ID";

/// A row that could not be converted into a transaction.
///
/// A malformed row never blocks the rest of the file; it is collected here
/// so the import summary can surface it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SkippedRow {
    /// The 1-based line number of the row in the file, counting the header.
    pub row_number: usize,
    /// Why the row was skipped.
    pub reason: String,
}

/// The outcome of parsing the text of a ledger export.
#[derive(Debug, PartialEq)]
pub struct ParsedLedger {
    /// Builders for the rows that parsed cleanly, in file order.
    pub rows: Vec<TransactionBuilder>,
    /// The rows that could not be parsed, with reasons.
    pub skipped_rows: Vec<SkippedRow>,
}

/// Parse the decoded text of a ledger export into transaction builders.
///
/// Columns are mapped by header name per the MoneyForward ME export schema.
/// A row with a missing external ID, an unparseable date, or an unparseable
/// amount is skipped with a reason; the rest of the file is still processed.
///
/// # Errors
/// Returns [Error::InvalidCSV] if the header row is unreadable or a required
/// column is missing from it entirely.
pub fn parse_ledger_csv(text: &str) -> Result<ParsedLedger, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|error| Error::InvalidCSV(format!("could not read the header row: {error}")))?
        .clone();
    let columns = ColumnIndexes::resolve(&headers)?;

    let mut rows = Vec::new();
    let mut skipped_rows = Vec::new();

    for (index, record) in reader.records().enumerate() {
        // 1-based file line numbers, with the header on line 1.
        let row_number = index + 2;

        let record = match record {
            Ok(record) => record,
            Err(error) => {
                skipped_rows.push(SkippedRow {
                    row_number,
                    reason: format!("unreadable row: {error}"),
                });
                continue;
            }
        };

        match parse_record(&record, &columns) {
            Ok(builder) => rows.push(builder),
            Err(reason) => skipped_rows.push(SkippedRow { row_number, reason }),
        }
    }

    Ok(ParsedLedger { rows, skipped_rows })
}

/// The positions of the export's columns in the header row.
struct ColumnIndexes {
    external_id: usize,
    date: usize,
    description: usize,
    amount: usize,
    calculation_target: Option<usize>,
    source_account: Option<usize>,
    category_coarse: Option<usize>,
    category_fine: Option<usize>,
    memo: Option<usize>,
    transfer: Option<usize>,
}

impl ColumnIndexes {
    fn resolve(headers: &StringRecord) -> Result<Self, Error> {
        let find = |name: &str| headers.iter().position(|header| header.trim() == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| Error::InvalidCSV(format!("missing column \"{name}\"")))
        };

        Ok(Self {
            external_id: require(COLUMN_EXTERNAL_ID)?,
            date: require(COLUMN_DATE)?,
            description: require(COLUMN_DESCRIPTION)?,
            amount: require(COLUMN_AMOUNT)?,
            calculation_target: find(COLUMN_CALCULATION_TARGET),
            source_account: find(COLUMN_SOURCE_ACCOUNT),
            category_coarse: find(COLUMN_CATEGORY_COARSE),
            category_fine: find(COLUMN_CATEGORY_FINE),
            memo: find(COLUMN_MEMO),
            transfer: find(COLUMN_TRANSFER),
        })
    }
}

fn parse_record(record: &StringRecord, columns: &ColumnIndexes) -> Result<TransactionBuilder, String> {
    let required = |index: usize| {
        record
            .get(index)
            .map(str::trim)
            .ok_or_else(|| "row has too few columns".to_owned())
    };
    let optional = |index: Option<usize>| index.and_then(|i| record.get(i)).unwrap_or("").trim();

    let external_id = required(columns.external_id)?;
    if external_id.is_empty() {
        return Err("missing external ID".to_owned());
    }

    let date_text = required(columns.date)?;
    let date =
        parse_ledger_date(date_text).ok_or_else(|| format!("could not parse date {date_text:?}"))?;

    let amount_text = required(columns.amount)?;
    let amount =
        parse_amount(amount_text).ok_or_else(|| format!("could not parse amount {amount_text:?}"))?;

    let description = required(columns.description)?;

    // Missing calculation-target column defaults to included, matching the
    // source tool's behavior for older exports.
    let in_calculations = match columns.calculation_target {
        Some(index) => parse_flag(optional(Some(index))),
        None => true,
    };

    Ok(Transaction::build(external_id, date, amount)
        .description(description)
        .source_account(optional(columns.source_account))
        .categories(
            optional(columns.category_coarse),
            optional(columns.category_fine),
        )
        .memo(optional(columns.memo))
        .is_transfer(parse_flag(optional(columns.transfer)))
        .in_calculations(in_calculations))
}

/// Parse a date in any of the forms the ledger tool exports.
///
/// Accepts `YYYY/MM/DD`, `YYYY-MM-DD`, and `YYYY年MM月DD日`.
pub fn parse_ledger_date(value: &str) -> Option<Date> {
    const SLASH_FORMAT: &[BorrowedFormatItem] = format_description!("[year]/[month]/[day]");
    const DASH_FORMAT: &[BorrowedFormatItem] = format_description!("[year]-[month]-[day]");
    const KANJI_FORMAT: &[BorrowedFormatItem] = format_description!("[year]年[month]月[day]日");

    [SLASH_FORMAT, DASH_FORMAT, KANJI_FORMAT]
        .into_iter()
        .find_map(|format| Date::parse(value, format).ok())
}

/// Parse an amount like `"1,234"` or `"-1,234"` into minor currency units.
/// An empty amount is zero, matching the source tool's export of pending
/// rows.
fn parse_amount(value: &str) -> Option<i64> {
    let value = value.trim().replace(',', "");

    if value.is_empty() {
        return Some(0);
    }

    value.parse().ok()
}

/// The export marks boolean columns with `1` or `○`.
fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "○" | "true" | "True" | "TRUE")
}
