//! The tiered reconciliation pass between imported transactions and expenses.

use rusqlite::{Connection, named_params};
use serde::Serialize;
use time::{Date, Duration};

use crate::{
    Error,
    expense::{Expense, MatchConfidence, map_expense_row},
    matcher::name_match::names_match,
    transaction::{Transaction, get_transaction},
};

/// Date tolerance in days for the certain tier.
const CERTAIN_WINDOW_DAYS: i64 = 1;

/// Date tolerance in days for the likely tier.
const LIKELY_WINDOW_DAYS: i64 = 2;

/// Cap on the expenses listed per transaction in the uncertain bucket.
const UNCERTAIN_CANDIDATE_LIMIT: usize = 10;

/// The outcome of a reconciliation pass, grouped by confidence tier.
///
/// This report is the sole handoff to the notification and approval layer;
/// the matcher itself never sends notifications. "No match" is an expected,
/// common outcome, so a pass always returns a full report rather than an
/// error.
#[derive(Debug, Default, Serialize)]
pub struct MatchReport {
    /// Pairs linked automatically by a certain-tier match.
    pub auto_matched: Vec<(Transaction, Expense)>,
    /// Pairs proposed for user confirmation.
    pub proposed: Vec<(Transaction, Expense)>,
    /// Transactions whose amount lines up with expenses outside the date
    /// windows. Listed for manual review; nothing was linked.
    pub uncertain: Vec<(Transaction, Vec<Expense>)>,
    /// Transactions with no candidate at all.
    pub unmatched: Vec<Transaction>,
}

/// Find a best-fit unmatched expense for each given transaction.
///
/// Transactions are evaluated independently, in input order. Transfers and
/// already-linked transactions are skipped outright. Inflows are reported
/// unmatched without candidate evaluation: only outflows have a plausible
/// expense counterpart, and matching a refund to an expense by absolute
/// value would pair unrelated records.
///
/// A pairing lost to a concurrent writer fails with a stale-candidate
/// condition internally; the transaction then falls through to the
/// remaining candidates and tiers, and the pass continues.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an unexpected
/// SQL error. A failed pairing is not an error.
pub fn reconcile(
    transactions: &[Transaction],
    connection: &Connection,
) -> Result<MatchReport, Error> {
    let mut report = MatchReport::default();

    for transaction in transactions {
        if transaction.is_transfer {
            continue;
        }

        // Re-read the link field so a transaction claimed since the
        // caller's snapshot is not matched twice.
        let transaction = get_transaction(transaction.id, connection)?;
        if transaction.matched_expense_id.is_some() {
            continue;
        }

        if transaction.amount >= 0 {
            report.unmatched.push(transaction);
            continue;
        }

        match match_transaction(&transaction, connection)? {
            Outcome::AutoMatched(expense) => report.auto_matched.push((transaction, expense)),
            Outcome::Proposed(expense) => report.proposed.push((transaction, expense)),
            Outcome::Uncertain(candidates) => report.uncertain.push((transaction, candidates)),
            Outcome::Unmatched => report.unmatched.push(transaction),
        }
    }

    tracing::info!(
        "reconciliation done: {} auto-matched, {} proposed, {} uncertain, {} unmatched",
        report.auto_matched.len(),
        report.proposed.len(),
        report.uncertain.len(),
        report.unmatched.len()
    );

    Ok(report)
}

enum Outcome {
    AutoMatched(Expense),
    Proposed(Expense),
    Uncertain(Vec<Expense>),
    Unmatched,
}

/// Evaluate the tiers top-down for one transaction. The first tier that
/// produces a successful link wins; every tier requires exact amount
/// equality, so only the date window and the name requirement vary.
fn match_transaction(transaction: &Transaction, connection: &Connection) -> Result<Outcome, Error> {
    let amount = transaction.amount.abs();

    // Certain: within one day and the vendor names agree.
    let candidates =
        candidates_in_window(transaction.date, amount, CERTAIN_WINDOW_DAYS, connection)?;
    for expense in candidates
        .iter()
        .filter(|expense| names_match(&transaction.description, &expense.store_name))
    {
        match link(transaction, expense, MatchConfidence::AutoMatched, connection) {
            Ok(linked) => return Ok(Outcome::AutoMatched(linked)),
            Err(Error::StaleCandidate) => continue,
            Err(error) => return Err(error),
        }
    }

    // Likely: within two days, name agreement not required.
    let candidates =
        candidates_in_window(transaction.date, amount, LIKELY_WINDOW_DAYS, connection)?;
    for expense in &candidates {
        match link(transaction, expense, MatchConfidence::Proposed, connection) {
            Ok(linked) => return Ok(Outcome::Proposed(linked)),
            Err(Error::StaleCandidate) => continue,
            Err(error) => return Err(error),
        }
    }

    // Uncertain: the amount alone lines up somewhere. No link is created.
    let candidates = candidates_by_amount(transaction.date, amount, connection)?;
    if candidates.is_empty() {
        Ok(Outcome::Unmatched)
    } else {
        Ok(Outcome::Uncertain(candidates))
    }
}

const CANDIDATE_COLUMNS: &str = "id, date, store_name, amount, tax, category, subcategory,
    payment_method, provenance, matched_transaction_id, confidence, created_at";

/// Unmatched expenses with the exact amount within `window_days` of `date`,
/// closest date first.
fn candidates_in_window(
    date: Date,
    amount: i64,
    window_days: i64,
    connection: &Connection,
) -> Result<Vec<Expense>, Error> {
    let date_from = date - Duration::days(window_days);
    let date_to = date + Duration::days(window_days);

    let mut candidates: Vec<Expense> = connection
        .prepare(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM expense
             WHERE amount = :amount
               AND confidence = :confidence
               AND matched_transaction_id IS NULL
               AND date BETWEEN :date_from AND :date_to"
        ))?
        .query_map(
            named_params! {
                ":amount": amount,
                ":confidence": MatchConfidence::Unmatched,
                ":date_from": date_from,
                ":date_to": date_to,
            },
            map_expense_row,
        )?
        .collect::<Result<_, _>>()?;

    sort_candidates(&mut candidates, date);

    Ok(candidates)
}

/// Unmatched expenses with the exact amount, no date constraint, closest
/// date first. The list is capped at [UNCERTAIN_CANDIDATE_LIMIT] entries to
/// keep the manual-review list reviewable.
fn candidates_by_amount(
    date: Date,
    amount: i64,
    connection: &Connection,
) -> Result<Vec<Expense>, Error> {
    let mut candidates: Vec<Expense> = connection
        .prepare(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM expense
             WHERE amount = :amount
               AND confidence = :confidence
               AND matched_transaction_id IS NULL"
        ))?
        .query_map(
            named_params! {
                ":amount": amount,
                ":confidence": MatchConfidence::Unmatched,
            },
            map_expense_row,
        )?
        .collect::<Result<_, _>>()?;

    sort_candidates(&mut candidates, date);
    candidates.truncate(UNCERTAIN_CANDIDATE_LIMIT);

    Ok(candidates)
}

/// Smallest date difference first; remaining ties broken by earliest
/// creation timestamp, then by ID, so runs are reproducible.
fn sort_candidates(candidates: &mut [Expense], anchor: Date) {
    candidates.sort_by_key(|expense| {
        (
            (expense.date - anchor).whole_days().abs(),
            expense.created_at,
            expense.id,
        )
    });
}

/// Link a transaction and an expense, conditioned on both sides still being
/// unlinked at write time.
fn link(
    transaction: &Transaction,
    expense: &Expense,
    confidence: MatchConfidence,
    connection: &Connection,
) -> Result<Expense, Error> {
    let sql_tx = connection.unchecked_transaction()?;

    let expense_rows = sql_tx.execute(
        "UPDATE expense SET matched_transaction_id = ?1, confidence = ?2
         WHERE id = ?3 AND matched_transaction_id IS NULL AND confidence = ?4",
        (
            transaction.id,
            confidence,
            expense.id,
            MatchConfidence::Unmatched,
        ),
    )?;
    let transaction_rows = sql_tx.execute(
        "UPDATE \"transaction\" SET matched_expense_id = ?1
         WHERE id = ?2 AND matched_expense_id IS NULL",
        (expense.id, transaction.id),
    )?;

    if expense_rows == 0 || transaction_rows == 0 {
        sql_tx.rollback()?;
        tracing::debug!(
            "expense {} was claimed before transaction {} could link to it",
            expense.id,
            transaction.id
        );
        return Err(Error::StaleCandidate);
    }

    sql_tx.commit()?;

    Ok(Expense {
        matched_transaction_id: Some(transaction.id),
        confidence,
        ..expense.clone()
    })
}

#[cfg(test)]
mod reconcile_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        db::initialize,
        expense::{Expense, MatchConfidence, create_expense, get_expense},
        matcher::reconcile,
        transaction::{Transaction, TransactionBuilder, get_transaction, insert_transaction_batch},
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    fn insert_one(builder: TransactionBuilder, conn: &Connection) -> Transaction {
        let (mut inserted, _) =
            insert_transaction_batch(vec![builder], conn).expect("Could not insert transaction");
        inserted.remove(0)
    }

    #[test]
    fn same_day_same_amount_matching_name_is_certain() {
        let conn = get_test_connection();
        let expense = create_expense(
            Expense::build(1200, date!(2024 - 03 - 10), "Starbucks").category("会議費"),
            &conn,
        )
        .unwrap();
        let transaction = insert_one(
            Transaction::build("mf-001", date!(2024 - 03 - 10), -1200)
                .description("STARBUCKS COFFEE"),
            &conn,
        );

        let report = reconcile(&[transaction.clone()], &conn).expect("Could not reconcile");

        assert_eq!(report.auto_matched.len(), 1);
        assert_eq!(report.proposed.len(), 0);
        assert_eq!(report.uncertain.len(), 0);
        assert_eq!(report.unmatched.len(), 0);

        let got_expense = get_expense(expense.id, &conn).unwrap();
        assert_eq!(got_expense.confidence, MatchConfidence::AutoMatched);
        assert_eq!(got_expense.matched_transaction_id, Some(transaction.id));

        let got_transaction = get_transaction(transaction.id, &conn).unwrap();
        assert_eq!(got_transaction.matched_expense_id, Some(expense.id));
    }

    #[test]
    fn two_days_apart_without_name_overlap_is_likely() {
        let conn = get_test_connection();
        let expense = create_expense(
            Expense::build(3500, date!(2024 - 03 - 10), "ランチの店").category("接待交際費"),
            &conn,
        )
        .unwrap();
        let transaction = insert_one(
            Transaction::build("mf-001", date!(2024 - 03 - 12), -3500).description("CARD PAYMENT"),
            &conn,
        );

        let report = reconcile(&[transaction.clone()], &conn).expect("Could not reconcile");

        assert_eq!(report.auto_matched.len(), 0);
        assert_eq!(report.proposed.len(), 1);

        let got_expense = get_expense(expense.id, &conn).unwrap();
        assert_eq!(got_expense.confidence, MatchConfidence::Proposed);
        assert_eq!(got_expense.matched_transaction_id, Some(transaction.id));
    }

    #[test]
    fn five_days_apart_is_uncertain_and_creates_no_link() {
        let conn = get_test_connection();
        let expense = create_expense(
            Expense::build(9800, date!(2024 - 03 - 05), "家電量販店").category("消耗品費"),
            &conn,
        )
        .unwrap();
        let transaction = insert_one(
            Transaction::build("mf-001", date!(2024 - 03 - 10), -9800).description("DENKIYA"),
            &conn,
        );

        let report = reconcile(&[transaction], &conn).expect("Could not reconcile");

        assert_eq!(report.proposed.len(), 0);
        assert_eq!(report.uncertain.len(), 1);
        assert_eq!(report.uncertain[0].1.len(), 1);
        assert_eq!(report.uncertain[0].1[0].id, expense.id);

        // Nothing was linked
        let got_expense = get_expense(expense.id, &conn).unwrap();
        assert_eq!(got_expense.confidence, MatchConfidence::Unmatched);
        assert_eq!(got_expense.matched_transaction_id, None);
    }

    #[test]
    fn no_amount_match_is_unmatched() {
        let conn = get_test_connection();
        create_expense(
            Expense::build(500, date!(2024 - 03 - 10), "コンビニ").category("雑費"),
            &conn,
        )
        .unwrap();
        let transaction =
            insert_one(Transaction::build("mf-001", date!(2024 - 03 - 10), -1200), &conn);

        let report = reconcile(&[transaction.clone()], &conn).expect("Could not reconcile");

        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(report.unmatched[0].id, transaction.id);
    }

    #[test]
    fn certain_pair_never_reaches_lower_buckets() {
        let conn = get_test_connection();
        let expense = create_expense(
            Expense::build(1200, date!(2024 - 03 - 10), "Starbucks").category("会議費"),
            &conn,
        )
        .unwrap();
        let transaction = insert_one(
            Transaction::build("mf-001", date!(2024 - 03 - 10), -1200)
                .description("STARBUCKS COFFEE"),
            &conn,
        );

        let report = reconcile(&[transaction], &conn).expect("Could not reconcile");

        assert_eq!(report.auto_matched.len(), 1);
        assert!(report.proposed.iter().all(|(_, e)| e.id != expense.id));
        assert!(
            report
                .uncertain
                .iter()
                .all(|(_, candidates)| candidates.iter().all(|e| e.id != expense.id))
        );
    }

    #[test]
    fn closest_date_wins_within_a_tier() {
        let conn = get_test_connection();
        let one_day_off = create_expense(
            Expense::build(1200, date!(2024 - 03 - 09), "Starbucks A").category("会議費"),
            &conn,
        )
        .unwrap();
        let same_day = create_expense(
            Expense::build(1200, date!(2024 - 03 - 10), "Starbucks B").category("会議費"),
            &conn,
        )
        .unwrap();
        let transaction = insert_one(
            Transaction::build("mf-001", date!(2024 - 03 - 10), -1200).description("STARBUCKS"),
            &conn,
        );

        let report = reconcile(&[transaction], &conn).expect("Could not reconcile");

        assert_eq!(report.auto_matched.len(), 1);
        assert_eq!(report.auto_matched[0].1.id, same_day.id);

        let loser = get_expense(one_day_off.id, &conn).unwrap();
        assert_eq!(loser.confidence, MatchConfidence::Unmatched);
    }

    #[test]
    fn earliest_created_expense_wins_remaining_ties() {
        let conn = get_test_connection();
        let first = create_expense(
            Expense::build(1200, date!(2024 - 03 - 10), "Starbucks A").category("会議費"),
            &conn,
        )
        .unwrap();
        create_expense(
            Expense::build(1200, date!(2024 - 03 - 10), "Starbucks B").category("会議費"),
            &conn,
        )
        .unwrap();
        let transaction = insert_one(
            Transaction::build("mf-001", date!(2024 - 03 - 10), -1200).description("STARBUCKS"),
            &conn,
        );

        let report = reconcile(&[transaction], &conn).expect("Could not reconcile");

        assert_eq!(report.auto_matched[0].1.id, first.id);
    }

    #[test]
    fn transfers_are_never_evaluated() {
        let conn = get_test_connection();
        create_expense(
            Expense::build(50000, date!(2024 - 03 - 10), "口座振替").category("雑費"),
            &conn,
        )
        .unwrap();
        let transaction = insert_one(
            Transaction::build("mf-001", date!(2024 - 03 - 10), -50000)
                .description("口座振替")
                .is_transfer(true),
            &conn,
        );

        let report = reconcile(&[transaction], &conn).expect("Could not reconcile");

        assert_eq!(report.auto_matched.len(), 0);
        assert_eq!(report.unmatched.len(), 0);
    }

    #[test]
    fn inflows_are_reported_unmatched_without_candidates() {
        let conn = get_test_connection();
        create_expense(
            Expense::build(1200, date!(2024 - 03 - 10), "Starbucks").category("会議費"),
            &conn,
        )
        .unwrap();
        let transaction = insert_one(
            Transaction::build("mf-001", date!(2024 - 03 - 10), 1200).description("REFUND"),
            &conn,
        );

        let report = reconcile(&[transaction.clone()], &conn).expect("Could not reconcile");

        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(report.unmatched[0].id, transaction.id);
        assert_eq!(report.uncertain.len(), 0);
    }

    #[test]
    fn proposed_expense_leaves_the_candidate_pool() {
        let conn = get_test_connection();
        let expense = create_expense(
            Expense::build(3500, date!(2024 - 03 - 10), "ランチの店").category("接待交際費"),
            &conn,
        )
        .unwrap();
        let first = insert_one(
            Transaction::build("mf-001", date!(2024 - 03 - 11), -3500).description("CARD"),
            &conn,
        );
        reconcile(&[first], &conn).expect("Could not reconcile");

        // A second transaction with the same amount cannot claim the now
        // proposed expense.
        let second = insert_one(
            Transaction::build("mf-002", date!(2024 - 03 - 11), -3500).description("CARD"),
            &conn,
        );
        let report = reconcile(&[second], &conn).expect("Could not reconcile");

        assert_eq!(report.proposed.len(), 0);
        assert_eq!(report.unmatched.len(), 1);

        let got_expense = get_expense(expense.id, &conn).unwrap();
        assert_eq!(got_expense.confidence, MatchConfidence::Proposed);
    }

    #[test]
    fn link_fields_stay_symmetric_after_a_sequence_of_operations() {
        let conn = get_test_connection();
        create_expense(
            Expense::build(1200, date!(2024 - 03 - 10), "Starbucks").category("会議費"),
            &conn,
        )
        .unwrap();
        create_expense(
            Expense::build(3500, date!(2024 - 03 - 10), "ランチの店").category("接待交際費"),
            &conn,
        )
        .unwrap();
        let (transactions, _) = insert_transaction_batch(
            vec![
                Transaction::build("mf-001", date!(2024 - 03 - 10), -1200)
                    .description("STARBUCKS COFFEE"),
                Transaction::build("mf-002", date!(2024 - 03 - 12), -3500).description("CARD"),
                Transaction::build("mf-003", date!(2024 - 03 - 15), -999).description("MISC"),
            ],
            &conn,
        )
        .unwrap();

        reconcile(&transactions, &conn).unwrap();
        crate::matcher::confirm_proposal(transactions[1].id, false, &conn).unwrap();
        reconcile(&transactions, &conn).unwrap();
        crate::matcher::confirm_proposal(transactions[1].id, true, &conn).unwrap();

        let transaction_links: Vec<(i64, i64)> = conn
            .prepare(
                "SELECT id, matched_expense_id FROM \"transaction\"
                 WHERE matched_expense_id IS NOT NULL",
            )
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(transaction_links.len(), 2);
        for (transaction_id, expense_id) in &transaction_links {
            let expense = get_expense(*expense_id, &conn).unwrap();
            assert_eq!(expense.matched_transaction_id, Some(*transaction_id));
        }

        let expense_links: Vec<(i64, i64)> = conn
            .prepare(
                "SELECT id, matched_transaction_id FROM expense
                 WHERE matched_transaction_id IS NOT NULL",
            )
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(expense_links.len(), 2);
        for (expense_id, transaction_id) in &expense_links {
            let transaction = get_transaction(*transaction_id, &conn).unwrap();
            assert_eq!(transaction.matched_expense_id, Some(*expense_id));
        }
    }

    #[test]
    fn already_linked_transactions_are_skipped_on_a_second_pass() {
        let conn = get_test_connection();
        create_expense(
            Expense::build(1200, date!(2024 - 03 - 10), "Starbucks").category("会議費"),
            &conn,
        )
        .unwrap();
        let transaction = insert_one(
            Transaction::build("mf-001", date!(2024 - 03 - 10), -1200).description("STARBUCKS"),
            &conn,
        );
        reconcile(&[transaction.clone()], &conn).expect("Could not reconcile");

        // The caller's snapshot is stale: the transaction is now linked.
        let report = reconcile(&[transaction], &conn).expect("Could not reconcile");

        assert_eq!(report.auto_matched.len(), 0);
        assert_eq!(report.unmatched.len(), 0);
    }
}
