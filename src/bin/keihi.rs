//! The command line interface for the keihi reconciliation engine.

use std::{fs, fs::OpenOptions, path::PathBuf, process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand};
use rusqlite::Connection;
use time::Date;
use tracing_subscriber::{EnvFilter, Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use keihi::{
    Classification, Error, Expense, HistoryClassifier, ImportConfig, ImportResult,
    KeywordClassifier, MatchReport, PaymentMethod, classify_with_fallback, confirm_proposal,
    create_expense, get_transaction, get_unmatched_transactions, import_ledger_file,
    initialize_db, parse_ledger_date, promote_transaction, reconcile,
};

/// Import and reconciliation tooling for personal expense tracking.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// File path to the application SQLite database.
    #[arg(long, default_value = "keihi.db")]
    db_path: String,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a ledger CSV export, then reconcile the new transactions.
    Import {
        /// Path to the CSV file exported from the ledger tool.
        file: PathBuf,

        /// The maximum accepted file size in bytes.
        #[arg(long, default_value_t = ImportConfig::default().max_file_size)]
        max_file_size: usize,

        /// Import only; skip the reconciliation pass.
        #[arg(long)]
        no_reconcile: bool,
    },

    /// Reconcile all unmatched, non-transfer transactions.
    Reconcile,

    /// Accept or reject the proposed match on a transaction.
    Confirm {
        /// The ID of the transaction with the proposed match.
        transaction_id: i64,

        /// Reject the proposal instead of accepting it.
        #[arg(long)]
        reject: bool,
    },

    /// Record an expense.
    AddExpense {
        /// The expense date, e.g. 2024-03-10.
        #[arg(value_parser = parse_date_arg)]
        date: Date,

        /// The store or vendor name.
        store: String,

        /// The total amount in minor currency units.
        amount: i64,

        /// The tax portion of the amount.
        #[arg(long)]
        tax: Option<i64>,

        /// The tax-filing category. Classified automatically when omitted.
        #[arg(long)]
        category: Option<String>,

        /// The tax-filing subcategory.
        #[arg(long)]
        subcategory: Option<String>,

        /// How the expense was paid: cash, card, bank_transfer, or electronic.
        #[arg(long, default_value = "cash", value_parser = parse_payment_arg)]
        payment: PaymentMethod,
    },

    /// Promote an unmatched transaction into a confirmed expense.
    Promote {
        /// The ID of the transaction to promote.
        transaction_id: i64,

        /// The tax-filing category. Classified automatically when omitted.
        #[arg(long)]
        category: Option<String>,
    },
}

fn main() -> ExitCode {
    setup_logging();

    let cli = Cli::parse();

    let connection = Connection::open(&cli.db_path).expect("Could not open the database");
    initialize_db(&connection).expect("Could not initialize the database");

    match run(&cli, &connection) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, connection: &Connection) -> Result<(), Error> {
    match &cli.command {
        Command::Import {
            file,
            max_file_size,
            no_reconcile,
        } => {
            let bytes = fs::read(file).expect("Could not read the CSV file");
            let config = ImportConfig {
                max_file_size: *max_file_size,
            };

            let result = import_ledger_file(&bytes, &config, connection)?;
            print_import_result(&result, cli.json);

            if !no_reconcile && !result.inserted.is_empty() {
                let report = reconcile(&result.inserted, connection)?;
                print_match_report(&report, cli.json);
            }

            Ok(())
        }
        Command::Reconcile => {
            let transactions = get_unmatched_transactions(connection)?;
            let report = reconcile(&transactions, connection)?;
            print_match_report(&report, cli.json);

            Ok(())
        }
        Command::Confirm {
            transaction_id,
            reject,
        } => {
            confirm_proposal(*transaction_id, !reject, connection)?;
            println!(
                "Proposal for transaction {} {}.",
                transaction_id,
                if *reject { "rejected" } else { "accepted" }
            );

            Ok(())
        }
        Command::AddExpense {
            date,
            store,
            amount,
            tax,
            category,
            subcategory,
            payment,
        } => {
            let classification = resolve_category(category, subcategory, store, connection);

            let expense = create_expense(
                Expense::build(*amount, *date, store)
                    .tax(*tax)
                    .category(&classification.category)
                    .subcategory(classification.subcategory.as_deref())
                    .payment_method(*payment),
                connection,
            )?;
            println!(
                "Recorded expense {}: {} ¥{} ({}).",
                expense.id, expense.store_name, expense.amount, expense.category
            );

            Ok(())
        }
        Command::Promote {
            transaction_id,
            category,
        } => {
            let transaction = get_transaction(*transaction_id, connection)?;
            let classification =
                resolve_category(category, &None, &transaction.description, connection);

            let expense = promote_transaction(
                *transaction_id,
                &classification.category,
                classification.subcategory.as_deref(),
                connection,
            )?;
            println!(
                "Promoted transaction {} into expense {} ({}).",
                transaction_id, expense.id, expense.category
            );

            Ok(())
        }
    }
}

/// Use the category given on the command line, or run the classifier chain
/// over the store name.
fn resolve_category(
    category: &Option<String>,
    subcategory: &Option<String>,
    store_name: &str,
    connection: &Connection,
) -> Classification {
    match category {
        Some(category) => Classification {
            category: category.clone(),
            subcategory: subcategory.clone(),
        },
        None => {
            let keywords = KeywordClassifier::with_default_rules();
            let history = HistoryClassifier::new(connection);
            let classification = classify_with_fallback(&[&keywords, &history], store_name, "");
            println!("Classified {:?} as {}.", store_name, classification.category);

            classification
        }
    }
}

fn print_import_result(result: &ImportResult, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(result).expect("Could not serialize the import result")
        );
        return;
    }

    println!(
        "Imported {} transactions ({} duplicates skipped).",
        result.inserted.len(),
        result.duplicates_skipped
    );

    for row in &result.skipped_rows {
        println!("  skipped row {}: {}", row.row_number, row.reason);
    }
}

fn print_match_report(report: &MatchReport, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).expect("Could not serialize the match report")
        );
        return;
    }

    if !report.auto_matched.is_empty() {
        println!("Auto-matched:");
        for (transaction, expense) in &report.auto_matched {
            println!(
                "  {} {} ¥{} -> {} ({})",
                transaction.date,
                transaction.description,
                transaction.amount.abs(),
                expense.store_name,
                expense.category
            );
        }
    }

    if !report.proposed.is_empty() {
        println!("Proposed, confirm or reject with `keihi confirm <id>`:");
        for (transaction, expense) in &report.proposed {
            println!(
                "  [{}] {} {} ¥{} -> {} ({})",
                transaction.id,
                transaction.date,
                transaction.description,
                transaction.amount.abs(),
                expense.store_name,
                expense.date
            );
        }
    }

    if !report.uncertain.is_empty() {
        println!("Uncertain, review by hand:");
        for (transaction, candidates) in &report.uncertain {
            println!(
                "  {} {} ¥{}",
                transaction.date,
                transaction.description,
                transaction.amount.abs()
            );
            for expense in candidates {
                println!("    candidate: {} {}", expense.date, expense.store_name);
            }
        }
    }

    println!("Unmatched transactions: {}", report.unmatched.len());
}

fn parse_date_arg(value: &str) -> Result<Date, String> {
    parse_ledger_date(value)
        .ok_or_else(|| format!("could not parse date {value:?}; expected e.g. 2024-03-10"))
}

fn parse_payment_arg(value: &str) -> Result<PaymentMethod, String> {
    PaymentMethod::parse(value)
        .ok_or_else(|| "expected cash, card, bank_transfer, or electronic".to_owned())
}

fn setup_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let stdout_log = tracing_subscriber::fmt::layer().pretty().with_filter(env_filter);

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("Could not create log file");

    let debug_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(Arc::new(log_file))
        .with_filter(filter::LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(stdout_log)
        .with(debug_log)
        .init();
}
