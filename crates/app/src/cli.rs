//! Argument definitions. Handlers live in `commands`.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tally_core::{Currency, ExpectedStatus, Money, MonthPlanStatus, TransactionType};

/// Tally - match planned bills and income against what actually happened
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Expected-transaction matching for monthly plans", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to config.toml in the data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path, overriding the configuration file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// User whose records are read and written
    #[arg(long, default_value_t = 1, global = true)]
    pub user: i64,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Month plans
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },

    /// Add a vendor (returns the existing id if the name is taken)
    Vendor { name: String },

    /// Add a payment method
    PaymentMethod { name: String },

    /// Add a tag
    Tag { name: String },

    /// Record an actual transaction
    Tx(TransactionArgs),

    /// Expected transactions
    Expected {
        #[command(subcommand)]
        action: ExpectedAction,
    },

    /// Rank match suggestions for a month plan
    Suggest {
        #[arg(long)]
        plan: i64,
    },

    /// Commit high-confidence matches for a month plan
    AutoMatch {
        #[arg(long)]
        plan: i64,

        /// Minimum confidence to commit (defaults to the configured auto-match threshold)
        #[arg(long)]
        threshold: Option<u8>,

        /// Only report suggestions, never commit
        #[arg(long)]
        manual_review: bool,
    },

    /// Link an expected transaction to an actual one
    Match {
        #[arg(long)]
        expected: i64,

        #[arg(long)]
        transaction: i64,
    },

    /// Undo a match
    Unmatch { expected: i64 },

    /// Mark an expected transaction as not happening this month
    Skip {
        expected: i64,

        #[arg(long)]
        reason: String,
    },

    /// Flip past-due pending expectations to overdue
    Sweep,

    /// Counts and totals for a month plan
    Summary {
        #[arg(long)]
        plan: i64,
    },
}

#[derive(Subcommand)]
pub enum PlanAction {
    /// Create the plan for the month containing DATE
    Create {
        #[arg(long)]
        month: NaiveDate,

        #[arg(long, default_value = "active")]
        status: MonthPlanStatus,
    },

    /// Show the plan for the month containing DATE
    Show {
        #[arg(long)]
        month: NaiveDate,
    },
}

#[derive(Args)]
pub struct TransactionArgs {
    #[arg(long)]
    pub description: String,

    /// Decimal amount, e.g. 84.50
    #[arg(long)]
    pub amount: Money,

    #[arg(long, default_value = "USD")]
    pub currency: Currency,

    /// expense or income
    #[arg(long = "type", default_value = "expense")]
    pub transaction_type: TransactionType,

    #[arg(long)]
    pub date: NaiveDate,

    #[arg(long)]
    pub vendor: Option<i64>,

    #[arg(long)]
    pub payment_method: Option<i64>,

    /// Repeatable
    #[arg(long = "tag")]
    pub tags: Vec<i64>,
}

#[derive(Subcommand)]
pub enum ExpectedAction {
    /// Add an expected transaction to a month plan
    Add {
        #[arg(long)]
        plan: i64,

        #[command(flatten)]
        details: TransactionArgs,

        #[arg(long)]
        notes: Option<String>,
    },

    /// List a month plan's expected transactions
    List {
        #[arg(long)]
        plan: i64,

        /// Repeatable: pending, overdue, matched, skipped
        #[arg(long)]
        status: Vec<ExpectedStatus>,

        #[arg(long = "type")]
        transaction_type: Option<TransactionType>,

        /// Repeatable
        #[arg(long)]
        vendor: Vec<i64>,
    },

    /// Show one expected transaction
    Show { id: i64 },

    /// Edit an expected transaction
    Update {
        id: i64,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        amount: Option<Money>,

        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long)]
        status: Option<ExpectedStatus>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete an expected transaction
    Delete {
        id: i64,

        /// Also delete the matched actual transaction instead of unlinking it
        #[arg(long)]
        delete_matched_transaction: bool,
    },
}
