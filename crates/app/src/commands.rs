//! Command handlers. Each one prints its result as JSON on stdout.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::json;

use tally_core::{
    ExpectationFilter, ExpectationPatch, ExpectedTransactionId, MatchingConfig, MonthPlanId,
    NewExpectedTransaction, PaymentMethodId, SystemClock, TagId, TransactionId, UserId, VendorId,
};
use tally_matching::{AutoMatchOptions, ExpectationManager, MatchingEngine};
use tally_storage::{DbPool, NewTransaction, SqliteStore};

use crate::cli::{Commands, ExpectedAction, PlanAction, TransactionArgs};

pub type Engine = MatchingEngine<SqliteStore>;

pub fn build_engine(db: DbPool, matching: &MatchingConfig) -> Engine {
    MatchingEngine::new(
        Arc::new(SqliteStore::new(db)),
        Arc::new(SystemClock),
        matching,
    )
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(engine: &Engine, user: UserId, command: Commands) -> Result<()> {
    let manager = engine.expectations();
    let pool = manager.store().pool();

    match command {
        Commands::Plan { action } => match action {
            PlanAction::Create { month, status } => {
                let id = tally_storage::insert_month_plan(pool, user, month, status)
                    .await
                    .with_context(|| format!("Failed to create month plan for {month}"))?;
                tracing::info!(%id, %month, "Created month plan");
                print_json(&json!({ "id": id }))
            }
            PlanAction::Show { month } => {
                match tally_storage::find_month_plan(pool, user, month).await? {
                    Some(plan) => print_json(&plan),
                    None => bail!("No month plan covers {month}"),
                }
            }
        },
        Commands::Vendor { name } => {
            let id = tally_storage::insert_vendor(pool, user, &name).await?;
            print_json(&json!({ "id": id, "name": name }))
        }
        Commands::PaymentMethod { name } => {
            let id = tally_storage::insert_payment_method(pool, user, &name).await?;
            print_json(&json!({ "id": id, "name": name }))
        }
        Commands::Tag { name } => {
            let id = tally_storage::insert_tag(pool, user, &name).await?;
            print_json(&json!({ "id": id, "name": name }))
        }
        Commands::Tx(args) => {
            let id = tally_storage::insert_transaction(pool, user, &new_transaction(args))
                .await
                .context("Failed to record transaction")?;
            tracing::info!(%id, "Recorded transaction");
            print_json(&json!({ "id": id }))
        }
        Commands::Expected { action } => run_expected(manager, user, action).await,
        Commands::Suggest { plan } => {
            let suggestions = engine
                .find_match_suggestions(MonthPlanId(plan), user)
                .await?;
            print_json(&suggestions)
        }
        Commands::AutoMatch {
            plan,
            threshold,
            manual_review,
        } => {
            let options = AutoMatchOptions {
                confidence_threshold: threshold,
                require_manual_review: manual_review,
            };
            let result = engine
                .auto_match_transactions(MonthPlanId(plan), user, &options)
                .await?;
            print_json(&result)
        }
        Commands::Match {
            expected,
            transaction,
        } => {
            let matched = manager
                .match_transaction(user, ExpectedTransactionId(expected), TransactionId(transaction))
                .await?;
            print_json(&matched)
        }
        Commands::Unmatch { expected } => {
            let unmatched = manager
                .unmatch_transaction(user, ExpectedTransactionId(expected))
                .await?;
            print_json(&unmatched)
        }
        Commands::Skip { expected, reason } => {
            let skipped = manager
                .skip_expected_transaction(user, ExpectedTransactionId(expected), &reason)
                .await?;
            print_json(&skipped)
        }
        Commands::Sweep => {
            let updated = manager.mark_overdue_transactions(user).await?;
            print_json(&json!({ "updated_count": updated }))
        }
        Commands::Summary { plan } => {
            let stats = manager.summarize_month(user, MonthPlanId(plan)).await?;
            print_json(&stats)
        }
    }
}

async fn run_expected(
    manager: &ExpectationManager<SqliteStore>,
    user: UserId,
    action: ExpectedAction,
) -> Result<()> {
    match action {
        ExpectedAction::Add {
            plan,
            details,
            notes,
        } => {
            let tx = new_transaction(details);
            let data = NewExpectedTransaction {
                month_plan_id: MonthPlanId(plan),
                template_id: None,
                description: tx.description,
                expected_amount: tx.amount,
                original_currency: tx.original_currency,
                transaction_type: tx.transaction_type,
                expected_date: tx.transaction_date,
                vendor_id: tx.vendor_id,
                payment_method_id: tx.payment_method_id,
                tag_ids: tx.tag_ids,
                notes,
            };
            let created = manager.create_expected_transaction(user, &data).await?;
            print_json(&created)
        }
        ExpectedAction::List {
            plan,
            status,
            transaction_type,
            vendor,
        } => {
            let filter = ExpectationFilter {
                transaction_type,
                vendor_ids: vendor.into_iter().map(VendorId).collect(),
                ..ExpectationFilter::month(MonthPlanId(plan)).with_statuses(&status)
            };
            let found = manager.list_expected_transactions(user, &filter).await?;
            print_json(&found)
        }
        ExpectedAction::Show { id } => {
            let found = manager
                .get_expected_transaction(user, ExpectedTransactionId(id))
                .await?;
            print_json(&found)
        }
        ExpectedAction::Update {
            id,
            description,
            amount,
            date,
            status,
            notes,
        } => {
            let patch = ExpectationPatch {
                description,
                expected_amount: amount,
                expected_date: date,
                status,
                notes: notes.map(Some),
                ..Default::default()
            };
            let updated = manager
                .update_expected_transaction(user, ExpectedTransactionId(id), &patch)
                .await?;
            print_json(&updated)
        }
        ExpectedAction::Delete {
            id,
            delete_matched_transaction,
        } => {
            manager
                .delete_expected_transaction(user, ExpectedTransactionId(id), delete_matched_transaction)
                .await?;
            print_json(&json!({ "deleted": id }))
        }
    }
}

fn new_transaction(args: TransactionArgs) -> NewTransaction {
    NewTransaction {
        description: args.description,
        amount: args.amount,
        original_currency: args.currency,
        transaction_type: args.transaction_type,
        transaction_date: args.date,
        vendor_id: args.vendor.map(VendorId),
        payment_method_id: args.payment_method.map(PaymentMethodId),
        tag_ids: args.tags.into_iter().map(TagId).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tally_core::{Currency, ExpectedStatus, Money, MonthPlanStatus, TransactionType};

    const USER: UserId = UserId(1);

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn args(description: &str, amount: &str, on: NaiveDate) -> TransactionArgs {
        TransactionArgs {
            description: description.to_string(),
            amount: amount.parse().unwrap(),
            currency: Currency::new("USD").unwrap(),
            transaction_type: TransactionType::Expense,
            date: on,
            vendor: None,
            payment_method: None,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn auto_match_from_the_command_line_links_records() {
        let db = tally_storage::create_memory_db().await.unwrap();
        let engine = build_engine(db, &MatchingConfig::default());
        let pool = engine.expectations().store().pool().clone();

        let plan = tally_storage::insert_month_plan(&pool, USER, date(1, 1), MonthPlanStatus::Active)
            .await
            .unwrap();
        let vendor = tally_storage::insert_vendor(&pool, USER, "Metro Water").await.unwrap();

        let mut bill = args("Water bill", "42.00", date(1, 12));
        bill.vendor = Some(vendor.0);
        run(
            &engine,
            USER,
            Commands::Expected {
                action: ExpectedAction::Add {
                    plan: plan.0,
                    details: bill,
                    notes: None,
                },
            },
        )
        .await
        .unwrap();

        let mut paid = args("METRO WATER", "42.00", date(1, 12));
        paid.vendor = Some(vendor.0);
        run(&engine, USER, Commands::Tx(paid)).await.unwrap();

        run(
            &engine,
            USER,
            Commands::AutoMatch {
                plan: plan.0,
                threshold: None,
                manual_review: false,
            },
        )
        .await
        .unwrap();

        let all = engine
            .expectations()
            .list_expected_transactions(USER, &ExpectationFilter::month(plan))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ExpectedStatus::Matched);
        assert_eq!(all[0].actual_amount, Some(Money::from_cents(4_200)));
    }

    #[tokio::test]
    async fn missing_plan_is_reported_as_an_error() {
        let db = tally_storage::create_memory_db().await.unwrap();
        let engine = build_engine(db, &MatchingConfig::default());

        let err = run(&engine, USER, Commands::Summary { plan: 99 })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("99"), "{err}");

        let err = run(
            &engine,
            USER,
            Commands::Plan {
                action: PlanAction::Show { month: date(6, 1) },
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("2025-06-01"), "{err}");
    }
}
