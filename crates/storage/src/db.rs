use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

use tally_core::{
    Currency, DateRange, Money, MonthPlan, MonthPlanId, MonthPlanStatus, PaymentMethodId, TagId,
    TransactionId, TransactionType, UserId, VendorId,
};

pub type DbPool = Pool<Sqlite>;

/// Opens (creating if needed) the database file at `path` and migrates it.
pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    open(options).await
}

/// Private in-memory database, mostly for tests and dry runs.
pub async fn create_memory_db() -> Result<DbPool, sqlx::Error> {
    open(SqliteConnectOptions::from_str("sqlite::memory:")?).await
}

async fn open(options: SqliteConnectOptions) -> Result<DbPool, sqlx::Error> {
    // One connection: SQLite serializes writers anyway, and an in-memory
    // database exists per connection.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS month_plans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            month TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            notes TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (user_id, month)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vendors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            UNIQUE (user_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payment_methods (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            UNIQUE (user_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            UNIQUE (user_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            description TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            original_currency TEXT NOT NULL,
            transaction_type TEXT NOT NULL,
            transaction_date TEXT NOT NULL,
            vendor_id INTEGER,
            payment_method_id INTEGER,
            expected_transaction_id INTEGER,
            source_type TEXT NOT NULL DEFAULT 'manual',
            created_at TEXT NOT NULL,
            FOREIGN KEY (vendor_id) REFERENCES vendors(id),
            FOREIGN KEY (payment_method_id) REFERENCES payment_methods(id),
            FOREIGN KEY (expected_transaction_id) REFERENCES expected_transactions(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transaction_tags (
            transaction_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (transaction_id, tag_id),
            FOREIGN KEY (transaction_id) REFERENCES transactions(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expected_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            month_plan_id INTEGER NOT NULL,
            template_id INTEGER,
            description TEXT NOT NULL,
            expected_amount_cents INTEGER NOT NULL CHECK (expected_amount_cents > 0),
            original_currency TEXT NOT NULL,
            transaction_type TEXT NOT NULL,
            expected_date TEXT NOT NULL,
            vendor_id INTEGER,
            payment_method_id INTEGER,
            status TEXT NOT NULL DEFAULT 'pending',
            matched_transaction_id INTEGER,
            matched_at TEXT,
            actual_amount_cents INTEGER,
            variance_amount_cents INTEGER,
            variance_percentage TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (month_plan_id) REFERENCES month_plans(id) ON DELETE CASCADE,
            FOREIGN KEY (vendor_id) REFERENCES vendors(id),
            FOREIGN KEY (payment_method_id) REFERENCES payment_methods(id),
            FOREIGN KEY (matched_transaction_id) REFERENCES transactions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one expectation may claim a given actual transaction.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_expected_matched_transaction
            ON expected_transactions(matched_transaction_id)
            WHERE matched_transaction_id IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_expected_plan_status ON expected_transactions(month_plan_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions(user_id, transaction_date)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expected_transaction_tags (
            expected_transaction_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (expected_transaction_id, tag_id),
            FOREIGN KEY (expected_transaction_id) REFERENCES expected_transactions(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Input for recording an actual transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub description: String,
    pub amount: Money,
    pub original_currency: Currency,
    pub transaction_type: TransactionType,
    pub transaction_date: NaiveDate,
    pub vendor_id: Option<VendorId>,
    pub payment_method_id: Option<PaymentMethodId>,
    pub tag_ids: Vec<TagId>,
}

pub async fn insert_month_plan(
    pool: &DbPool,
    user: UserId,
    month: NaiveDate,
    status: MonthPlanStatus,
) -> Result<MonthPlanId, sqlx::Error> {
    let first = first_of_month(month);
    let result = sqlx::query(
        "INSERT INTO month_plans (user_id, month, status, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user.0)
    .bind(first)
    .bind(status.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(MonthPlanId(result.last_insert_rowid()))
}

pub async fn find_month_plan(
    pool: &DbPool,
    user: UserId,
    month: NaiveDate,
) -> Result<Option<MonthPlan>, sqlx::Error> {
    let row = sqlx::query_as::<_, (i64, i64, NaiveDate, String, Option<String>)>(
        "SELECT id, user_id, month, status, notes FROM month_plans WHERE user_id = ? AND month = ?",
    )
    .bind(user.0)
    .bind(first_of_month(month))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| MonthPlan {
        id: MonthPlanId(r.0),
        user_id: UserId(r.1),
        month: r.2,
        status: r.3.parse().unwrap_or_default(),
        notes: r.4,
    }))
}

pub async fn insert_vendor(pool: &DbPool, user: UserId, name: &str) -> Result<VendorId, sqlx::Error> {
    insert_named(pool, "vendors", user, name).await.map(VendorId)
}

pub async fn insert_payment_method(
    pool: &DbPool,
    user: UserId,
    name: &str,
) -> Result<PaymentMethodId, sqlx::Error> {
    insert_named(pool, "payment_methods", user, name)
        .await
        .map(PaymentMethodId)
}

pub async fn insert_tag(pool: &DbPool, user: UserId, name: &str) -> Result<TagId, sqlx::Error> {
    insert_named(pool, "tags", user, name).await.map(TagId)
}

/// Returns the id of the `(user, name)` row, inserting it if missing.
async fn insert_named(pool: &DbPool, table: &str, user: UserId, name: &str) -> Result<i64, sqlx::Error> {
    sqlx::query(&format!(
        "INSERT OR IGNORE INTO {table} (user_id, name) VALUES (?, ?)"
    ))
    .bind(user.0)
    .bind(name)
    .execute(pool)
    .await?;

    let (id,) = sqlx::query_as::<_, (i64,)>(&format!(
        "SELECT id FROM {table} WHERE user_id = ? AND name = ?"
    ))
    .bind(user.0)
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn insert_transaction(
    pool: &DbPool,
    user: UserId,
    tx: &NewTransaction,
) -> Result<TransactionId, sqlx::Error> {
    let mut db_tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO transactions
            (user_id, description, amount_cents, original_currency, transaction_type,
             transaction_date, vendor_id, payment_method_id, source_type, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'manual', ?)
        "#,
    )
    .bind(user.0)
    .bind(&tx.description)
    .bind(tx.amount.to_cents())
    .bind(tx.original_currency.code())
    .bind(tx.transaction_type.to_string())
    .bind(tx.transaction_date)
    .bind(tx.vendor_id.map(|v| v.0))
    .bind(tx.payment_method_id.map(|p| p.0))
    .bind(Utc::now())
    .execute(&mut *db_tx)
    .await?;
    let id = result.last_insert_rowid();

    for tag in &tx.tag_ids {
        sqlx::query("INSERT OR IGNORE INTO transaction_tags (transaction_id, tag_id) VALUES (?, ?)")
            .bind(id)
            .bind(tag.0)
            .execute(&mut *db_tx)
            .await?;
    }

    db_tx.commit().await?;
    Ok(TransactionId(id))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    DateRange::month_of(date).start
}
