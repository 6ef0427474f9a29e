//! `SqliteStore`: the store traits over one SQLite pool.
//!
//! Two-sided link writes run inside a single SQL transaction. Each write is
//! guarded by its precondition in the `WHERE` clause, so a lost race shows up
//! as zero affected rows and the whole unit rolls back.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::str::FromStr;

use tally_core::{
    CommitMatch, CommitUnmatch, Currency, ExpectationFilter, ExpectationPatch, ExpectationStore,
    ExpectedTransaction, ExpectedTransactionId, LinkStore, LinkedTransaction, MatchState, Money,
    MonthPlan, MonthPlanId, MonthPlanStatus, NewExpectedTransaction, PaymentMethodId, SourceType,
    StoreError, TagId, TemplateId, Transaction, TransactionFilter, TransactionId, TransactionLink,
    TransactionStore, UserId, VendorId,
};

use crate::db::DbPool;

const EXPECTED_SELECT: &str = r#"
    SELECT e.id, e.user_id, e.month_plan_id, e.template_id, e.description,
           e.expected_amount_cents, e.original_currency, e.transaction_type, e.expected_date,
           e.vendor_id, v.name AS vendor_name, e.payment_method_id, e.status,
           e.matched_transaction_id, e.matched_at, e.actual_amount_cents,
           e.variance_amount_cents, e.variance_percentage, e.notes, e.created_at, e.updated_at,
           (SELECT group_concat(tag_id) FROM expected_transaction_tags et
             WHERE et.expected_transaction_id = e.id) AS tag_ids
    FROM expected_transactions e
    LEFT JOIN vendors v ON v.id = e.vendor_id
"#;

const TRANSACTION_SELECT: &str = r#"
    SELECT t.id, t.user_id, t.description, t.amount_cents, t.original_currency,
           t.transaction_type, t.transaction_date, t.vendor_id, v.name AS vendor_name,
           t.payment_method_id, t.expected_transaction_id, t.source_type,
           (SELECT group_concat(tag_id) FROM transaction_tags tt
             WHERE tt.transaction_id = t.id) AS tag_ids
    FROM transactions t
    LEFT JOIN vendors v ON v.id = t.vendor_id
"#;

#[derive(sqlx::FromRow)]
struct ExpectedRow {
    id: i64,
    user_id: i64,
    month_plan_id: i64,
    template_id: Option<i64>,
    description: String,
    expected_amount_cents: i64,
    original_currency: String,
    transaction_type: String,
    expected_date: NaiveDate,
    vendor_id: Option<i64>,
    vendor_name: Option<String>,
    payment_method_id: Option<i64>,
    status: String,
    matched_transaction_id: Option<i64>,
    matched_at: Option<DateTime<Utc>>,
    actual_amount_cents: Option<i64>,
    variance_amount_cents: Option<i64>,
    variance_percentage: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    tag_ids: Option<String>,
}

impl TryFrom<ExpectedRow> for ExpectedTransaction {
    type Error = StoreError;

    fn try_from(r: ExpectedRow) -> Result<Self, Self::Error> {
        Ok(ExpectedTransaction {
            id: ExpectedTransactionId(r.id),
            user_id: UserId(r.user_id),
            month_plan_id: MonthPlanId(r.month_plan_id),
            template_id: r.template_id.map(TemplateId),
            description: r.description,
            expected_amount: Money::from_cents(r.expected_amount_cents),
            original_currency: Currency::new(&r.original_currency).map_err(StoreError::backend)?,
            transaction_type: parse_column(&r.transaction_type)?,
            expected_date: r.expected_date,
            vendor_id: r.vendor_id.map(VendorId),
            vendor_name: r.vendor_name,
            payment_method_id: r.payment_method_id.map(PaymentMethodId),
            tag_ids: parse_tag_ids(r.tag_ids.as_deref())?,
            status: parse_column(&r.status)?,
            matched_transaction_id: r.matched_transaction_id.map(TransactionId),
            matched_at: r.matched_at,
            actual_amount: r.actual_amount_cents.map(Money::from_cents),
            variance_amount: r.variance_amount_cents.map(Money::from_cents),
            variance_percentage: r
                .variance_percentage
                .as_deref()
                .map(Decimal::from_str)
                .transpose()
                .map_err(StoreError::backend)?,
            notes: r.notes,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    user_id: i64,
    description: String,
    amount_cents: i64,
    original_currency: String,
    transaction_type: String,
    transaction_date: NaiveDate,
    vendor_id: Option<i64>,
    vendor_name: Option<String>,
    payment_method_id: Option<i64>,
    expected_transaction_id: Option<i64>,
    source_type: String,
    tag_ids: Option<String>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(r: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: TransactionId(r.id),
            user_id: UserId(r.user_id),
            description: r.description,
            amount: Money::from_cents(r.amount_cents),
            original_currency: Currency::new(&r.original_currency).map_err(StoreError::backend)?,
            transaction_type: parse_column(&r.transaction_type)?,
            transaction_date: r.transaction_date,
            vendor_id: r.vendor_id.map(VendorId),
            vendor_name: r.vendor_name,
            payment_method_id: r.payment_method_id.map(PaymentMethodId),
            tag_ids: parse_tag_ids(r.tag_ids.as_deref())?,
            expected_transaction_id: r.expected_transaction_id.map(ExpectedTransactionId),
            source_type: parse_column(&r.source_type)?,
        })
    }
}

/// Text enum columns use each type's `Display` / `FromStr` spelling.
fn parse_column<T: FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(|e: String| StoreError::Backend(e.into()))
}

fn parse_tag_ids(joined: Option<&str>) -> Result<Vec<TagId>, StoreError> {
    let Some(joined) = joined else {
        return Ok(Vec::new());
    };
    let mut ids = joined
        .split(',')
        .map(|id| id.trim().parse::<i64>().map(TagId))
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::backend)?;
    ids.sort();
    Ok(ids)
}

/// Unique-index violations mean another writer claimed the row first.
fn db_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::backend(e),
    }
}

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn fetch_expectation(
        conn: &mut SqliteConnection,
        user: UserId,
        id: ExpectedTransactionId,
    ) -> Result<Option<ExpectedTransaction>, StoreError> {
        let row = sqlx::query_as::<_, ExpectedRow>(&format!(
            "{EXPECTED_SELECT} WHERE e.id = ? AND e.user_id = ?"
        ))
        .bind(id.0)
        .bind(user.0)
        .fetch_optional(conn)
        .await
        .map_err(db_error)?;
        row.map(ExpectedTransaction::try_from).transpose()
    }

    async fn write_match_state(
        conn: &mut SqliteConnection,
        user: UserId,
        id: ExpectedTransactionId,
        state: &MatchState,
        notes: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE expected_transactions
            SET status = ?, matched_transaction_id = ?, matched_at = ?, actual_amount_cents = ?,
                variance_amount_cents = ?, variance_percentage = ?,
                notes = COALESCE(?, notes), updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(state.status.to_string())
        .bind(state.matched_transaction_id.map(|t| t.0))
        .bind(state.matched_at)
        .bind(state.actual_amount.map(Money::to_cents))
        .bind(state.variance.map(|v| v.amount.to_cents()))
        .bind(state.variance.map(|v| v.percentage.to_string()))
        .bind(notes)
        .bind(Utc::now())
        .bind(id.0)
        .bind(user.0)
        .execute(conn)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_expected_tags(
        conn: &mut SqliteConnection,
        id: ExpectedTransactionId,
        tag_ids: &[TagId],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM expected_transaction_tags WHERE expected_transaction_id = ?")
            .bind(id.0)
            .execute(&mut *conn)
            .await
            .map_err(db_error)?;
        for tag in tag_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO expected_transaction_tags (expected_transaction_id, tag_id) VALUES (?, ?)",
            )
            .bind(id.0)
            .bind(tag.0)
            .execute(&mut *conn)
            .await
            .map_err(db_error)?;
        }
        Ok(())
    }

    async fn row_exists(
        conn: &mut SqliteConnection,
        table: &str,
        user: UserId,
        id: i64,
    ) -> Result<bool, StoreError> {
        let found = sqlx::query_as::<_, (i64,)>(&format!(
            "SELECT id FROM {table} WHERE id = ? AND user_id = ?"
        ))
        .bind(id)
        .bind(user.0)
        .fetch_optional(conn)
        .await
        .map_err(db_error)?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl ExpectationStore for SqliteStore {
    async fn get_month_plan(
        &self,
        user: UserId,
        id: MonthPlanId,
    ) -> Result<Option<MonthPlan>, StoreError> {
        let row = sqlx::query_as::<_, (i64, i64, NaiveDate, String, Option<String>)>(
            "SELECT id, user_id, month, status, notes FROM month_plans WHERE id = ? AND user_id = ?",
        )
        .bind(id.0)
        .bind(user.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|r| -> Result<MonthPlan, StoreError> {
            Ok(MonthPlan {
                id: MonthPlanId(r.0),
                user_id: UserId(r.1),
                month: r.2,
                status: parse_column::<MonthPlanStatus>(&r.3)?,
                notes: r.4,
            })
        })
        .transpose()
    }

    async fn list_expectations(
        &self,
        user: UserId,
        filter: &ExpectationFilter,
    ) -> Result<Vec<ExpectedTransaction>, StoreError> {
        let mut query = QueryBuilder::<Sqlite>::new(EXPECTED_SELECT);
        query.push(" WHERE e.user_id = ");
        query.push_bind(user.0);
        query.push(" AND e.month_plan_id = ");
        query.push_bind(filter.month_plan_id.0);

        if !filter.statuses.is_empty() {
            query.push(" AND e.status IN (");
            let mut separated = query.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.to_string());
            }
            separated.push_unseparated(")");
        }
        if let Some(tt) = filter.transaction_type {
            query.push(" AND e.transaction_type = ");
            query.push_bind(tt.to_string());
        }
        if !filter.vendor_ids.is_empty() {
            query.push(" AND e.vendor_id IN (");
            let mut separated = query.separated(", ");
            for vendor in &filter.vendor_ids {
                separated.push_bind(vendor.0);
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY e.expected_date, e.id");

        let rows = query
            .build_query_as::<ExpectedRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        tracing::debug!(%user, month_plan_id = %filter.month_plan_id, count = rows.len(), "Listed expectations");
        rows.into_iter().map(ExpectedTransaction::try_from).collect()
    }

    async fn get_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
    ) -> Result<Option<ExpectedTransaction>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        Self::fetch_expectation(&mut conn, user, id).await
    }

    async fn create_expectation(
        &self,
        user: UserId,
        data: &NewExpectedTransaction,
    ) -> Result<ExpectedTransaction, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO expected_transactions
                (user_id, month_plan_id, template_id, description, expected_amount_cents,
                 original_currency, transaction_type, expected_date, vendor_id, payment_method_id,
                 status, notes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)
            "#,
        )
        .bind(user.0)
        .bind(data.month_plan_id.0)
        .bind(data.template_id.map(|t| t.0))
        .bind(&data.description)
        .bind(data.expected_amount.to_cents())
        .bind(data.original_currency.code())
        .bind(data.transaction_type.to_string())
        .bind(data.expected_date)
        .bind(data.vendor_id.map(|v| v.0))
        .bind(data.payment_method_id.map(|p| p.0))
        .bind(&data.notes)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        let id = ExpectedTransactionId(result.last_insert_rowid());

        Self::replace_expected_tags(&mut tx, id, &data.tag_ids).await?;
        let created = Self::fetch_expectation(&mut tx, user, id)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("expected transaction {id}")))?;
        tx.commit().await.map_err(db_error)?;
        Ok(created)
    }

    async fn update_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
        patch: &ExpectationPatch,
    ) -> Result<Option<ExpectedTransaction>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let Some(mut exp) = Self::fetch_expectation(&mut tx, user, id).await? else {
            return Ok(None);
        };
        exp.apply_patch(patch);

        sqlx::query(
            r#"
            UPDATE expected_transactions
            SET description = ?, expected_amount_cents = ?, variance_amount_cents = ?,
                variance_percentage = ?, expected_date = ?, vendor_id = ?,
                payment_method_id = ?, status = ?, notes = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&exp.description)
        .bind(exp.expected_amount.to_cents())
        .bind(exp.variance_amount.map(Money::to_cents))
        .bind(exp.variance_percentage.map(|p| p.to_string()))
        .bind(exp.expected_date)
        .bind(exp.vendor_id.map(|v| v.0))
        .bind(exp.payment_method_id.map(|p| p.0))
        .bind(exp.status.to_string())
        .bind(&exp.notes)
        .bind(Utc::now())
        .bind(id.0)
        .bind(user.0)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if let Some(tag_ids) = &patch.tag_ids {
            Self::replace_expected_tags(&mut tx, id, tag_ids).await?;
        }

        let updated = Self::fetch_expectation(&mut tx, user, id).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(updated)
    }

    async fn set_match_state(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
        state: &MatchState,
        notes: Option<&str>,
    ) -> Result<Option<ExpectedTransaction>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        if !Self::write_match_state(&mut conn, user, id, state, notes).await? {
            return Ok(None);
        }
        Self::fetch_expectation(&mut conn, user, id).await
    }

    async fn delete_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM expected_transactions WHERE id = ? AND user_id = ?")
            .bind(id.0)
            .bind(user.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_overdue(&self, user: UserId, today: NaiveDate) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE expected_transactions
            SET status = 'overdue', updated_at = ?
            WHERE user_id = ? AND status = 'pending' AND expected_date < ?
            "#,
        )
        .bind(Utc::now())
        .bind(user.0)
        .bind(today)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn list_transactions(
        &self,
        user: UserId,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut query = QueryBuilder::<Sqlite>::new(TRANSACTION_SELECT);
        query.push(" WHERE t.user_id = ");
        query.push_bind(user.0);
        if let Some(range) = filter.date_range {
            query.push(" AND t.transaction_date BETWEEN ");
            query.push_bind(range.start);
            query.push(" AND ");
            query.push_bind(range.end);
        }
        if filter.unmatched_only {
            query.push(" AND t.expected_transaction_id IS NULL");
        }
        query.push(" ORDER BY t.transaction_date DESC, t.id");

        let rows = query
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        tracing::debug!(%user, count = rows.len(), "Listed transactions");
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn get_transaction(
        &self,
        user: UserId,
        id: TransactionId,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "{TRANSACTION_SELECT} WHERE t.id = ? AND t.user_id = ?"
        ))
        .bind(id.0)
        .bind(user.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.map(Transaction::try_from).transpose()
    }

    async fn update_transaction_link(
        &self,
        user: UserId,
        id: TransactionId,
        link: &TransactionLink,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transactions SET expected_transaction_id = ?, source_type = ? WHERE id = ? AND user_id = ?",
        )
        .bind(link.expected_transaction_id.map(|e| e.0))
        .bind(link.source_type.to_string())
        .bind(id.0)
        .bind(user.0)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_transaction(&self, user: UserId, id: TransactionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM transactions WHERE id = ? AND user_id = ?")
            .bind(id.0)
            .bind(user.0)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl LinkStore for SqliteStore {
    async fn commit_match(
        &self,
        user: UserId,
        cmd: &CommitMatch,
    ) -> Result<ExpectedTransaction, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let state = &cmd.state;

        let claimed = sqlx::query(
            r#"
            UPDATE expected_transactions
            SET status = ?, matched_transaction_id = ?, matched_at = ?, actual_amount_cents = ?,
                variance_amount_cents = ?, variance_percentage = ?, updated_at = ?
            WHERE id = ? AND user_id = ? AND status IN ('pending', 'overdue')
              AND matched_transaction_id IS NULL
            "#,
        )
        .bind(state.status.to_string())
        .bind(cmd.transaction_id.0)
        .bind(state.matched_at)
        .bind(state.actual_amount.map(Money::to_cents))
        .bind(state.variance.map(|v| v.amount.to_cents()))
        .bind(state.variance.map(|v| v.percentage.to_string()))
        .bind(Utc::now())
        .bind(cmd.expected_id.0)
        .bind(user.0)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        if claimed.rows_affected() == 0 {
            return Err(
                if Self::row_exists(&mut tx, "expected_transactions", user, cmd.expected_id.0).await? {
                    StoreError::Conflict(format!(
                        "expected transaction {} is no longer open",
                        cmd.expected_id
                    ))
                } else {
                    StoreError::Missing(format!("expected transaction {}", cmd.expected_id))
                },
            );
        }

        let linked = sqlx::query(
            r#"
            UPDATE transactions SET expected_transaction_id = ?, source_type = ?
            WHERE id = ? AND user_id = ? AND expected_transaction_id IS NULL
            "#,
        )
        .bind(cmd.expected_id.0)
        .bind(SourceType::Matched.to_string())
        .bind(cmd.transaction_id.0)
        .bind(user.0)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        if linked.rows_affected() == 0 {
            return Err(
                if Self::row_exists(&mut tx, "transactions", user, cmd.transaction_id.0).await? {
                    StoreError::Conflict(format!(
                        "transaction {} is already linked",
                        cmd.transaction_id
                    ))
                } else {
                    StoreError::Missing(format!("transaction {}", cmd.transaction_id))
                },
            );
        }

        let matched = Self::fetch_expectation(&mut tx, user, cmd.expected_id)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("expected transaction {}", cmd.expected_id)))?;
        tx.commit().await.map_err(db_error)?;
        Ok(matched)
    }

    async fn commit_unmatch(
        &self,
        user: UserId,
        cmd: &CommitUnmatch,
    ) -> Result<ExpectedTransaction, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let released = sqlx::query(
            r#"
            UPDATE expected_transactions
            SET status = ?, matched_transaction_id = NULL, matched_at = NULL,
                actual_amount_cents = NULL, variance_amount_cents = NULL,
                variance_percentage = NULL, notes = COALESCE(?, notes), updated_at = ?
            WHERE id = ? AND user_id = ? AND matched_transaction_id = ?
            "#,
        )
        .bind(cmd.next_status.to_string())
        .bind(&cmd.notes)
        .bind(Utc::now())
        .bind(cmd.expected_id.0)
        .bind(user.0)
        .bind(cmd.transaction_id.0)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        if released.rows_affected() == 0 {
            return Err(
                if Self::row_exists(&mut tx, "expected_transactions", user, cmd.expected_id.0).await? {
                    StoreError::Conflict(format!(
                        "expected transaction {} is no longer matched to transaction {}",
                        cmd.expected_id, cmd.transaction_id
                    ))
                } else {
                    StoreError::Missing(format!("expected transaction {}", cmd.expected_id))
                },
            );
        }

        // No row when the actual transaction was deleted after the match.
        sqlx::query(
            r#"
            UPDATE transactions SET expected_transaction_id = NULL, source_type = ?
            WHERE id = ? AND user_id = ? AND expected_transaction_id = ?
            "#,
        )
        .bind(SourceType::Manual.to_string())
        .bind(cmd.transaction_id.0)
        .bind(user.0)
        .bind(cmd.expected_id.0)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let unmatched = Self::fetch_expectation(&mut tx, user, cmd.expected_id)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("expected transaction {}", cmd.expected_id)))?;
        tx.commit().await.map_err(db_error)?;
        Ok(unmatched)
    }

    async fn remove_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
        linked: Option<(TransactionId, LinkedTransaction)>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Deleting the expectation nulls the back-reference through the foreign key.
        let deleted = sqlx::query("DELETE FROM expected_transactions WHERE id = ? AND user_id = ?")
            .bind(id.0)
            .bind(user.0)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        match linked {
            Some((transaction_id, LinkedTransaction::Delete)) => {
                sqlx::query("DELETE FROM transactions WHERE id = ? AND user_id = ?")
                    .bind(transaction_id.0)
                    .bind(user.0)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
            }
            Some((transaction_id, LinkedTransaction::Unlink)) => {
                sqlx::query(
                    "UPDATE transactions SET expected_transaction_id = NULL, source_type = ? WHERE id = ? AND user_id = ?",
                )
                .bind(SourceType::Manual.to_string())
                .bind(transaction_id.0)
                .bind(user.0)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            }
            None => {}
        }

        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        create_memory_db, insert_month_plan, insert_tag, insert_transaction, insert_vendor,
        NewTransaction,
    };
    use tally_core::{DateRange, ExpectedStatus, TransactionType};

    const USER: UserId = UserId(1);

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    struct Fixture {
        store: SqliteStore,
        plan: MonthPlanId,
        vendor: VendorId,
    }

    async fn fixture() -> Fixture {
        let pool = create_memory_db().await.unwrap();
        let plan = insert_month_plan(&pool, USER, date(1, 1), MonthPlanStatus::Active)
            .await
            .unwrap();
        let vendor = insert_vendor(&pool, USER, "City Power").await.unwrap();
        Fixture {
            store: SqliteStore::new(pool),
            plan,
            vendor,
        }
    }

    fn new_expected(plan: MonthPlanId, cents: i64, on: NaiveDate) -> NewExpectedTransaction {
        NewExpectedTransaction {
            month_plan_id: plan,
            template_id: None,
            description: "Electricity".to_string(),
            expected_amount: Money::from_cents(cents),
            original_currency: usd(),
            transaction_type: TransactionType::Expense,
            expected_date: on,
            vendor_id: None,
            payment_method_id: None,
            tag_ids: vec![],
            notes: None,
        }
    }

    fn new_transaction(cents: i64, on: NaiveDate) -> NewTransaction {
        NewTransaction {
            description: "CITY POWER".to_string(),
            amount: Money::from_cents(cents),
            original_currency: usd(),
            transaction_type: TransactionType::Expense,
            transaction_date: on,
            vendor_id: None,
            payment_method_id: None,
            tag_ids: vec![],
        }
    }

    fn matched_state(tx: TransactionId, expected: i64, actual: i64) -> MatchState {
        MatchState::matched(
            tx,
            Money::from_cents(expected),
            Money::from_cents(actual),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn expectation_round_trips_with_vendor_name_and_tags() {
        let f = fixture().await;
        let tag = insert_tag(f.store.pool(), USER, "utilities").await.unwrap();
        let mut data = new_expected(f.plan, 8_450, date(1, 20));
        data.vendor_id = Some(f.vendor);
        data.tag_ids = vec![tag];

        let created = f.store.create_expectation(USER, &data).await.unwrap();
        assert_eq!(created.status, ExpectedStatus::Pending);
        assert_eq!(created.expected_amount, Money::from_cents(8_450));
        assert_eq!(created.vendor_name.as_deref(), Some("City Power"));
        assert_eq!(created.tag_ids, vec![tag]);

        let fetched = f.store.get_expectation(USER, created.id).await.unwrap();
        assert_eq!(fetched, Some(created.clone()));
        assert!(f.store.get_expectation(UserId(2), created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_positive_amount_violates_check() {
        let f = fixture().await;
        let data = new_expected(f.plan, -100, date(1, 20));
        assert!(f.store.create_expectation(USER, &data).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_status_and_orders_by_date() {
        let f = fixture().await;
        let late = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 1_000, date(1, 25)))
            .await
            .unwrap();
        let early = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 1_000, date(1, 5)))
            .await
            .unwrap();
        let skipped = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 1_000, date(1, 10)))
            .await
            .unwrap();
        let patch = ExpectationPatch {
            status: Some(ExpectedStatus::Skipped),
            ..Default::default()
        };
        f.store.update_expectation(USER, skipped.id, &patch).await.unwrap();

        let open = f
            .store
            .list_expectations(
                USER,
                &ExpectationFilter::month(f.plan).with_statuses(&ExpectedStatus::OPEN),
            )
            .await
            .unwrap();
        let ids: Vec<_> = open.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        let all = f
            .store
            .list_expectations(USER, &ExpectationFilter::month(f.plan))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn transactions_filter_by_window_and_link() {
        let f = fixture().await;
        let pool = f.store.pool();
        let inside = insert_transaction(pool, USER, &new_transaction(500, date(1, 10)))
            .await
            .unwrap();
        let newer = insert_transaction(pool, USER, &new_transaction(500, date(1, 20)))
            .await
            .unwrap();
        insert_transaction(pool, USER, &new_transaction(500, date(3, 1)))
            .await
            .unwrap();

        let window = DateRange::new(date(1, 1), date(1, 31));
        let found = f
            .store
            .list_transactions(
                USER,
                &TransactionFilter {
                    date_range: Some(window),
                    unmatched_only: true,
                },
            )
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![newer, inside]);
    }

    #[tokio::test]
    async fn commit_match_links_both_rows_atomically() {
        let f = fixture().await;
        let exp = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 10_000, date(1, 15)))
            .await
            .unwrap();
        let tx_id = insert_transaction(f.store.pool(), USER, &new_transaction(10_250, date(1, 16)))
            .await
            .unwrap();

        let cmd = CommitMatch {
            expected_id: exp.id,
            transaction_id: tx_id,
            state: matched_state(tx_id, 10_000, 10_250),
        };
        let matched = f.store.commit_match(USER, &cmd).await.unwrap();
        assert_eq!(matched.status, ExpectedStatus::Matched);
        assert_eq!(matched.matched_transaction_id, Some(tx_id));
        assert_eq!(matched.variance_amount, Some(Money::from_cents(250)));
        assert_eq!(matched.variance_percentage, Some(Decimal::new(250, 2)));

        let tx = f.store.get_transaction(USER, tx_id).await.unwrap().unwrap();
        assert_eq!(tx.expected_transaction_id, Some(exp.id));
        assert_eq!(tx.source_type, SourceType::Matched);
    }

    #[tokio::test]
    async fn second_claim_on_a_transaction_conflicts_and_rolls_back() {
        let f = fixture().await;
        let first = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 10_000, date(1, 15)))
            .await
            .unwrap();
        let second = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 10_000, date(1, 16)))
            .await
            .unwrap();
        let tx_id = insert_transaction(f.store.pool(), USER, &new_transaction(10_000, date(1, 15)))
            .await
            .unwrap();

        let claim = |expected_id| CommitMatch {
            expected_id,
            transaction_id: tx_id,
            state: matched_state(tx_id, 10_000, 10_000),
        };
        f.store.commit_match(USER, &claim(first.id)).await.unwrap();
        let err = f.store.commit_match(USER, &claim(second.id)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err}");

        let second = f.store.get_expectation(USER, second.id).await.unwrap().unwrap();
        assert_eq!(second.status, ExpectedStatus::Pending);
        assert_eq!(second.matched_transaction_id, None);
        let tx = f.store.get_transaction(USER, tx_id).await.unwrap().unwrap();
        assert_eq!(tx.expected_transaction_id, Some(first.id));
    }

    #[tokio::test]
    async fn commit_match_on_missing_transaction_leaves_expectation_open() {
        let f = fixture().await;
        let exp = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 10_000, date(1, 15)))
            .await
            .unwrap();
        let ghost = TransactionId(404);
        let cmd = CommitMatch {
            expected_id: exp.id,
            transaction_id: ghost,
            state: matched_state(ghost, 10_000, 10_000),
        };
        let err = f.store.commit_match(USER, &cmd).await.unwrap_err();
        assert!(matches!(err, StoreError::Missing(_) | StoreError::Backend(_)), "{err}");

        let exp = f.store.get_expectation(USER, exp.id).await.unwrap().unwrap();
        assert_eq!(exp.status, ExpectedStatus::Pending);
    }

    #[tokio::test]
    async fn amount_edit_rewrites_stored_variance() {
        let f = fixture().await;
        let exp = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 10_000, date(1, 15)))
            .await
            .unwrap();
        let tx_id = insert_transaction(f.store.pool(), USER, &new_transaction(10_000, date(1, 15)))
            .await
            .unwrap();
        f.store
            .commit_match(
                USER,
                &CommitMatch {
                    expected_id: exp.id,
                    transaction_id: tx_id,
                    state: matched_state(tx_id, 10_000, 10_000),
                },
            )
            .await
            .unwrap();

        let patch = ExpectationPatch {
            expected_amount: Some(Money::from_cents(20_000)),
            ..Default::default()
        };
        f.store.update_expectation(USER, exp.id, &patch).await.unwrap();

        let stored = f.store.get_expectation(USER, exp.id).await.unwrap().unwrap();
        assert_eq!(stored.expected_amount, Money::from_cents(20_000));
        assert_eq!(stored.variance_amount, Some(Money::from_cents(-10_000)));
        assert_eq!(stored.variance_percentage, Some(Decimal::from(-50)));
        assert_eq!(stored.matched_transaction_id, Some(tx_id));
    }

    #[tokio::test]
    async fn commit_unmatch_clears_both_sides() {
        let f = fixture().await;
        let exp = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 10_000, date(1, 15)))
            .await
            .unwrap();
        let tx_id = insert_transaction(f.store.pool(), USER, &new_transaction(9_000, date(1, 15)))
            .await
            .unwrap();
        f.store
            .commit_match(
                USER,
                &CommitMatch {
                    expected_id: exp.id,
                    transaction_id: tx_id,
                    state: matched_state(tx_id, 10_000, 9_000),
                },
            )
            .await
            .unwrap();

        let cmd = CommitUnmatch {
            expected_id: exp.id,
            transaction_id: tx_id,
            next_status: ExpectedStatus::Overdue,
            notes: None,
        };
        let unmatched = f.store.commit_unmatch(USER, &cmd).await.unwrap();
        assert_eq!(unmatched.status, ExpectedStatus::Overdue);
        assert_eq!(unmatched.match_state(), MatchState::cleared(ExpectedStatus::Overdue));

        let tx = f.store.get_transaction(USER, tx_id).await.unwrap().unwrap();
        assert_eq!(tx.expected_transaction_id, None);
        assert_eq!(tx.source_type, SourceType::Manual);

        let again = f.store.commit_unmatch(USER, &cmd).await.unwrap_err();
        assert!(matches!(again, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn remove_expectation_can_cascade_to_transaction() {
        let f = fixture().await;
        let exp = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 10_000, date(1, 15)))
            .await
            .unwrap();
        let tx_id = insert_transaction(f.store.pool(), USER, &new_transaction(10_000, date(1, 15)))
            .await
            .unwrap();
        f.store
            .commit_match(
                USER,
                &CommitMatch {
                    expected_id: exp.id,
                    transaction_id: tx_id,
                    state: matched_state(tx_id, 10_000, 10_000),
                },
            )
            .await
            .unwrap();

        let removed = f
            .store
            .remove_expectation(USER, exp.id, Some((tx_id, LinkedTransaction::Delete)))
            .await
            .unwrap();
        assert!(removed);
        assert!(f.store.get_expectation(USER, exp.id).await.unwrap().is_none());
        assert!(f.store.get_transaction(USER, tx_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overdue_sweep_only_touches_past_pending() {
        let f = fixture().await;
        let past = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 1_000, date(1, 3)))
            .await
            .unwrap();
        let future = f
            .store
            .create_expectation(USER, &new_expected(f.plan, 1_000, date(1, 30)))
            .await
            .unwrap();

        assert_eq!(f.store.mark_overdue(USER, date(1, 15)).await.unwrap(), 1);
        assert_eq!(f.store.mark_overdue(USER, date(1, 15)).await.unwrap(), 0);

        let status = |e: Option<ExpectedTransaction>| e.unwrap().status;
        assert_eq!(
            status(f.store.get_expectation(USER, past.id).await.unwrap()),
            ExpectedStatus::Overdue
        );
        assert_eq!(
            status(f.store.get_expectation(USER, future.id).await.unwrap()),
            ExpectedStatus::Pending
        );
    }

    #[tokio::test]
    async fn set_match_state_keeps_notes_unless_given() {
        let f = fixture().await;
        let mut data = new_expected(f.plan, 1_000, date(1, 3));
        data.notes = Some("quarterly".to_string());
        let exp = f.store.create_expectation(USER, &data).await.unwrap();

        let kept = f
            .store
            .set_match_state(USER, exp.id, &MatchState::cleared(ExpectedStatus::Overdue), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.notes.as_deref(), Some("quarterly"));
        assert_eq!(kept.status, ExpectedStatus::Overdue);

        let replaced = f
            .store
            .set_match_state(
                USER,
                exp.id,
                &MatchState::cleared(ExpectedStatus::Skipped),
                Some("paid annually instead"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.notes.as_deref(), Some("paid annually instead"));
    }
}
