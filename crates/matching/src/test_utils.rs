//! In-memory store and record builders for engine tests.
//!
//! `MemoryStore` relies on the provided `LinkStore` commit implementations, so
//! it also exercises the non-transactional write path.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tally_core::{
    Currency, ExpectationFilter, ExpectationPatch, ExpectationStore, ExpectedStatus,
    ExpectedTransaction, ExpectedTransactionId, LinkStore, MatchState, Money, MonthPlan,
    MonthPlanId, MonthPlanStatus, NewExpectedTransaction, SourceType, StoreError, Transaction,
    TransactionFilter, TransactionId, TransactionLink, TransactionStore, TransactionType, UserId,
    VendorId,
};

pub const TEST_USER: UserId = UserId(1);
pub const TEST_PLAN: MonthPlanId = MonthPlanId(1);

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

fn usd() -> Currency {
    Currency::new("USD").expect("valid currency code")
}

/// Pending USD expense for `TEST_USER` in `TEST_PLAN`.
pub fn expected(id: i64, cents: i64, on: NaiveDate) -> ExpectedTransaction {
    ExpectedTransaction {
        id: ExpectedTransactionId(id),
        user_id: TEST_USER,
        month_plan_id: TEST_PLAN,
        template_id: None,
        description: format!("Expected #{id}"),
        expected_amount: Money::from_cents(cents),
        original_currency: usd(),
        transaction_type: TransactionType::Expense,
        expected_date: on,
        vendor_id: None,
        vendor_name: None,
        payment_method_id: None,
        tag_ids: vec![],
        status: ExpectedStatus::Pending,
        matched_transaction_id: None,
        matched_at: None,
        actual_amount: None,
        variance_amount: None,
        variance_percentage: None,
        notes: None,
        created_at: midnight(on),
        updated_at: midnight(on),
    }
}

/// Unlinked manual USD expense for `TEST_USER`.
pub fn actual(id: i64, cents: i64, on: NaiveDate) -> Transaction {
    Transaction {
        id: TransactionId(id),
        user_id: TEST_USER,
        description: format!("Transaction #{id}"),
        amount: Money::from_cents(cents),
        original_currency: usd(),
        transaction_type: TransactionType::Expense,
        transaction_date: on,
        vendor_id: None,
        vendor_name: None,
        payment_method_id: None,
        tag_ids: vec![],
        expected_transaction_id: None,
        source_type: SourceType::Manual,
    }
}

/// `NewExpectedTransaction` input for `TEST_PLAN`.
pub fn new_expected(cents: i64, on: NaiveDate) -> NewExpectedTransaction {
    NewExpectedTransaction {
        month_plan_id: TEST_PLAN,
        template_id: None,
        description: "Internet".to_string(),
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

pub fn plan(id: MonthPlanId, month: NaiveDate) -> MonthPlan {
    MonthPlan {
        id,
        user_id: TEST_USER,
        month,
        status: MonthPlanStatus::Active,
        notes: None,
    }
}

#[derive(Default)]
struct State {
    plans: BTreeMap<MonthPlanId, MonthPlan>,
    expectations: BTreeMap<ExpectedTransactionId, ExpectedTransaction>,
    transactions: BTreeMap<TransactionId, Transaction>,
    vendor_names: HashMap<VendorId, String>,
    failing_links: HashSet<TransactionId>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        1_000 + self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_plan(&self, plan: MonthPlan) {
        self.state().plans.insert(plan.id, plan);
    }

    pub fn insert_vendor(&self, id: VendorId, name: &str) {
        self.state().vendor_names.insert(id, name.to_string());
    }

    pub fn insert_expectation(&self, exp: ExpectedTransaction) {
        self.state().expectations.insert(exp.id, exp);
    }

    pub fn insert_transaction(&self, tx: Transaction) {
        self.state().transactions.insert(tx.id, tx);
    }

    /// Makes every later back-reference write for `id` fail with a backend error.
    pub fn fail_links_for(&self, id: TransactionId) {
        self.state().failing_links.insert(id);
    }

    pub fn expectation(&self, id: ExpectedTransactionId) -> Option<ExpectedTransaction> {
        self.state().expectations.get(&id).cloned()
    }

    pub fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.state().transactions.get(&id).cloned()
    }

    pub fn expectation_count(&self) -> usize {
        self.state().expectations.len()
    }
}

#[async_trait]
impl ExpectationStore for MemoryStore {
    async fn get_month_plan(
        &self,
        user: UserId,
        id: MonthPlanId,
    ) -> Result<Option<MonthPlan>, StoreError> {
        Ok(self
            .state()
            .plans
            .get(&id)
            .filter(|p| p.user_id == user)
            .cloned())
    }

    async fn list_expectations(
        &self,
        user: UserId,
        filter: &ExpectationFilter,
    ) -> Result<Vec<ExpectedTransaction>, StoreError> {
        let mut found: Vec<_> = self
            .state()
            .expectations
            .values()
            .filter(|e| e.user_id == user && filter.accepts(e))
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.expected_date, e.id));
        Ok(found)
    }

    async fn get_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
    ) -> Result<Option<ExpectedTransaction>, StoreError> {
        Ok(self
            .state()
            .expectations
            .get(&id)
            .filter(|e| e.user_id == user)
            .cloned())
    }

    async fn create_expectation(
        &self,
        user: UserId,
        data: &NewExpectedTransaction,
    ) -> Result<ExpectedTransaction, StoreError> {
        let mut state = self.state();
        let id = ExpectedTransactionId(state.next_id());
        let now = Utc::now();
        let exp = ExpectedTransaction {
            id,
            user_id: user,
            month_plan_id: data.month_plan_id,
            template_id: data.template_id,
            description: data.description.clone(),
            expected_amount: data.expected_amount,
            original_currency: data.original_currency.clone(),
            transaction_type: data.transaction_type,
            expected_date: data.expected_date,
            vendor_id: data.vendor_id,
            vendor_name: data
                .vendor_id
                .and_then(|v| state.vendor_names.get(&v).cloned()),
            payment_method_id: data.payment_method_id,
            tag_ids: data.tag_ids.clone(),
            status: ExpectedStatus::Pending,
            matched_transaction_id: None,
            matched_at: None,
            actual_amount: None,
            variance_amount: None,
            variance_percentage: None,
            notes: data.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        state.expectations.insert(id, exp.clone());
        Ok(exp)
    }

    async fn update_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
        patch: &ExpectationPatch,
    ) -> Result<Option<ExpectedTransaction>, StoreError> {
        let mut state = self.state();
        let vendor_name = patch
            .vendor_id
            .map(|v| v.and_then(|v| state.vendor_names.get(&v).cloned()));
        let Some(exp) = state
            .expectations
            .get_mut(&id)
            .filter(|e| e.user_id == user)
        else {
            return Ok(None);
        };
        exp.apply_patch(patch);
        if let Some(name) = vendor_name {
            exp.vendor_name = name;
        }
        exp.updated_at = Utc::now();
        Ok(Some(exp.clone()))
    }

    async fn set_match_state(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
        match_state: &MatchState,
        notes: Option<&str>,
    ) -> Result<Option<ExpectedTransaction>, StoreError> {
        let mut state = self.state();
        let Some(exp) = state
            .expectations
            .get_mut(&id)
            .filter(|e| e.user_id == user)
        else {
            return Ok(None);
        };
        exp.apply_match_state(match_state);
        if let Some(notes) = notes {
            exp.notes = Some(notes.to_string());
        }
        exp.updated_at = Utc::now();
        Ok(Some(exp.clone()))
    }

    async fn delete_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.expectations.get(&id).is_some_and(|e| e.user_id == user) {
            state.expectations.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn mark_overdue(&self, user: UserId, today: NaiveDate) -> Result<u64, StoreError> {
        let mut changed = 0;
        for exp in self.state().expectations.values_mut() {
            if exp.user_id == user
                && exp.status == ExpectedStatus::Pending
                && exp.expected_date < today
            {
                exp.status = ExpectedStatus::Overdue;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn list_transactions(
        &self,
        user: UserId,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut found: Vec<_> = self
            .state()
            .transactions
            .values()
            .filter(|t| t.user_id == user)
            .filter(|t| filter.date_range.map_or(true, |r| r.contains(t.transaction_date)))
            .filter(|t| !filter.unmatched_only || !t.is_linked())
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.transaction_date
                .cmp(&a.transaction_date)
                .then(a.id.cmp(&b.id))
        });
        Ok(found)
    }

    async fn get_transaction(
        &self,
        user: UserId,
        id: TransactionId,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .state()
            .transactions
            .get(&id)
            .filter(|t| t.user_id == user)
            .cloned())
    }

    async fn update_transaction_link(
        &self,
        user: UserId,
        id: TransactionId,
        link: &TransactionLink,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.failing_links.contains(&id) {
            return Err(StoreError::backend(std::io::Error::other(format!(
                "injected link failure for transaction {id}"
            ))));
        }
        let Some(tx) = state
            .transactions
            .get_mut(&id)
            .filter(|t| t.user_id == user)
        else {
            return Ok(false);
        };
        tx.expected_transaction_id = link.expected_transaction_id;
        tx.source_type = link.source_type;
        Ok(true)
    }

    async fn delete_transaction(&self, user: UserId, id: TransactionId) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.transactions.get(&id).is_some_and(|t| t.user_id == user) {
            state.transactions.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }
}

impl LinkStore for MemoryStore {}
