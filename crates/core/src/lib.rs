pub mod clock;
pub mod config;
pub mod error;
pub mod expected;
pub mod ids;
pub mod money;
pub mod period;
pub mod plan;
pub mod store;
pub mod transaction;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{MatchingConfig, ScoringWeights, Thresholds};
pub use error::{StoreError, ValidationError};
pub use expected::{
    ExpectationFilter, ExpectationPatch, ExpectedStatus, ExpectedTransaction, MatchState,
    NewExpectedTransaction, Variance,
};
pub use ids::{
    ExpectedTransactionId, MonthPlanId, PaymentMethodId, TagId, TemplateId, TransactionId, UserId,
    VendorId,
};
pub use money::{Currency, Money};
pub use period::{days_between, DateRange};
pub use plan::{CurrencyTotals, MonthPlan, MonthPlanStats, MonthPlanStatus};
pub use store::{
    CommitMatch, CommitUnmatch, ExpectationStore, LinkStore, LinkedTransaction, TransactionFilter,
    TransactionStore,
};
pub use transaction::{SourceType, Transaction, TransactionLink, TransactionType};
