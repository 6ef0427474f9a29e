use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<i64> for $name {
                fn from(raw: i64) -> Self {
                    $name(raw)
                }
            }
        )+
    };
}

id_type!(
    /// Owner of every record. All store access is scoped to one user.
    UserId,
    MonthPlanId,
    ExpectedTransactionId,
    TransactionId,
    /// Recurring template that generated an expectation.
    TemplateId,
    VendorId,
    PaymentMethodId,
    TagId,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_raw_value() {
        assert_eq!(TransactionId(42).to_string(), "42");
        assert_eq!(UserId::from(7), UserId(7));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ExpectedTransactionId(9)).unwrap();
        assert_eq!(json, "9");
        let back: ExpectedTransactionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ExpectedTransactionId(9));
    }
}
