use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Inbound event rejected before any state is written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error(transparent)]
    UnknownType(#[from] UnknownVariant),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(String),
    #[error("card id is required")]
    MissingCard,
}

/// The account no longer matches the state a batch was computed from.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("account {account_id} changed concurrently")]
pub struct LedgerConflict {
    pub account_id: i64,
}

/// Opening the registry would push the client's exposure past the limit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("credit exposure {exposure} plus {amount} exceeds limit {limit}")]
pub struct CreditLimitExceeded {
    pub exposure: Decimal,
    pub amount: Decimal,
    pub limit: Decimal,
}
