pub mod decorators;
pub mod locks;
pub mod origination;
pub mod repayment;
pub mod transaction;

pub use decorators::{Cached, Timed};
pub use locks::AccountLocks;
pub use origination::{CreditOriginationWorkflow, CreditTerms, OriginationOutcome};
pub use repayment::{RepaymentOutcome, RepaymentProcessor};
pub use transaction::{
    CancelReason, DEFAULT_FALLBACK_TERM_MONTHS, TransactionOutcome, TransactionProcessor,
};
