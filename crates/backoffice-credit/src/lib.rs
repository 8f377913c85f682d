pub mod amortization;
pub mod underwriting;

pub use amortization::{GRACE_PERIOD_DAYS, MAX_TERM_MONTHS, ScheduleError, generate_schedule};
pub use underwriting::{CreditDecision, CreditUnderwriter};
