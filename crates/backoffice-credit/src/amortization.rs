//! Repayment schedules for credit products.
//!
//! Money amounts are rounded half-up to 2 decimal places, the monthly rate
//! ratio to 10. The fixed payment is written to every entry; only the last
//! entry's debt part is reconciled against the remaining balance so the debt
//! parts always add up to the principal.

use chrono::{Days, Months, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use backoffice_core::ScheduleEntry;

/// Days between a due date and the date a missed payment counts as expired.
pub const GRACE_PERIOD_DAYS: u64 = 5;

/// Longest schedule the engine will produce.
pub const MAX_TERM_MONTHS: u32 = 1200;

const MONEY_SCALE: u32 = 2;
const RATE_SCALE: u32 = 10;
const MONTHS_IN_YEAR: i64 = 12;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("principal must be positive, got {0}")]
    NonPositivePrincipal(Decimal),
    #[error("term must be at least one month")]
    NonPositiveTerm,
    #[error("annual rate must not be negative, got {0}")]
    NegativeRate(Decimal),
    #[error("term of {0} months exceeds the maximum of {MAX_TERM_MONTHS}")]
    TermTooLong(u32),
    #[error("payment date out of range for month {0}")]
    DateOutOfRange(u32),
    #[error("annuity payment overflows for a {months}-month term")]
    Overflow { months: u32 },
}

pub fn generate_schedule(
    principal: Decimal,
    annual_rate_percent: Decimal,
    months: u32,
    open_date: NaiveDate,
) -> Result<Vec<ScheduleEntry>, ScheduleError> {
    if principal <= Decimal::ZERO {
        return Err(ScheduleError::NonPositivePrincipal(principal));
    }
    if months == 0 {
        return Err(ScheduleError::NonPositiveTerm);
    }
    if months > MAX_TERM_MONTHS {
        return Err(ScheduleError::TermTooLong(months));
    }
    if annual_rate_percent < Decimal::ZERO {
        return Err(ScheduleError::NegativeRate(annual_rate_percent));
    }

    // Rates too small to survive rounding to the ratio scale carry no interest.
    let rate = monthly_rate(annual_rate_percent);
    if rate.is_zero() {
        interest_free(principal, months, open_date)
    } else {
        annuity(principal, rate, months, open_date)
    }
}

/// Monthly rate ratio for an annual rate given in percent.
pub fn monthly_rate(annual_rate_percent: Decimal) -> Decimal {
    round_rate(annual_rate_percent / Decimal::from(MONTHS_IN_YEAR * 100))
}

/// Fixed annuity payment `S * i * (1+i)^n / ((1+i)^n - 1)`.
pub fn annuity_payment(
    principal: Decimal,
    monthly_rate: Decimal,
    months: u32,
) -> Result<Decimal, ScheduleError> {
    let overflow = ScheduleError::Overflow { months };
    let growth = compound(Decimal::ONE + monthly_rate, months).ok_or(overflow.clone())?;
    principal
        .checked_mul(monthly_rate)
        .and_then(|scaled| scaled.checked_mul(growth))
        .and_then(|numerator| numerator.checked_div(growth - Decimal::ONE))
        .map(round_money)
        .ok_or(overflow)
}

fn interest_free(
    principal: Decimal,
    months: u32,
    open_date: NaiveDate,
) -> Result<Vec<ScheduleEntry>, ScheduleError> {
    let payment = round_money(principal / Decimal::from(months));
    let mut remaining = principal;
    let mut schedule = Vec::with_capacity(months as usize);

    for month in 1..=months {
        let debt = if month == months { remaining } else { payment };
        remaining -= debt;
        schedule.push(entry(open_date, month, payment, Decimal::ZERO, debt)?);
    }

    Ok(schedule)
}

fn annuity(
    principal: Decimal,
    rate: Decimal,
    months: u32,
    open_date: NaiveDate,
) -> Result<Vec<ScheduleEntry>, ScheduleError> {
    let payment = annuity_payment(principal, rate, months)?;

    tracing::debug!(%principal, %rate, months, %payment, "annuity schedule");

    let mut remaining = principal;
    let mut schedule = Vec::with_capacity(months as usize);

    for month in 1..=months {
        let interest = round_money(remaining * rate);
        let debt = if month == months {
            remaining
        } else {
            round_money(payment - interest)
        };
        remaining -= debt;
        schedule.push(entry(open_date, month, payment, interest, debt)?);
    }

    Ok(schedule)
}

fn entry(
    open_date: NaiveDate,
    month: u32,
    amount: Decimal,
    interest_amount: Decimal,
    debt_amount: Decimal,
) -> Result<ScheduleEntry, ScheduleError> {
    let payment_date = open_date
        .checked_add_months(Months::new(month))
        .ok_or(ScheduleError::DateOutOfRange(month))?;
    let payment_expiration_date = payment_date
        .checked_add_days(Days::new(GRACE_PERIOD_DAYS))
        .ok_or(ScheduleError::DateOutOfRange(month))?;

    Ok(ScheduleEntry {
        payment_date,
        payment_expiration_date,
        amount,
        interest_amount,
        debt_amount,
    })
}

fn compound(base: Decimal, months: u32) -> Option<Decimal> {
    (0..months).try_fold(Decimal::ONE, |acc, _| acc.checked_mul(base))
}

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
