use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use backoffice_core::{ClientPaymentEvent, Clock, EventError, LedgerChanges, LedgerStore, Payment};

use crate::locks::AccountLocks;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepaymentOutcome {
    Repaid { account_id: i64, amount: Decimal },
    /// The amount does not close the outstanding credit debt exactly.
    Mismatch { account_id: i64, debt: Decimal },
    AccountNotFound { account_id: i64 },
}

/// Closes an account's whole outstanding credit debt in one payment.
#[derive(Clone)]
pub struct RepaymentProcessor {
    ledger: Arc<dyn LedgerStore>,
    locks: AccountLocks,
    clock: Arc<dyn Clock>,
}

impl RepaymentProcessor {
    pub fn new(ledger: Arc<dyn LedgerStore>, locks: AccountLocks, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            locks,
            clock,
        }
    }

    pub async fn process(&self, event: &ClientPaymentEvent) -> anyhow::Result<RepaymentOutcome> {
        if event.amount <= Decimal::ZERO {
            return Err(EventError::NonPositiveAmount(event.amount.to_string()).into());
        }

        let account_id = event.account_id;
        let _guard = self.locks.lock(account_id).await;

        let Some(before) = self.ledger.get_account(account_id).await? else {
            warn!(account_id, "account not found for credit repayment");
            return Ok(RepaymentOutcome::AccountNotFound { account_id });
        };

        let outstanding = self.ledger.find_outstanding_credit(account_id).await?;
        let debt: Decimal = outstanding.iter().map(|p| p.amount).sum();
        info!(account_id, %debt, "outstanding credit debt");

        if debt <= Decimal::ZERO || event.amount != debt {
            warn!(account_id, amount = %event.amount, %debt, "payment does not match credit debt");
            return Ok(RepaymentOutcome::Mismatch { account_id, debt });
        }

        let now = self.clock.now();
        let mut account = before.clone();
        account.balance -= debt;
        let balance = account.balance;

        let mut repayment = Payment::scheduled_credit(account_id, now, debt);
        repayment.payed_at = Some(now);

        let mut changes = LedgerChanges::default();
        changes.update_account(before, account);
        changes.payments.push(repayment);
        changes
            .payments
            .extend(outstanding.into_iter().map(|mut payment| {
                payment.payed_at = Some(now);
                payment
            }));
        self.ledger.commit(changes).await?;

        info!(account_id, amount = %debt, %balance, "credit debt fully repaid");
        Ok(RepaymentOutcome::Repaid {
            account_id,
            amount: debt,
        })
    }
}
