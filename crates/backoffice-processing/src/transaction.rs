use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use backoffice_core::{
    Account, AccountStatus, Clock, CreditTermLookup, LedgerChanges, LedgerConflict, LedgerStore,
    Payment, Transaction, TransactionEvent, TransactionStatus, TransactionType,
};
use backoffice_credit::generate_schedule;
use backoffice_fraud::FraudWindow;

use crate::locks::AccountLocks;

/// Term used when the credit service cannot tell how long the credit runs.
pub const DEFAULT_FALLBACK_TERM_MONTHS: u32 = 60;

/// Attempts at committing a transaction's changes before giving up on a
/// ledger that keeps changing underneath it.
const COMMIT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    AccountNotFound,
    AccountBlocked,
    InsufficientFunds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionOutcome {
    Completed { transaction_id: i64, balance: Decimal },
    Cancelled { transaction_id: i64, reason: CancelReason },
    Frozen { transaction_id: i64 },
    /// The transaction was already terminal; nothing was applied.
    AlreadySettled { transaction_id: i64, status: TransactionStatus },
}

impl TransactionOutcome {
    pub fn status(&self) -> TransactionStatus {
        match self {
            Self::Completed { .. } => TransactionStatus::Complete,
            Self::Cancelled { .. } => TransactionStatus::Cancelled,
            Self::Frozen { .. } => TransactionStatus::Frozen,
            Self::AlreadySettled { status, .. } => *status,
        }
    }
}

/// Applies deposit and withdrawal events to accounts.
///
/// Every transaction is persisted as PROCESSING first and always ends in a
/// terminal status. Settling an already terminal transaction is a no-op, so
/// redelivered events never apply a balance change twice. The balance, the
/// payments and the terminal status are committed as one batch.
#[derive(Clone)]
pub struct TransactionProcessor {
    ledger: Arc<dyn LedgerStore>,
    fraud: Arc<FraudWindow>,
    terms: Arc<dyn CreditTermLookup>,
    locks: AccountLocks,
    clock: Arc<dyn Clock>,
    fallback_term_months: u32,
}

impl TransactionProcessor {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        fraud: Arc<FraudWindow>,
        terms: Arc<dyn CreditTermLookup>,
        locks: AccountLocks,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            fraud,
            terms,
            locks,
            clock,
            fallback_term_months: DEFAULT_FALLBACK_TERM_MONTHS,
        }
    }

    pub fn with_fallback_term(mut self, months: u32) -> Self {
        self.fallback_term_months = months;
        self
    }

    pub async fn process(&self, event: &TransactionEvent) -> anyhow::Result<TransactionOutcome> {
        let transaction_type = event.validate()?;

        info!(
            account_id = event.account_id,
            card_id = %event.card_id,
            kind = %transaction_type,
            amount = %event.amount,
            "processing transaction"
        );

        if let Some(key) = event.message_key {
            if let Some(existing) = self.ledger.find_by_message_key(key).await? {
                info!(message_key = %key, "redelivered transaction event");
                return self.settle(existing).await;
            }
        }

        let created = self
            .ledger
            .save_transaction(Transaction::processing(
                event.message_key,
                event.account_id,
                &event.card_id,
                transaction_type,
                event.amount,
                self.clock.now(),
            ))
            .await?;

        self.settle(created).await
    }

    /// Drives a stored transaction to a terminal status.
    pub async fn resume(&self, transaction_id: i64) -> anyhow::Result<TransactionOutcome> {
        let transaction = self
            .ledger
            .get_transaction(transaction_id)
            .await?
            .with_context(|| format!("transaction {transaction_id} not found"))?;
        self.settle(transaction).await
    }

    async fn settle(&self, transaction: Transaction) -> anyhow::Result<TransactionOutcome> {
        let transaction_id = transaction
            .id
            .context("transaction must be stored before it is settled")?;
        if transaction.status.is_terminal() {
            return Ok(already_settled(transaction_id, transaction.status));
        }

        let _guard = self.locks.lock(transaction.account_id).await;

        // Another worker may have settled it while this one waited for the lock.
        let mut transaction = self
            .ledger
            .get_transaction(transaction_id)
            .await?
            .unwrap_or(transaction);
        if transaction.status.is_terminal() {
            return Ok(already_settled(transaction_id, transaction.status));
        }

        match self.apply(&mut transaction, transaction_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(transaction_id, "transaction failed: {err:#}");
                transaction.status = TransactionStatus::Cancelled;
                if let Err(save_err) = self.ledger.save_transaction(transaction).await {
                    error!(transaction_id, "could not cancel failed transaction: {save_err:#}");
                }
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        transaction: &mut Transaction,
        transaction_id: i64,
    ) -> anyhow::Result<TransactionOutcome> {
        let now = self.clock.now();
        let suspicious = transaction
            .card_id
            .as_deref()
            .is_some_and(|card_id| self.fraud.record(card_id, now));

        let mut attempt = 1;
        loop {
            let result = if suspicious {
                self.freeze(transaction, transaction_id).await
            } else {
                self.apply_once(transaction, transaction_id, now).await
            };
            match result {
                Err(err) if err.is::<LedgerConflict>() && attempt < COMMIT_ATTEMPTS => {
                    warn!(transaction_id, attempt, "{err}, recomputing");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn apply_once(
        &self,
        transaction: &mut Transaction,
        transaction_id: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<TransactionOutcome> {
        let Some(before) = self.ledger.get_account(transaction.account_id).await? else {
            warn!(transaction_id, account_id = transaction.account_id, "account not found");
            return self
                .cancel(transaction, transaction_id, CancelReason::AccountNotFound)
                .await;
        };

        if before.status.rejects_transactions() {
            warn!(transaction_id, account_id = before.id, status = %before.status, "account rejects transactions");
            return self
                .cancel(transaction, transaction_id, CancelReason::AccountBlocked)
                .await;
        }

        let mut account = before.clone();
        let mut changes = LedgerChanges::default();

        if account.is_recalc {
            changes.payments = self.schedule_drawdown(&account, transaction.amount, now).await?;
        }

        match transaction.transaction_type {
            TransactionType::Deposit => {
                account.balance += transaction.amount;
                if account.is_recalc {
                    self.reconcile_repayment(&mut account, now, &mut changes)
                        .await?;
                }
            }
            TransactionType::Withdraw => {
                if account.balance < transaction.amount {
                    warn!(
                        transaction_id,
                        account_id = account.id,
                        balance = %account.balance,
                        amount = %transaction.amount,
                        "insufficient funds"
                    );
                    return self
                        .cancel(transaction, transaction_id, CancelReason::InsufficientFunds)
                        .await;
                }
                account.balance -= transaction.amount;
            }
        }

        let balance = account.balance;
        let mut completed = transaction.clone();
        completed.status = TransactionStatus::Complete;
        changes.transactions.push(completed);
        changes.update_account(before, account);
        self.ledger.commit(changes).await?;

        transaction.status = TransactionStatus::Complete;
        info!(transaction_id, account_id = transaction.account_id, %balance, "transaction complete");
        Ok(TransactionOutcome::Completed {
            transaction_id,
            balance,
        })
    }

    async fn freeze(
        &self,
        transaction: &mut Transaction,
        transaction_id: i64,
    ) -> anyhow::Result<TransactionOutcome> {
        let mut changes = LedgerChanges::default();
        if let Some(before) = self.ledger.get_account(transaction.account_id).await? {
            let mut blocked = before.clone();
            blocked.status = AccountStatus::Blocked;
            changes.update_account(before, blocked);
        }
        let mut frozen = transaction.clone();
        frozen.status = TransactionStatus::Frozen;
        changes.transactions.push(frozen);
        self.ledger.commit(changes).await?;

        transaction.status = TransactionStatus::Frozen;
        warn!(transaction_id, account_id = transaction.account_id, "account blocked after suspicious card activity");
        Ok(TransactionOutcome::Frozen { transaction_id })
    }

    async fn cancel(
        &self,
        transaction: &mut Transaction,
        transaction_id: i64,
        reason: CancelReason,
    ) -> anyhow::Result<TransactionOutcome> {
        transaction.status = TransactionStatus::Cancelled;
        self.ledger.save_transaction(transaction.clone()).await?;
        Ok(TransactionOutcome::Cancelled {
            transaction_id,
            reason,
        })
    }

    // Runs on every qualifying transaction, not only the first one, so each
    // drawdown gets its own schedule and nothing de-duplicates them.
    async fn schedule_drawdown(
        &self,
        account: &Account,
        principal: Decimal,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Payment>> {
        let months = self.credit_term(account.id).await;
        let rate = account.interest_rate.unwrap_or(Decimal::ZERO);
        let schedule = generate_schedule(principal, rate, months, now.date_naive())?;

        let payments: Vec<Payment> = schedule
            .iter()
            .map(|entry| {
                Payment::scheduled_credit(account.id, at_time_of(entry.payment_date, now), entry.amount)
            })
            .collect();

        info!(account_id = account.id, %principal, %rate, months, "credit schedule generated");
        Ok(payments)
    }

    async fn credit_term(&self, account_id: i64) -> u32 {
        match self.terms.get_term(account_id).await {
            Ok(Some(months)) if months > 0 => months,
            Ok(_) => {
                warn!(account_id, fallback = self.fallback_term_months, "no credit term for account");
                self.fallback_term_months
            }
            Err(err) => {
                warn!(account_id, fallback = self.fallback_term_months, "credit term lookup failed: {err:#}");
                self.fallback_term_months
            }
        }
    }

    /// Settles the earliest overdue payment from the balance, or marks it
    /// expired when the balance cannot cover it.
    async fn reconcile_repayment(
        &self,
        account: &mut Account,
        now: DateTime<Utc>,
        changes: &mut LedgerChanges,
    ) -> anyhow::Result<()> {
        let due = self
            .ledger
            .find_outstanding_credit(account.id)
            .await?
            .into_iter()
            .find(|p| !p.is_expired && p.payment_date < now);
        let Some(mut payment) = due else {
            return Ok(());
        };

        if account.balance >= payment.amount {
            account.balance -= payment.amount;
            payment.payed_at = Some(now);
            let amount = payment.amount;
            changes.payments.push(payment);
            changes
                .transactions
                .push(Transaction::repayment(account.id, amount, now));
            info!(account_id = account.id, %amount, "scheduled credit payment collected");
        } else {
            payment.is_expired = true;
            warn!(
                account_id = account.id,
                amount = %payment.amount,
                balance = %account.balance,
                "scheduled credit payment expired"
            );
            changes.payments.push(payment);
        }
        Ok(())
    }
}

fn already_settled(transaction_id: i64, status: TransactionStatus) -> TransactionOutcome {
    info!(transaction_id, %status, "transaction already settled");
    TransactionOutcome::AlreadySettled {
        transaction_id,
        status,
    }
}

fn at_time_of(date: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
    date.and_time(now.time()).and_utc()
}
