use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use backoffice_core::{
    Account, AccountStatus, AccountStore, ClientPaymentEvent, Clock, LedgerChanges, LedgerStore,
    Payment, PaymentStore, Transaction, TransactionStore,
};
use uuid::Uuid;
use backoffice_processing::{AccountLocks, RepaymentOutcome, RepaymentProcessor};
use backoffice_store::InMemoryLedger;

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Reads go through; every commit fails.
struct BrokenCommit(Arc<InMemoryLedger>);

#[async_trait]
impl AccountStore for BrokenCommit {
    async fn get_account(&self, account_id: i64) -> anyhow::Result<Option<Account>> {
        self.0.get_account(account_id).await
    }

    async fn save_account(&self, account: &Account) -> anyhow::Result<()> {
        self.0.save_account(account).await
    }

    async fn find_account_by_client_product(
        &self,
        client_id: i64,
        product_id: i64,
    ) -> anyhow::Result<Option<Account>> {
        self.0.find_account_by_client_product(client_id, product_id).await
    }
}

#[async_trait]
impl TransactionStore for BrokenCommit {
    async fn save_transaction(&self, transaction: Transaction) -> anyhow::Result<Transaction> {
        self.0.save_transaction(transaction).await
    }

    async fn get_transaction(&self, transaction_id: i64) -> anyhow::Result<Option<Transaction>> {
        self.0.get_transaction(transaction_id).await
    }

    async fn find_by_message_key(&self, message_key: Uuid) -> anyhow::Result<Option<Transaction>> {
        self.0.find_by_message_key(message_key).await
    }
}

#[async_trait]
impl PaymentStore for BrokenCommit {
    async fn find_outstanding_credit(&self, account_id: i64) -> anyhow::Result<Vec<Payment>> {
        self.0.find_outstanding_credit(account_id).await
    }

    async fn save_payment(&self, payment: Payment) -> anyhow::Result<Payment> {
        self.0.save_payment(payment).await
    }

    async fn save_payments(&self, payments: Vec<Payment>) -> anyhow::Result<Vec<Payment>> {
        self.0.save_payments(payments).await
    }
}

#[async_trait]
impl LedgerStore for BrokenCommit {
    async fn commit(&self, _changes: LedgerChanges) -> anyhow::Result<()> {
        anyhow::bail!("connection reset during commit")
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

async fn ledger_with_debt(balance: Decimal, installments: &[Decimal]) -> Arc<InMemoryLedger> {
    let ledger = Arc::new(InMemoryLedger::default());
    ledger
        .insert_account(Account {
            id: 1,
            client_id: 42,
            product_id: 7,
            balance,
            interest_rate: Some(dec!(12)),
            is_recalc: true,
            card_exist: false,
            status: AccountStatus::Active,
        })
        .await;
    let payments = installments
        .iter()
        .enumerate()
        .map(|(month, amount)| {
            Payment::scheduled_credit(1, now() + Duration::days(30 * (month as i64 + 1)), *amount)
        })
        .collect();
    ledger.save_payments(payments).await.unwrap();
    ledger
}

fn processor(ledger: Arc<InMemoryLedger>) -> RepaymentProcessor {
    RepaymentProcessor::new(ledger, AccountLocks::default(), Arc::new(FixedClock(now())))
}

fn payment(amount: Decimal) -> ClientPaymentEvent {
    ClientPaymentEvent {
        message_key: None,
        account_id: 1,
        amount,
        payment_date: None,
    }
}

#[tokio::test]
async fn exact_debt_closes_every_installment() {
    let ledger = ledger_with_debt(dec!(1000), &[dec!(300), dec!(300)]).await;

    let outcome = processor(ledger.clone())
        .process(&payment(dec!(600)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RepaymentOutcome::Repaid {
            account_id: 1,
            amount: dec!(600)
        }
    );
    assert_eq!(ledger.get_account(1).await.unwrap().unwrap().balance, dec!(400));
    assert!(ledger.find_outstanding_credit(1).await.unwrap().is_empty());

    let payments = ledger.payments().await;
    assert_eq!(payments.len(), 3);
    assert!(payments.iter().all(|p| p.payed_at == Some(now())));
}

#[tokio::test]
async fn partial_amount_changes_nothing() {
    let ledger = ledger_with_debt(dec!(1000), &[dec!(300), dec!(300)]).await;

    let outcome = processor(ledger.clone())
        .process(&payment(dec!(300)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RepaymentOutcome::Mismatch {
            account_id: 1,
            debt: dec!(600)
        }
    );
    assert_eq!(ledger.get_account(1).await.unwrap().unwrap().balance, dec!(1000));
    assert_eq!(ledger.find_outstanding_credit(1).await.unwrap().len(), 2);
}

#[tokio::test]
async fn no_debt_is_a_mismatch() {
    let ledger = ledger_with_debt(dec!(1000), &[]).await;

    let outcome = processor(ledger).process(&payment(dec!(10))).await.unwrap();

    assert_eq!(
        outcome,
        RepaymentOutcome::Mismatch {
            account_id: 1,
            debt: Decimal::ZERO
        }
    );
}

#[tokio::test]
async fn unknown_account_and_bad_amount() {
    let ledger = Arc::new(InMemoryLedger::default());
    let processor = processor(ledger);

    assert_eq!(
        processor.process(&payment(dec!(10))).await.unwrap(),
        RepaymentOutcome::AccountNotFound { account_id: 1 }
    );
    assert!(processor.process(&payment(dec!(0))).await.is_err());
}

#[tokio::test]
async fn failed_commit_keeps_balance_and_debt_together() {
    let ledger = ledger_with_debt(dec!(1000), &[dec!(300), dec!(300)]).await;
    let processor = RepaymentProcessor::new(
        Arc::new(BrokenCommit(ledger.clone())),
        AccountLocks::default(),
        Arc::new(FixedClock(now())),
    );

    assert!(processor.process(&payment(dec!(600))).await.is_err());

    assert_eq!(ledger.get_account(1).await.unwrap().unwrap().balance, dec!(1000));
    assert_eq!(ledger.find_outstanding_credit(1).await.unwrap().len(), 2);
    assert_eq!(ledger.payments().await.len(), 2);
}
