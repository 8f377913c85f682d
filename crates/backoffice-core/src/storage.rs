use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    Account, ClientProfile, NewProductRegistry, Payment, PaymentRegistry, ProductRegistry,
    ScheduleEntry, Transaction,
};

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, account_id: i64) -> anyhow::Result<Option<Account>>;
    async fn save_account(&self, account: &Account) -> anyhow::Result<()>;
    async fn find_account_by_client_product(
        &self,
        client_id: i64,
        product_id: i64,
    ) -> anyhow::Result<Option<Account>>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts when `id` is `None`, updates otherwise. Returns the stored row.
    async fn save_transaction(&self, transaction: Transaction) -> anyhow::Result<Transaction>;
    async fn get_transaction(&self, transaction_id: i64) -> anyhow::Result<Option<Transaction>>;
    async fn find_by_message_key(&self, message_key: Uuid) -> anyhow::Result<Option<Transaction>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Unpaid credit payments of the account, earliest due date first.
    async fn find_outstanding_credit(&self, account_id: i64) -> anyhow::Result<Vec<Payment>>;
    async fn save_payment(&self, payment: Payment) -> anyhow::Result<Payment>;
    async fn save_payments(&self, payments: Vec<Payment>) -> anyhow::Result<Vec<Payment>>;
}

/// An account write guarded by the state it was derived from.
#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub before: Account,
    pub after: Account,
}

/// Writes that must land together or not at all.
#[derive(Debug, Clone, Default)]
pub struct LedgerChanges {
    pub accounts: Vec<AccountUpdate>,
    pub transactions: Vec<Transaction>,
    pub payments: Vec<Payment>,
}

impl LedgerChanges {
    pub fn update_account(&mut self, before: Account, after: Account) {
        self.accounts.push(AccountUpdate { before, after });
    }
}

/// Account-side ledger used by transaction and repayment processing.
#[async_trait]
pub trait LedgerStore: AccountStore + TransactionStore + PaymentStore {
    /// Applies every change in one unit of work. Fails with
    /// [`LedgerConflict`](crate::LedgerConflict) when an account's stored
    /// state differs from `before`, in which case nothing is written.
    async fn commit(&self, changes: LedgerChanges) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CreditRegistryStore: Send + Sync {
    async fn find_by_client(&self, client_id: i64) -> anyhow::Result<Vec<ProductRegistry>>;
    async fn find_by_account(&self, account_id: i64) -> anyhow::Result<Option<ProductRegistry>>;
    /// True when any schedule entry owned by a registry sharing a product with
    /// one of the client's registries is expired.
    async fn has_expired_payment(&self, client_id: i64) -> anyhow::Result<bool>;
    /// Writes the registry and its schedule atomically, re-checking the
    /// client's total exposure against `credit_limit` while serialized with
    /// other openings for the same client. Fails with
    /// [`CreditLimitExceeded`](crate::CreditLimitExceeded) when over.
    async fn open_with_schedule(
        &self,
        registry: NewProductRegistry,
        schedule: &[ScheduleEntry],
        credit_limit: Decimal,
    ) -> anyhow::Result<(ProductRegistry, Vec<PaymentRegistry>)>;
    async fn schedule_for(&self, product_registry_id: i64) -> anyhow::Result<Vec<PaymentRegistry>>;
}

#[async_trait]
pub trait ClientProfileLookup: Send + Sync {
    async fn get_client_info(&self, client_id: i64) -> anyhow::Result<Option<ClientProfile>>;
}

#[async_trait]
pub trait AccountIdResolver: Send + Sync {
    async fn resolve(&self, client_id: i64, product_id: i64) -> anyhow::Result<Option<i64>>;
}

#[async_trait]
pub trait CreditTermLookup: Send + Sync {
    async fn get_term(&self, account_id: i64) -> anyhow::Result<Option<u32>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
