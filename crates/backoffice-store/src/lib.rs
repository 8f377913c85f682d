//! In-memory implementations of the ledger traits, used by local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use anyhow::bail;
use rust_decimal::Decimal;

use backoffice_core::{
    Account, AccountIdResolver, AccountStore, ClientProfile, ClientProfileLookup,
    CreditLimitExceeded, CreditRegistryStore, CreditTermLookup, LedgerChanges, LedgerConflict,
    LedgerStore, NewProductRegistry, Payment, PaymentRegistry, PaymentStore, ProductRegistry,
    ScheduleEntry, Transaction, TransactionStore,
};

#[derive(Default)]
struct LedgerTables {
    accounts: HashMap<i64, Account>,
    transactions: Vec<Transaction>,
    payments: Vec<Payment>,
    transaction_sequence: i64,
    payment_sequence: i64,
}

impl LedgerTables {
    fn write_transaction(&mut self, mut transaction: Transaction) -> anyhow::Result<Transaction> {
        match transaction.id {
            Some(id) => {
                let stored = self
                    .transactions
                    .iter_mut()
                    .find(|t| t.id == Some(id))
                    .ok_or_else(|| anyhow::anyhow!("transaction {id} does not exist"))?;
                *stored = transaction.clone();
            }
            None => {
                self.transaction_sequence += 1;
                transaction.id = Some(self.transaction_sequence);
                self.transactions.push(transaction.clone());
            }
        }
        Ok(transaction)
    }

    fn write_payment(&mut self, mut payment: Payment) -> anyhow::Result<Payment> {
        match payment.id {
            Some(id) => {
                let stored = self
                    .payments
                    .iter_mut()
                    .find(|p| p.id == Some(id))
                    .ok_or_else(|| anyhow::anyhow!("payment {id} does not exist"))?;
                *stored = payment.clone();
            }
            None => {
                self.payment_sequence += 1;
                payment.id = Some(self.payment_sequence);
                self.payments.push(payment.clone());
            }
        }
        Ok(payment)
    }

    /// Checks everything `apply` relies on so a batch never lands half-way.
    fn validate(&self, changes: &LedgerChanges) -> anyhow::Result<()> {
        for update in &changes.accounts {
            let account_id = update.before.id;
            match self.accounts.get(&account_id) {
                None => bail!("account {account_id} does not exist"),
                Some(stored) if *stored != update.before => {
                    return Err(LedgerConflict { account_id }.into());
                }
                Some(_) => {}
            }
        }
        for id in changes.transactions.iter().filter_map(|t| t.id) {
            if !self.transactions.iter().any(|t| t.id == Some(id)) {
                bail!("transaction {id} does not exist");
            }
        }
        for id in changes.payments.iter().filter_map(|p| p.id) {
            if !self.payments.iter().any(|p| p.id == Some(id)) {
                bail!("payment {id} does not exist");
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    tables: RwLock<LedgerTables>,
}

impl InMemoryLedger {
    pub async fn insert_account(&self, account: Account) {
        self.tables.write().await.accounts.insert(account.id, account);
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.tables.read().await.transactions.clone()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.read().await.payments.clone()
    }
}

#[async_trait]
impl AccountStore for InMemoryLedger {
    async fn get_account(&self, account_id: i64) -> anyhow::Result<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&account_id).cloned())
    }

    async fn save_account(&self, account: &Account) -> anyhow::Result<()> {
        self.tables
            .write()
            .await
            .accounts
            .insert(account.id, account.clone());
        Ok(())
    }

    async fn find_account_by_client_product(
        &self,
        client_id: i64,
        product_id: i64,
    ) -> anyhow::Result<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.client_id == client_id && a.product_id == product_id)
            .cloned())
    }
}

#[async_trait]
impl TransactionStore for InMemoryLedger {
    async fn save_transaction(&self, transaction: Transaction) -> anyhow::Result<Transaction> {
        self.tables.write().await.write_transaction(transaction)
    }

    async fn get_transaction(&self, transaction_id: i64) -> anyhow::Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .find(|t| t.id == Some(transaction_id))
            .cloned())
    }

    async fn find_by_message_key(&self, message_key: Uuid) -> anyhow::Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .find(|t| t.message_key == Some(message_key))
            .cloned())
    }
}

#[async_trait]
impl PaymentStore for InMemoryLedger {
    async fn find_outstanding_credit(&self, account_id: i64) -> anyhow::Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut outstanding: Vec<Payment> = tables
            .payments
            .iter()
            .filter(|p| p.account_id == account_id && p.is_credit && p.is_outstanding())
            .cloned()
            .collect();
        outstanding.sort_by_key(|p| (p.payment_date, p.id));
        Ok(outstanding)
    }

    async fn save_payment(&self, payment: Payment) -> anyhow::Result<Payment> {
        self.tables.write().await.write_payment(payment)
    }

    async fn save_payments(&self, payments: Vec<Payment>) -> anyhow::Result<Vec<Payment>> {
        let mut tables = self.tables.write().await;
        payments
            .into_iter()
            .map(|payment| tables.write_payment(payment))
            .collect()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn commit(&self, changes: LedgerChanges) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        tables.validate(&changes)?;

        for update in changes.accounts {
            tables.accounts.insert(update.after.id, update.after);
        }
        for payment in changes.payments {
            tables.write_payment(payment)?;
        }
        for transaction in changes.transactions {
            tables.write_transaction(transaction)?;
        }
        Ok(())
    }
}

#[async_trait]
impl AccountIdResolver for InMemoryLedger {
    async fn resolve(&self, client_id: i64, product_id: i64) -> anyhow::Result<Option<i64>> {
        Ok(self
            .find_account_by_client_product(client_id, product_id)
            .await?
            .map(|a| a.id))
    }
}

#[derive(Default)]
struct RegistryTables {
    registries: Vec<ProductRegistry>,
    schedule: Vec<PaymentRegistry>,
    registry_sequence: i64,
    schedule_sequence: i64,
}

#[derive(Default)]
pub struct InMemoryCreditRegistry {
    tables: RwLock<RegistryTables>,
}

impl InMemoryCreditRegistry {
    pub async fn registries(&self) -> Vec<ProductRegistry> {
        self.tables.read().await.registries.clone()
    }

    /// Flags a schedule entry as missed, standing in for the overdue sweep.
    pub async fn mark_expired(&self, payment_registry_id: i64) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .schedule
            .iter_mut()
            .find(|p| p.id == payment_registry_id)
            .ok_or_else(|| anyhow::anyhow!("schedule entry {payment_registry_id} does not exist"))?;
        entry.expired = true;
        Ok(())
    }
}

#[async_trait]
impl CreditRegistryStore for InMemoryCreditRegistry {
    async fn find_by_client(&self, client_id: i64) -> anyhow::Result<Vec<ProductRegistry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .registries
            .iter()
            .filter(|r| r.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn find_by_account(&self, account_id: i64) -> anyhow::Result<Option<ProductRegistry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .registries
            .iter()
            .find(|r| r.account_id == Some(account_id))
            .cloned())
    }

    async fn has_expired_payment(&self, client_id: i64) -> anyhow::Result<bool> {
        let tables = self.tables.read().await;
        let client_products: Vec<i64> = tables
            .registries
            .iter()
            .filter(|r| r.client_id == client_id)
            .map(|r| r.product_id)
            .collect();

        Ok(tables.schedule.iter().filter(|p| p.expired).any(|p| {
            tables
                .registries
                .iter()
                .find(|r| r.id == p.product_registry_id)
                .is_some_and(|owner| client_products.contains(&owner.product_id))
        }))
    }

    async fn open_with_schedule(
        &self,
        registry: NewProductRegistry,
        schedule: &[ScheduleEntry],
        credit_limit: Decimal,
    ) -> anyhow::Result<(ProductRegistry, Vec<PaymentRegistry>)> {
        let mut tables = self.tables.write().await;

        let exposure: Decimal = tables
            .registries
            .iter()
            .filter(|r| r.client_id == registry.client_id)
            .map(|r| r.amount)
            .sum();
        if exposure + registry.amount > credit_limit {
            return Err(CreditLimitExceeded {
                exposure,
                amount: registry.amount,
                limit: credit_limit,
            }
            .into());
        }

        tables.registry_sequence += 1;
        let opened = ProductRegistry {
            id: tables.registry_sequence,
            client_id: registry.client_id,
            account_id: registry.account_id,
            product_id: registry.product_id,
            interest_rate: registry.interest_rate,
            open_date: registry.open_date,
            month_count: registry.month_count,
            amount: registry.amount,
        };

        let mut entries = Vec::with_capacity(schedule.len());
        for entry in schedule {
            tables.schedule_sequence += 1;
            entries.push(PaymentRegistry::from_entry(
                tables.schedule_sequence,
                opened.id,
                entry,
            ));
        }

        tables.registries.push(opened.clone());
        tables.schedule.extend(entries.iter().cloned());

        Ok((opened, entries))
    }

    async fn schedule_for(&self, product_registry_id: i64) -> anyhow::Result<Vec<PaymentRegistry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .schedule
            .iter()
            .filter(|p| p.product_registry_id == product_registry_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CreditTermLookup for InMemoryCreditRegistry {
    async fn get_term(&self, account_id: i64) -> anyhow::Result<Option<u32>> {
        Ok(self.find_by_account(account_id).await?.map(|r| r.month_count))
    }
}

#[derive(Default)]
pub struct InMemoryClientDirectory {
    clients: RwLock<HashMap<i64, ClientProfile>>,
}

impl InMemoryClientDirectory {
    pub async fn register(&self, profile: ClientProfile) {
        self.clients.write().await.insert(profile.client_id, profile);
    }
}

#[async_trait]
impl ClientProfileLookup for InMemoryClientDirectory {
    async fn get_client_info(&self, client_id: i64) -> anyhow::Result<Option<ClientProfile>> {
        Ok(self.clients.read().await.get(&client_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_core::{AccountStatus, TransactionStatus, TransactionType};
    use chrono::{NaiveDate, TimeZone, Utc};

    const NO_LIMIT: Decimal = Decimal::MAX;

    fn registry(client_id: i64, product_id: i64) -> NewProductRegistry {
        NewProductRegistry {
            client_id,
            account_id: None,
            product_id,
            interest_rate: Decimal::new(12, 0),
            open_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            month_count: 12,
            amount: Decimal::new(1000, 0),
        }
    }

    fn entry() -> ScheduleEntry {
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        ScheduleEntry {
            payment_date: date,
            payment_expiration_date: date,
            amount: Decimal::ONE,
            interest_amount: Decimal::ZERO,
            debt_amount: Decimal::ONE,
        }
    }

    #[tokio::test]
    async fn save_assigns_ids_then_updates_in_place() {
        let ledger = InMemoryLedger::default();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let key = Uuid::new_v4();

        let mut tx = ledger
            .save_transaction(Transaction::processing(
                Some(key),
                1,
                "4000000000000001",
                TransactionType::Deposit,
                Decimal::TEN,
                at,
            ))
            .await
            .unwrap();
        assert_eq!(tx.id, Some(1));

        tx.status = TransactionStatus::Complete;
        ledger.save_transaction(tx).await.unwrap();

        let stored = ledger.find_by_message_key(key).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Complete);
        assert_eq!(ledger.transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn outstanding_credit_is_ordered_by_due_date() {
        let ledger = InMemoryLedger::default();
        let late = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        ledger
            .save_payments(vec![
                Payment::scheduled_credit(1, late, Decimal::ONE),
                Payment::scheduled_credit(1, early, Decimal::TWO),
                Payment::scheduled_credit(2, early, Decimal::TEN),
            ])
            .await
            .unwrap();

        let outstanding = ledger.find_outstanding_credit(1).await.unwrap();
        assert_eq!(outstanding.len(), 2);
        assert_eq!(outstanding[0].payment_date, early);
    }

    #[tokio::test]
    async fn expired_payment_is_found_through_shared_product() {
        let store = InMemoryCreditRegistry::default();
        let (other_client, entries) = store
            .open_with_schedule(registry(2, 77), &[entry()], NO_LIMIT)
            .await
            .unwrap();
        store
            .open_with_schedule(registry(1, 77), &[], NO_LIMIT)
            .await
            .unwrap();
        assert_eq!(other_client.client_id, 2);

        assert!(!store.has_expired_payment(1).await.unwrap());
        store.mark_expired(entries[0].id).await.unwrap();

        assert!(store.has_expired_payment(1).await.unwrap());
        assert!(store.has_expired_payment(2).await.unwrap());
        assert!(!store.has_expired_payment(3).await.unwrap());
    }

    fn account(balance: Decimal) -> Account {
        Account {
            id: 7,
            client_id: 1,
            product_id: 1,
            balance,
            interest_rate: None,
            is_recalc: true,
            card_exist: true,
            status: AccountStatus::Active,
        }
    }

    #[tokio::test]
    async fn commit_with_stale_account_writes_nothing() {
        let ledger = InMemoryLedger::default();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ledger.insert_account(account(Decimal::new(50, 0))).await;

        let mut changes = LedgerChanges::default();
        changes.update_account(account(Decimal::ZERO), account(Decimal::TEN));
        changes
            .payments
            .push(Payment::scheduled_credit(7, at, Decimal::ONE));

        let err = ledger.commit(changes).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<LedgerConflict>(),
            Some(&LedgerConflict { account_id: 7 })
        );

        let stored = ledger.get_account(7).await.unwrap().unwrap();
        assert_eq!(stored.balance, Decimal::new(50, 0));
        assert!(ledger.payments().await.is_empty());
    }

    #[tokio::test]
    async fn commit_applies_every_change() {
        let ledger = InMemoryLedger::default();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ledger.insert_account(account(Decimal::ZERO)).await;

        let mut changes = LedgerChanges::default();
        changes.update_account(account(Decimal::ZERO), account(Decimal::TEN));
        changes
            .payments
            .push(Payment::scheduled_credit(7, at, Decimal::ONE));
        changes.transactions.push(Transaction::processing(
            None,
            7,
            "4000000000000001",
            TransactionType::Deposit,
            Decimal::TEN,
            at,
        ));
        ledger.commit(changes).await.unwrap();

        assert_eq!(
            ledger.get_account(7).await.unwrap().unwrap().balance,
            Decimal::TEN
        );
        assert_eq!(ledger.payments().await[0].id, Some(1));
        assert_eq!(ledger.transactions().await[0].id, Some(1));
    }

    #[tokio::test]
    async fn opening_past_the_limit_is_refused() {
        let store = InMemoryCreditRegistry::default();
        let limit = Decimal::new(1500, 0);
        store
            .open_with_schedule(registry(1, 77), &[], limit)
            .await
            .unwrap();

        let err = store
            .open_with_schedule(registry(1, 78), &[entry()], limit)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CreditLimitExceeded>(),
            Some(&CreditLimitExceeded {
                exposure: Decimal::new(1000, 0),
                amount: Decimal::new(1000, 0),
                limit,
            })
        );
        assert_eq!(store.registries().await.len(), 1);
        assert!(store.schedule_for(2).await.unwrap().is_empty());
    }
}
