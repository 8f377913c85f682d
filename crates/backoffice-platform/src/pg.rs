//! Postgres-backed ledger and credit registry.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use backoffice_core::{
    Account, AccountIdResolver, AccountStore, CreditLimitExceeded, CreditRegistryStore,
    CreditTermLookup, LedgerChanges, LedgerConflict, LedgerStore, NewProductRegistry, Payment,
    PaymentRegistry, PaymentStore, ProductRegistry, ScheduleEntry, Transaction, TransactionStore,
};

const ACCOUNT_SELECT: &str = "SELECT id, client_id, product_id, balance, interest_rate, is_recalc, card_exist, status FROM accounts";
const TRANSACTION_SELECT: &str = "SELECT id, message_key, account_id, card_id, transaction_type, amount, status, created_at FROM transactions";
const REGISTRY_SELECT: &str = "SELECT id, client_id, account_id, product_id, interest_rate, open_date, month_count, amount FROM product_registry";
const SCHEDULE_SELECT: &str = "SELECT id, product_registry_id, payment_date, amount, interest_rate_amount, debt_amount, expired, payment_expiration_date FROM payment_registry";

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgLedger {
    async fn get_account(&self, account_id: i64) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("{ACCOUNT_SELECT} WHERE id = $1"))
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        write_account(&mut conn, account).await
    }

    async fn find_account_by_client_product(
        &self,
        client_id: i64,
        product_id: i64,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "{ACCOUNT_SELECT} WHERE client_id = $1 AND product_id = $2 ORDER BY id LIMIT 1"
        ))
        .bind(client_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }
}

#[async_trait]
impl TransactionStore for PgLedger {
    async fn save_transaction(&self, transaction: Transaction) -> Result<Transaction> {
        let mut conn = self.pool.acquire().await?;
        write_transaction(&mut conn, transaction).await
    }

    async fn get_transaction(&self, transaction_id: i64) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!("{TRANSACTION_SELECT} WHERE id = $1"))
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn find_by_message_key(&self, message_key: Uuid) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!("{TRANSACTION_SELECT} WHERE message_key = $1"))
            .bind(message_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }
}

#[async_trait]
impl PaymentStore for PgLedger {
    async fn find_outstanding_credit(&self, account_id: i64) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, payment_date, amount, is_credit, payed_at, payment_type, is_expired
            FROM payments
            WHERE account_id = $1 AND is_credit AND payed_at IS NULL
            ORDER BY payment_date, id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn save_payment(&self, payment: Payment) -> Result<Payment> {
        let mut conn = self.pool.acquire().await?;
        write_payment(&mut conn, payment).await
    }

    async fn save_payments(&self, payments: Vec<Payment>) -> Result<Vec<Payment>> {
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(payments.len());
        for payment in payments {
            saved.push(write_payment(&mut tx, payment).await?);
        }
        tx.commit().await?;
        Ok(saved)
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn commit(&self, changes: LedgerChanges) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for update in &changes.accounts {
            let account_id = update.before.id;
            let row = sqlx::query(&format!("{ACCOUNT_SELECT} WHERE id = $1 FOR UPDATE"))
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(stored) = row.as_ref().map(account_from_row).transpose()? else {
                bail!("account {account_id} does not exist");
            };
            if stored != update.before {
                return Err(LedgerConflict { account_id }.into());
            }
            write_account(&mut tx, &update.after).await?;
        }
        for payment in changes.payments {
            write_payment(&mut tx, payment).await?;
        }
        for transaction in changes.transactions {
            write_transaction(&mut tx, transaction).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AccountIdResolver for PgLedger {
    async fn resolve(&self, client_id: i64, product_id: i64) -> Result<Option<i64>> {
        Ok(self
            .find_account_by_client_product(client_id, product_id)
            .await?
            .map(|account| account.id))
    }
}

async fn write_account(conn: &mut PgConnection, account: &Account) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO accounts (id, client_id, product_id, balance, interest_rate, is_recalc, card_exist, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE SET
            balance = EXCLUDED.balance,
            interest_rate = EXCLUDED.interest_rate,
            is_recalc = EXCLUDED.is_recalc,
            card_exist = EXCLUDED.card_exist,
            status = EXCLUDED.status
        "#,
    )
    .bind(account.id)
    .bind(account.client_id)
    .bind(account.product_id)
    .bind(account.balance)
    .bind(account.interest_rate)
    .bind(account.is_recalc)
    .bind(account.card_exist)
    .bind(account.status.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_transaction(
    conn: &mut PgConnection,
    mut transaction: Transaction,
) -> Result<Transaction> {
    match transaction.id {
        Some(id) => {
            let updated = sqlx::query("UPDATE transactions SET status = $2 WHERE id = $1")
                .bind(id)
                .bind(transaction.status.as_str())
                .execute(&mut *conn)
                .await?;
            anyhow::ensure!(updated.rows_affected() == 1, "transaction {id} does not exist");
        }
        None => {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO transactions (message_key, account_id, card_id, transaction_type, amount, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(transaction.message_key)
            .bind(transaction.account_id)
            .bind(transaction.card_id.as_deref())
            .bind(transaction.transaction_type.as_str())
            .bind(transaction.amount)
            .bind(transaction.status.as_str())
            .bind(transaction.timestamp)
            .fetch_one(&mut *conn)
            .await?;
            transaction.id = Some(id);
        }
    }
    Ok(transaction)
}

async fn write_payment(conn: &mut PgConnection, mut payment: Payment) -> Result<Payment> {
    match payment.id {
        Some(id) => {
            let updated = sqlx::query(
                "UPDATE payments SET amount = $2, payed_at = $3, is_expired = $4 WHERE id = $1",
            )
            .bind(id)
            .bind(payment.amount)
            .bind(payment.payed_at)
            .bind(payment.is_expired)
            .execute(&mut *conn)
            .await?;
            anyhow::ensure!(updated.rows_affected() == 1, "payment {id} does not exist");
        }
        None => {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO payments (account_id, payment_date, amount, is_credit, payed_at, payment_type, is_expired)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(payment.account_id)
            .bind(payment.payment_date)
            .bind(payment.amount)
            .bind(payment.is_credit)
            .bind(payment.payed_at)
            .bind(payment.payment_type.as_str())
            .bind(payment.is_expired)
            .fetch_one(&mut *conn)
            .await?;
            payment.id = Some(id);
        }
    }
    Ok(payment)
}

#[derive(Clone)]
pub struct PgCreditRegistry {
    pool: PgPool,
}

impl PgCreditRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditRegistryStore for PgCreditRegistry {
    async fn find_by_client(&self, client_id: i64) -> Result<Vec<ProductRegistry>> {
        let rows = sqlx::query(&format!("{REGISTRY_SELECT} WHERE client_id = $1 ORDER BY id"))
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(registry_from_row).collect()
    }

    async fn find_by_account(&self, account_id: i64) -> Result<Option<ProductRegistry>> {
        let row = sqlx::query(&format!(
            "{REGISTRY_SELECT} WHERE account_id = $1 ORDER BY id DESC LIMIT 1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(registry_from_row).transpose()
    }

    // Expired entries are matched through the product, not the owning
    // registry row, so another client's default on a shared product counts.
    async fn has_expired_payment(&self, client_id: i64) -> Result<bool> {
        let expired: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM payment_registry entry
                JOIN product_registry owner ON owner.id = entry.product_registry_id
                WHERE entry.expired
                  AND owner.product_id IN (
                      SELECT product_id FROM product_registry WHERE client_id = $1
                  )
            )
            "#,
        )
        .bind(client_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(expired)
    }

    async fn open_with_schedule(
        &self,
        registry: NewProductRegistry,
        schedule: &[ScheduleEntry],
        credit_limit: Decimal,
    ) -> Result<(ProductRegistry, Vec<PaymentRegistry>)> {
        let month_count = i32::try_from(registry.month_count).context("month count out of range")?;
        let mut tx = self.pool.begin().await?;

        // Serializes openings per client until this transaction ends.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(registry.client_id)
            .execute(&mut *tx)
            .await?;
        let exposure: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM product_registry WHERE client_id = $1",
        )
        .bind(registry.client_id)
        .fetch_one(&mut *tx)
        .await?;
        if exposure + registry.amount > credit_limit {
            return Err(CreditLimitExceeded {
                exposure,
                amount: registry.amount,
                limit: credit_limit,
            }
            .into());
        }

        let registry_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO product_registry (client_id, account_id, product_id, interest_rate, open_date, month_count, amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(registry.client_id)
        .bind(registry.account_id)
        .bind(registry.product_id)
        .bind(registry.interest_rate)
        .bind(registry.open_date)
        .bind(month_count)
        .bind(registry.amount)
        .fetch_one(&mut *tx)
        .await?;

        let mut entries = Vec::with_capacity(schedule.len());
        for entry in schedule {
            let entry_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO payment_registry (
                    product_registry_id, payment_date, amount, interest_rate_amount,
                    debt_amount, expired, payment_expiration_date
                )
                VALUES ($1, $2, $3, $4, $5, FALSE, $6)
                RETURNING id
                "#,
            )
            .bind(registry_id)
            .bind(entry.payment_date)
            .bind(entry.amount)
            .bind(entry.interest_amount)
            .bind(entry.debt_amount)
            .bind(entry.payment_expiration_date)
            .fetch_one(&mut *tx)
            .await?;
            entries.push(PaymentRegistry::from_entry(entry_id, registry_id, entry));
        }

        tx.commit().await?;

        let opened = ProductRegistry {
            id: registry_id,
            client_id: registry.client_id,
            account_id: registry.account_id,
            product_id: registry.product_id,
            interest_rate: registry.interest_rate,
            open_date: registry.open_date,
            month_count: registry.month_count,
            amount: registry.amount,
        };
        Ok((opened, entries))
    }

    async fn schedule_for(&self, product_registry_id: i64) -> Result<Vec<PaymentRegistry>> {
        let rows = sqlx::query(&format!(
            "{SCHEDULE_SELECT} WHERE product_registry_id = $1 ORDER BY payment_date, id"
        ))
        .bind(product_registry_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }
}

#[async_trait]
impl CreditTermLookup for PgCreditRegistry {
    async fn get_term(&self, account_id: i64) -> Result<Option<u32>> {
        Ok(self
            .find_by_account(account_id)
            .await?
            .map(|registry| registry.month_count))
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let status: String = row.try_get("status")?;
    Ok(Account {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        product_id: row.try_get("product_id")?,
        balance: row.try_get("balance")?,
        interest_rate: row.try_get("interest_rate")?,
        is_recalc: row.try_get("is_recalc")?,
        card_exist: row.try_get("card_exist")?,
        status: status.parse()?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let transaction_type: String = row.try_get("transaction_type")?;
    let status: String = row.try_get("status")?;
    Ok(Transaction {
        id: Some(row.try_get("id")?),
        message_key: row.try_get("message_key")?,
        account_id: row.try_get("account_id")?,
        card_id: row.try_get("card_id")?,
        transaction_type: transaction_type.parse()?,
        amount: row.try_get("amount")?,
        status: status.parse()?,
        timestamp: row.try_get("created_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let payment_type: String = row.try_get("payment_type")?;
    Ok(Payment {
        id: Some(row.try_get("id")?),
        account_id: row.try_get("account_id")?,
        payment_date: row.try_get("payment_date")?,
        amount: row.try_get("amount")?,
        is_credit: row.try_get("is_credit")?,
        payed_at: row.try_get("payed_at")?,
        payment_type: payment_type.parse()?,
        is_expired: row.try_get("is_expired")?,
    })
}

fn registry_from_row(row: &PgRow) -> Result<ProductRegistry> {
    let month_count: i32 = row.try_get("month_count")?;
    Ok(ProductRegistry {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        account_id: row.try_get("account_id")?,
        product_id: row.try_get("product_id")?,
        interest_rate: row.try_get("interest_rate")?,
        open_date: row.try_get("open_date")?,
        month_count: u32::try_from(month_count).context("negative month count in registry")?,
        amount: row.try_get("amount")?,
    })
}

fn schedule_from_row(row: &PgRow) -> Result<PaymentRegistry> {
    Ok(PaymentRegistry {
        id: row.try_get("id")?,
        product_registry_id: row.try_get("product_registry_id")?,
        payment_date: row.try_get("payment_date")?,
        amount: row.try_get("amount")?,
        interest_rate_amount: row.try_get("interest_rate_amount")?,
        debt_amount: row.try_get("debt_amount")?,
        expired: row.try_get("expired")?,
        payment_expiration_date: row.try_get("payment_expiration_date")?,
    })
}
