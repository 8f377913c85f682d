use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UnknownVariant;

/// Generates the text form used for storage columns and wire payloads.
/// Parsing is case-insensitive.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: value.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Opened,
    Active,
    Closed,
    Frozen,
    Blocked,
    Arrested,
}

text_enum!(AccountStatus {
    Opened => "OPENED",
    Active => "ACTIVE",
    Closed => "CLOSED",
    Frozen => "FROZEN",
    Blocked => "BLOCKED",
    Arrested => "ARRESTED",
});

impl AccountStatus {
    /// Blocked and arrested accounts reject every transaction.
    pub fn rejects_transactions(&self) -> bool {
        matches!(self, Self::Blocked | Self::Arrested)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: i64,
    pub client_id: i64,
    pub product_id: i64,
    pub balance: Decimal,
    /// Annual rate in percent; `None` for accounts without a rate.
    pub interest_rate: Option<Decimal>,
    /// The account follows a credit repayment schedule.
    pub is_recalc: bool,
    pub card_exist: bool,
    pub status: AccountStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdraw,
}

text_enum!(TransactionType {
    Deposit => "DEPOSIT",
    Withdraw => "WITHDRAW",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Processing,
    Complete,
    Cancelled,
    Frozen,
}

text_enum!(TransactionStatus {
    Processing => "PROCESSING",
    Complete => "COMPLETE",
    Cancelled => "CANCELLED",
    Frozen => "FROZEN",
});

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    /// Assigned by the store on first save.
    pub id: Option<i64>,
    pub message_key: Option<Uuid>,
    pub account_id: i64,
    /// Absent on synthetic repayment withdrawals.
    pub card_id: Option<String>,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    pub fn processing(
        message_key: Option<Uuid>,
        account_id: i64,
        card_id: &str,
        transaction_type: TransactionType,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            message_key,
            account_id,
            card_id: Some(card_id.to_string()),
            transaction_type,
            amount,
            status: TransactionStatus::Processing,
            timestamp,
        }
    }

    /// Completed withdrawal recorded when a scheduled credit payment is debited.
    pub fn repayment(account_id: i64, amount: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            message_key: None,
            account_id,
            card_id: None,
            transaction_type: TransactionType::Withdraw,
            amount,
            status: TransactionStatus::Complete,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    LoanRepayment,
}

text_enum!(PaymentType {
    LoanRepayment => "LOAN_REPAYMENT",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Option<i64>,
    pub account_id: i64,
    pub payment_date: DateTime<Utc>,
    pub amount: Decimal,
    pub is_credit: bool,
    /// `None` while the payment is outstanding.
    pub payed_at: Option<DateTime<Utc>>,
    pub payment_type: PaymentType,
    pub is_expired: bool,
}

impl Payment {
    pub fn scheduled_credit(account_id: i64, payment_date: DateTime<Utc>, amount: Decimal) -> Self {
        Self {
            id: None,
            account_id,
            payment_date,
            amount,
            is_credit: true,
            payed_at: None,
            payment_type: PaymentType::LoanRepayment,
            is_expired: false,
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.payed_at.is_none()
    }
}

/// Registry row of an approved credit product. Immutable once opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductRegistry {
    pub id: i64,
    pub client_id: i64,
    pub account_id: Option<i64>,
    pub product_id: i64,
    pub interest_rate: Decimal,
    pub open_date: NaiveDate,
    pub month_count: u32,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProductRegistry {
    pub client_id: i64,
    pub account_id: Option<i64>,
    pub product_id: i64,
    pub interest_rate: Decimal,
    pub open_date: NaiveDate,
    pub month_count: u32,
    pub amount: Decimal,
}

/// One line of a computed repayment schedule, before it is bound to a registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub payment_date: NaiveDate,
    pub payment_expiration_date: NaiveDate,
    pub amount: Decimal,
    pub interest_amount: Decimal,
    pub debt_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRegistry {
    pub id: i64,
    pub product_registry_id: i64,
    pub payment_date: NaiveDate,
    pub amount: Decimal,
    pub interest_rate_amount: Decimal,
    pub debt_amount: Decimal,
    pub expired: bool,
    pub payment_expiration_date: NaiveDate,
}

impl PaymentRegistry {
    pub fn from_entry(id: i64, product_registry_id: i64, entry: &ScheduleEntry) -> Self {
        Self {
            id,
            product_registry_id,
            payment_date: entry.payment_date,
            amount: entry.amount,
            interest_rate_amount: entry.interest_amount,
            debt_amount: entry.debt_amount,
            expired: false,
            payment_expiration_date: entry.payment_expiration_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientProfile {
    pub client_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub document_type: String,
    pub document_id: String,
}
