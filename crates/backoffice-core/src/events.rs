use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventError;
use crate::models::TransactionType;

const OPERATION_CREATE: &str = "CREATE";

/// Published by client onboarding when a client takes a credit product.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditProductEvent {
    pub operation: String,
    pub client_product_id: Option<i64>,
    pub client_id: i64,
    pub product_id: i64,
    pub product_name: Option<String>,
    pub product_key: Option<String>,
    pub open_date: NaiveDateTime,
    pub close_date: Option<NaiveDateTime>,
    pub timestamp: Option<NaiveDateTime>,
    pub status: Option<String>,
}

impl CreditProductEvent {
    /// Only creation events open credit; updates and deletes are ignored.
    pub fn is_create(&self) -> bool {
        self.operation.trim().eq_ignore_ascii_case(OPERATION_CREATE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub message_key: Option<Uuid>,
    pub account_id: i64,
    pub card_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: Decimal,
    pub timestamp: Option<NaiveDateTime>,
}

impl TransactionEvent {
    pub fn validate(&self) -> Result<TransactionType, EventError> {
        let transaction_type = self.kind.parse::<TransactionType>()?;
        if self.amount <= Decimal::ZERO {
            return Err(EventError::NonPositiveAmount(self.amount.to_string()));
        }
        if self.card_id.trim().is_empty() {
            return Err(EventError::MissingCard);
        }
        Ok(transaction_type)
    }
}

/// Full credit repayment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPaymentEvent {
    pub message_key: Option<Uuid>,
    pub account_id: i64,
    pub amount: Decimal,
    pub payment_date: Option<NaiveDateTime>,
}
