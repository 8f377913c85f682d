use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use backoffice_core::CreditRegistryStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditDecision {
    Approved,
    RejectedOverLimit { exposure: Decimal, limit: Decimal },
    RejectedPriorDefault,
}

impl CreditDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Decides whether a client may open another credit product.
///
/// The limit check runs first, so a client that is both over the limit and
/// has an expired payment is reported as over the limit.
#[derive(Clone)]
pub struct CreditUnderwriter {
    registries: Arc<dyn CreditRegistryStore>,
    credit_limit: Decimal,
}

impl CreditUnderwriter {
    pub fn new(registries: Arc<dyn CreditRegistryStore>, credit_limit: Decimal) -> Self {
        Self {
            registries,
            credit_limit,
        }
    }

    pub fn credit_limit(&self) -> Decimal {
        self.credit_limit
    }

    pub async fn can_open(&self, client_id: i64, new_amount: Decimal) -> anyhow::Result<CreditDecision> {
        let existing: Decimal = self
            .registries
            .find_by_client(client_id)
            .await?
            .iter()
            .map(|registry| registry.amount)
            .sum();
        let exposure = existing + new_amount;

        if exposure > self.credit_limit {
            warn!(client_id, %exposure, limit = %self.credit_limit, "credit limit exceeded");
            return Ok(CreditDecision::RejectedOverLimit {
                exposure,
                limit: self.credit_limit,
            });
        }

        if self.registries.has_expired_payment(client_id).await? {
            warn!(client_id, "client has expired credit payments");
            return Ok(CreditDecision::RejectedPriorDefault);
        }

        info!(client_id, %exposure, "credit approved");
        Ok(CreditDecision::Approved)
    }
}
