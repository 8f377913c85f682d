use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use backoffice_core::{
    AccountIdResolver, ClientProfileLookup, CreditLimitExceeded, CreditProductEvent,
    CreditRegistryStore, NewProductRegistry, PaymentRegistry, ProductRegistry,
};
use backoffice_credit::{CreditDecision, CreditUnderwriter, generate_schedule};

/// Terms applied to every newly opened credit product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditTerms {
    /// Annual rate in percent.
    pub interest_rate: Decimal,
    pub month_count: u32,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OriginationOutcome {
    /// The event's operation is not a creation.
    Ignored { operation: String },
    ClientNotFound,
    /// The client service could not be reached; nothing was written.
    ClientUnavailable,
    Rejected { decision: CreditDecision },
    Scheduled {
        registry: ProductRegistry,
        schedule: Vec<PaymentRegistry>,
    },
}

pub struct CreditOriginationWorkflow {
    clients: Arc<dyn ClientProfileLookup>,
    accounts: Arc<dyn AccountIdResolver>,
    registries: Arc<dyn CreditRegistryStore>,
    underwriter: CreditUnderwriter,
    terms: CreditTerms,
}

impl CreditOriginationWorkflow {
    pub fn new(
        clients: Arc<dyn ClientProfileLookup>,
        accounts: Arc<dyn AccountIdResolver>,
        registries: Arc<dyn CreditRegistryStore>,
        underwriter: CreditUnderwriter,
        terms: CreditTerms,
    ) -> Self {
        Self {
            clients,
            accounts,
            registries,
            underwriter,
            terms,
        }
    }

    pub async fn handle(&self, event: &CreditProductEvent) -> anyhow::Result<OriginationOutcome> {
        if !event.is_create() {
            info!(operation = %event.operation, client_id = event.client_id, "credit product operation ignored");
            return Ok(OriginationOutcome::Ignored {
                operation: event.operation.clone(),
            });
        }

        let client_id = event.client_id;
        let profile = match self.clients.get_client_info(client_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                warn!(client_id, "client not found, credit not opened");
                return Ok(OriginationOutcome::ClientNotFound);
            }
            Err(err) => {
                warn!(client_id, "client lookup failed, credit not opened: {err:#}");
                return Ok(OriginationOutcome::ClientUnavailable);
            }
        };
        info!(
            client_id,
            last_name = %profile.last_name,
            document_type = %profile.document_type,
            "client identified"
        );

        let decision = self.underwriter.can_open(client_id, self.terms.amount).await?;
        if !decision.is_approved() {
            return Ok(OriginationOutcome::Rejected { decision });
        }

        let account_id = self.resolve_account(client_id, event.product_id).await;
        let registry = NewProductRegistry {
            client_id,
            account_id,
            product_id: event.product_id,
            interest_rate: self.terms.interest_rate,
            open_date: event.open_date.date(),
            month_count: self.terms.month_count,
            amount: self.terms.amount,
        };

        let schedule = generate_schedule(
            registry.amount,
            registry.interest_rate,
            registry.month_count,
            registry.open_date,
        )
        .inspect_err(|err| error!(client_id, "credit terms cannot produce a schedule: {err}"))?;

        // Another opening for the same client may have landed since the
        // underwriting read, so the store checks the limit again.
        let opened = self
            .registries
            .open_with_schedule(registry, &schedule, self.underwriter.credit_limit())
            .await;
        let (registry, schedule) = match opened {
            Ok(opened) => opened,
            Err(err) => match err.downcast_ref::<CreditLimitExceeded>() {
                Some(over) => {
                    warn!(client_id, "{over}");
                    return Ok(OriginationOutcome::Rejected {
                        decision: CreditDecision::RejectedOverLimit {
                            exposure: over.exposure + over.amount,
                            limit: over.limit,
                        },
                    });
                }
                None => return Err(err),
            },
        };

        info!(
            client_id,
            registry_id = registry.id,
            product_id = registry.product_id,
            amount = %registry.amount,
            payments = schedule.len(),
            "credit product opened with repayment schedule"
        );
        Ok(OriginationOutcome::Scheduled { registry, schedule })
    }

    async fn resolve_account(&self, client_id: i64, product_id: i64) -> Option<i64> {
        match self.accounts.resolve(client_id, product_id).await {
            Ok(Some(account_id)) => Some(account_id),
            Ok(None) => {
                warn!(client_id, product_id, "no account for credit product yet");
                None
            }
            Err(err) => {
                warn!(client_id, product_id, "account lookup failed: {err:#}");
                None
            }
        }
    }
}
