use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Barrier;

use backoffice_core::{
    Account, AccountIdResolver, AccountStatus, AccountStore, ClientProfile, ClientProfileLookup,
    CreditProductEvent, CreditRegistryStore, NewProductRegistry, ScheduleEntry,
};
use backoffice_credit::{CreditDecision, CreditUnderwriter};
use backoffice_processing::{CreditOriginationWorkflow, CreditTerms, OriginationOutcome};
use backoffice_store::{InMemoryClientDirectory, InMemoryCreditRegistry, InMemoryLedger};

struct Fixture {
    clients: Arc<InMemoryClientDirectory>,
    ledger: Arc<InMemoryLedger>,
    registries: Arc<InMemoryCreditRegistry>,
}

impl Fixture {
    async fn new() -> Self {
        let clients = Arc::new(InMemoryClientDirectory::default());
        clients.register(profile(42)).await;
        Self {
            clients,
            ledger: Arc::new(InMemoryLedger::default()),
            registries: Arc::new(InMemoryCreditRegistry::default()),
        }
    }

    fn workflow(&self, limit: Decimal, terms: CreditTerms) -> CreditOriginationWorkflow {
        CreditOriginationWorkflow::new(
            self.clients.clone(),
            self.ledger.clone(),
            self.registries.clone(),
            CreditUnderwriter::new(self.registries.clone(), limit),
            terms,
        )
    }

    async fn seed_credit(&self, client_id: i64, product_id: i64, amount: Decimal) -> i64 {
        let (_, schedule) = self
            .registries
            .open_with_schedule(
                NewProductRegistry {
                    client_id,
                    account_id: None,
                    product_id,
                    interest_rate: dec!(12),
                    open_date: date(2023, 1, 1),
                    month_count: 1,
                    amount,
                },
                &[ScheduleEntry {
                    payment_date: date(2023, 2, 1),
                    payment_expiration_date: date(2023, 2, 6),
                    amount,
                    interest_amount: Decimal::ZERO,
                    debt_amount: amount,
                }],
                Decimal::MAX,
            )
            .await
            .unwrap();
        schedule[0].id
    }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn opened_at(year: i32, month: u32, day: u32) -> NaiveDateTime {
    date(year, month, day).and_hms_opt(10, 30, 0).unwrap()
}

fn profile(client_id: i64) -> ClientProfile {
    ClientProfile {
        client_id,
        first_name: "Anna".to_string(),
        last_name: "Petrova".to_string(),
        middle_name: None,
        document_type: "PASSPORT".to_string(),
        document_id: "4510 123456".to_string(),
    }
}

fn standard_terms() -> CreditTerms {
    CreditTerms {
        interest_rate: dec!(12),
        month_count: 12,
        amount: dec!(100000),
    }
}

fn terms_for(amount: Decimal) -> CreditTerms {
    CreditTerms {
        amount,
        ..standard_terms()
    }
}

fn create_event(client_id: i64, product_id: i64) -> CreditProductEvent {
    CreditProductEvent {
        operation: "CREATE".to_string(),
        client_product_id: Some(900),
        client_id,
        product_id,
        product_name: Some("Consumer credit".to_string()),
        product_key: Some("CREDIT".to_string()),
        open_date: opened_at(2024, 1, 1),
        close_date: None,
        timestamp: None,
        status: Some("ACTIVE".to_string()),
    }
}

#[tokio::test]
async fn approved_credit_is_opened_with_annuity_schedule() {
    let fx = Fixture::new().await;
    fx.ledger
        .insert_account(Account {
            id: 555,
            client_id: 42,
            product_id: 7,
            balance: Decimal::ZERO,
            interest_rate: Some(dec!(12)),
            is_recalc: true,
            card_exist: false,
            status: AccountStatus::Active,
        })
        .await;

    let outcome = fx
        .workflow(dec!(1000000), standard_terms())
        .handle(&create_event(42, 7))
        .await
        .unwrap();

    let OriginationOutcome::Scheduled { registry, schedule } = outcome else {
        panic!("expected a scheduled credit, got {outcome:?}");
    };
    assert_eq!(registry.account_id, Some(555));
    assert_eq!(registry.open_date, date(2024, 1, 1));
    assert_eq!(schedule.len(), 12);
    assert!(schedule.iter().all(|p| p.amount == dec!(8884.88)));
    assert_eq!(schedule[0].interest_rate_amount, dec!(1000.00));
    assert_eq!(schedule[0].debt_amount, dec!(7884.88));
    assert_eq!(schedule[0].payment_date, date(2024, 2, 1));
    assert_eq!(schedule[0].payment_expiration_date, date(2024, 2, 6));
    assert_eq!(
        schedule.iter().map(|p| p.debt_amount).sum::<Decimal>(),
        dec!(100000)
    );
    assert_eq!(fx.registries.schedule_for(registry.id).await.unwrap(), schedule);
}

#[tokio::test]
async fn credit_without_account_is_still_opened() {
    let fx = Fixture::new().await;

    let outcome = fx
        .workflow(dec!(1000000), standard_terms())
        .handle(&create_event(42, 7))
        .await
        .unwrap();

    let OriginationOutcome::Scheduled { registry, .. } = outcome else {
        panic!("expected a scheduled credit, got {outcome:?}");
    };
    assert_eq!(registry.account_id, None);
    assert_eq!(fx.registries.registries().await.len(), 1);
}

#[tokio::test]
async fn exposure_over_limit_is_rejected() {
    let fx = Fixture::new().await;
    fx.seed_credit(42, 1, dec!(80)).await;

    let over = fx
        .workflow(dec!(100), terms_for(dec!(25)))
        .handle(&create_event(42, 7))
        .await
        .unwrap();
    let within = fx
        .workflow(dec!(100), terms_for(dec!(15)))
        .handle(&create_event(42, 7))
        .await
        .unwrap();

    assert_eq!(
        over,
        OriginationOutcome::Rejected {
            decision: CreditDecision::RejectedOverLimit {
                exposure: dec!(105),
                limit: dec!(100)
            }
        }
    );
    assert!(matches!(within, OriginationOutcome::Scheduled { .. }));
    assert_eq!(fx.registries.registries().await.len(), 2);
}

#[tokio::test]
async fn expired_payment_blocks_new_credit() {
    let fx = Fixture::new().await;
    let entry = fx.seed_credit(42, 1, dec!(10)).await;
    fx.registries.mark_expired(entry).await.unwrap();

    let outcome = fx
        .workflow(dec!(1000000), standard_terms())
        .handle(&create_event(42, 7))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        OriginationOutcome::Rejected {
            decision: CreditDecision::RejectedPriorDefault
        }
    );
    assert_eq!(fx.registries.registries().await.len(), 1);
}

#[tokio::test]
async fn limit_is_reported_before_prior_default() {
    let fx = Fixture::new().await;
    let entry = fx.seed_credit(42, 1, dec!(90)).await;
    fx.registries.mark_expired(entry).await.unwrap();

    let outcome = fx
        .workflow(dec!(100), terms_for(dec!(20)))
        .handle(&create_event(42, 7))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        OriginationOutcome::Rejected {
            decision: CreditDecision::RejectedOverLimit { .. }
        }
    ));
}

#[tokio::test]
async fn unknown_client_gets_nothing() {
    let fx = Fixture::new().await;

    let outcome = fx
        .workflow(dec!(1000000), standard_terms())
        .handle(&create_event(404, 7))
        .await
        .unwrap();

    assert_eq!(outcome, OriginationOutcome::ClientNotFound);
    assert!(fx.registries.registries().await.is_empty());
}

#[tokio::test]
async fn unreachable_client_service_writes_nothing() {
    struct Down;

    #[async_trait]
    impl ClientProfileLookup for Down {
        async fn get_client_info(&self, _client_id: i64) -> anyhow::Result<Option<ClientProfile>> {
            anyhow::bail!("connection refused")
        }
    }

    let fx = Fixture::new().await;
    let workflow = CreditOriginationWorkflow::new(
        Arc::new(Down),
        fx.ledger.clone(),
        fx.registries.clone(),
        CreditUnderwriter::new(fx.registries.clone(), dec!(1000000)),
        standard_terms(),
    );

    let outcome = workflow.handle(&create_event(42, 7)).await.unwrap();

    assert_eq!(outcome, OriginationOutcome::ClientUnavailable);
    assert!(fx.registries.registries().await.is_empty());
}

#[tokio::test]
async fn non_create_operations_are_ignored() {
    let fx = Fixture::new().await;
    let mut update = create_event(42, 7);
    update.operation = "UPDATE".to_string();
    let mut lower = create_event(42, 7);
    lower.operation = "create".to_string();
    let workflow = fx.workflow(dec!(1000000), standard_terms());

    let ignored = workflow.handle(&update).await.unwrap();
    let created = workflow.handle(&lower).await.unwrap();

    assert_eq!(
        ignored,
        OriginationOutcome::Ignored {
            operation: "UPDATE".to_string()
        }
    );
    assert!(matches!(created, OriginationOutcome::Scheduled { .. }));
    assert_eq!(fx.registries.registries().await.len(), 1);
}

#[tokio::test]
async fn opened_credit_term_is_visible_by_account() {
    use backoffice_core::CreditTermLookup;

    let fx = Fixture::new().await;
    fx.ledger
        .insert_account(Account {
            id: 9,
            client_id: 42,
            product_id: 7,
            balance: Decimal::ZERO,
            interest_rate: None,
            is_recalc: true,
            card_exist: false,
            status: AccountStatus::Active,
        })
        .await;
    assert!(fx.ledger.get_account(9).await.unwrap().is_some());

    fx.workflow(dec!(1000000), standard_terms())
        .handle(&create_event(42, 7))
        .await
        .unwrap();

    assert_eq!(fx.registries.get_term(9).await.unwrap(), Some(12));
    assert_eq!(fx.registries.get_term(10).await.unwrap(), None);
}

#[tokio::test]
async fn simultaneous_openings_cannot_both_pass_the_limit() {
    // Holds both workflows after underwriting until each has read the
    // same exposure.
    struct Rendezvous(Barrier);

    #[async_trait]
    impl AccountIdResolver for Rendezvous {
        async fn resolve(&self, _client_id: i64, _product_id: i64) -> anyhow::Result<Option<i64>> {
            self.0.wait().await;
            Ok(None)
        }
    }

    let fx = Fixture::new().await;
    fx.seed_credit(42, 1, dec!(80)).await;
    let accounts = Arc::new(Rendezvous(Barrier::new(2)));
    let workflow = CreditOriginationWorkflow::new(
        fx.clients.clone(),
        accounts,
        fx.registries.clone(),
        CreditUnderwriter::new(fx.registries.clone(), dec!(100)),
        terms_for(dec!(15)),
    );

    let first_event = create_event(42, 7);
    let second_event = create_event(42, 8);
    let (first, second) = tokio::join!(
        workflow.handle(&first_event),
        workflow.handle(&second_event),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let scheduled = outcomes
        .iter()
        .filter(|o| matches!(o, OriginationOutcome::Scheduled { .. }))
        .count();
    assert_eq!(scheduled, 1);
    assert!(outcomes.contains(&OriginationOutcome::Rejected {
        decision: CreditDecision::RejectedOverLimit {
            exposure: dec!(110),
            limit: dec!(100),
        }
    }));
    let exposure: Decimal = fx
        .registries
        .find_by_client(42)
        .await
        .unwrap()
        .iter()
        .map(|r| r.amount)
        .sum();
    assert_eq!(exposure, dec!(95));
}
