use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use chrono::Utc;
use futures_util::StreamExt;
use redis::Msg;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use backoffice_core::{
    AccountStore, ClientPaymentEvent, Clock, SystemClock, TransactionEvent,
};
use backoffice_fraud::{FraudPolicy, FraudWindow};
use backoffice_platform::{
    HttpCreditTerms, PAYMENTS_CHANNEL, PgLedger, RedisBus, ServiceConfig, TRANSACTIONS_CHANNEL,
    apply_schema, connect_database,
};
use backoffice_processing::{
    AccountLocks, Cached, RepaymentProcessor, Timed, TransactionProcessor,
};

type CachedTerms = Cached<Timed<HttpCreditTerms>, u32>;

#[derive(Clone)]
struct Processors {
    transactions: TransactionProcessor,
    repayments: RepaymentProcessor,
}

#[derive(Clone)]
struct AppState {
    ledger: PgLedger,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "backoffice_accounts=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8082")?;
    let pool = connect_database(&config.database_url).await?;
    apply_schema(&pool).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let ledger = PgLedger::new(pool);

    let collaborators = &config.collaborators;
    let credit_terms: Arc<CachedTerms> = Arc::new(Cached::new(
        Timed::new(
            HttpCreditTerms::new(&collaborators.credit_service_url, collaborators.timeout)?,
            "credit-service",
            collaborators.timeout,
        ),
        collaborators.cache_ttl,
    ));

    let fraud = Arc::new(FraudWindow::new(FraudPolicy {
        max_transactions: config.fraud.max_transactions,
        time_window_ms: config.fraud.time_window_ms,
    }));
    let locks = AccountLocks::default();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let processors = Processors {
        transactions: TransactionProcessor::new(
            Arc::new(ledger.clone()),
            fraud.clone(),
            credit_terms.clone(),
            locks.clone(),
            clock.clone(),
        )
        .with_fallback_term(config.credit.fallback_term_months),
        repayments: RepaymentProcessor::new(Arc::new(ledger.clone()), locks.clone(), clock),
    };

    tokio::spawn(housekeeping(fraud, locks, credit_terms));

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/accounts/by-client/{client_id}/product/{product_id}",
            get(account_id_by_client_product),
        )
        .with_state(AppState { ledger });

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("accounts service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        result = run_worker(redis, processors, config.max_in_flight) => result,
        result = async { axum::serve(listener, router).await } => result.map_err(Into::into),
    }
}

async fn run_worker(redis: RedisBus, processors: Processors, max_in_flight: usize) -> Result<()> {
    let mut pubsub = redis
        .subscribe(&[TRANSACTIONS_CHANNEL, PAYMENTS_CHANNEL])
        .await?;
    let mut messages = pubsub.on_message();
    let permits = Arc::new(Semaphore::new(max_in_flight));

    info!("accounts worker subscribed to {TRANSACTIONS_CHANNEL} and {PAYMENTS_CHANNEL}");

    loop {
        let msg = messages
            .next()
            .await
            .context("subscription stream ended unexpectedly")?;
        let permit = permits.clone().acquire_owned().await?;
        let processors = processors.clone();

        tokio::spawn(async move {
            if let Err(err) = handle_message(&processors, msg).await {
                error!("failed to process message: {err:#}");
            }
            drop(permit);
        });
    }
}

async fn handle_message(processors: &Processors, msg: Msg) -> Result<()> {
    let channel = msg.get_channel_name().to_string();
    let payload: String = msg.get_payload()?;

    match channel.as_str() {
        TRANSACTIONS_CHANNEL => {
            let event: TransactionEvent =
                serde_json::from_str(&payload).context("malformed transaction event")?;
            let outcome = processors.transactions.process(&event).await?;
            info!(account_id = event.account_id, ?outcome, "transaction event handled");
        }
        PAYMENTS_CHANNEL => {
            let event: ClientPaymentEvent =
                serde_json::from_str(&payload).context("malformed payment event")?;
            let outcome = processors.repayments.process(&event).await?;
            info!(account_id = event.account_id, ?outcome, "payment event handled");
        }
        other => warn!(channel = other, "message on unexpected channel"),
    }
    Ok(())
}

// Quiet cards, idle account mutexes and stale terms stay in memory until swept.
async fn housekeeping(
    fraud: Arc<FraudWindow>,
    locks: AccountLocks,
    credit_terms: Arc<CachedTerms>,
) {
    let window_ms = u64::try_from(fraud.policy().time_window_ms).unwrap_or(60_000);
    let mut ticker = tokio::time::interval(Duration::from_millis(window_ms));
    loop {
        ticker.tick().await;
        fraud.purge_idle(Utc::now());
        locks.purge_idle();
        credit_terms.purge_expired().await;
        debug!(locked_accounts = locks.len(), "housekeeping pass finished");
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn account_id_by_client_product(
    State(state): State<AppState>,
    Path((client_id, product_id)): Path<(i64, i64)>,
) -> Result<Json<i64>, (StatusCode, String)> {
    let account = state
        .ledger
        .find_account_by_client_product(client_id, product_id)
        .await
        .map_err(internal_error)?;

    match account {
        Some(account) => Ok(Json(account.id)),
        None => Err((StatusCode::NOT_FOUND, "account not found".to_string())),
    }
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
