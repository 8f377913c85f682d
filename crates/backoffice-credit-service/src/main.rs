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
use futures_util::StreamExt;
use redis::Msg;
use tokio::sync::Semaphore;
use tracing::{error, info};

use backoffice_core::{
    AccountIdResolver, ClientProfile, ClientProfileLookup, CreditProductEvent, CreditRegistryStore,
    ProductRegistry,
};
use backoffice_credit::CreditUnderwriter;
use backoffice_platform::{
    CREDIT_PRODUCTS_CHANNEL, HttpAccountIdResolver, HttpClientProfiles, PgCreditRegistry,
    RedisBus, ServiceConfig, apply_schema, connect_database,
};
use backoffice_processing::{Cached, CreditOriginationWorkflow, CreditTerms, Timed};

type CachedClients = Cached<Timed<HttpClientProfiles>, ClientProfile>;

#[derive(Clone)]
struct AppState {
    registries: PgCreditRegistry,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "backoffice_credit_service=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8083")?;
    let pool = connect_database(&config.database_url).await?;
    apply_schema(&pool).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let registries = PgCreditRegistry::new(pool);

    let collaborators = &config.collaborators;
    let clients: Arc<CachedClients> = Arc::new(Cached::new(
        Timed::new(
            HttpClientProfiles::new(&collaborators.client_service_url, collaborators.timeout)?,
            "client-service",
            collaborators.timeout,
        ),
        collaborators.cache_ttl,
    ));
    tokio::spawn(purge_client_cache(clients.clone(), collaborators.cache_ttl));
    let accounts: Arc<dyn AccountIdResolver> = Arc::new(Timed::new(
        HttpAccountIdResolver::new(&collaborators.account_service_url, collaborators.timeout)?,
        "account-service",
        collaborators.timeout,
    ));

    let store: Arc<dyn CreditRegistryStore> = Arc::new(registries.clone());
    let workflow = Arc::new(CreditOriginationWorkflow::new(
        clients as Arc<dyn ClientProfileLookup>,
        accounts,
        store.clone(),
        CreditUnderwriter::new(store, config.credit.limit),
        CreditTerms {
            interest_rate: config.credit.interest_rate,
            month_count: config.credit.month_count,
            amount: config.credit.amount,
        },
    ));

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/product-registry/by-account/{account_id}",
            get(registry_by_account),
        )
        .with_state(AppState { registries });

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("credit service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        result = run_worker(redis, workflow, config.max_in_flight) => result,
        result = async { axum::serve(listener, router).await } => result.map_err(Into::into),
    }
}

async fn run_worker(
    redis: RedisBus,
    workflow: Arc<CreditOriginationWorkflow>,
    max_in_flight: usize,
) -> Result<()> {
    let mut pubsub = redis.subscribe(&[CREDIT_PRODUCTS_CHANNEL]).await?;
    let mut messages = pubsub.on_message();
    let permits = Arc::new(Semaphore::new(max_in_flight));

    info!("credit worker subscribed to {CREDIT_PRODUCTS_CHANNEL}");

    loop {
        let msg = messages
            .next()
            .await
            .context("subscription stream ended unexpectedly")?;
        let permit = permits.clone().acquire_owned().await?;
        let workflow = workflow.clone();

        tokio::spawn(async move {
            if let Err(err) = handle_message(&workflow, msg).await {
                error!("failed to process message: {err:#}");
            }
            drop(permit);
        });
    }
}

async fn handle_message(workflow: &CreditOriginationWorkflow, msg: Msg) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let event: CreditProductEvent =
        serde_json::from_str(&payload).context("malformed credit product event")?;

    let outcome = workflow.handle(&event).await?;
    info!(
        client_id = event.client_id,
        product_id = event.product_id,
        ?outcome,
        "credit product event handled"
    );
    Ok(())
}

async fn purge_client_cache(clients: Arc<CachedClients>, ttl: Duration) {
    let mut ticker = tokio::time::interval(ttl.max(Duration::from_secs(1)));
    loop {
        ticker.tick().await;
        clients.purge_expired().await;
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn registry_by_account(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> Result<Json<ProductRegistry>, (StatusCode, String)> {
    let registry = state
        .registries
        .find_by_account(account_id)
        .await
        .map_err(internal_error)?;

    registry.map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            "product registry not found for account".to_string(),
        )
    })
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
