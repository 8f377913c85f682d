//! Wrappers composed around collaborator lookups: a bounded-time decorator
//! with latency logging, and a TTL cache for read-mostly lookups.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use backoffice_core::{
    AccountIdResolver, ClientProfile, ClientProfileLookup, CreditTermLookup,
};

/// Bounds every call to `inner` by `timeout` and logs how long it took.
pub struct Timed<L> {
    inner: L,
    name: &'static str,
    timeout: Duration,
}

impl<L> Timed<L> {
    pub fn new(inner: L, name: &'static str, timeout: Duration) -> Self {
        Self {
            inner,
            name,
            timeout,
        }
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "{}.{operation} timed out after {:?}",
                self.name,
                self.timeout
            )),
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(_) => debug!(collaborator = self.name, operation, elapsed_ms, "collaborator call"),
            Err(err) => warn!(
                collaborator = self.name,
                operation,
                elapsed_ms,
                "collaborator call failed: {err:#}"
            ),
        }
        result
    }
}

#[async_trait]
impl<L: ClientProfileLookup> ClientProfileLookup for Timed<L> {
    async fn get_client_info(&self, client_id: i64) -> anyhow::Result<Option<ClientProfile>> {
        self.call("get_client_info", self.inner.get_client_info(client_id))
            .await
    }
}

#[async_trait]
impl<L: AccountIdResolver> AccountIdResolver for Timed<L> {
    async fn resolve(&self, client_id: i64, product_id: i64) -> anyhow::Result<Option<i64>> {
        self.call("resolve", self.inner.resolve(client_id, product_id))
            .await
    }
}

#[async_trait]
impl<L: CreditTermLookup> CreditTermLookup for Timed<L> {
    async fn get_term(&self, account_id: i64) -> anyhow::Result<Option<u32>> {
        self.call("get_term", self.inner.get_term(account_id)).await
    }
}

/// Keeps found values for `ttl`. Misses and failures are not cached.
pub struct Cached<L, V> {
    inner: L,
    ttl: Duration,
    entries: RwLock<HashMap<i64, (Instant, V)>>,
}

impl<L, V: Clone> Cached<L, V> {
    pub fn new(inner: L, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn fresh(&self, key: i64) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(&key)
            .filter(|(loaded_at, _)| loaded_at.elapsed() <= self.ttl)
            .map(|(_, value)| value.clone())
    }

    /// Drops entries older than the TTL, including keys never asked for again.
    pub async fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .write()
            .await
            .retain(|_, (loaded_at, _)| loaded_at.elapsed() <= ttl);
    }

    async fn remember(&self, key: i64, value: &Option<V>) {
        if let Some(value) = value {
            self.entries
                .write()
                .await
                .insert(key, (Instant::now(), value.clone()));
        }
    }
}

#[async_trait]
impl<L: ClientProfileLookup> ClientProfileLookup for Cached<L, ClientProfile> {
    async fn get_client_info(&self, client_id: i64) -> anyhow::Result<Option<ClientProfile>> {
        if let Some(profile) = self.fresh(client_id).await {
            debug!(client_id, "client profile served from cache");
            return Ok(Some(profile));
        }
        let loaded = self.inner.get_client_info(client_id).await?;
        self.remember(client_id, &loaded).await;
        Ok(loaded)
    }
}

#[async_trait]
impl<L: CreditTermLookup> CreditTermLookup for Cached<L, u32> {
    async fn get_term(&self, account_id: i64) -> anyhow::Result<Option<u32>> {
        if let Some(term) = self.fresh(account_id).await {
            return Ok(Some(term));
        }
        let loaded = self.inner.get_term(account_id).await?;
        self.remember(account_id, &loaded).await;
        Ok(loaded)
    }
}
