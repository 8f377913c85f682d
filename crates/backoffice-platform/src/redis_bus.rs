use anyhow::{Context, Result};
use redis::Client;
use redis::aio::PubSub;

pub const TRANSACTIONS_CHANNEL: &str = "client_transactions";
pub const PAYMENTS_CHANNEL: &str = "client_payments";
pub const CREDIT_PRODUCTS_CHANNEL: &str = "client_credit_products";

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn subscribe(&self, channels: &[&str]) -> Result<PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub
                .subscribe(*channel)
                .await
                .with_context(|| format!("failed to subscribe to {channel}"))?;
        }
        Ok(pubsub)
    }
}
