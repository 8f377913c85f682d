//! HTTP clients for the collaborating services.
//!
//! A 404 means the resource does not exist and maps to `None`; any other
//! failure is an error the caller decides how to handle.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use backoffice_core::{
    AccountIdResolver, ClientProfile, ClientProfileLookup, CreditTermLookup, ProductRegistry,
};

#[derive(Clone)]
struct JsonClient {
    client: reqwest::Client,
    base_url: String,
}

impl JsonClient {
    fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?
            .json::<T>()
            .await
            .with_context(|| format!("GET {url} returned an unreadable body"))?;
        Ok(Some(body))
    }
}

/// Client service: `GET /api/clients/{clientId}`.
#[derive(Clone)]
pub struct HttpClientProfiles {
    http: JsonClient,
}

impl HttpClientProfiles {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl ClientProfileLookup for HttpClientProfiles {
    async fn get_client_info(&self, client_id: i64) -> Result<Option<ClientProfile>> {
        self.http
            .get_optional(&format!("/api/clients/{client_id}"))
            .await
    }
}

/// Accounts service: `GET /api/accounts/by-client/{clientId}/product/{productId}`.
#[derive(Clone)]
pub struct HttpAccountIdResolver {
    http: JsonClient,
}

impl HttpAccountIdResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl AccountIdResolver for HttpAccountIdResolver {
    async fn resolve(&self, client_id: i64, product_id: i64) -> Result<Option<i64>> {
        self.http
            .get_optional(&format!(
                "/api/accounts/by-client/{client_id}/product/{product_id}"
            ))
            .await
    }
}

/// Credit service: `GET /api/product-registry/by-account/{accountId}`.
#[derive(Clone)]
pub struct HttpCreditTerms {
    http: JsonClient,
}

impl HttpCreditTerms {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl CreditTermLookup for HttpCreditTerms {
    async fn get_term(&self, account_id: i64) -> Result<Option<u32>> {
        let registry: Option<ProductRegistry> = self
            .http
            .get_optional(&format!("/api/product-registry/by-account/{account_id}"))
            .await?;
        Ok(registry.map(|registry| registry.month_count))
    }
}
