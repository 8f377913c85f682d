use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use rust_decimal::Decimal;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    /// Upper bound on events handled concurrently by one worker.
    pub max_in_flight: usize,
    pub credit: CreditSettings,
    pub fraud: FraudSettings,
    pub collaborators: CollaboratorSettings,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreditSettings {
    pub limit: Decimal,
    /// Annual rate in percent.
    pub interest_rate: Decimal,
    pub month_count: u32,
    pub amount: Decimal,
    pub fallback_term_months: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FraudSettings {
    pub max_transactions: usize,
    pub time_window_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollaboratorSettings {
    pub client_service_url: String,
    pub account_service_url: String,
    pub credit_service_url: String,
    pub timeout: Duration,
    pub cache_ttl: Duration,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        Self::from_lookup(default_http_addr, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        default_http_addr: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = lookup("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr = lookup("HTTP_ADDR").unwrap_or_else(|| default_http_addr.to_string());

        let max_in_flight: usize = parsed(&lookup, "WORKER_MAX_IN_FLIGHT", 64)?;
        ensure!(max_in_flight > 0, "WORKER_MAX_IN_FLIGHT must be positive");

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            max_in_flight,
            credit: CreditSettings::from_lookup(&lookup)?,
            fraud: FraudSettings::from_lookup(&lookup)?,
            collaborators: CollaboratorSettings::from_lookup(&lookup)?,
        })
    }
}

impl CreditSettings {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let settings = Self {
            limit: parsed(lookup, "CREDIT_LIMIT", Decimal::from(1_000_000))?,
            interest_rate: parsed(lookup, "CREDIT_INTEREST_RATE", Decimal::from(12))?,
            month_count: parsed(lookup, "CREDIT_MONTH_COUNT", 12)?,
            amount: parsed(lookup, "CREDIT_AMOUNT", Decimal::from(100_000))?,
            fallback_term_months: parsed(lookup, "CREDIT_FALLBACK_TERM_MONTHS", 60)?,
        };

        ensure!(settings.month_count > 0, "CREDIT_MONTH_COUNT must be positive");
        ensure!(
            settings.fallback_term_months > 0,
            "CREDIT_FALLBACK_TERM_MONTHS must be positive"
        );
        ensure!(settings.amount > Decimal::ZERO, "CREDIT_AMOUNT must be positive");
        ensure!(
            settings.interest_rate >= Decimal::ZERO,
            "CREDIT_INTEREST_RATE must not be negative"
        );
        Ok(settings)
    }
}

impl FraudSettings {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let settings = Self {
            max_transactions: parsed(lookup, "FRAUD_MAX_TRANSACTIONS", 5)?,
            time_window_ms: parsed(lookup, "FRAUD_TIME_WINDOW_MS", 60_000)?,
        };
        ensure!(settings.time_window_ms > 0, "FRAUD_TIME_WINDOW_MS must be positive");
        Ok(settings)
    }
}

impl CollaboratorSettings {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = |key: &str, default: &str| {
            lookup(key)
                .unwrap_or_else(|| default.to_string())
                .trim_end_matches('/')
                .to_string()
        };

        Ok(Self {
            client_service_url: url("CLIENT_SERVICE_URL", "http://localhost:8081"),
            account_service_url: url("ACCOUNT_SERVICE_URL", "http://localhost:8082"),
            credit_service_url: url("CREDIT_SERVICE_URL", "http://localhost:8083"),
            timeout: Duration::from_millis(parsed(lookup, "COLLABORATOR_TIMEOUT_MS", 2_000)?),
            cache_ttl: Duration::from_millis(parsed(lookup, "CACHE_TTL_MS", 60_000)?),
        })
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/backoffice"),
        ("REDIS_URL", "redis://localhost"),
    ];

    #[test]
    fn defaults_apply_when_only_connections_are_set() {
        let config = ServiceConfig::from_lookup("0.0.0.0:8082", env(&REQUIRED)).unwrap();

        assert_eq!(config.http_addr, "0.0.0.0:8082");
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.credit.limit, Decimal::from(1_000_000));
        assert_eq!(config.credit.fallback_term_months, 60);
        assert_eq!(config.fraud.max_transactions, 5);
        assert_eq!(config.fraud.time_window_ms, 60_000);
        assert_eq!(config.collaborators.timeout, Duration::from_secs(2));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("CREDIT_INTEREST_RATE", "22.5"),
            ("FRAUD_MAX_TRANSACTIONS", "3"),
            ("CREDIT_SERVICE_URL", "http://credit:8080/"),
        ]);

        let config = ServiceConfig::from_lookup("0.0.0.0:8083", env(&pairs)).unwrap();

        assert_eq!(config.credit.interest_rate, Decimal::new(225, 1));
        assert_eq!(config.fraud.max_transactions, 3);
        assert_eq!(config.collaborators.credit_service_url, "http://credit:8080");
    }

    #[test]
    fn missing_or_malformed_values_are_errors() {
        let err = ServiceConfig::from_lookup("x", env(&REQUIRED[..1])).unwrap_err();
        assert!(err.to_string().contains("REDIS_URL"));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CREDIT_MONTH_COUNT", "twelve"));
        let err = ServiceConfig::from_lookup("x", env(&pairs)).unwrap_err();
        assert!(err.to_string().contains("CREDIT_MONTH_COUNT"));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CREDIT_MONTH_COUNT", "0"));
        assert!(ServiceConfig::from_lookup("x", env(&pairs)).is_err());
    }
}
