pub mod config;
pub mod db;
pub mod http;
pub mod pg;
pub mod redis_bus;

pub use config::{CollaboratorSettings, CreditSettings, FraudSettings, ServiceConfig};
pub use db::{apply_schema, connect_database};
pub use http::{HttpAccountIdResolver, HttpClientProfiles, HttpCreditTerms};
pub use pg::{PgCreditRegistry, PgLedger};
pub use redis_bus::{CREDIT_PRODUCTS_CHANNEL, PAYMENTS_CHANNEL, RedisBus, TRANSACTIONS_CHANNEL};
