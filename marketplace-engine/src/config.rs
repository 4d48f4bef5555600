use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub delegate: DelegateConfig,
    pub verifier: VerifierConfig,
    pub fulfillment: FulfillmentConfig,
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub units_per_native: u64,     // Smallest-unit conversion factor
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DelegateConfig {
    pub secret_seed: String,       // Hex-encoded 32-byte signing seed
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VerifierConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FulfillmentConfig {
    pub confirm_timeout_secs: u64,
    pub confirm_poll_ms: u64,
    pub fee_reserve: u64,            // Smallest units the delegate must hold for fees
    pub airdrop_enabled: bool,       // Test networks only
    pub airdrop_amount: u64,
    pub airdrop_poll_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: i64,
    pub min_age_secs: i64,           // Leave in-flight purchases alone
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8084)?
            .set_default("server.workers", 4)?
            .set_default("database.max_connections", 10)?
            .set_default("ledger.rpc_url", "http://localhost:8899")?
            .set_default("ledger.units_per_native", 1_000_000_000i64)?
            .set_default("ledger.request_timeout_secs", 30)?
            .set_default("verifier.max_attempts", 12)?
            .set_default("verifier.retry_delay_ms", 1000)?
            .set_default("fulfillment.confirm_timeout_secs", 30)?
            .set_default("fulfillment.confirm_poll_ms", 1000)?
            .set_default("fulfillment.fee_reserve", 100_000_000i64)?
            .set_default("fulfillment.airdrop_enabled", false)?
            .set_default("fulfillment.airdrop_amount", 1_000_000_000i64)?
            .set_default("fulfillment.airdrop_poll_timeout_secs", 15)?
            .set_default("reconciler.enabled", true)?
            .set_default("reconciler.interval_secs", 60)?
            .set_default("reconciler.batch_size", 20)?
            .set_default("reconciler.min_age_secs", 120)?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("MARKETPLACE_ENGINE")
                .separator("__")
                .list_separator(","),
        );

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(rpc_url) = env::var("LEDGER_RPC_URL") {
            builder = builder.set_override("ledger.rpc_url", rpc_url)?;
        }

        if let Ok(seed) = env::var("DELEGATE_SECRET_SEED") {
            builder = builder.set_override("delegate.secret_seed", seed)?;
        }

        if let Ok(port) = env::var("MARKETPLACE_ENGINE_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.ledger.rpc_url.is_empty() {
            return Err("Ledger RPC URL is required".to_string());
        }

        if self.ledger.units_per_native == 0 {
            return Err("Smallest-unit conversion factor must be positive".to_string());
        }

        if self.delegate.secret_seed.is_empty() {
            return Err("Delegate secret seed is required".to_string());
        }

        if self.verifier.max_attempts == 0 {
            return Err("Verifier attempt budget must be at least 1".to_string());
        }

        Ok(())
    }
}
