//! Service configuration.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use credit_ledger_core::{LedgerError, LedgerPolicy, ModelCostTable, Result};

use crate::ledger::{RechargePricing, DEFAULT_HISTORY_MAX_DAYS};

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/credit-ledger").
    pub data_dir: String,

    /// Stripe API key (optional; smart recharge needs it).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook secret (optional; signatures are not checked without it).
    pub stripe_webhook_secret: Option<String>,

    /// Model credit costs.
    pub model_costs: Arc<ModelCostTable>,

    /// Price per recharged credit.
    pub recharge_pricing: RechargePricing,

    /// Charge policies.
    pub policy: LedgerPolicy,

    /// Maximum span of a daily balance query, in days.
    pub history_max_days: i64,

    /// Timeout for Stripe API calls, in seconds.
    pub payment_timeout_seconds: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if a policy name is unknown or the
    /// model cost file cannot be read or parsed.
    pub fn from_env() -> Result<Self> {
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();
        let defaults = Self::default();

        let model_costs = match std::env::var("MODEL_COSTS_PATH") {
            Ok(path) => {
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    LedgerError::Configuration(format!("cannot read model costs {path}: {e}"))
                })?;
                tracing::info!(path = %path, "Loaded model costs from file");
                Arc::new(ModelCostTable::from_json_str(&contents)?)
            }
            Err(_) => defaults.model_costs,
        };

        let policy = LedgerPolicy {
            charge_subscription: env_parse("CHARGE_SUBSCRIPTION_POLICY")?
                .unwrap_or(defaults.policy.charge_subscription),
            extra_debit: env_parse("EXTRA_DEBIT_POLICY")?.unwrap_or(defaults.policy.extra_debit),
        };

        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            stripe_api_key,
            stripe_webhook_secret,
            model_costs,
            recharge_pricing: RechargePricing {
                unit_amount: env_or("CREDIT_UNIT_PRICE_CENTS", defaults.recharge_pricing.unit_amount),
                currency: std::env::var("CREDIT_CURRENCY")
                    .unwrap_or(defaults.recharge_pricing.currency),
            },
            policy,
            history_max_days: env_or("HISTORY_MAX_DAYS", defaults.history_max_days),
            payment_timeout_seconds: env_or(
                "PAYMENT_TIMEOUT_SECONDS",
                defaults.payment_timeout_seconds,
            ),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
        })
    }
}

/// Read a numeric variable, falling back to `default` if unset or malformed.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Read a variable whose malformed value is a hard error.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = LedgerError>,
{
    std::env::var(name).ok().map(|s| s.parse()).transpose()
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/stripe.json",
        "credit-ledger/.secrets/stripe.json",
        "../.secrets/stripe.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok(),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> std::io::Result<T> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/credit-ledger".into(),
            stripe_api_key: None,
            stripe_webhook_secret: None,
            model_costs: Arc::new(ModelCostTable::default()),
            recharge_pricing: RechargePricing::default(),
            policy: LedgerPolicy::default(),
            history_max_days: DEFAULT_HISTORY_MAX_DAYS,
            payment_timeout_seconds: 30,
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
