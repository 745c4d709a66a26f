use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub checkout: CheckoutConfig,
    pub sweeper: SweeperConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
}

/// Which payment provider this deployment charges through.
///
/// Chosen once at startup; a payment is never split across providers.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Stripe,
    Square,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stripe => "stripe",
            ProviderKind::Square => "square",
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub stripe: StripeConfig,
    pub square: SquareConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SquareConfig {
    pub access_token: Secret<String>,
    pub webhook_signature_key: Secret<String>,
    pub api_base_url: String,
    pub location_id: String,
    /// Public URL Square posts webhooks to; part of the signed payload.
    pub notification_url: String,
}

/// Where the provider sends the buyer after hosted checkout.
#[derive(Deserialize, Clone, Debug)]
pub struct CheckoutConfig {
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub max_age_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("BILLING_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("BILLING_SERVICE_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()?;

        let db_url = env::var("BILLING_DATABASE_URL").expect("BILLING_DATABASE_URL must be set");
        let max_connections = env::var("BILLING_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;

        let kind = match env::var("BILLING_PAYMENT_PROVIDER")
            .unwrap_or_else(|_| "stripe".to_string())
            .to_lowercase()
            .as_str()
        {
            "stripe" => ProviderKind::Stripe,
            "square" => ProviderKind::Square,
            other => anyhow::bail!("Unknown payment provider: {}", other),
        };

        let stripe_secret_key = env::var("BILLING_STRIPE_SECRET_KEY").unwrap_or_default();
        let stripe_webhook_secret = env::var("BILLING_STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        let stripe_api_base_url = env::var("BILLING_STRIPE_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.stripe.com".to_string());

        let square_access_token = env::var("BILLING_SQUARE_ACCESS_TOKEN").unwrap_or_default();
        let square_signature_key =
            env::var("BILLING_SQUARE_WEBHOOK_SIGNATURE_KEY").unwrap_or_default();
        let square_api_base_url = env::var("BILLING_SQUARE_API_BASE_URL")
            .unwrap_or_else(|_| "https://connect.squareup.com".to_string());
        let square_location_id = env::var("BILLING_SQUARE_LOCATION_ID").unwrap_or_default();
        let square_notification_url =
            env::var("BILLING_SQUARE_NOTIFICATION_URL").unwrap_or_default();

        let success_url = env::var("BILLING_CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|_| "http://localhost:3000/billing/success".to_string());
        let cancel_url = env::var("BILLING_CHECKOUT_CANCEL_URL")
            .unwrap_or_else(|_| "http://localhost:3000/billing/cancel".to_string());

        let sweeper_interval_secs = env::var("BILLING_SWEEPER_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()?;
        let sweeper_max_age_secs = env::var("BILLING_SWEEPER_MAX_AGE_SECS")
            .unwrap_or_else(|_| "900".to_string())
            .parse()?;

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
            },
            provider: ProviderConfig {
                kind,
                stripe: StripeConfig {
                    secret_key: Secret::new(stripe_secret_key),
                    webhook_secret: Secret::new(stripe_webhook_secret),
                    api_base_url: stripe_api_base_url,
                },
                square: SquareConfig {
                    access_token: Secret::new(square_access_token),
                    webhook_signature_key: Secret::new(square_signature_key),
                    api_base_url: square_api_base_url,
                    location_id: square_location_id,
                    notification_url: square_notification_url,
                },
            },
            checkout: CheckoutConfig {
                success_url,
                cancel_url,
            },
            sweeper: SweeperConfig {
                interval_secs: sweeper_interval_secs,
                max_age_secs: sweeper_max_age_secs,
            },
            service_name: "dojo-billing".to_string(),
        })
    }
}
