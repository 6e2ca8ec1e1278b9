use anyhow::Result;
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    /// Public base URL webhooks and return pages are built from.
    pub public_base_url: String,

    pub cinetpay_api_key: String,
    pub cinetpay_site_id: String,
    pub cinetpay_secret_key: String,
    pub cinetpay_base_url: String,

    pub paydunya_master_key: String,
    pub paydunya_private_key: String,
    pub paydunya_token: String,
    pub paydunya_base_url: String,

    pub nowpayments_api_key: String,
    pub nowpayments_ipn_secret: String,
    pub nowpayments_base_url: String,
    pub nowpayments_default_pay_currency: String,

    pub sweep_interval_secs: u64,
    pub sweep_stuck_after_secs: i64,
    /// Crypto settlement tolerance: paid >= due - epsilon settles.
    pub crypto_underpay_epsilon: BigDecimal,
    pub withdrawal_approval_threshold: BigDecimal,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        let config = Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            public_base_url: env::var("PUBLIC_BASE_URL")?,

            cinetpay_api_key: env::var("CINETPAY_API_KEY")?,
            cinetpay_site_id: env::var("CINETPAY_SITE_ID")?,
            cinetpay_secret_key: env::var("CINETPAY_SECRET_KEY")?,
            cinetpay_base_url: env::var("CINETPAY_BASE_URL")
                .unwrap_or_else(|_| "https://api-checkout.cinetpay.com".to_string()),

            paydunya_master_key: env::var("PAYDUNYA_MASTER_KEY")?,
            paydunya_private_key: env::var("PAYDUNYA_PRIVATE_KEY")?,
            paydunya_token: env::var("PAYDUNYA_TOKEN")?,
            paydunya_base_url: env::var("PAYDUNYA_BASE_URL")
                .unwrap_or_else(|_| "https://app.paydunya.com/api".to_string()),

            nowpayments_api_key: env::var("NOWPAYMENTS_API_KEY")?,
            nowpayments_ipn_secret: env::var("NOWPAYMENTS_IPN_SECRET")?,
            nowpayments_base_url: env::var("NOWPAYMENTS_BASE_URL")
                .unwrap_or_else(|_| "https://api.nowpayments.io".to_string()),
            nowpayments_default_pay_currency: env::var("NOWPAYMENTS_DEFAULT_PAY_CURRENCY")
                .unwrap_or_else(|_| "btc".to_string()),

            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            sweep_stuck_after_secs: env::var("SWEEP_STUCK_AFTER_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            crypto_underpay_epsilon: env::var("CRYPTO_UNDERPAY_EPSILON")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CRYPTO_UNDERPAY_EPSILON is not a decimal"))?,
            withdrawal_approval_threshold: env::var("WITHDRAWAL_APPROVAL_THRESHOLD")
                .unwrap_or_else(|_| "100000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WITHDRAWAL_APPROVAL_THRESHOLD is not a decimal"))?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("SERVER_PORT must be greater than 0");
        }
        if self.database_url.is_empty() {
            anyhow::bail!("DATABASE_URL is empty");
        }
        url::Url::parse(&self.public_base_url)
            .map_err(|_| anyhow::anyhow!("PUBLIC_BASE_URL is not a valid URL"))?;
        url::Url::parse(&self.cinetpay_base_url)
            .map_err(|_| anyhow::anyhow!("CINETPAY_BASE_URL is not a valid URL"))?;
        url::Url::parse(&self.paydunya_base_url)
            .map_err(|_| anyhow::anyhow!("PAYDUNYA_BASE_URL is not a valid URL"))?;
        url::Url::parse(&self.nowpayments_base_url)
            .map_err(|_| anyhow::anyhow!("NOWPAYMENTS_BASE_URL is not a valid URL"))?;
        if self.crypto_underpay_epsilon < BigDecimal::from(0) {
            anyhow::bail!("CRYPTO_UNDERPAY_EPSILON must not be negative");
        }
        Ok(())
    }

    pub fn webhook_url(&self, gateway: &str) -> String {
        format!(
            "{}/webhooks/{}",
            self.public_base_url.trim_end_matches('/'),
            gateway
        )
    }
}
