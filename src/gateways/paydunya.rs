//! PayDunya adapter (cash collection). Callbacks authenticate with either a
//! Bearer token or Basic credentials, so verification walks an ordered list
//! of schemes.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use crate::domain::event::{CanonicalEvent, CanonicalStatus};
use crate::domain::intent::PaymentIntent;
use crate::error::AppError;
use crate::gateways::auth::{AuthScheme, verify_any};
use crate::gateways::http::GatewayHttp;
use crate::gateways::{CheckoutTarget, GatewayAdapter, GatewayKind, Initiation};

#[derive(Clone)]
pub struct PayDunyaConfig {
    pub master_key: String,
    pub private_key: String,
    pub token: String,
    pub base_url: String,
    pub callback_url: String,
    pub store_name: String,
}

pub struct PayDunyaAdapter {
    config: PayDunyaConfig,
    http: GatewayHttp,
    auth_schemes: Vec<AuthScheme>,
}

impl PayDunyaAdapter {
    pub fn new(config: PayDunyaConfig, http: GatewayHttp) -> Self {
        let auth_schemes = vec![
            AuthScheme::Bearer {
                token: config.token.clone(),
            },
            AuthScheme::Basic {
                username: config.master_key.clone(),
                password: config.private_key.clone(),
            },
        ];
        Self {
            config,
            http,
            auth_schemes,
        }
    }

    fn key_headers(&self) -> [(&str, &str); 3] {
        [
            ("PAYDUNYA-MASTER-KEY", self.config.master_key.as_str()),
            ("PAYDUNYA-PRIVATE-KEY", self.config.private_key.as_str()),
            ("PAYDUNYA-TOKEN", self.config.token.as_str()),
        ]
    }

    fn map_status(status: &str) -> CanonicalStatus {
        match status {
            "completed" => CanonicalStatus::Succeeded,
            "cancelled" | "failed" => CanonicalStatus::Failed,
            _ => CanonicalStatus::Processing,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Callback {
    invoice: CallbackInvoice,
}

#[derive(Debug, Deserialize)]
struct CallbackInvoice {
    token: String,
    status: String,
}

#[async_trait]
impl GatewayAdapter for PayDunyaAdapter {
    fn kind(&self) -> GatewayKind {
        GatewayKind::PayDunya
    }

    async fn initiate(&self, intent: &PaymentIntent) -> Result<Initiation, AppError> {
        let body = json!({
            "invoice": {
                "total_amount": intent.amount.round_down(2).amount.to_string(),
                "description": format!("payment {}", intent.session_id),
            },
            "store": { "name": self.config.store_name },
            "actions": { "callback_url": self.config.callback_url },
            "custom_data": { "session_id": intent.session_id },
        });

        let response = self
            .http
            .post_json(
                &format!("{}/v1/checkout-invoice/create", self.config.base_url),
                &self.key_headers(),
                &body,
            )
            .await?;

        let code = response["response_code"].as_str().unwrap_or_default();
        if code != "00" {
            return Err(AppError::GatewayRejected(format!(
                "paydunya invoice refused (code {}): {}",
                code,
                response["response_text"].as_str().unwrap_or("no message")
            )));
        }

        let token = response["token"]
            .as_str()
            .ok_or_else(|| {
                AppError::GatewayUnavailable("paydunya response missing token".to_string())
            })?
            .to_string();
        let url = response["response_text"]
            .as_str()
            .ok_or_else(|| {
                AppError::GatewayUnavailable("paydunya response missing invoice url".to_string())
            })?
            .to_string();

        Ok(Initiation {
            checkout: CheckoutTarget::RedirectUrl { url },
            provider_reference: token,
        })
    }

    fn verify_inbound(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        verify_any(&self.auth_schemes, headers, body)
    }

    fn to_canonical_event(&self, body: &[u8]) -> Result<CanonicalEvent, AppError> {
        let callback: Callback = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("malformed paydunya callback: {}", e)))?;

        let status = Self::map_status(&callback.invoice.status);
        let mut event = CanonicalEvent::new(callback.invoice.token, status);
        if status == CanonicalStatus::Failed {
            event = event.with_error(format!("invoice {}", callback.invoice.status));
        }
        Ok(event)
    }

    async fn poll_status(&self, provider_reference: &str) -> Result<CanonicalEvent, AppError> {
        let response = self
            .http
            .get_json(
                &format!(
                    "{}/v1/checkout-invoice/confirm/{}",
                    self.config.base_url, provider_reference
                ),
                &self.key_headers(),
            )
            .await?;

        let status = response["invoice"]["status"].as_str().unwrap_or("pending");
        Ok(CanonicalEvent::new(
            provider_reference.to_string(),
            Self::map_status(status),
        ))
    }
}
