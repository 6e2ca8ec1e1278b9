//! NOWPayments adapter (crypto settlement). IPN callbacks are signed with
//! HMAC-SHA512 over the JSON body with its keys sorted; `actually_paid` is
//! the provider's cumulative received total and drives partial settlement.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::json;

use crate::domain::event::{CanonicalEvent, CanonicalStatus};
use crate::domain::intent::PaymentIntent;
use crate::domain::money::Money;
use crate::error::AppError;
use crate::gateways::auth::AuthScheme;
use crate::gateways::http::GatewayHttp;
use crate::gateways::{CheckoutTarget, GatewayAdapter, GatewayKind, Initiation};

const SIGNATURE_HEADER: &str = "x-nowpayments-sig";

#[derive(Clone)]
pub struct NowPaymentsConfig {
    pub api_key: String,
    pub ipn_secret: String,
    pub base_url: String,
    pub ipn_callback_url: String,
    /// Coin charged when the caller does not pick one.
    pub default_pay_currency: String,
}

pub struct NowPaymentsAdapter {
    config: NowPaymentsConfig,
    http: GatewayHttp,
    auth: AuthScheme,
}

impl NowPaymentsAdapter {
    pub fn new(config: NowPaymentsConfig, http: GatewayHttp) -> Self {
        let auth = AuthScheme::HmacSha512Hex {
            header: SIGNATURE_HEADER.to_string(),
            secret: config.ipn_secret.clone(),
        };
        Self { config, http, auth }
    }

    fn map_status(status: &str) -> CanonicalStatus {
        match status {
            "waiting" => CanonicalStatus::Pending,
            "confirming" | "confirmed" | "sending" => CanonicalStatus::Processing,
            "partially_paid" => CanonicalStatus::PartialPayment,
            "finished" => CanonicalStatus::Succeeded,
            "failed" | "refunded" | "expired" => CanonicalStatus::Failed,
            _ => CanonicalStatus::Pending,
        }
    }

    fn event_from_payment(&self, payment: &serde_json::Value) -> Result<CanonicalEvent, AppError> {
        let payment_id = match &payment["payment_id"] {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => {
                return Err(AppError::Validation(
                    "nowpayments payload missing payment_id".to_string(),
                ));
            }
        };

        let status_text = payment["payment_status"].as_str().unwrap_or("waiting");
        let status = Self::map_status(status_text);
        let mut event = CanonicalEvent::new(payment_id, status);

        let pay_currency = payment["pay_currency"].as_str().unwrap_or_default();
        if let Some(paid) = decimal_field(&payment["actually_paid"]) {
            if !pay_currency.is_empty() {
                event = event.with_settled_amount(Money::parse(&paid, pay_currency).map_err(
                    |e| AppError::Validation(format!("bad actually_paid amount: {}", e)),
                )?);
            }
        }
        if matches!(status, CanonicalStatus::Failed) {
            event = event.with_error(format!("payment {}", status_text));
        }
        Ok(event)
    }
}

/// Amount fields arrive as JSON numbers or strings depending on endpoint;
/// both go through a string so no float arithmetic happens here.
fn decimal_field(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The IPN signature covers the body with its keys sorted, not the raw
/// bytes on the wire.
fn sorted_body(body: &[u8]) -> Option<Vec<u8>> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    Some(value.to_string().into_bytes())
}

#[async_trait]
impl GatewayAdapter for NowPaymentsAdapter {
    fn kind(&self) -> GatewayKind {
        GatewayKind::NowPayments
    }

    async fn initiate(&self, intent: &PaymentIntent) -> Result<Initiation, AppError> {
        let pay_currency = intent
            .metadata
            .get("pay_currency")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.config.default_pay_currency)
            .to_lowercase();

        let body = json!({
            "price_amount": intent.amount.round_down(2).amount.to_string(),
            "price_currency": intent.amount.currency.to_lowercase(),
            "pay_currency": pay_currency,
            "order_id": intent.session_id,
            "ipn_callback_url": self.config.ipn_callback_url,
        });

        let response = self
            .http
            .post_json(
                &format!("{}/v1/payment", self.config.base_url),
                &[("x-api-key", self.config.api_key.as_str())],
                &body,
            )
            .await?;

        let payment_id = match &response["payment_id"] {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => {
                return Err(AppError::GatewayUnavailable(
                    "nowpayments response missing payment_id".to_string(),
                ));
            }
        };
        let address = response["pay_address"]
            .as_str()
            .ok_or_else(|| {
                AppError::GatewayUnavailable("nowpayments response missing pay_address".to_string())
            })?
            .to_string();
        let pay_amount = decimal_field(&response["pay_amount"]).ok_or_else(|| {
            AppError::GatewayUnavailable("nowpayments response missing pay_amount".to_string())
        })?;
        let pay_currency = response["pay_currency"].as_str().unwrap_or(&pay_currency);

        let pay_amount = Money::parse(&pay_amount, pay_currency)
            .map_err(|e| AppError::Validation(format!("bad pay_amount: {}", e)))?;

        Ok(Initiation {
            checkout: CheckoutTarget::DepositAddress {
                address,
                pay_amount,
            },
            provider_reference: payment_id,
        })
    }

    fn verify_inbound(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        match sorted_body(body) {
            Some(sorted) => self.auth.verify(headers, &sorted),
            None => false,
        }
    }

    fn to_canonical_event(&self, body: &[u8]) -> Result<CanonicalEvent, AppError> {
        let payment: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("malformed nowpayments ipn: {}", e)))?;
        self.event_from_payment(&payment)
    }

    async fn poll_status(&self, provider_reference: &str) -> Result<CanonicalEvent, AppError> {
        let response = self
            .http
            .get_json(
                &format!("{}/v1/payment/{}", self.config.base_url, provider_reference),
                &[("x-api-key", self.config.api_key.as_str())],
            )
            .await?;
        self.event_from_payment(&response)
    }
}
