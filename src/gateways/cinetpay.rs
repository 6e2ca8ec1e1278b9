//! CinetPay adapter (cash collection). The merchant supplies the
//! transaction id at initiation, so the session id doubles as the provider
//! reference and webhooks reconcile directly against it.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use crate::domain::event::{CanonicalEvent, CanonicalStatus};
use crate::domain::intent::PaymentIntent;
use crate::error::AppError;
use crate::gateways::auth::AuthScheme;
use crate::gateways::http::GatewayHttp;
use crate::gateways::{CheckoutTarget, GatewayAdapter, GatewayKind, Initiation};

const SIGNATURE_HEADER: &str = "x-token";

#[derive(Clone)]
pub struct CinetPayConfig {
    pub api_key: String,
    pub site_id: String,
    pub secret_key: String,
    pub base_url: String,
    pub notify_url: String,
    pub return_url: String,
}

pub struct CinetPayAdapter {
    config: CinetPayConfig,
    http: GatewayHttp,
    auth: AuthScheme,
}

impl CinetPayAdapter {
    pub fn new(config: CinetPayConfig, http: GatewayHttp) -> Self {
        let auth = AuthScheme::HmacSha256Hex {
            header: SIGNATURE_HEADER.to_string(),
            secret: config.secret_key.clone(),
        };
        Self { config, http, auth }
    }

    fn map_status(status: &str) -> CanonicalStatus {
        match status {
            "ACCEPTED" => CanonicalStatus::Succeeded,
            "REFUSED" => CanonicalStatus::Failed,
            // customer still on the payment page or USSD prompt
            _ => CanonicalStatus::Processing,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Notification {
    cpm_trans_id: String,
    cpm_trans_status: String,
    #[serde(default)]
    cpm_error_message: Option<String>,
}

#[async_trait]
impl GatewayAdapter for CinetPayAdapter {
    fn kind(&self) -> GatewayKind {
        GatewayKind::CinetPay
    }

    async fn initiate(&self, intent: &PaymentIntent) -> Result<Initiation, AppError> {
        // XOF/XAF/GNF have no minor units; everything else submits at 2.
        let scale = match intent.amount.currency.as_str() {
            "XOF" | "XAF" | "GNF" => 0,
            _ => 2,
        };
        let body = json!({
            "apikey": self.config.api_key,
            "site_id": self.config.site_id,
            "transaction_id": intent.session_id,
            "amount": intent.amount.round_down(scale).amount.to_string(),
            "currency": intent.amount.currency,
            "description": format!("payment {}", intent.session_id),
            "notify_url": self.config.notify_url,
            "return_url": self.config.return_url,
            "channels": "ALL",
        });

        let response = self
            .http
            .post_json(&format!("{}/v2/payment", self.config.base_url), &[], &body)
            .await?;

        let code = response["code"].as_str().unwrap_or_default();
        if code != "201" {
            return Err(AppError::GatewayRejected(format!(
                "cinetpay initiation refused (code {}): {}",
                code,
                response["message"].as_str().unwrap_or("no message")
            )));
        }

        let payment_url = response["data"]["payment_url"]
            .as_str()
            .ok_or_else(|| {
                AppError::GatewayUnavailable("cinetpay response missing payment_url".to_string())
            })?
            .to_string();

        Ok(Initiation {
            checkout: CheckoutTarget::RedirectUrl { url: payment_url },
            provider_reference: intent.session_id.clone(),
        })
    }

    fn verify_inbound(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        self.auth.verify(headers, body)
    }

    fn to_canonical_event(&self, body: &[u8]) -> Result<CanonicalEvent, AppError> {
        let notification: Notification = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("malformed cinetpay notification: {}", e)))?;

        let mut event = CanonicalEvent::new(
            notification.cpm_trans_id,
            Self::map_status(&notification.cpm_trans_status),
        );
        if let Some(message) = notification.cpm_error_message.filter(|m| !m.is_empty()) {
            event = event.with_error(message);
        }
        Ok(event)
    }

    async fn poll_status(&self, provider_reference: &str) -> Result<CanonicalEvent, AppError> {
        let body = json!({
            "apikey": self.config.api_key,
            "site_id": self.config.site_id,
            "transaction_id": provider_reference,
        });

        let response = self
            .http
            .post_json(
                &format!("{}/v2/payment/check", self.config.base_url),
                &[],
                &body,
            )
            .await?;

        let status = response["data"]["status"].as_str().unwrap_or("PENDING");
        let mut event =
            CanonicalEvent::new(provider_reference.to_string(), Self::map_status(status));
        if let Some(message) = response["data"]["message"].as_str() {
            if status == "REFUSED" {
                event = event.with_error(message.to_string());
            }
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::gateways::auth::hmac_sha256_hex;
    use axum::http::HeaderValue;
    use serde_json::json;
    use uuid::Uuid;

    fn adapter(base_url: &str) -> CinetPayAdapter {
        CinetPayAdapter::new(
            CinetPayConfig {
                api_key: "apikey".to_string(),
                site_id: "site".to_string(),
                secret_key: "secret".to_string(),
                base_url: base_url.to_string(),
                notify_url: "https://merchant.example/webhooks/cinetpay".to_string(),
                return_url: "https://merchant.example/return".to_string(),
            },
            GatewayHttp::new(),
        )
    }

    #[test]
    fn test_accepted_notification_maps_to_succeeded() {
        let adapter = adapter("https://api.example");
        let body = json!({
            "cpm_trans_id": "pay_abc",
            "cpm_trans_status": "ACCEPTED",
            "cpm_amount": "5000",
            "cpm_currency": "XOF",
        });

        let event = adapter
            .to_canonical_event(body.to_string().as_bytes())
            .unwrap();
        assert_eq!(event.provider_reference, "pay_abc");
        assert_eq!(event.status, CanonicalStatus::Succeeded);
    }

    #[test]
    fn test_refused_notification_carries_error() {
        let adapter = adapter("https://api.example");
        let body = json!({
            "cpm_trans_id": "pay_abc",
            "cpm_trans_status": "REFUSED",
            "cpm_error_message": "INSUFFICIENT_BALANCE",
        });

        let event = adapter
            .to_canonical_event(body.to_string().as_bytes())
            .unwrap();
        assert_eq!(event.status, CanonicalStatus::Failed);
        assert_eq!(event.error_details.as_deref(), Some("INSUFFICIENT_BALANCE"));
    }

    #[test]
    fn test_waiting_maps_to_processing() {
        let adapter = adapter("https://api.example");
        let body = json!({
            "cpm_trans_id": "pay_abc",
            "cpm_trans_status": "WAITING_FOR_CUSTOMER",
        });

        let event = adapter
            .to_canonical_event(body.to_string().as_bytes())
            .unwrap();
        assert_eq!(event.status, CanonicalStatus::Processing);
    }

    #[test]
    fn test_verify_inbound_signature() {
        let adapter = adapter("https://api.example");
        let body = br#"{"cpm_trans_id":"pay_abc","cpm_trans_status":"ACCEPTED"}"#;

        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&hmac_sha256_hex("secret", body)).unwrap(),
        );
        assert!(adapter.verify_inbound(&headers, body));

        let mut bad = HeaderMap::new();
        bad.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&hmac_sha256_hex("wrong-secret", body)).unwrap(),
        );
        assert!(!adapter.verify_inbound(&bad, body));
    }

    #[tokio::test]
    async fn test_initiate_returns_checkout_url() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v2/payment")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"code":"201","message":"CREATED","data":{"payment_url":"https://checkout.cinetpay.com/t/abc","payment_token":"tok"}}"#,
            )
            .create_async()
            .await;

        let adapter = adapter(&server.url());
        let intent = PaymentIntent::new(
            Uuid::new_v4(),
            Money::parse("5000", "XOF").unwrap(),
            json!({}),
        );

        let initiation = adapter.initiate(&intent).await.unwrap();
        assert_eq!(initiation.provider_reference, intent.session_id);
        match initiation.checkout {
            CheckoutTarget::RedirectUrl { url } => {
                assert_eq!(url, "https://checkout.cinetpay.com/t/abc")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initiate_refusal_is_rejected_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v2/payment")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"608","message":"MINIMUM_REQUIRED_FIELDS"}"#)
            .create_async()
            .await;

        let adapter = adapter(&server.url());
        let intent = PaymentIntent::new(
            Uuid::new_v4(),
            Money::parse("5000", "XOF").unwrap(),
            json!({}),
        );

        let err = adapter.initiate(&intent).await.unwrap_err();
        assert!(matches!(err, AppError::GatewayRejected(_)));
        assert!(!err.is_retryable());
    }
}
