//! Shared outbound transport for gateway adapters: bounded timeouts plus a
//! circuit breaker so a dead provider fails fast instead of tying up
//! webhook workers.

use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{Config, Error as FailsafeError, StateMachine, backoff, failure_policy};
use reqwest::Client;
use std::time::Duration;

use crate::error::AppError;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct GatewayHttp {
    client: Client,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl Default for GatewayHttp {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayHttp {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(60), Duration::from_secs(120));
        let policy = failure_policy::consecutive_failures(3, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        GatewayHttp {
            client,
            circuit_breaker,
        }
    }

    /// POST a JSON body and decode a JSON response. Transport failures and
    /// 5xx map to `GatewayUnavailable`; 4xx map to `GatewayRejected`.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let result = self
            .circuit_breaker
            .call(async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| AppError::GatewayUnavailable(e.to_string()))?;
                classify(response).await
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(AppError::GatewayUnavailable(
                "gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    pub async fn get_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<serde_json::Value, AppError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let result = self
            .circuit_breaker
            .call(async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| AppError::GatewayUnavailable(e.to_string()))?;
                classify(response).await
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(AppError::GatewayUnavailable(
                "gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

async fn classify(response: reqwest::Response) -> Result<serde_json::Value, AppError> {
    let status = response.status();
    if status.is_server_error() {
        return Err(AppError::GatewayUnavailable(format!(
            "provider returned {}",
            status
        )));
    }
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::GatewayRejected(format!(
            "provider returned {}: {}",
            status,
            truncate(&body, 200)
        )));
    }
    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| AppError::GatewayUnavailable(format!("invalid response body: {}", e)))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_post_json_success() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v2/payment")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"201","data":{"payment_url":"https://pay"}}"#)
            .create_async()
            .await;

        let http = GatewayHttp::new();
        let value = http
            .post_json(
                &format!("{}/v2/payment", server.url()),
                &[],
                &json!({"amount": "5000"}),
            )
            .await
            .unwrap();
        assert_eq!(value["data"]["payment_url"], "https://pay");
    }

    #[tokio::test]
    async fn test_client_error_maps_to_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v2/payment")
            .with_status(400)
            .with_body("bad site id")
            .create_async()
            .await;

        let http = GatewayHttp::new();
        let err = http
            .post_json(&format!("{}/v2/payment", server.url()), &[], &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GatewayRejected(_)));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/payment/7")
            .with_status(503)
            .create_async()
            .await;

        let http = GatewayHttp::new();
        let err = http
            .get_json(&format!("{}/v1/payment/7", server.url()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GatewayUnavailable(_)));
    }

    #[tokio::test]
    async fn test_circuit_opens_after_consecutive_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/payment/7")
            .with_status(500)
            .expect_at_least(3)
            .create_async()
            .await;

        let http = GatewayHttp::new();
        for _ in 0..3 {
            let _ = http
                .get_json(&format!("{}/v1/payment/7", server.url()), &[])
                .await;
        }

        let err = http
            .get_json(&format!("{}/v1/payment/7", server.url()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GatewayUnavailable(_)));
    }
}
