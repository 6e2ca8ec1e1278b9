//! Completion notifier: the single outbound call made when an intent
//! reaches `Succeeded`. The receiver is expected to be idempotent on
//! session_id, since a crash between ledger write and notify can produce a
//! second delivery.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::domain::intent::PaymentIntent;
use crate::error::AppError;

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn payment_completed(&self, intent: &PaymentIntent) -> Result<(), AppError>;
}

/// POSTs the settlement result to the `callback_url` the caller stored in
/// the intent metadata. No callback_url means nobody to notify.
pub struct HttpCompletionNotifier {
    client: Client,
}

impl HttpCompletionNotifier {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl CompletionNotifier for HttpCompletionNotifier {
    async fn payment_completed(&self, intent: &PaymentIntent) -> Result<(), AppError> {
        let callback_url = match intent.metadata.get("callback_url").and_then(|v| v.as_str()) {
            Some(url) => url,
            None => {
                tracing::debug!(session_id = %intent.session_id, "no callback_url, skipping completion notify");
                return Ok(());
            }
        };

        let body = json!({
            "session_id": intent.session_id,
            "status": intent.status.as_str(),
            "amount": intent.amount.amount.to_string(),
            "currency": intent.amount.currency,
            "paid_amount": intent.paid_amount.amount.to_string(),
            "metadata": intent.metadata,
        });

        let response = self
            .client
            .post(callback_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::GatewayUnavailable(format!("completion callback: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::GatewayUnavailable(format!(
                "completion callback returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// For embedders that consume terminal state by polling instead.
pub struct NoopNotifier;

#[async_trait]
impl CompletionNotifier for NoopNotifier {
    async fn payment_completed(&self, _intent: &PaymentIntent) -> Result<(), AppError> {
        Ok(())
    }
}
