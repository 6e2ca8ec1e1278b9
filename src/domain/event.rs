//! Canonical gateway event. The provider-agnostic tuple every adapter maps
//! its own vocabulary into; the only input the state machine accepts.

use serde::{Deserialize, Serialize};

use crate::domain::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Pending,
    Processing,
    PartialPayment,
    Succeeded,
    Failed,
}

impl CanonicalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalStatus::Pending => "pending",
            CanonicalStatus::Processing => "processing",
            CanonicalStatus::PartialPayment => "partial_payment",
            CanonicalStatus::Succeeded => "succeeded",
            CanonicalStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// The provider's reference for this payment; with the gateway kind it
    /// forms the reconciliation lookup key.
    pub provider_reference: String,
    pub status: CanonicalStatus,
    /// Cumulative amount the provider reports as received so far, when the
    /// provider reports one. Cumulative, not per-delivery: replays are
    /// resolved with max(), never addition.
    pub settled_amount: Option<Money>,
    pub error_details: Option<String>,
}

impl CanonicalEvent {
    pub fn new(provider_reference: impl Into<String>, status: CanonicalStatus) -> Self {
        Self {
            provider_reference: provider_reference.into(),
            status,
            settled_amount: None,
            error_details: None,
        }
    }

    pub fn with_settled_amount(mut self, amount: Money) -> Self {
        self.settled_amount = Some(amount);
        self
    }

    pub fn with_error(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }
}
