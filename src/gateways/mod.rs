//! Gateway adapters. Each provider translates its own webhook payloads and
//! status polls into the canonical event vocabulary; nothing
//! provider-specific leaks past this module.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::domain::event::CanonicalEvent;
use crate::domain::intent::PaymentIntent;
use crate::domain::money::Money;
use crate::error::AppError;

pub mod auth;
pub mod cinetpay;
pub mod http;
pub mod nowpayments;
pub mod paydunya;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    CinetPay,
    PayDunya,
    NowPayments,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::CinetPay => "cinetpay",
            GatewayKind::PayDunya => "paydunya",
            GatewayKind::NowPayments => "nowpayments",
        }
    }

    /// Deposit-style gateways settle through the crypto branch of the
    /// state machine.
    pub fn is_crypto(&self) -> bool {
        matches!(self, GatewayKind::NowPayments)
    }
}

impl std::str::FromStr for GatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cinetpay" => Ok(GatewayKind::CinetPay),
            "paydunya" => Ok(GatewayKind::PayDunya),
            "nowpayments" => Ok(GatewayKind::NowPayments),
            other => Err(format!("unknown gateway: {}", other)),
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the payer goes next: a hosted checkout page for cash-collection
/// providers, a deposit address for on-chain settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutTarget {
    RedirectUrl { url: String },
    DepositAddress { address: String, pay_amount: Money },
}

#[derive(Debug, Clone)]
pub struct Initiation {
    pub checkout: CheckoutTarget,
    pub provider_reference: String,
}

/// The capability contract every provider implements. `verify_inbound` and
/// `to_canonical_event` are pure; `initiate` and `poll_status` talk to the
/// provider and classify failures as `GatewayUnavailable` (transport,
/// retryable) or `GatewayRejected` (provider-side validation, final).
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn initiate(&self, intent: &PaymentIntent) -> Result<Initiation, AppError>;

    /// Constant-time authentication of an inbound webhook. A `false` must
    /// produce no state change anywhere, and the secret never reaches a log.
    fn verify_inbound(&self, headers: &HeaderMap, body: &[u8]) -> bool;

    fn to_canonical_event(&self, body: &[u8]) -> Result<CanonicalEvent, AppError>;

    /// Pull-side reconciliation. Safe to call repeatedly.
    async fn poll_status(&self, provider_reference: &str) -> Result<CanonicalEvent, AppError>;
}

#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: GatewayKind) -> Result<Arc<dyn GatewayAdapter>, AppError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::Validation(format!("gateway {} is not configured", kind)))
    }
}
