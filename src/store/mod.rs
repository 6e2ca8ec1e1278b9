//! Storage ports. The engine only ever touches intents through the
//! conditional-update primitive and the ledger through create-if-absent;
//! both adapters (in-memory and Postgres) uphold the same contract.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::intent::{IntentStatus, PaymentIntent, WebhookRecord};
use crate::domain::money::Money;
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::error::AppError;
use crate::gateways::GatewayKind;

pub mod memory;
pub mod postgres;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Conflict(what) => AppError::Store(what),
            StoreError::Database(e) => AppError::Database(e),
            StoreError::Serialization(e) => AppError::Store(e.to_string()),
        }
    }
}

/// Fields a single conditional update may change alongside `status`.
/// Everything is applied atomically with the status compare-and-set.
#[derive(Debug, Clone, Default)]
pub struct IntentPatch {
    pub status: Option<IntentStatus>,
    pub gateway: Option<GatewayKind>,
    pub gateway_payment_id: Option<String>,
    pub pay_amount: Option<Money>,
    pub crypto_address: Option<String>,
    pub paid_amount: Option<Money>,
    /// Some(None) clears the stored reason.
    pub last_error: Option<Option<String>>,
    /// Shallow-merged into the metadata object. Caller keys win.
    pub metadata_patch: Option<serde_json::Value>,
    /// Reset path: drop gateway, provider reference, pay amount and address.
    pub clear_provider_fields: bool,
}

impl IntentPatch {
    pub fn to(status: IntentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub enum CasOutcome {
    Applied(PaymentIntent),
    /// Another delivery advanced the state first; the caller treats this as
    /// a no-op.
    StateMismatch(IntentStatus),
}

#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), StoreError>;

    async fn get(&self, session_id: &str) -> Result<Option<PaymentIntent>, StoreError>;

    /// Reconciliation lookup key: unique per gateway.
    async fn find_by_provider_ref(
        &self,
        gateway: GatewayKind,
        provider_reference: &str,
    ) -> Result<Option<PaymentIntent>, StoreError>;

    /// The linearizing primitive. Applies `patch` iff the stored status
    /// still equals `expected`; otherwise reports the actual status and
    /// changes nothing.
    async fn update_if_status(
        &self,
        session_id: &str,
        expected: IntentStatus,
        patch: IntentPatch,
    ) -> Result<CasOutcome, StoreError>;

    /// Append-only audit trail; never rewrites earlier entries.
    async fn append_webhook(
        &self,
        session_id: &str,
        record: WebhookRecord,
    ) -> Result<(), StoreError>;

    /// Intents sitting in one of `statuses` with no update for `older_than`.
    async fn list_stuck(
        &self,
        statuses: &[IntentStatus],
        older_than: Duration,
    ) -> Result<Vec<PaymentIntent>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Idempotent write keyed on transaction_id: returns true when the row
    /// was created, false when it already existed. Never overwrites.
    async fn create_if_absent(&self, tx: &Transaction) -> Result<bool, StoreError>;

    async fn get(&self, transaction_id: Uuid) -> Result<Option<Transaction>, StoreError>;

    /// Reads exclude soft-deleted rows unless `include_deleted` is set.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn update_status_if(
        &self,
        transaction_id: Uuid,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> Result<bool, StoreError>;

    async fn add_related(
        &self,
        transaction_id: Uuid,
        related_id: Uuid,
    ) -> Result<(), StoreError>;

    /// Soft delete only. The row stays for audit but leaves every default
    /// read and all balance computation.
    async fn soft_delete(&self, transaction_id: Uuid) -> Result<(), StoreError>;

    /// Signed sum over completed rows plus fund-reserving withdrawal rows,
    /// always excluding soft-deleted ones.
    async fn balance(&self, user_id: Uuid, currency: &str) -> Result<BigDecimal, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
