//! Ledger transaction entity. The append-mostly system of record for money
//! movement, independent of intent bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Payment,
    Refund,
    Fee,
    Conversion,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
            TransactionType::Payment => "payment",
            TransactionType::Refund => "refund",
            TransactionType::Fee => "fee",
            TransactionType::Conversion => "conversion",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "transfer" => Ok(TransactionType::Transfer),
            "payment" => Ok(TransactionType::Payment),
            "refund" => Ok(TransactionType::Refund),
            "fee" => Ok(TransactionType::Fee),
            "conversion" => Ok(TransactionType::Conversion),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    PendingOtpVerification,
    PendingAdminApproval,
    Completed,
    Failed,
    Cancelled,
    RejectedByAdmin,
    Expired,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::PendingOtpVerification => "pending_otp_verification",
            TransactionStatus::PendingAdminApproval => "pending_admin_approval",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::RejectedByAdmin => "rejected_by_admin",
            TransactionStatus::Expired => "expired",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
                | TransactionStatus::RejectedByAdmin
                | TransactionStatus::Expired
                | TransactionStatus::Refunded
        )
    }

    /// A non-terminal row still holds (or reserves) funds.
    pub fn reserves_funds(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "processing" => Ok(TransactionStatus::Processing),
            "pending_otp_verification" => Ok(TransactionStatus::PendingOtpVerification),
            "pending_admin_approval" => Ok(TransactionStatus::PendingAdminApproval),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "rejected_by_admin" => Ok(TransactionStatus::RejectedByAdmin),
            "expired" => Ok(TransactionStatus::Expired),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Legal edges of the transaction status graph. Completed is reachable only
/// from the in-flight states; terminal states never move except
/// Completed -> Refunded.
pub fn can_transition(from: TransactionStatus, to: TransactionStatus) -> bool {
    use TransactionStatus as S;
    matches!(
        (from, to),
        (S::Pending, S::Processing)
            | (S::Pending, S::PendingOtpVerification)
            | (S::Pending, S::PendingAdminApproval)
            | (S::Pending, S::Completed)
            | (S::Pending, S::Failed)
            | (S::Pending, S::Cancelled)
            | (S::Pending, S::Expired)
            | (S::Processing, S::Completed)
            | (S::Processing, S::Failed)
            | (S::PendingOtpVerification, S::Processing)
            | (S::PendingOtpVerification, S::Cancelled)
            | (S::PendingOtpVerification, S::Expired)
            | (S::PendingAdminApproval, S::Processing)
            | (S::PendingAdminApproval, S::RejectedByAdmin)
            | (S::Completed, S::Refunded)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique, generated once, never reused. The idempotency key
    /// for ledger writes.
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub tx_type: TransactionType,
    /// Signed: credits positive, debits negative.
    pub amount: Money,
    pub fee: Money,
    pub status: TransactionStatus,
    /// Originating session id for payments, free-form otherwise.
    pub reference: Option<String>,
    /// Links to reversing/paired entries (refund <-> original, the two
    /// legs of a transfer).
    pub related_transactions: Vec<Uuid>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        transaction_id: Uuid,
        user_id: Uuid,
        tx_type: TransactionType,
        amount: Money,
        status: TransactionStatus,
        reference: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let fee = Money::zero(amount.currency.clone());
        Self {
            transaction_id,
            user_id,
            tx_type,
            amount,
            fee,
            status,
            reference,
            related_transactions: Vec::new(),
            deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The completed ledger entry a settled intent produces. The id derives
    /// from the session id, so replays of the settlement pipeline hit the
    /// same key and the create-if-absent write stays idempotent.
    pub fn payment_for_session(session_id: &str, user_id: Uuid, amount: Money) -> Self {
        let transaction_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, session_id.as_bytes());
        Self::new(
            transaction_id,
            user_id,
            TransactionType::Payment,
            amount,
            TransactionStatus::Completed,
            Some(session_id.to_string()),
        )
    }
}
