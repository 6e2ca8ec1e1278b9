//! Ledger-side withdrawal path. Withdrawals reserve funds the moment the
//! row exists, over-threshold requests park in pending_admin_approval, and
//! refunds create linked reversing entries.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::domain::money::Money;
use crate::domain::transaction::{
    Transaction, TransactionStatus, TransactionType, can_transition,
};
use crate::error::AppError;
use crate::store::LedgerStore;

pub struct WithdrawalService {
    ledger: Arc<dyn LedgerStore>,
    /// Requests strictly above this (in the request currency) need an
    /// operator's approval before processing.
    approval_threshold: BigDecimal,
}

impl WithdrawalService {
    pub fn new(ledger: Arc<dyn LedgerStore>, approval_threshold: BigDecimal) -> Self {
        Self {
            ledger,
            approval_threshold,
        }
    }

    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Money,
    ) -> Result<Transaction, AppError> {
        if !amount.is_positive() {
            return Err(AppError::Validation(
                "withdrawal amount must be positive".to_string(),
            ));
        }

        let balance = self.ledger.balance(user_id, &amount.currency).await?;
        if balance < amount.amount {
            return Err(AppError::InsufficientBalance(format!(
                "balance {} {} cannot cover {}",
                balance, amount.currency, amount
            )));
        }

        let needs_approval = amount.amount > self.approval_threshold;
        let status = if needs_approval {
            TransactionStatus::PendingAdminApproval
        } else {
            TransactionStatus::Pending
        };

        // debit entry: negative signed amount reserves the funds
        let debit = Money::new(-&amount.amount, amount.currency.clone());
        let tx = Transaction::new(
            Uuid::new_v4(),
            user_id,
            TransactionType::Withdrawal,
            debit,
            status,
            None,
        );
        self.ledger.create_if_absent(&tx).await?;
        tracing::info!(
            user_id = %user_id,
            transaction_id = %tx.transaction_id,
            status = status.as_str(),
            "withdrawal requested"
        );

        if needs_approval {
            return Err(AppError::AdminApprovalRequired(format!(
                "withdrawal {} awaits admin approval",
                tx.transaction_id
            )));
        }
        Ok(tx)
    }

    pub async fn approve(&self, transaction_id: Uuid, actor: &str) -> Result<(), AppError> {
        self.move_from_approval(transaction_id, TransactionStatus::Processing, actor)
            .await
    }

    pub async fn reject(&self, transaction_id: Uuid, actor: &str) -> Result<(), AppError> {
        self.move_from_approval(transaction_id, TransactionStatus::RejectedByAdmin, actor)
            .await
    }

    async fn move_from_approval(
        &self,
        transaction_id: Uuid,
        next: TransactionStatus,
        actor: &str,
    ) -> Result<(), AppError> {
        if !can_transition(TransactionStatus::PendingAdminApproval, next) {
            return Err(AppError::IllegalTransition(format!(
                "pending_admin_approval cannot move to {}",
                next.as_str()
            )));
        }
        let moved = self
            .ledger
            .update_status_if(transaction_id, TransactionStatus::PendingAdminApproval, next)
            .await?;
        if !moved {
            return Err(AppError::IllegalTransition(format!(
                "withdrawal {} is not awaiting approval",
                transaction_id
            )));
        }
        tracing::warn!(
            transaction_id = %transaction_id,
            actor,
            decision = next.as_str(),
            "withdrawal approval decision recorded"
        );
        Ok(())
    }

    /// Reversing entry for a completed transaction, linked both ways
    /// through related_transactions.
    pub async fn record_refund(&self, original_id: Uuid) -> Result<Transaction, AppError> {
        let original = self
            .ledger
            .get(original_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", original_id)))?;

        if original.status != TransactionStatus::Completed {
            return Err(AppError::IllegalTransition(format!(
                "only completed transactions can be refunded, found {}",
                original.status.as_str()
            )));
        }

        let reversed = Money::new(
            -&original.amount.amount,
            original.amount.currency.clone(),
        );
        let mut refund = Transaction::new(
            Uuid::new_v4(),
            original.user_id,
            TransactionType::Refund,
            reversed,
            TransactionStatus::Completed,
            original.reference.clone(),
        );
        refund.related_transactions.push(original.transaction_id);
        self.ledger.create_if_absent(&refund).await?;

        self.ledger
            .update_status_if(
                original.transaction_id,
                TransactionStatus::Completed,
                TransactionStatus::Refunded,
            )
            .await?;
        self.ledger
            .add_related(original.transaction_id, refund.transaction_id)
            .await?;

        tracing::info!(
            original = %original.transaction_id,
            refund = %refund.transaction_id,
            "refund recorded"
        );
        Ok(refund)
    }
}
