//! In-memory adapters. Used by the test suite and by embedders that do not
//! want a database; the CAS discipline is the same as the Postgres adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::intent::{IntentStatus, PaymentIntent, WebhookRecord};
use crate::domain::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::gateways::GatewayKind;
use crate::store::{CasOutcome, IntentPatch, IntentStore, LedgerStore, StoreError};

#[derive(Default)]
pub struct MemoryIntentStore {
    inner: Mutex<IntentMap>,
}

#[derive(Default)]
struct IntentMap {
    by_session: HashMap<String, PaymentIntent>,
    by_provider_ref: HashMap<(GatewayKind, String), String>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_patch(intent: &mut PaymentIntent, patch: IntentPatch) {
    if let Some(status) = patch.status {
        intent.status = status;
    }
    if let Some(gateway) = patch.gateway {
        intent.gateway = Some(gateway);
    }
    if let Some(reference) = patch.gateway_payment_id {
        intent.gateway_payment_id = Some(reference);
    }
    if let Some(pay_amount) = patch.pay_amount {
        intent.pay_amount = Some(pay_amount);
    }
    if let Some(address) = patch.crypto_address {
        intent.crypto_address = Some(address);
    }
    if let Some(paid) = patch.paid_amount {
        intent.paid_amount = paid;
    }
    if let Some(last_error) = patch.last_error {
        intent.last_error = last_error;
    }
    if let Some(extra) = patch.metadata_patch {
        merge_metadata(&mut intent.metadata, extra);
    }
    if patch.clear_provider_fields {
        intent.gateway = None;
        intent.gateway_payment_id = None;
        intent.pay_amount = None;
        intent.crypto_address = None;
    }
    intent.updated_at = Utc::now();
}

fn merge_metadata(metadata: &mut serde_json::Value, extra: serde_json::Value) {
    match (metadata.as_object_mut(), extra.as_object()) {
        (Some(base), Some(additions)) => {
            for (key, value) in additions {
                base.insert(key.clone(), value.clone());
            }
        }
        _ => *metadata = extra,
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.by_session.contains_key(&intent.session_id) {
            return Err(StoreError::Conflict(format!(
                "intent {} already exists",
                intent.session_id
            )));
        }
        inner
            .by_session
            .insert(intent.session_id.clone(), intent.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<PaymentIntent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.by_session.get(session_id).cloned())
    }

    async fn find_by_provider_ref(
        &self,
        gateway: GatewayKind,
        provider_reference: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let inner = self.inner.lock().await;
        let session_id = match inner
            .by_provider_ref
            .get(&(gateway, provider_reference.to_string()))
        {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        Ok(inner.by_session.get(&session_id).cloned())
    }

    async fn update_if_status(
        &self,
        session_id: &str,
        expected: IntentStatus,
        patch: IntentPatch,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.inner.lock().await;

        let current = inner
            .by_session
            .get(session_id)
            .map(|i| i.status)
            .ok_or_else(|| StoreError::NotFound(format!("intent {}", session_id)))?;
        if current != expected {
            return Ok(CasOutcome::StateMismatch(current));
        }

        // uniqueness of (gateway, provider_reference) before mutating
        if let (Some(gateway), Some(reference)) = (patch.gateway, patch.gateway_payment_id.clone())
        {
            let key = (gateway, reference);
            if let Some(owner) = inner.by_provider_ref.get(&key) {
                if owner != session_id {
                    return Err(StoreError::Conflict(format!(
                        "provider reference {} already mapped",
                        key.1
                    )));
                }
            }
            inner.by_provider_ref.insert(key, session_id.to_string());
        }

        let intent = inner
            .by_session
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("intent {}", session_id)))?;
        apply_patch(intent, patch);
        Ok(CasOutcome::Applied(intent.clone()))
    }

    async fn append_webhook(
        &self,
        session_id: &str,
        record: WebhookRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let intent = inner
            .by_session
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("intent {}", session_id)))?;
        intent.webhook_history.push(record);
        Ok(())
    }

    async fn list_stuck(
        &self,
        statuses: &[IntentStatus],
        older_than: Duration,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let cutoff = Utc::now() - older_than;
        let inner = self.inner.lock().await;
        Ok(inner
            .by_session
            .values()
            .filter(|i| statuses.contains(&i.status) && i.updated_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<HashMap<Uuid, Transaction>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn create_if_absent(&self, tx: &Transaction) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.contains_key(&tx.transaction_id) {
            return Ok(false);
        }
        inner.insert(tx.transaction_id, tx.clone());
        Ok(true)
    }

    async fn get(&self, transaction_id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.get(&transaction_id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<Transaction>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Transaction> = inner
            .values()
            .filter(|t| t.user_id == user_id && (include_deleted || !t.deleted))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update_status_if(
        &self,
        transaction_id: Uuid,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let tx = inner
            .get_mut(&transaction_id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", transaction_id)))?;
        if tx.status != expected {
            return Ok(false);
        }
        tx.status = next;
        tx.updated_at = Utc::now();
        Ok(true)
    }

    async fn add_related(
        &self,
        transaction_id: Uuid,
        related_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let tx = inner
            .get_mut(&transaction_id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", transaction_id)))?;
        if !tx.related_transactions.contains(&related_id) {
            tx.related_transactions.push(related_id);
            tx.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn soft_delete(&self, transaction_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let tx = inner
            .get_mut(&transaction_id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", transaction_id)))?;
        tx.deleted = true;
        tx.deleted_at = Some(Utc::now());
        tx.updated_at = Utc::now();
        Ok(())
    }

    async fn balance(&self, user_id: Uuid, currency: &str) -> Result<BigDecimal, StoreError> {
        let inner = self.inner.lock().await;
        let mut total = BigDecimal::from(0);
        for tx in inner.values() {
            if tx.deleted || tx.user_id != user_id || tx.amount.currency != currency {
                continue;
            }
            let counts = tx.status == TransactionStatus::Completed
                || (tx.tx_type == TransactionType::Withdrawal && tx.status.reserves_funds());
            if counts {
                total += &tx.amount.amount;
            }
        }
        Ok(total)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use serde_json::json;

    fn intent() -> PaymentIntent {
        PaymentIntent::new(
            Uuid::new_v4(),
            Money::parse("5000", "XOF").unwrap(),
            json!({"plan": "premium"}),
        )
    }

    #[tokio::test]
    async fn test_cas_applies_when_status_matches() {
        let store = MemoryIntentStore::new();
        let i = intent();
        store.insert(&i).await.unwrap();

        let outcome = store
            .update_if_status(
                &i.session_id,
                IntentStatus::PendingUserInput,
                IntentPatch::to(IntentStatus::PendingProvider),
            )
            .await
            .unwrap();

        match outcome {
            CasOutcome::Applied(updated) => {
                assert_eq!(updated.status, IntentStatus::PendingProvider)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_expectation() {
        let store = MemoryIntentStore::new();
        let i = intent();
        store.insert(&i).await.unwrap();
        store
            .update_if_status(
                &i.session_id,
                IntentStatus::PendingUserInput,
                IntentPatch::to(IntentStatus::PendingProvider),
            )
            .await
            .unwrap();

        let outcome = store
            .update_if_status(
                &i.session_id,
                IntentStatus::PendingUserInput,
                IntentPatch::to(IntentStatus::Error),
            )
            .await
            .unwrap();

        match outcome {
            CasOutcome::StateMismatch(actual) => {
                assert_eq!(actual, IntentStatus::PendingProvider)
            }
            other => panic!("unexpected: {:?}", other),
        }
        // and nothing changed
        let stored = store.get(&i.session_id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::PendingProvider);
    }

    #[tokio::test]
    async fn test_provider_ref_is_unique_per_gateway() {
        let store = MemoryIntentStore::new();
        let a = intent();
        let b = intent();
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let mut patch = IntentPatch::to(IntentStatus::Processing);
        patch.gateway = Some(GatewayKind::CinetPay);
        patch.gateway_payment_id = Some("CP-1".to_string());
        store
            .update_if_status(&a.session_id, IntentStatus::PendingUserInput, patch.clone())
            .await
            .unwrap();

        let err = store
            .update_if_status(&b.session_id, IntentStatus::PendingUserInput, patch)
            .await;
        assert!(matches!(err, Err(StoreError::Conflict(_))));

        let found = store
            .find_by_provider_ref(GatewayKind::CinetPay, "CP-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.session_id, a.session_id);
    }

    #[tokio::test]
    async fn test_metadata_patch_preserves_caller_keys() {
        let store = MemoryIntentStore::new();
        let i = intent();
        store.insert(&i).await.unwrap();

        let mut patch = IntentPatch::to(IntentStatus::Error);
        patch.metadata_patch = Some(json!({"admin_note": "forced"}));
        store
            .update_if_status(&i.session_id, IntentStatus::PendingUserInput, patch)
            .await
            .unwrap();

        let stored = store.get(&i.session_id).await.unwrap().unwrap();
        assert_eq!(stored.metadata["plan"], "premium");
        assert_eq!(stored.metadata["admin_note"], "forced");
    }

    #[tokio::test]
    async fn test_ledger_create_if_absent_is_idempotent() {
        let store = MemoryLedgerStore::new();
        let tx = Transaction::payment_for_session(
            "pay_x",
            Uuid::new_v4(),
            Money::parse("5000", "XOF").unwrap(),
        );

        assert!(store.create_if_absent(&tx).await.unwrap());
        assert!(!store.create_if_absent(&tx).await.unwrap());

        let rows = store.list_for_user(tx.user_id, false).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_deleted_rows_leave_reads_and_balance() {
        let store = MemoryLedgerStore::new();
        let user = Uuid::new_v4();
        let tx = Transaction::new(
            Uuid::new_v4(),
            user,
            TransactionType::Deposit,
            Money::parse("100", "EUR").unwrap(),
            TransactionStatus::Completed,
            None,
        );
        store.create_if_absent(&tx).await.unwrap();
        assert_eq!(
            store.balance(user, "EUR").await.unwrap(),
            BigDecimal::from(100)
        );

        store.soft_delete(tx.transaction_id).await.unwrap();

        assert!(store.list_for_user(user, false).await.unwrap().is_empty());
        assert_eq!(store.list_for_user(user, true).await.unwrap().len(), 1);
        assert_eq!(
            store.balance(user, "EUR").await.unwrap(),
            BigDecimal::from(0)
        );
    }

    #[tokio::test]
    async fn test_balance_counts_withdrawal_reservations() {
        let store = MemoryLedgerStore::new();
        let user = Uuid::new_v4();
        let deposit = Transaction::new(
            Uuid::new_v4(),
            user,
            TransactionType::Deposit,
            Money::parse("100", "EUR").unwrap(),
            TransactionStatus::Completed,
            None,
        );
        let withdrawal = Transaction::new(
            Uuid::new_v4(),
            user,
            TransactionType::Withdrawal,
            Money::parse("-40", "EUR").unwrap(),
            TransactionStatus::PendingAdminApproval,
            None,
        );
        store.create_if_absent(&deposit).await.unwrap();
        store.create_if_absent(&withdrawal).await.unwrap();

        assert_eq!(
            store.balance(user, "EUR").await.unwrap(),
            BigDecimal::from(60)
        );
    }
}
