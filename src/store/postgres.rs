//! Postgres adapters for the storage ports. The conditional update is a
//! single UPDATE guarded by the expected status; create-if-absent is an
//! INSERT .. ON CONFLICT DO NOTHING. Row types stay private to the adapter.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::intent::{IntentStatus, PaymentIntent, WebhookRecord};
use crate::domain::money::Money;
use crate::domain::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::gateways::GatewayKind;
use crate::store::{CasOutcome, IntentPatch, IntentStore, LedgerStore, StoreError};

#[derive(Clone)]
pub struct PgIntentStore {
    pool: PgPool,
}

impl PgIntentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct IntentRow {
    session_id: String,
    user_id: Uuid,
    amount: BigDecimal,
    currency: String,
    status: String,
    gateway: Option<String>,
    gateway_payment_id: Option<String>,
    pay_amount: Option<BigDecimal>,
    pay_currency: Option<String>,
    crypto_address: Option<String>,
    paid_amount: BigDecimal,
    paid_currency: String,
    last_error: Option<String>,
    webhook_history: serde_json::Value,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl IntentRow {
    fn into_domain(self) -> Result<PaymentIntent, StoreError> {
        let status = self
            .status
            .parse::<IntentStatus>()
            .map_err(StoreError::Conflict)?;
        let gateway = match self.gateway {
            Some(raw) => Some(raw.parse::<GatewayKind>().map_err(StoreError::Conflict)?),
            None => None,
        };
        let pay_amount = match (self.pay_amount, self.pay_currency) {
            (Some(amount), Some(currency)) => Some(Money::new(amount, currency)),
            _ => None,
        };
        let webhook_history: Vec<WebhookRecord> = serde_json::from_value(self.webhook_history)?;

        Ok(PaymentIntent {
            session_id: self.session_id,
            user_id: self.user_id,
            amount: Money::new(self.amount, self.currency),
            status,
            gateway,
            gateway_payment_id: self.gateway_payment_id,
            pay_amount,
            crypto_address: self.crypto_address,
            paid_amount: Money::new(self.paid_amount, self.paid_currency),
            last_error: self.last_error,
            webhook_history,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const INTENT_COLUMNS: &str = "session_id, user_id, amount, currency, status, gateway, \
     gateway_payment_id, pay_amount, pay_currency, crypto_address, paid_amount, \
     paid_currency, last_error, webhook_history, metadata, created_at, updated_at";

#[async_trait]
impl IntentStore for PgIntentStore {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents (
                session_id, user_id, amount, currency, status, gateway,
                gateway_payment_id, pay_amount, pay_currency, crypto_address,
                paid_amount, paid_currency, last_error, webhook_history, metadata,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(&intent.session_id)
        .bind(intent.user_id)
        .bind(&intent.amount.amount)
        .bind(&intent.amount.currency)
        .bind(intent.status.as_str())
        .bind(intent.gateway.map(|g| g.as_str()))
        .bind(&intent.gateway_payment_id)
        .bind(intent.pay_amount.as_ref().map(|m| m.amount.clone()))
        .bind(intent.pay_amount.as_ref().map(|m| m.currency.clone()))
        .bind(&intent.crypto_address)
        .bind(&intent.paid_amount.amount)
        .bind(&intent.paid_amount.currency)
        .bind(&intent.last_error)
        .bind(serde_json::to_value(&intent.webhook_history)?)
        .bind(&intent.metadata)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<PaymentIntent>, StoreError> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE session_id = $1",
            INTENT_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(IntentRow::into_domain).transpose()
    }

    async fn find_by_provider_ref(
        &self,
        gateway: GatewayKind,
        provider_reference: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE gateway = $1 AND gateway_payment_id = $2",
            INTENT_COLUMNS
        ))
        .bind(gateway.as_str())
        .bind(provider_reference)
        .fetch_optional(&self.pool)
        .await?;
        row.map(IntentRow::into_domain).transpose()
    }

    async fn update_if_status(
        &self,
        session_id: &str,
        expected: IntentStatus,
        patch: IntentPatch,
    ) -> Result<CasOutcome, StoreError> {
        // One guarded UPDATE; rows_affected tells us whether we won.
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            r#"
            UPDATE payment_intents SET
                status = COALESCE($3, status),
                gateway = CASE WHEN $10 THEN NULL ELSE COALESCE($4, gateway) END,
                gateway_payment_id = CASE WHEN $10 THEN NULL ELSE COALESCE($5, gateway_payment_id) END,
                pay_amount = CASE WHEN $10 THEN NULL ELSE COALESCE($6, pay_amount) END,
                pay_currency = CASE WHEN $10 THEN NULL ELSE COALESCE($7, pay_currency) END,
                crypto_address = CASE WHEN $10 THEN NULL ELSE COALESCE($8, crypto_address) END,
                paid_amount = COALESCE($9, paid_amount),
                paid_currency = COALESCE($11, paid_currency),
                last_error = CASE WHEN $12 THEN $13 ELSE last_error END,
                metadata = CASE WHEN $14::jsonb IS NULL THEN metadata ELSE metadata || $14::jsonb END,
                updated_at = NOW()
            WHERE session_id = $1 AND status = $2
            RETURNING {}
            "#,
            INTENT_COLUMNS
        ))
        .bind(session_id)
        .bind(expected.as_str())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.gateway.map(|g| g.as_str()))
        .bind(&patch.gateway_payment_id)
        .bind(patch.pay_amount.as_ref().map(|m| m.amount.clone()))
        .bind(patch.pay_amount.as_ref().map(|m| m.currency.clone()))
        .bind(&patch.crypto_address)
        .bind(patch.paid_amount.as_ref().map(|m| m.amount.clone()))
        .bind(patch.clear_provider_fields)
        .bind(patch.paid_amount.as_ref().map(|m| m.currency.clone()))
        .bind(patch.last_error.is_some())
        .bind(patch.last_error.clone().flatten())
        .bind(patch.metadata_patch.clone())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(CasOutcome::Applied(row.into_domain()?)),
            None => {
                let actual: Option<String> = sqlx::query_scalar(
                    "SELECT status FROM payment_intents WHERE session_id = $1",
                )
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
                match actual {
                    Some(status) => Ok(CasOutcome::StateMismatch(
                        status.parse::<IntentStatus>().map_err(StoreError::Conflict)?,
                    )),
                    None => Err(StoreError::NotFound(format!("intent {}", session_id))),
                }
            }
        }
    }

    async fn append_webhook(
        &self,
        session_id: &str,
        record: WebhookRecord,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_intents
            SET webhook_history = webhook_history || $2::jsonb
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(serde_json::to_value(vec![record])?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("intent {}", session_id)));
        }
        Ok(())
    }

    async fn list_stuck(
        &self,
        statuses: &[IntentStatus],
        older_than: Duration,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let cutoff = Utc::now() - older_than;
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query_as::<_, IntentRow>(&format!(
            r#"
            SELECT {} FROM payment_intents
            WHERE status = ANY($1) AND updated_at <= $2
            ORDER BY updated_at ASC
            LIMIT 100
            "#,
            INTENT_COLUMNS
        ))
        .bind(&names)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(IntentRow::into_domain).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    transaction_id: Uuid,
    user_id: Uuid,
    tx_type: String,
    amount: BigDecimal,
    currency: String,
    fee: BigDecimal,
    status: String,
    reference: Option<String>,
    related_transactions: Vec<Uuid>,
    deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> Result<Transaction, StoreError> {
        Ok(Transaction {
            transaction_id: self.transaction_id,
            user_id: self.user_id,
            tx_type: self
                .tx_type
                .parse::<TransactionType>()
                .map_err(StoreError::Conflict)?,
            amount: Money::new(self.amount, self.currency.clone()),
            fee: Money::new(self.fee, self.currency),
            status: self
                .status
                .parse::<TransactionStatus>()
                .map_err(StoreError::Conflict)?,
            reference: self.reference,
            related_transactions: self.related_transactions,
            deleted: self.deleted,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_if_absent(&self, tx: &Transaction) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_transactions (
                transaction_id, user_id, tx_type, amount, currency, fee, status,
                reference, related_transactions, deleted, deleted_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(tx.transaction_id)
        .bind(tx.user_id)
        .bind(tx.tx_type.as_str())
        .bind(&tx.amount.amount)
        .bind(&tx.amount.currency)
        .bind(&tx.fee.amount)
        .bind(tx.status.as_str())
        .bind(&tx.reference)
        .bind(&tx.related_transactions)
        .bind(tx.deleted)
        .bind(tx.deleted_at)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, transaction_id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM ledger_transactions WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TransactionRow::into_domain).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT * FROM ledger_transactions
            WHERE user_id = $1 AND (deleted = FALSE OR $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn update_status_if(
        &self,
        transaction_id: Uuid,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_transactions
            SET status = $3, updated_at = NOW()
            WHERE transaction_id = $1 AND status = $2 AND deleted = FALSE
            "#,
        )
        .bind(transaction_id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_related(
        &self,
        transaction_id: Uuid,
        related_id: Uuid,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_transactions
            SET related_transactions = array_append(related_transactions, $2),
                updated_at = NOW()
            WHERE transaction_id = $1 AND NOT ($2 = ANY(related_transactions))
            "#,
        )
        .bind(transaction_id)
        .bind(related_id)
        .execute(&self.pool)
        .await?;
        let _ = result;
        Ok(())
    }

    async fn soft_delete(&self, transaction_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_transactions
            SET deleted = TRUE, deleted_at = NOW(), updated_at = NOW()
            WHERE transaction_id = $1 AND deleted = FALSE
            "#,
        )
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "transaction {}",
                transaction_id
            )));
        }
        Ok(())
    }

    async fn balance(&self, user_id: Uuid, currency: &str) -> Result<BigDecimal, StoreError> {
        let total: Option<BigDecimal> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount) FROM ledger_transactions
            WHERE user_id = $1
              AND currency = $2
              AND deleted = FALSE
              AND (
                    status = 'completed'
                 OR (tx_type = 'withdrawal' AND status IN (
                        'pending', 'processing',
                        'pending_otp_verification', 'pending_admin_approval'))
              )
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or_else(|| BigDecimal::from(0)))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_pool() -> PgPool {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
        let pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to test DB");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations on test DB");
        pool
    }

    #[tokio::test]
    #[ignore] // requires a Postgres instance
    async fn test_intent_cas_round_trip() {
        let pool = test_pool().await;
        let store = PgIntentStore::new(pool);

        let intent = PaymentIntent::new(
            Uuid::new_v4(),
            Money::parse("5000", "XOF").unwrap(),
            json!({"plan": "basic"}),
        );
        store.insert(&intent).await.unwrap();

        let outcome = store
            .update_if_status(
                &intent.session_id,
                IntentStatus::PendingUserInput,
                IntentPatch::to(IntentStatus::PendingProvider),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Applied(_)));

        let stale = store
            .update_if_status(
                &intent.session_id,
                IntentStatus::PendingUserInput,
                IntentPatch::to(IntentStatus::Error),
            )
            .await
            .unwrap();
        assert!(matches!(
            stale,
            CasOutcome::StateMismatch(IntentStatus::PendingProvider)
        ));
    }

    #[tokio::test]
    #[ignore] // requires a Postgres instance
    async fn test_ledger_create_if_absent() {
        let pool = test_pool().await;
        let store = PgLedgerStore::new(pool);

        let tx = Transaction::payment_for_session(
            &format!("pay_{}", Uuid::new_v4().simple()),
            Uuid::new_v4(),
            Money::parse("5000", "XOF").unwrap(),
        );
        assert!(store.create_if_absent(&tx).await.unwrap());
        assert!(!store.create_if_absent(&tx).await.unwrap());
    }
}
