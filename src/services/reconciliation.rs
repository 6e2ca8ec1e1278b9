//! Reconciliation engine. Both delivery paths (webhook push, sweep pull)
//! converge on `apply_event`, which drives the intent state machine under
//! the store's conditional-update primitive and owns the terminal side
//! effects: the ledger write and the completion callback.

use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::domain::event::CanonicalEvent;
use crate::domain::intent::{
    Effects, IntentStatus, PaymentIntent, Transition, TransitionPolicy, WebhookRecord, transition,
};
use crate::domain::money::Money;
use crate::domain::transaction::Transaction;
use crate::error::AppError;
use crate::gateways::{CheckoutTarget, GatewayKind, GatewayRegistry};
use crate::services::notifier::CompletionNotifier;
use crate::services::retry::{RetryPolicy, retry_with_backoff};
use crate::store::{CasOutcome, IntentPatch, IntentStore, LedgerStore};

pub struct NewIntent {
    pub user_id: Uuid,
    pub amount: Money,
    pub metadata: serde_json::Value,
}

#[derive(Debug)]
pub enum ApplyOutcome {
    Applied(PaymentIntent),
    /// Either the edge is not in the graph or a concurrent delivery won the
    /// conditional update. Both are no-ops by design.
    Ignored(&'static str),
}

pub struct ReconciliationEngine {
    intents: Arc<dyn IntentStore>,
    ledger: Arc<dyn LedgerStore>,
    gateways: GatewayRegistry,
    notifier: Arc<dyn CompletionNotifier>,
    policy: TransitionPolicy,
    retry: RetryPolicy,
}

impl ReconciliationEngine {
    pub fn new(
        intents: Arc<dyn IntentStore>,
        ledger: Arc<dyn LedgerStore>,
        gateways: GatewayRegistry,
        notifier: Arc<dyn CompletionNotifier>,
        policy: TransitionPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            intents,
            ledger,
            gateways,
            notifier,
            policy,
            retry,
        }
    }

    pub fn intents(&self) -> &Arc<dyn IntentStore> {
        &self.intents
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub async fn create_intent(&self, new: NewIntent) -> Result<PaymentIntent, AppError> {
        if !new.amount.is_positive() {
            return Err(AppError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        let metadata = if new.metadata.is_object() {
            new.metadata
        } else {
            json!({})
        };
        let intent = PaymentIntent::new(new.user_id, new.amount, metadata);
        self.intents.insert(&intent).await?;
        tracing::info!(session_id = %intent.session_id, user_id = %intent.user_id, "payment intent created");
        Ok(intent)
    }

    pub async fn get_status(&self, session_id: &str) -> Result<PaymentIntent, AppError> {
        self.intents
            .get(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("intent {}", session_id)))
    }

    /// Provider selection + initiation. The intent parks in PendingProvider
    /// while the adapter call is in flight; transient transport errors are
    /// retried with backoff, anything final parks it in Error with the
    /// reason on the record.
    pub async fn submit_payment_details(
        &self,
        session_id: &str,
        kind: GatewayKind,
    ) -> Result<CheckoutTarget, AppError> {
        let adapter = self.gateways.get(kind)?;

        let mut claim = IntentPatch::to(IntentStatus::PendingProvider);
        claim.gateway = Some(kind);
        let intent = match self
            .intents
            .update_if_status(session_id, IntentStatus::PendingUserInput, claim)
            .await?
        {
            CasOutcome::Applied(intent) => intent,
            CasOutcome::StateMismatch(actual) => {
                return Err(AppError::IllegalTransition(format!(
                    "cannot submit payment details from {}",
                    actual.as_str()
                )));
            }
        };

        let initiation = {
            let adapter = adapter.clone();
            retry_with_backoff(&self.retry, move || {
                let adapter = adapter.clone();
                let intent = intent.clone();
                async move { adapter.initiate(&intent).await }
            })
            .await
        };

        let initiation = match initiation {
            Ok(initiation) => initiation,
            Err(err) => {
                self.park_in_error(session_id, IntentStatus::PendingProvider, &err)
                    .await;
                return Err(err);
            }
        };

        let mut patch = match &initiation.checkout {
            CheckoutTarget::RedirectUrl { .. } => IntentPatch::to(IntentStatus::Processing),
            CheckoutTarget::DepositAddress {
                address,
                pay_amount,
            } => {
                let mut patch = IntentPatch::to(IntentStatus::WaitingForCryptoDeposit);
                patch.crypto_address = Some(address.clone());
                patch.pay_amount = Some(pay_amount.clone());
                patch.paid_amount = Some(Money::zero(pay_amount.currency.clone()));
                patch
            }
        };
        patch.gateway = Some(kind);
        patch.gateway_payment_id = Some(initiation.provider_reference.clone());

        match self
            .intents
            .update_if_status(session_id, IntentStatus::PendingProvider, patch)
            .await?
        {
            CasOutcome::Applied(updated) => {
                tracing::info!(
                    session_id,
                    gateway = %kind,
                    provider_reference = %initiation.provider_reference,
                    status = updated.status.as_str(),
                    "payment initiated"
                );
                Ok(initiation.checkout)
            }
            CasOutcome::StateMismatch(actual) => {
                // a webhook raced ahead of our own bookkeeping; the
                // initiation result still stands
                tracing::warn!(
                    session_id,
                    actual = actual.as_str(),
                    "intent advanced during initiation"
                );
                Ok(initiation.checkout)
            }
        }
    }

    /// Webhook entry point. Authentication failure produces no state change
    /// anywhere and is never retried.
    pub async fn handle_webhook(
        &self,
        kind: GatewayKind,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ApplyOutcome, AppError> {
        let adapter = self.gateways.get(kind)?;

        if !adapter.verify_inbound(headers, body) {
            tracing::warn!(gateway = %kind, "webhook signature verification failed");
            return Err(AppError::Unauthorized(
                "webhook signature verification failed".to_string(),
            ));
        }

        let event = adapter.to_canonical_event(body)?;
        let intent = self
            .intents
            .find_by_provider_ref(kind, &event.provider_reference)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no intent for {} reference {}",
                    kind, event.provider_reference
                ))
            })?;

        let record = WebhookRecord {
            at: Utc::now(),
            origin: "webhook".to_string(),
            reported_status: event.status.as_str().to_string(),
            payload: serde_json::from_slice(body).unwrap_or(serde_json::Value::Null),
        };
        self.intents
            .append_webhook(&intent.session_id, record)
            .await?;

        self.apply_event(&intent, &event, "webhook").await
    }

    /// Sweep entry point: poll the provider and feed the result through the
    /// same transition logic. Poll failures fail open.
    pub async fn poll_and_reconcile(&self, intent: &PaymentIntent) -> Result<ApplyOutcome, AppError> {
        let kind = intent.gateway.ok_or_else(|| {
            AppError::Internal(format!("intent {} has no gateway", intent.session_id))
        })?;

        let reference = match &intent.gateway_payment_id {
            Some(reference) => reference.clone(),
            None => {
                // initiation never completed; nothing to poll against
                let err = AppError::GatewayRejected(
                    "provider initiation never completed".to_string(),
                );
                self.park_in_error(&intent.session_id, intent.status, &err)
                    .await;
                return Ok(ApplyOutcome::Ignored("initiation never completed"));
            }
        };

        let adapter = self.gateways.get(kind)?;
        let event = adapter.poll_status(&reference).await?;

        let record = WebhookRecord {
            at: Utc::now(),
            origin: "sweep".to_string(),
            reported_status: event.status.as_str().to_string(),
            payload: json!({"provider_reference": reference}),
        };
        self.intents
            .append_webhook(&intent.session_id, record)
            .await?;

        self.apply_event(intent, &event, "sweep").await
    }

    /// The idempotency guard lives here: one pure transition, one
    /// conditional update. A state mismatch means another delivery already
    /// advanced the intent, and this application becomes a no-op.
    pub async fn apply_event(
        &self,
        intent: &PaymentIntent,
        event: &CanonicalEvent,
        origin: &str,
    ) -> Result<ApplyOutcome, AppError> {
        let (next, paid_amount, effects) =
            match transition(intent, event, &self.policy) {
                Transition::Apply {
                    next,
                    paid_amount,
                    effects,
                } => (next, paid_amount, effects),
                Transition::Ignore { reason } => {
                    tracing::debug!(
                        session_id = %intent.session_id,
                        origin,
                        status = intent.status.as_str(),
                        reason,
                        "event ignored"
                    );
                    return Ok(ApplyOutcome::Ignored(reason));
                }
            };

        let mut patch = IntentPatch::to(next);
        patch.paid_amount = paid_amount;
        patch.last_error = Some(event.error_details.clone());

        let updated = match self
            .intents
            .update_if_status(&intent.session_id, intent.status, patch)
            .await?
        {
            CasOutcome::Applied(updated) => updated,
            CasOutcome::StateMismatch(actual) => {
                tracing::debug!(
                    session_id = %intent.session_id,
                    origin,
                    expected = intent.status.as_str(),
                    actual = actual.as_str(),
                    "conditional update lost to a concurrent delivery"
                );
                return Ok(ApplyOutcome::Ignored("concurrent delivery won"));
            }
        };

        tracing::info!(
            session_id = %updated.session_id,
            origin,
            from = intent.status.as_str(),
            to = updated.status.as_str(),
            "intent transition applied"
        );

        self.run_effects(&updated, effects).await?;
        Ok(ApplyOutcome::Applied(updated))
    }

    /// Audited operator override: ERROR/FAILED straight to SUCCEEDED,
    /// through the same side-effect pipeline as a natural success.
    pub async fn force_succeed(
        &self,
        session_id: &str,
        actor: &str,
        note: &str,
    ) -> Result<PaymentIntent, AppError> {
        if note.trim().is_empty() {
            return Err(AppError::Validation(
                "a reason note is required to force-succeed an intent".to_string(),
            ));
        }

        let intent = self.get_status(session_id).await?;
        match intent.status {
            IntentStatus::Succeeded => {
                return Err(AppError::IllegalTransition(
                    "intent already succeeded".to_string(),
                ));
            }
            IntentStatus::Error | IntentStatus::Failed => {}
            other => {
                return Err(AppError::IllegalTransition(format!(
                    "cannot force-succeed from {}",
                    other.as_str()
                )));
            }
        }

        let mut patch = IntentPatch::to(IntentStatus::Succeeded);
        patch.metadata_patch = Some(json!({
            "admin_recovery": {
                "action": "force_succeed",
                "actor": actor,
                "note": note,
                "at": Utc::now().to_rfc3339(),
            }
        }));

        let updated = match self
            .intents
            .update_if_status(session_id, intent.status, patch)
            .await?
        {
            CasOutcome::Applied(updated) => updated,
            CasOutcome::StateMismatch(actual) => {
                return Err(AppError::IllegalTransition(format!(
                    "intent moved to {} while forcing",
                    actual.as_str()
                )));
            }
        };

        tracing::warn!(session_id, actor, "intent force-succeeded by operator");
        self.run_effects(&updated, Effects::completion()).await?;
        Ok(updated)
    }

    /// ERROR back to the start of the funnel. Provider bookkeeping is
    /// cleared; history and metadata stay for audit.
    pub async fn reset_from_error(&self, session_id: &str) -> Result<PaymentIntent, AppError> {
        let intent = self.get_status(session_id).await?;
        if intent.status != IntentStatus::Error {
            return Err(AppError::IllegalTransition(format!(
                "cannot reset intent in {}",
                intent.status.as_str()
            )));
        }

        let mut patch = IntentPatch::to(IntentStatus::PendingUserInput);
        patch.clear_provider_fields = true;
        patch.last_error = Some(None);
        patch.metadata_patch = Some(json!({
            "admin_recovery": {
                "action": "reset_from_error",
                "at": Utc::now().to_rfc3339(),
            }
        }));

        match self
            .intents
            .update_if_status(session_id, IntentStatus::Error, patch)
            .await?
        {
            CasOutcome::Applied(updated) => {
                tracing::info!(session_id, "intent reset from error");
                Ok(updated)
            }
            CasOutcome::StateMismatch(actual) => Err(AppError::IllegalTransition(format!(
                "intent moved to {} during reset",
                actual.as_str()
            ))),
        }
    }

    /// Terminal success effects. The ledger write is idempotent by
    /// transaction_id, so a crash-and-retry between the CAS and here cannot
    /// double-book; the notifier is expected to dedupe on session_id.
    async fn run_effects(&self, intent: &PaymentIntent, effects: Effects) -> Result<(), AppError> {
        if effects.write_ledger {
            let tx = Transaction::payment_for_session(
                &intent.session_id,
                intent.user_id,
                intent.amount.clone(),
            );
            let created = self.ledger.create_if_absent(&tx).await?;
            if created {
                tracing::info!(
                    session_id = %intent.session_id,
                    transaction_id = %tx.transaction_id,
                    "ledger entry written"
                );
            } else {
                tracing::debug!(
                    session_id = %intent.session_id,
                    transaction_id = %tx.transaction_id,
                    "ledger entry already present"
                );
            }
        }

        if effects.notify {
            let notifier = self.notifier.clone();
            let intent_for_retry = intent.clone();
            let result = retry_with_backoff(&self.retry, move || {
                let notifier = notifier.clone();
                let intent = intent_for_retry.clone();
                async move { notifier.payment_completed(&intent).await }
            })
            .await;
            if let Err(err) = result {
                // the intent stays settled; delivery is the collaborator's
                // problem to reconcile from here
                tracing::error!(
                    session_id = %intent.session_id,
                    "completion notification failed after retries: {}",
                    err
                );
            }
        }

        Ok(())
    }

    async fn park_in_error(&self, session_id: &str, expected: IntentStatus, err: &AppError) {
        let mut patch = IntentPatch::to(IntentStatus::Error);
        patch.last_error = Some(Some(err.to_string()));
        match self
            .intents
            .update_if_status(session_id, expected, patch)
            .await
        {
            Ok(CasOutcome::Applied(_)) => {
                tracing::warn!(session_id, "intent parked in error: {}", err);
            }
            Ok(CasOutcome::StateMismatch(actual)) => {
                tracing::warn!(
                    session_id,
                    actual = actual.as_str(),
                    "intent advanced before it could be parked in error"
                );
            }
            Err(store_err) => {
                tracing::error!(session_id, "failed to park intent in error: {}", store_err);
            }
        }
    }
}
