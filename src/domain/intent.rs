//! PaymentIntent: the record tracking one attempt by a user to pay, from
//! creation through terminal settlement, and the pure transition function
//! that is the only way its status moves.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::{CanonicalEvent, CanonicalStatus};
use crate::domain::money::Money;
use crate::gateways::GatewayKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    PendingUserInput,
    PendingProvider,
    Processing,
    WaitingForCryptoDeposit,
    PartiallyPaid,
    Succeeded,
    Failed,
    Error,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::PendingUserInput => "pending_user_input",
            IntentStatus::PendingProvider => "pending_provider",
            IntentStatus::Processing => "processing",
            IntentStatus::WaitingForCryptoDeposit => "waiting_for_crypto_deposit",
            IntentStatus::PartiallyPaid => "partially_paid",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Failed => "failed",
            IntentStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Succeeded | IntentStatus::Failed)
    }
}

impl std::str::FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_user_input" => Ok(IntentStatus::PendingUserInput),
            "pending_provider" => Ok(IntentStatus::PendingProvider),
            "processing" => Ok(IntentStatus::Processing),
            "waiting_for_crypto_deposit" => Ok(IntentStatus::WaitingForCryptoDeposit),
            "partially_paid" => Ok(IntentStatus::PartiallyPaid),
            "succeeded" => Ok(IntentStatus::Succeeded),
            "failed" => Ok(IntentStatus::Failed),
            "error" => Ok(IntentStatus::Error),
            other => Err(format!("unknown intent status: {}", other)),
        }
    }
}

/// One entry in the append-only webhook audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub at: DateTime<Utc>,
    /// "webhook", "sweep" or "admin" -- which path produced the event.
    pub origin: String,
    pub reported_status: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub session_id: String,
    pub user_id: Uuid,
    /// Requested amount in the user-facing currency.
    pub amount: Money,
    pub status: IntentStatus,
    pub gateway: Option<GatewayKind>,
    pub gateway_payment_id: Option<String>,
    /// What the payer must actually send, when it differs from `amount`
    /// (on-chain deposit paths).
    pub pay_amount: Option<Money>,
    pub crypto_address: Option<String>,
    /// Running total actually received. Monotonically non-decreasing.
    pub paid_amount: Money,
    pub last_error: Option<String>,
    pub webhook_history: Vec<WebhookRecord>,
    /// Opaque caller-owned bag; preserved verbatim across transitions.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn new(user_id: Uuid, amount: Money, metadata: serde_json::Value) -> Self {
        let now = Utc::now();
        let paid = Money::zero(amount.currency.clone());
        Self {
            session_id: format!("pay_{}", Uuid::new_v4().simple()),
            user_id,
            amount,
            status: IntentStatus::PendingUserInput,
            gateway: None,
            gateway_payment_id: None,
            pay_amount: None,
            crypto_address: None,
            paid_amount: paid,
            last_error: None,
            webhook_history: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Target the payer has to cover: `pay_amount` on deposit paths, the
    /// face amount otherwise.
    pub fn amount_due(&self) -> &Money {
        self.pay_amount.as_ref().unwrap_or(&self.amount)
    }
}

/// Settlement tolerance and rounding policy for the crypto path.
#[derive(Debug, Clone)]
pub struct TransitionPolicy {
    /// An intent settles once paid_amount >= pay_amount - epsilon.
    pub underpay_epsilon: BigDecimal,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            underpay_epsilon: BigDecimal::from(0),
        }
    }
}

/// Side effects owed after a transition is durably applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    pub write_ledger: bool,
    pub notify: bool,
}

impl Effects {
    pub fn completion() -> Self {
        Self {
            write_ledger: true,
            notify: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Transition {
    Apply {
        next: IntentStatus,
        /// New cumulative paid total, when the event moved it.
        paid_amount: Option<Money>,
        effects: Effects,
    },
    /// The event does not apply to the current state. Never an error: the
    /// reconciliation paths treat this as a no-op.
    Ignore { reason: &'static str },
}

/// The state machine. Pure: (current intent, canonical event) -> transition.
/// Every edge here is one of the legal edges; anything else is `Ignore`.
pub fn transition(
    intent: &PaymentIntent,
    event: &CanonicalEvent,
    policy: &TransitionPolicy,
) -> Transition {
    use CanonicalStatus as Ev;
    use IntentStatus as St;

    match (intent.status, event.status) {
        // Terminal states absorb everything; side effects never re-apply.
        (St::Succeeded, _) => Transition::Ignore {
            reason: "already succeeded",
        },
        (St::Failed, _) => Transition::Ignore {
            reason: "already failed",
        },
        // Error is recoverable only through the explicit reset operation.
        (St::Error, _) => Transition::Ignore {
            reason: "intent in error, awaiting reset",
        },
        // No provider chosen yet: nothing to reconcile against.
        (St::PendingUserInput, _) => Transition::Ignore {
            reason: "no provider selected",
        },

        (St::PendingProvider, Ev::Processing) => Transition::Apply {
            next: St::Processing,
            paid_amount: None,
            effects: Effects::default(),
        },
        (St::PendingProvider, Ev::Succeeded) | (St::Processing, Ev::Succeeded) => {
            Transition::Apply {
                next: St::Succeeded,
                paid_amount: settled_total(intent, event),
                effects: Effects::completion(),
            }
        }
        (St::PendingProvider, Ev::Failed) | (St::Processing, Ev::Failed) => Transition::Apply {
            next: St::Failed,
            paid_amount: None,
            effects: Effects::default(),
        },
        (St::PendingProvider, _) | (St::Processing, _) => Transition::Ignore {
            reason: "no status change reported",
        },

        (St::WaitingForCryptoDeposit, Ev::PartialPayment)
        | (St::PartiallyPaid, Ev::PartialPayment) => apply_partial(intent, event, policy),
        (St::WaitingForCryptoDeposit, Ev::Succeeded) | (St::PartiallyPaid, Ev::Succeeded) => {
            Transition::Apply {
                next: St::Succeeded,
                paid_amount: settled_total(intent, event),
                effects: Effects::completion(),
            }
        }
        (St::WaitingForCryptoDeposit, Ev::Failed) | (St::PartiallyPaid, Ev::Failed) => {
            // Expired or refunded upstream. paid_amount keeps whatever
            // arrived; the dispute trail lives in webhook_history.
            Transition::Apply {
                next: St::Failed,
                paid_amount: None,
                effects: Effects::default(),
            }
        }
        (St::WaitingForCryptoDeposit, _) | (St::PartiallyPaid, _) => Transition::Ignore {
            reason: "deposit not final yet",
        },
    }
}

fn apply_partial(
    intent: &PaymentIntent,
    event: &CanonicalEvent,
    policy: &TransitionPolicy,
) -> Transition {
    let reported = match &event.settled_amount {
        Some(amount) => amount,
        None => {
            return Transition::Ignore {
                reason: "partial payment without amount",
            }
        }
    };

    // Cumulative totals: a stale or replayed delivery can never lower the
    // running total.
    let new_paid = match intent.paid_amount.max(reported) {
        Ok(paid) => paid,
        Err(_) => {
            return Transition::Ignore {
                reason: "settled amount in wrong currency",
            }
        }
    };

    let due = intent.amount_due();
    match new_paid.covers(due, &policy.underpay_epsilon) {
        Ok(true) => Transition::Apply {
            next: IntentStatus::Succeeded,
            paid_amount: Some(new_paid),
            effects: Effects::completion(),
        },
        Ok(false) => Transition::Apply {
            next: IntentStatus::PartiallyPaid,
            paid_amount: Some(new_paid),
            effects: Effects::default(),
        },
        Err(_) => Transition::Ignore {
            reason: "settled amount in wrong currency",
        },
    }
}

/// Final paid total for a success event: the reported cumulative amount if
/// the provider sent one and it is higher, otherwise what we already hold.
fn settled_total(intent: &PaymentIntent, event: &CanonicalEvent) -> Option<Money> {
    match &event.settled_amount {
        Some(reported) => intent.paid_amount.max(reported).ok(),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intent_in(status: IntentStatus) -> PaymentIntent {
        let mut intent = PaymentIntent::new(
            Uuid::new_v4(),
            Money::parse("5000", "XOF").unwrap(),
            json!({}),
        );
        intent.status = status;
        intent.gateway = Some(GatewayKind::CinetPay);
        intent.gateway_payment_id = Some("CP-123".to_string());
        intent
    }

    fn crypto_intent(status: IntentStatus, paid: &str) -> PaymentIntent {
        let mut intent = PaymentIntent::new(
            Uuid::new_v4(),
            Money::parse("100", "EUR").unwrap(),
            json!({}),
        );
        intent.status = status;
        intent.gateway = Some(GatewayKind::NowPayments);
        intent.gateway_payment_id = Some("NP-9".to_string());
        intent.pay_amount = Some(Money::parse("0.01", "BTC").unwrap());
        intent.paid_amount = Money::parse(paid, "BTC").unwrap();
        intent
    }

    fn ev(status: CanonicalStatus) -> CanonicalEvent {
        CanonicalEvent::new("CP-123", status)
    }

    fn assert_ignored(t: Transition) {
        assert!(matches!(t, Transition::Ignore { .. }), "expected Ignore, got {:?}", t);
    }

    #[test]
    fn test_processing_success_completes_with_effects() {
        let intent = intent_in(IntentStatus::Processing);
        let t = transition(&intent, &ev(CanonicalStatus::Succeeded), &TransitionPolicy::default());
        match t {
            Transition::Apply { next, effects, .. } => {
                assert_eq!(next, IntentStatus::Succeeded);
                assert!(effects.write_ledger);
                assert!(effects.notify);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_succeeded_absorbs_replay() {
        let intent = intent_in(IntentStatus::Succeeded);
        assert_ignored(transition(&intent, &ev(CanonicalStatus::Succeeded), &TransitionPolicy::default()));
        assert_ignored(transition(&intent, &ev(CanonicalStatus::Failed), &TransitionPolicy::default()));
    }

    #[test]
    fn test_failed_is_terminal_for_events() {
        let intent = intent_in(IntentStatus::Failed);
        assert_ignored(transition(&intent, &ev(CanonicalStatus::Succeeded), &TransitionPolicy::default()));
    }

    #[test]
    fn test_error_only_leaves_via_reset() {
        let intent = intent_in(IntentStatus::Error);
        assert_ignored(transition(&intent, &ev(CanonicalStatus::Succeeded), &TransitionPolicy::default()));
    }

    #[test]
    fn test_pending_user_input_ignores_events() {
        let intent = intent_in(IntentStatus::PendingUserInput);
        assert_ignored(transition(&intent, &ev(CanonicalStatus::Succeeded), &TransitionPolicy::default()));
    }

    #[test]
    fn test_pending_provider_acknowledgement() {
        let intent = intent_in(IntentStatus::PendingProvider);
        let t = transition(&intent, &ev(CanonicalStatus::Processing), &TransitionPolicy::default());
        match t {
            Transition::Apply { next, effects, .. } => {
                assert_eq!(next, IntentStatus::Processing);
                assert_eq!(effects, Effects::default());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_processing_failure() {
        let intent = intent_in(IntentStatus::Processing);
        let event = ev(CanonicalStatus::Failed).with_error("REFUSED by issuer");
        match transition(&intent, &event, &TransitionPolicy::default()) {
            Transition::Apply { next, effects, .. } => {
                assert_eq!(next, IntentStatus::Failed);
                assert!(!effects.write_ledger);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_partial_deposit_accumulates() {
        let intent = crypto_intent(IntentStatus::WaitingForCryptoDeposit, "0");
        let event = CanonicalEvent::new("NP-9", CanonicalStatus::PartialPayment)
            .with_settled_amount(Money::parse("0.004", "BTC").unwrap());

        match transition(&intent, &event, &TransitionPolicy::default()) {
            Transition::Apply { next, paid_amount, effects } => {
                assert_eq!(next, IntentStatus::PartiallyPaid);
                assert_eq!(paid_amount.unwrap(), Money::parse("0.004", "BTC").unwrap());
                assert!(!effects.write_ledger);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_second_deposit_settles() {
        let intent = crypto_intent(IntentStatus::PartiallyPaid, "0.004");
        let event = CanonicalEvent::new("NP-9", CanonicalStatus::PartialPayment)
            .with_settled_amount(Money::parse("0.010", "BTC").unwrap());

        match transition(&intent, &event, &TransitionPolicy::default()) {
            Transition::Apply { next, paid_amount, effects } => {
                assert_eq!(next, IntentStatus::Succeeded);
                assert_eq!(paid_amount.unwrap(), Money::parse("0.010", "BTC").unwrap());
                assert!(effects.write_ledger);
                assert!(effects.notify);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_epsilon_absorbs_network_fee() {
        let intent = crypto_intent(IntentStatus::PartiallyPaid, "0.004");
        let policy = TransitionPolicy {
            underpay_epsilon: "0.0005".parse().unwrap(),
        };
        let event = CanonicalEvent::new("NP-9", CanonicalStatus::PartialPayment)
            .with_settled_amount(Money::parse("0.0096", "BTC").unwrap());

        match transition(&intent, &event, &policy) {
            Transition::Apply { next, .. } => assert_eq!(next, IntentStatus::Succeeded),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_stale_partial_replay_never_lowers_total() {
        let intent = crypto_intent(IntentStatus::PartiallyPaid, "0.008");
        let event = CanonicalEvent::new("NP-9", CanonicalStatus::PartialPayment)
            .with_settled_amount(Money::parse("0.004", "BTC").unwrap());

        match transition(&intent, &event, &TransitionPolicy::default()) {
            Transition::Apply { next, paid_amount, .. } => {
                assert_eq!(next, IntentStatus::PartiallyPaid);
                // monotonic: the stale total is discarded
                assert_eq!(paid_amount.unwrap(), Money::parse("0.008", "BTC").unwrap());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_partial_without_amount_is_ignored() {
        let intent = crypto_intent(IntentStatus::WaitingForCryptoDeposit, "0");
        let event = CanonicalEvent::new("NP-9", CanonicalStatus::PartialPayment);
        assert_ignored(transition(&intent, &event, &TransitionPolicy::default()));
    }

    #[test]
    fn test_deposit_expiry_keeps_partial_total() {
        let intent = crypto_intent(IntentStatus::PartiallyPaid, "0.004");
        let event = CanonicalEvent::new("NP-9", CanonicalStatus::Failed).with_error("expired");
        match transition(&intent, &event, &TransitionPolicy::default()) {
            Transition::Apply { next, paid_amount, .. } => {
                assert_eq!(next, IntentStatus::Failed);
                // the running total is not touched on the way out
                assert!(paid_amount.is_none());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            IntentStatus::PendingUserInput,
            IntentStatus::PendingProvider,
            IntentStatus::Processing,
            IntentStatus::WaitingForCryptoDeposit,
            IntentStatus::PartiallyPaid,
            IntentStatus::Succeeded,
            IntentStatus::Failed,
            IntentStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<IntentStatus>().unwrap(), status);
        }
    }
}
