pub mod event;
pub mod intent;
pub mod money;
pub mod transaction;

pub use event::{CanonicalEvent, CanonicalStatus};
pub use intent::{
    Effects, IntentStatus, PaymentIntent, Transition, TransitionPolicy, WebhookRecord, transition,
};
pub use money::{Money, MoneyError};
pub use transaction::{Transaction, TransactionStatus, TransactionType, can_transition};
