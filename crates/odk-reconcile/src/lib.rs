//! odk-reconcile
//!
//! Payment event reconciliation, pure half.
//!
//! - Webhook signatures are verified before any payload is trusted.
//! - Provider events are parsed into a closed set of signals.
//! - `plan` decides the order transition: `unpaid -> paid` is terminal and
//!   sticky, `unpaid -> failed` is not, `paid` absorbs repeats.
//! - Confirmation numbers are date-coded with a random suffix.
//!
//! Deterministic, pure logic. No IO. Persistence of a planned transition is
//! done by `odk-db` under a row lock.

mod confirmation;
mod event;
mod machine;
mod signature;

pub use confirmation::{
    generate_confirmation_number, is_well_formed_confirmation_number, new_confirmation_number,
    MAX_ALLOCATION_ATTEMPTS,
};
pub use event::{parse_event, CheckoutSession, EventParseError, PaymentEvent, PaymentIntent, ProviderEvent};
pub use machine::{plan, IgnoreReason, OrderPaymentState, PaymentSignal, PaymentStatus, Transition};
pub use signature::{
    sign_payload, verify_signature, SignatureError, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER,
};
