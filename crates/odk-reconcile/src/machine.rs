//! Order payment state machine.
//!
//! ```text
//! unpaid --success--> paid      (terminal, sticky)
//! unpaid --failure--> failed    (not terminal; a later success still pays)
//! paid   --success--> paid      (no-op; backfills a missing confirmation number)
//! paid   --failure--> paid      (ignored; never downgrades)
//! ```
//!
//! `plan` is the only place these rules live. The caller holds the order row
//! lock while planning and applying, so `state` is current.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the reconciler needs to know about an order, read under lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPaymentState {
    pub paid: bool,
    pub payment_status: PaymentStatus,
    pub has_confirmation_number: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentSignal {
    /// Checkout completed (settled), delayed payment succeeded, or intent succeeded.
    Succeeded,
    /// Checkout completed but funds are still in flight.
    CheckoutPending,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    FailureAfterPaid,
    PendingAfterPaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `unpaid -> paid`. The only transition that triggers notification.
    MarkPaid { allocate_confirmation: bool },
    /// Already paid. Merge payment details; allocate a number only if an
    /// earlier allocation gave up.
    AlreadyPaid { allocate_confirmation: bool },
    /// `unpaid -> failed`.
    MarkFailed,
    /// Record checkout details; status unchanged.
    RecordPending,
    Ignore(IgnoreReason),
}

impl Transition {
    pub fn notifies_customer(&self) -> bool {
        matches!(self, Transition::MarkPaid { .. })
    }

    pub fn allocates_confirmation(&self) -> bool {
        matches!(
            self,
            Transition::MarkPaid {
                allocate_confirmation: true
            } | Transition::AlreadyPaid {
                allocate_confirmation: true
            }
        )
    }
}

pub fn plan(state: &OrderPaymentState, signal: PaymentSignal) -> Transition {
    let allocate_confirmation = !state.has_confirmation_number;
    match (state.paid, signal) {
        (false, PaymentSignal::Succeeded) => Transition::MarkPaid {
            allocate_confirmation,
        },
        (true, PaymentSignal::Succeeded) => Transition::AlreadyPaid {
            allocate_confirmation,
        },
        (false, PaymentSignal::Failed) => Transition::MarkFailed,
        (true, PaymentSignal::Failed) => Transition::Ignore(IgnoreReason::FailureAfterPaid),
        (false, PaymentSignal::CheckoutPending) => Transition::RecordPending,
        (true, PaymentSignal::CheckoutPending) => {
            Transition::Ignore(IgnoreReason::PendingAfterPaid)
        }
    }
}
