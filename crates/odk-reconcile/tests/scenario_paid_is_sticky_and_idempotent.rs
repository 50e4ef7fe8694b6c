use odk_reconcile::*;

fn state(paid: bool, status: PaymentStatus, has_number: bool) -> OrderPaymentState {
    OrderPaymentState {
        paid,
        payment_status: status,
        has_confirmation_number: has_number,
    }
}

#[test]
fn scenario_failure_after_paid_never_downgrades() {
    let paid = state(true, PaymentStatus::Paid, true);
    let t = plan(&paid, PaymentSignal::Failed);
    assert_eq!(t, Transition::Ignore(IgnoreReason::FailureAfterPaid));
    assert!(!t.notifies_customer());
}

#[test]
fn scenario_repeated_success_notifies_exactly_once() {
    // Replay the same success three times against the state each delivery
    // would observe under the row lock.
    let mut st = state(false, PaymentStatus::Pending, false);
    let mut notifications = 0;
    for _ in 0..3 {
        let t = plan(&st, PaymentSignal::Succeeded);
        if t.notifies_customer() {
            notifications += 1;
        }
        if let Transition::MarkPaid { .. } | Transition::AlreadyPaid { .. } = t {
            st = state(true, PaymentStatus::Paid, true);
        }
    }
    assert_eq!(notifications, 1);
    assert!(st.paid);
}

#[test]
fn scenario_paid_without_number_backfills_on_redelivery() {
    let st = state(true, PaymentStatus::Paid, false);
    let t = plan(&st, PaymentSignal::Succeeded);
    assert_eq!(
        t,
        Transition::AlreadyPaid {
            allocate_confirmation: true
        }
    );
    assert!(t.allocates_confirmation());
    assert!(!t.notifies_customer());
}

#[test]
fn scenario_unsettled_checkout_records_but_does_not_pay() {
    let st = state(false, PaymentStatus::Pending, false);
    let t = plan(&st, PaymentSignal::CheckoutPending);
    assert_eq!(t, Transition::RecordPending);
    assert!(!t.notifies_customer());
    assert!(!t.allocates_confirmation());

    let paid = state(true, PaymentStatus::Paid, true);
    assert_eq!(
        plan(&paid, PaymentSignal::CheckoutPending),
        Transition::Ignore(IgnoreReason::PendingAfterPaid)
    );
}
