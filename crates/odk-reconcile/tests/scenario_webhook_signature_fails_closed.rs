use odk_reconcile::*;

const SECRET: &str = "whsec_scenario_secret_value";

fn event_body(order_id: uuid::Uuid) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": "evt_scn_1",
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_scn_1",
            "client_reference_id": order_id.to_string(),
            "payment_status": "paid"
        }}
    }))
    .unwrap()
}

#[test]
fn scenario_signed_event_verifies_then_parses() {
    let order_id = uuid::Uuid::new_v4();
    let body = event_body(order_id);
    let now = 1_760_000_000;
    let header = sign_payload(&body, SECRET, now).unwrap();

    verify_signature(&body, &header, SECRET, now + 10, DEFAULT_TOLERANCE_SECS).unwrap();
    let ev = parse_event(&body).unwrap();
    match ev.kind {
        PaymentEvent::CheckoutCompleted(s) => assert_eq!(s.order_id, Some(order_id)),
        other => panic!("unexpected event kind {other:?}"),
    }
}

#[test]
fn scenario_replayed_header_outside_window_is_rejected() {
    let body = event_body(uuid::Uuid::new_v4());
    let signed_at = 1_760_000_000;
    let header = sign_payload(&body, SECRET, signed_at).unwrap();

    let err = verify_signature(
        &body,
        &header,
        SECRET,
        signed_at + DEFAULT_TOLERANCE_SECS + 1,
        DEFAULT_TOLERANCE_SECS,
    )
    .unwrap_err();
    assert!(matches!(err, SignatureError::TimestampOutOfTolerance { .. }));
}

#[test]
fn scenario_reserialized_body_does_not_verify() {
    // Pretty-printing the same JSON changes the bytes; verification is over
    // the raw body, so this must fail.
    let body = event_body(uuid::Uuid::new_v4());
    let now = 1_760_000_000;
    let header = sign_payload(&body, SECRET, now).unwrap();

    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let pretty = serde_json::to_vec_pretty(&value).unwrap();
    assert_ne!(pretty, body);
    assert_eq!(
        verify_signature(&pretty, &header, SECRET, now, DEFAULT_TOLERANCE_SECS),
        Err(SignatureError::Mismatch)
    );
}
