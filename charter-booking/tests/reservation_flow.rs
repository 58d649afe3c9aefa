mod common;

use charter_booking::ReconcileOutcome;
use charter_core::payment::{PaymentEvent, PaymentStatus};
use charter_core::repository::ReservationStore;
use charter_core::reservation::{BlockType, CancelReason, ReservationStatus};
use charter_core::{Clock, CoreError};
use chrono::{Duration, NaiveDate};
use common::*;

fn june_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 6, 1).unwrap()
}

#[tokio::test]
async fn test_hold_checkout_and_webhook_end_to_end() {
    let w = world().await;

    let before = w.availability.slots(VESSEL, june_first(), 4).await.unwrap();
    assert_eq!(before.slots.len(), 2);
    assert!(before.slots.iter().all(|s| s.available));

    let hold = w.manager.create_hold(hold_request(at(9), 4, "ana@example.com")).await.unwrap();
    assert_eq!(hold.hold_expires_at, Some(w.clock.now() + Duration::minutes(15)));

    let after = w.availability.slots(VESSEL, june_first(), 4).await.unwrap();
    assert_eq!(after.slots[0].start_time, at(9));
    assert!(!after.slots[0].available);
    // 09:00 + 4h ends exactly where the 13:00 departure starts.
    assert_eq!(after.slots[1].start_time, at(13));
    assert!(after.slots[1].available);

    let checkout = w.bridge.create_checkout_session(hold.id, &[]).await.unwrap();
    assert_eq!(checkout.amount_cents, FOUR_HOUR_RATE);

    let event = PaymentEvent::CheckoutCompleted {
        event_id: "evt_e2e".into(),
        session_id: checkout.session_id.clone(),
        payment_intent_id: Some("pi_e2e".into()),
        reservation_id: Some(hold.id),
    };
    assert_eq!(w.bridge.reconcile(&event).await.unwrap(), ReconcileOutcome::Applied);

    let confirmed = w.manager.reservation(hold.id).await.unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    assert_eq!(confirmed.hold_expires_at, None);
    let blocks = w.store.all_blocks(w.vessel_id).await;
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].block_type, BlockType::ConfirmedReservation);

    assert_eq!(w.bridge.reconcile(&event).await.unwrap(), ReconcileOutcome::Duplicate);
    assert_eq!(w.store.all_blocks(w.vessel_id).await, blocks);
    assert_eq!(w.store.payments_for(hold.id).await.unwrap().len(), 1);
    assert!(w.store.anomalies(10).await.unwrap().is_empty());

    // Confirmation survives the sweep.
    w.clock.advance(Duration::hours(1));
    assert!(w.manager.expire_stale_holds().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_abandoned_hold_frees_slot_after_sweep() {
    let w = world().await;
    let hold = w.manager.create_hold(hold_request(at(13), 4, "ben@example.com")).await.unwrap();

    let err = w
        .manager
        .create_hold(hold_request(at(13), 4, "cy@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::SlotUnavailable { .. }));

    w.clock.advance(Duration::minutes(15));
    let released = w.manager.expire_stale_holds().await.unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].reservation_id, hold.id);
    // Idempotent.
    assert!(w.manager.expire_stale_holds().await.unwrap().is_empty());

    let r = w.manager.reservation(hold.id).await.unwrap();
    assert_eq!(r.status, ReservationStatus::Cancelled);
    assert_eq!(r.cancel_reason, Some(CancelReason::Expired));

    let report = w.availability.slots(VESSEL, june_first(), 4).await.unwrap();
    assert!(report.slots.iter().all(|s| s.available));
    w.manager.create_hold(hold_request(at(13), 4, "cy@example.com")).await.unwrap();
}

#[tokio::test]
async fn test_checkout_on_swept_hold_reports_expired() {
    let w = world().await;
    let hold = w.manager.create_hold(hold_request(at(9), 4, "dee@example.com")).await.unwrap();
    w.clock.advance(Duration::minutes(20));
    w.manager.expire_stale_holds().await.unwrap();

    let err = w.bridge.create_checkout_session(hold.id, &[]).await.unwrap_err();
    assert!(matches!(err, CoreError::HoldExpired(_)), "got {err:?}");
}

#[tokio::test]
async fn test_payment_after_sweep_is_flagged_not_resurrected() {
    let w = world().await;
    let hold = w.manager.create_hold(hold_request(at(9), 4, "eve@example.com")).await.unwrap();
    let checkout = w.bridge.create_checkout_session(hold.id, &[]).await.unwrap();

    w.clock.advance(Duration::minutes(15));
    w.manager.expire_stale_holds().await.unwrap();
    let rival = w.manager.create_hold(hold_request(at(9), 4, "fay@example.com")).await.unwrap();

    let outcome = w
        .bridge
        .reconcile(&PaymentEvent::CheckoutCompleted {
            event_id: "evt_late".into(),
            session_id: checkout.session_id.clone(),
            payment_intent_id: Some("pi_late".into()),
            reservation_id: Some(hold.id),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Anomaly(_)));

    let original = w.manager.reservation(hold.id).await.unwrap();
    assert_eq!(original.status, ReservationStatus::Cancelled);
    let blocks = w.store.all_blocks(w.vessel_id).await;
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].reservation_id, Some(rival.id));

    let payment = w.store.payment_by_session(&checkout.session_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn test_customer_cancel_is_single_shot() {
    let w = world().await;
    let hold = w.manager.create_hold(hold_request(at(9), 4, "gus@example.com")).await.unwrap();

    let cancelled = w.manager.cancel_hold(hold.id).await.unwrap();
    assert_eq!(cancelled.cancel_reason, Some(CancelReason::Customer));
    assert!(w.store.all_blocks(w.vessel_id).await.is_empty());

    let err = w.manager.cancel_hold(hold.id).await.unwrap_err();
    assert!(matches!(err, CoreError::NotHold { .. }));
}

#[tokio::test]
async fn test_unpriced_duration_is_held_but_not_sold() {
    let w = world().await;
    let hold = w.manager.create_hold(hold_request(at(9), 8, "hal@example.com")).await.unwrap();

    let err = w.bridge.create_checkout_session(hold.id, &[]).await.unwrap_err();
    assert!(matches!(err, CoreError::PricingUnavailable { hours: 8, .. }), "got {err:?}");
    assert!(w.gateway.requests().is_empty());
}
