//! Integration tests for lessonbookd
//!
//! These tests drive the reservation engine end to end against a real
//! SQLite store, the way the service wires it.

use chrono::{DateTime, TimeZone, Utc};
use lessonbook_api::{
    CancelReason, ChargeOutcome, LessonSlot, PaymentStatus, RequestContext, Reservation,
    ReservationStatus, TimeRange,
};
use lessonbook_config::{Settings, parse_config};
use lessonbook_core::{NewSlot, ReservationEngine, ReservationError};
use lessonbook_gateway_api::{
    LogNotifier, MockGateway, Notification, RecordingNotifier, SandboxGateway,
};
use lessonbook_store::{AuditEventType, SqliteStore, Store};
use std::sync::Arc;

const CONFIG: &str = r#"
config_version = 1

[charging]
lead_time_minutes = 120
grace_period_minutes = 5
timeout_seconds = 5
policy_cutover = "2025-01-01T00:00:00Z"

[cancellation]
student_deadline_hours = 24
mentor_deadline_hours = 2
"#;

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn settings() -> Settings {
    parse_config(CONFIG).unwrap()
}

struct Harness {
    engine: ReservationEngine,
    store: Arc<SqliteStore>,
    gateway: Arc<MockGateway>,
    notifier: RecordingNotifier,
}

fn harness() -> Harness {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let gateway = Arc::new(MockGateway::new());
    let notifier = RecordingNotifier::new();
    let engine = ReservationEngine::new(
        &settings(),
        store.clone(),
        gateway.clone(),
        Arc::new(notifier.clone()),
    );
    Harness {
        engine,
        store,
        gateway,
        notifier,
    }
}

fn mentor() -> RequestContext {
    RequestContext::mentor("mentor-aki")
}

fn student() -> RequestContext {
    RequestContext::student("student-ben")
}

fn publish_slot(engine: &ReservationEngine) -> LessonSlot {
    engine
        .publish_slot(
            &mentor(),
            NewSlot {
                start_time: ts("2025-03-01T09:00:00Z"),
                end_time: ts("2025-03-01T13:00:00Z"),
                hourly_rate: 5000,
                currency: "JPY".into(),
                min_hours: 1,
                max_hours: 2,
            },
            ts("2025-02-10T00:00:00Z"),
        )
        .unwrap()
}

/// 2025-03-01 10:00-11:00, 5000 JPY, approved 2025-02-20
async fn approved_lesson(h: &Harness) -> Reservation {
    let slot = publish_slot(&h.engine);
    let reservation = h
        .engine
        .book_reservation(
            &student(),
            &slot.id,
            TimeRange::new(ts("2025-03-01T10:00:00Z"), ts("2025-03-01T11:00:00Z")).unwrap(),
            Some("Conversation practice".into()),
            ts("2025-02-15T12:00:00Z"),
        )
        .unwrap();
    assert_eq!(reservation.total_amount, 5000);

    h.engine
        .approve_reservation(&mentor(), &reservation.id, ts("2025-02-20T09:00:00Z"))
        .await
        .unwrap()
}

#[tokio::test]
async fn scenario_charge_inside_window_only() {
    let h = harness();
    let reservation = approved_lesson(&h).await;
    assert_eq!(reservation.status, ReservationStatus::Approved);

    // Window starts 2025-03-01T08:00; the 10:00 lesson is outside it
    let report = h
        .engine
        .run_deferred_charge_sweep(ts("2025-02-28T23:30:00Z"))
        .await
        .unwrap();
    assert_eq!(report.window.end, ts("2025-03-01T01:30:00Z"));
    assert_eq!(report.claimed, 0);

    let report = h
        .engine
        .run_deferred_charge_sweep(ts("2025-03-01T09:00:00Z"))
        .await
        .unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.charged, 1);

    let confirmed = h.store.get_reservation(&reservation.id).unwrap().unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);

    let payment = h
        .store
        .get_payment_for_reservation(&reservation.id)
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Charged);
    assert_eq!(payment.charge_executed_at, Some(ts("2025-03-01T09:00:00Z")));
    assert!(payment.gateway_charge_ref.is_some());
}

#[tokio::test]
async fn scenario_student_cancels_early_for_free() {
    let h = harness();
    let reservation = approved_lesson(&h).await;

    let check = h
        .engine
        .check_cancellation(
            &student(),
            &reservation.id,
            Some(CancelReason::StudentRequest),
            ts("2025-02-27T10:00:00Z"),
        )
        .unwrap();
    assert!(check.can_cancel);
    assert_eq!(check.fee, 0);

    let outcome = h
        .engine
        .cancel_reservation(
            &student(),
            &reservation.id,
            CancelReason::StudentRequest,
            None,
            ts("2025-02-27T10:00:00Z"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, ReservationStatus::Canceled);
    assert_eq!(outcome.fee_charged, 0);
    assert!(outcome.refund.is_none());

    // A canceled reservation is never charged
    let report = h
        .engine
        .run_deferred_charge_sweep(ts("2025-03-01T09:00:00Z"))
        .await
        .unwrap();
    assert_eq!(report.scanned, 0);
    assert!(h.gateway.charge_requests().is_empty());
}

#[tokio::test]
async fn scenario_student_late_cancel_is_refused() {
    let h = harness();
    let reservation = approved_lesson(&h).await;

    let err = h
        .engine
        .cancel_reservation(
            &student(),
            &reservation.id,
            CancelReason::StudentRequest,
            None,
            ts("2025-03-01T08:00:00Z"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReservationError::CancelWindowExpired { fee: 5000, .. }
    ));

    let unchanged = h.store.get_reservation(&reservation.id).unwrap().unwrap();
    assert_eq!(unchanged.status, ReservationStatus::Approved);
    assert!(unchanged.cancellation.is_none());
}

#[tokio::test]
async fn scenario_mentor_cancels_eleven_hours_before() {
    let h = harness();
    let reservation = approved_lesson(&h).await;

    let outcome = h
        .engine
        .cancel_reservation(
            &mentor(),
            &reservation.id,
            CancelReason::MentorRequest,
            Some("Sick".into()),
            ts("2025-02-28T23:00:00Z"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, ReservationStatus::Canceled);
    assert_eq!(outcome.fee_charged, 0);

    let canceled = h.store.get_reservation(&reservation.id).unwrap().unwrap();
    let cancellation = canceled.cancellation.unwrap();
    assert_eq!(cancellation.canceled_by.as_str(), "mentor-aki");
    assert_eq!(cancellation.notes.as_deref(), Some("Sick"));
}

#[tokio::test]
async fn scenario_failed_charge_is_not_retried() {
    let h = harness();
    let reservation = approved_lesson(&h).await;
    h.gateway.set_fail_charge(true);

    let report = h
        .engine
        .run_deferred_charge_sweep(ts("2025-03-01T09:00:00Z"))
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let payment = h
        .store
        .get_payment_for_reservation(&reservation.id)
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.failure_reason.is_some());
    assert_eq!(
        h.store.get_reservation(&reservation.id).unwrap().unwrap().status,
        ReservationStatus::Approved
    );
    assert!(h.notifier.sent().iter().any(|n| matches!(
        n,
        Notification::ChargeFailed { reservation_id, .. } if *reservation_id == reservation.id
    )));

    let report = h
        .engine
        .run_deferred_charge_sweep(ts("2025-03-01T09:05:00Z"))
        .await
        .unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(h.gateway.charge_requests().len(), 1);
}

#[tokio::test]
async fn sweeps_are_idempotent() {
    let h = harness();
    approved_lesson(&h).await;

    let now = ts("2025-03-01T09:00:00Z");
    let first = h.engine.run_deferred_charge_sweep(now).await.unwrap();
    let second = h.engine.run_deferred_charge_sweep(now).await.unwrap();

    assert_eq!(first.claimed, 1);
    assert_eq!(second.claimed, 0);
    assert_eq!(h.gateway.charge_requests().len(), 1);
}

#[test]
fn no_double_booking_across_students() {
    let h = harness();
    let slot = publish_slot(&h.engine);
    let booked_at = ts("2025-02-15T00:00:00Z");

    let attempts = [
        ("s1", "2025-03-01T09:00:00Z", "2025-03-01T10:30:00Z"),
        ("s2", "2025-03-01T10:00:00Z", "2025-03-01T11:00:00Z"),
        ("s3", "2025-03-01T10:30:00Z", "2025-03-01T12:00:00Z"),
        ("s4", "2025-03-01T11:00:00Z", "2025-03-01T12:30:00Z"),
        ("s5", "2025-03-01T12:00:00Z", "2025-03-01T13:00:00Z"),
    ];

    let mut accepted = Vec::new();
    for (who, start, end) in attempts {
        let range = TimeRange::new(ts(start), ts(end)).unwrap();
        match h.engine.book_reservation(
            &RequestContext::student(who),
            &slot.id,
            range,
            None,
            booked_at,
        ) {
            Ok(r) => accepted.push(r.booked_range()),
            Err(ReservationError::SlotUnavailable(_)) => {}
            Err(e) => panic!("unexpected error for {who}: {e}"),
        }
    }

    assert_eq!(accepted.len(), 3);
    for (i, a) in accepted.iter().enumerate() {
        for b in &accepted[i + 1..] {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }
    }

    let view = h.engine.slot_availability(&slot.id, booked_at).unwrap();
    assert_eq!(view.booked.len(), 3);
    assert!(view.open.is_empty());
}

#[tokio::test]
async fn default_cutover_charges_legacy_lessons_at_approval() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let gateway = Arc::new(MockGateway::new());
    let engine = ReservationEngine::new(
        &Settings::default(),
        store.clone(),
        gateway.clone(),
        Arc::new(LogNotifier),
    );

    let slot = publish_slot(&engine);
    let reservation = engine
        .book_reservation(
            &student(),
            &slot.id,
            TimeRange::new(ts("2025-03-01T10:00:00Z"), ts("2025-03-01T11:00:00Z")).unwrap(),
            None,
            ts("2025-02-15T00:00:00Z"),
        )
        .unwrap();
    assert!(!engine.epochs().is_new_flow(reservation.booked_start_time));

    let approved = engine
        .approve_reservation(&mentor(), &reservation.id, ts("2025-02-20T09:00:00Z"))
        .await
        .unwrap();
    assert_eq!(approved.status, ReservationStatus::Confirmed);
    assert_eq!(gateway.charge_requests().len(), 1);
}

#[tokio::test]
async fn full_lifecycle_on_disk_with_sandbox_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("lessonbook.db");

    let reservation_id = {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let engine = ReservationEngine::new(
            &settings(),
            store.clone(),
            Arc::new(SandboxGateway::new()),
            Arc::new(LogNotifier),
        );

        let slot = publish_slot(&engine);
        let reservation = engine
            .book_reservation(
                &student(),
                &slot.id,
                TimeRange::new(ts("2025-03-01T10:00:00Z"), ts("2025-03-01T12:00:00Z")).unwrap(),
                None,
                ts("2025-02-15T00:00:00Z"),
            )
            .unwrap();
        assert_eq!(reservation.total_amount, 10_000);

        engine
            .approve_reservation(&mentor(), &reservation.id, ts("2025-02-20T09:00:00Z"))
            .await
            .unwrap();
        let outcome = engine
            .execute_charge(&reservation.id, ts("2025-03-01T08:30:00Z"))
            .await
            .unwrap();
        assert!(matches!(outcome, ChargeOutcome::Charged { .. }));

        engine
            .start_lesson(&mentor(), &reservation.id, ts("2025-03-01T10:02:00Z"))
            .unwrap();
        reservation.id
    };

    // Reopen: state survives, completion pass picks it up
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let engine = ReservationEngine::new(
        &settings(),
        store.clone(),
        Arc::new(SandboxGateway::new()),
        Arc::new(LogNotifier),
    );
    assert_eq!(
        engine
            .complete_finished_lessons(ts("2025-03-01T12:00:00Z"))
            .unwrap(),
        1
    );
    let completed = store.get_reservation(&reservation_id).unwrap().unwrap();
    assert_eq!(completed.status, ReservationStatus::Completed);

    let audits = store.get_recent_audits(50).unwrap();
    assert!(audits
        .iter()
        .any(|e| matches!(e.event, AuditEventType::ChargeSucceeded { amount: 10_000, .. })));
    assert!(audits
        .iter()
        .any(|e| matches!(e.event, AuditEventType::ReservationCompleted { .. })));
}

#[test]
fn deadline_arithmetic_truncates_hours() {
    let lesson = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2025, 2, 28, 9, 30, 0).unwrap();
    assert_eq!(lessonbook_util::hours_until(lesson, now), 24);
    assert_eq!(lessonbook_util::minutes_until(lesson, now), 24 * 60 + 30);
}
