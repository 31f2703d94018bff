use super::*;
use crate::limits::*;
use crate::model::fixtures::*;

const H: Ms = HOUR_MS;
/// 2026-02-01T00:00:00Z
const T0: Ms = 1_769_904_000_000;

fn t(hours: i64) -> Ms {
    T0 + hours * H
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("reactoplan_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn engine_with(name: &str, serials: &[&str]) -> Engine {
    let engine = Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap();
    for s in serials {
        engine.register_reactor(reactor(s)).await.unwrap();
    }
    engine
}

fn actual(mut nb: NewBooking) -> NewBooking {
    nb.status = BookingStatus::Actual;
    nb
}

// ── Conflict validator (pure) ────────────────────────────

#[test]
fn conflict_empty_store_accepts() {
    assert!(check_conflict("R-101", t(0), t(4), None, &[], &[]).is_ok());
}

#[test]
fn conflict_rejects_backwards_and_empty_intervals() {
    let r = check_conflict("R-101", t(4), t(4), None, &[], &[]);
    assert!(matches!(r, Err(EngineError::Chronology { .. })));
    let r = check_conflict("R-101", t(5), t(4), None, &[], &[]);
    assert!(matches!(r, Err(EngineError::Chronology { .. })));
}

#[test]
fn conflict_touching_intervals_are_not_overlaps() {
    let bookings = vec![booking("R-101", t(0), t(4), BookingStatus::Proposed)];
    let downtime = vec![downtime("R-101", t(8), t(10), false)];
    assert!(check_conflict("R-101", t(4), t(8), None, &bookings, &downtime).is_ok());
}

#[test]
fn conflict_reports_overlapping_booking() {
    let existing = booking("R-101", t(0), t(4), BookingStatus::Actual);
    let r = check_conflict("R-101", t(2), t(6), None, &[existing.clone()], &[]);
    match r {
        Err(EngineError::BookingConflict {
            id, product_name, ..
        }) => {
            assert_eq!(id, existing.id);
            assert_eq!(product_name, "Paracetamol");
        }
        other => panic!("expected booking conflict, got {other:?}"),
    }
}

#[test]
fn conflict_ignores_other_reactors() {
    let bookings = vec![booking("R-102", t(0), t(4), BookingStatus::Actual)];
    let downtime = vec![downtime("R-103", t(0), t(4), false)];
    assert!(check_conflict("R-101", t(0), t(4), None, &bookings, &downtime).is_ok());
}

#[test]
fn conflict_cancelled_records_are_transparent() {
    let bookings = vec![booking("R-101", t(0), t(4), BookingStatus::Cancelled)];
    let downtime = vec![downtime("R-101", t(0), t(4), true)];
    assert!(check_conflict("R-101", t(1), t(3), None, &bookings, &downtime).is_ok());
}

#[test]
fn conflict_excluded_record_is_skipped() {
    let own = booking("R-101", t(0), t(4), BookingStatus::Proposed);
    assert!(check_conflict("R-101", t(1), t(5), Some(own.id), &[own.clone()], &[]).is_ok());
    assert!(check_conflict("R-101", t(1), t(5), None, &[own], &[]).is_err());
}

#[test]
fn conflict_downtime_blocks_booking() {
    let dt = downtime("R-101", t(2), t(3), false);
    let r = check_conflict("R-101", t(0), t(24), None, &[], &[dt.clone()]);
    match r {
        Err(EngineError::DowntimeConflict { id, kind, span }) => {
            assert_eq!(id, dt.id);
            assert_eq!(kind, DowntimeKind::Maintenance);
            assert_eq!(span, dt.span);
        }
        other => panic!("expected downtime conflict, got {other:?}"),
    }
}

#[test]
fn conflict_bookings_reported_before_downtime() {
    let dt = downtime("R-101", t(0), t(2), false);
    let b = booking("R-101", t(5), t(6), BookingStatus::Proposed);
    let r = check_conflict("R-101", t(0), t(10), None, &[b], &[dt]);
    assert!(matches!(r, Err(EngineError::BookingConflict { .. })));
}

#[test]
fn conflict_choice_is_independent_of_input_order() {
    let early = booking("R-101", t(1), t(2), BookingStatus::Proposed);
    let late = booking("R-101", t(3), t(4), BookingStatus::Actual);
    let forward = vec![early.clone(), late.clone()];
    let reversed = vec![late, early.clone()];
    for snapshot in [forward, reversed] {
        match check_conflict("R-101", t(0), t(10), None, &snapshot, &[]) {
            Err(EngineError::BookingConflict { id, .. }) => assert_eq!(id, early.id),
            other => panic!("expected booking conflict, got {other:?}"),
        }
    }
}

#[test]
fn conflict_tie_on_start_breaks_by_id() {
    let a = booking("R-101", t(1), t(2), BookingStatus::Proposed);
    let b = booking("R-101", t(1), t(3), BookingStatus::Proposed);
    let lowest = a.id.min(b.id);
    match check_conflict("R-101", t(0), t(10), None, &[b, a], &[]) {
        Err(EngineError::BookingConflict { id, .. }) => assert_eq!(id, lowest),
        other => panic!("expected booking conflict, got {other:?}"),
    }
}

#[test]
fn conflict_is_symmetric() {
    let spans = [
        (t(0), t(4)),
        (t(2), t(6)),
        (t(4), t(8)),
        (t(1), t(2)),
        (t(0), t(4)),
        (t(9), t(10)),
        (t(-3), t(20)),
    ];
    for &(a_start, a_end) in &spans {
        for &(b_start, b_end) in &spans {
            let a = booking("R-101", a_start, a_end, BookingStatus::Proposed);
            let b = booking("R-101", b_start, b_end, BookingStatus::Actual);
            let a_after_b = check_conflict("R-101", a_start, a_end, None, &[b], &[]).is_err();
            let b_after_a = check_conflict("R-101", b_start, b_end, None, &[a], &[]).is_err();
            assert_eq!(
                a_after_b, b_after_a,
                "[{a_start}, {a_end}) vs [{b_start}, {b_end})"
            );
        }
    }
}

#[test]
fn validate_span_enforces_range_limits() {
    assert!(matches!(
        validate_span(0, H),
        Err(EngineError::LimitExceeded("timestamp out of range"))
    ));
    assert!(matches!(
        validate_span(T0, T0 + MAX_SPAN_DURATION_MS + 1),
        Err(EngineError::LimitExceeded("span too wide"))
    ));
    assert_eq!(validate_span(T0, t(1)).unwrap(), Span::new(T0, t(1)));
}

// ── Occupancy aggregator (pure) ──────────────────────────

fn window_720h() -> (Ms, Ms) {
    (t(0), t(720))
}

#[test]
fn occupancy_single_actual_booking() {
    let (ws, we) = window_720h();
    let reactors = vec![reactor("R-101")];
    let bookings = vec![booking("R-101", t(10), t(14), BookingStatus::Actual)];
    let m = &aggregate(ws, we, &reactors, &bookings, &[]).unwrap()[0];
    assert_eq!(m.available_hours, 720.0);
    assert_eq!(m.actual_hours, 4.0);
    assert!((m.actual_percent - 0.5556).abs() < 0.001);
    assert_eq!(m.proposed_hours, 0.0);
    assert_eq!(m.proposed_percent, 0.0);
}

#[test]
fn occupancy_downtime_reduces_available() {
    let (ws, we) = window_720h();
    let reactors = vec![reactor("R-101")];
    let bookings = vec![booking("R-101", t(10), t(14), BookingStatus::Actual)];
    let downtime = vec![downtime("R-101", t(100), t(110), false)];
    let m = &aggregate(ws, we, &reactors, &bookings, &downtime).unwrap()[0];
    assert_eq!(m.available_hours, 710.0);
    assert_eq!(m.downtime_hours, 10.0);
    assert!((m.actual_percent - 4.0 / 710.0 * 100.0).abs() < 1e-9);
}

#[test]
fn occupancy_clips_to_window_edges() {
    let (ws, we) = window_720h();
    let reactors = vec![reactor("R-101")];
    let bookings = vec![
        booking("R-101", t(-5), t(3), BookingStatus::Proposed),
        booking("R-101", t(718), t(730), BookingStatus::Proposed),
        booking("R-101", t(800), t(810), BookingStatus::Proposed),
    ];
    let m = &aggregate(ws, we, &reactors, &bookings, &[]).unwrap()[0];
    assert_eq!(m.proposed_hours, 5.0);
}

#[test]
fn occupancy_ignores_cancelled_records() {
    let (ws, we) = window_720h();
    let reactors = vec![reactor("R-101")];
    let bookings = vec![booking("R-101", t(0), t(10), BookingStatus::Cancelled)];
    let downtime = vec![downtime("R-101", t(20), t(30), true)];
    let m = &aggregate(ws, we, &reactors, &bookings, &downtime).unwrap()[0];
    assert_eq!(m.available_hours, 720.0);
    assert_eq!(m.downtime_hours, 0.0);
    assert_eq!(m.proposed_hours + m.actual_hours, 0.0);
}

#[test]
fn occupancy_full_downtime_yields_zero_percent() {
    let (ws, we) = window_720h();
    let reactors = vec![reactor("R-101")];
    let bookings = vec![booking("R-101", t(1), t(2), BookingStatus::Actual)];
    let downtime = vec![downtime("R-101", t(-10), t(800), false)];
    let m = &aggregate(ws, we, &reactors, &bookings, &downtime).unwrap()[0];
    assert_eq!(m.available_hours, 0.0);
    assert_eq!(m.actual_percent, 0.0);
    assert_eq!(m.proposed_percent, 0.0);
}

#[test]
fn occupancy_hours_are_conserved() {
    let (ws, we) = window_720h();
    let reactors = vec![reactor("R-101")];
    let downtime = vec![
        downtime("R-101", t(3), t(7), false),
        downtime("R-101", ws + 1234, ws + 98_765, false),
    ];
    let m = &aggregate(ws, we, &reactors, &[], &downtime).unwrap()[0];
    let total = (we - ws) as f64 / H as f64;
    assert!((m.available_hours + m.downtime_hours - total).abs() < 1e-9);
}

#[test]
fn occupancy_one_metric_per_reactor_in_input_order() {
    let (ws, we) = window_720h();
    let reactors = vec![reactor("R-103"), reactor("R-101"), reactor("R-102")];
    let bookings = vec![booking("R-999", t(0), t(4), BookingStatus::Actual)];
    let metrics = aggregate(ws, we, &reactors, &bookings, &[]).unwrap();
    let serials: Vec<_> = metrics.iter().map(|m| m.reactor_serial_no.as_str()).collect();
    assert_eq!(serials, vec!["R-103", "R-101", "R-102"]);
    assert!(metrics.iter().all(|m| m.actual_hours == 0.0));
}

#[test]
fn occupancy_empty_and_inverted_windows() {
    let reactors = vec![reactor("R-101")];
    let m = &aggregate(t(5), t(5), &reactors, &[], &[]).unwrap()[0];
    assert_eq!(m.available_hours, 0.0);
    assert_eq!(m.actual_percent, 0.0);
    assert!(matches!(
        aggregate(t(5), t(4), &reactors, &[], &[]),
        Err(EngineError::Chronology { .. })
    ));
}

#[test]
fn occupancy_unrepresentable_window_is_over_limit() {
    let reactors = vec![reactor("R-101")];
    assert!(matches!(
        aggregate(i64::MIN, i64::MAX, &reactors, &[], &[]),
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        window_len(i64::MAX, i64::MIN),
        Err(EngineError::Chronology { .. })
    ));
    assert_eq!(window_len(t(0), t(3)).unwrap(), 3 * H);
}

#[test]
fn clipped_ms_outside_window_is_zero() {
    assert_eq!(clipped_ms(&Span::new(t(0), t(2)), t(2), t(4)), 0);
    assert_eq!(clipped_ms(&Span::new(t(0), t(3)), t(2), t(4)), H);
}

#[test]
fn month_window_is_utc_calendar_month() {
    let feb = month_window(2026, 2).unwrap();
    assert_eq!(feb.start, T0);
    assert_eq!(feb.end - feb.start, 28 * 24 * H);
    assert_eq!(feb.label, "Feb 2026");

    let dec = month_window(2025, 12).unwrap();
    assert_eq!(dec.end, month_window(2026, 1).unwrap().start);
    assert!(month_window(2026, 13).is_none());

    assert_eq!(parse_month("2026-02"), Some(feb));
    assert_eq!(parse_month("Feb 2026"), None);
}

// ── Engine: reactors ─────────────────────────────────────

#[tokio::test]
async fn engine_register_and_get_reactor() {
    let engine = engine_with("register.wal", &["R-101"]).await;
    let r = engine.get_reactor("R-101").await.unwrap();
    assert_eq!(r.plant_name, "Plant Alpha");
    assert!(matches!(
        engine.get_reactor("R-999").await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn engine_duplicate_reactor_rejected() {
    let engine = engine_with("dup_reactor.wal", &["R-101"]).await;
    let result = engine.register_reactor(reactor("R-101")).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
    assert_eq!(engine.list_reactors().await.len(), 1);
}

#[tokio::test]
async fn engine_empty_serial_rejected() {
    let engine = engine_with("empty_serial.wal", &[]).await;
    let result = engine.register_reactor(reactor("  ")).await;
    assert!(matches!(result, Err(EngineError::PolicyViolation(_))));
}

#[tokio::test]
async fn engine_list_reactors_sorted() {
    let engine = engine_with("list_reactors.wal", &["R-103", "R-101", "R-102"]).await;
    let serials: Vec<_> = engine
        .list_reactors()
        .await
        .into_iter()
        .map(|r| r.serial_no)
        .collect();
    assert_eq!(serials, vec!["R-101", "R-102", "R-103"]);
}

#[tokio::test]
async fn engine_update_reactor() {
    let engine = engine_with("update_reactor.wal", &["R-101"]).await;
    let updated = engine
        .update_reactor(
            "R-101",
            ReactorPatch {
                block_name: Some("Block B".into()),
                notes: Some(Some("new gasket".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.block_name, "Block B");
    assert_eq!(
        engine.get_reactor("R-101").await.unwrap().notes.as_deref(),
        Some("new gasket")
    );
}

#[tokio::test]
async fn engine_remove_reactor_without_history() {
    let engine = engine_with("remove_reactor.wal", &["R-101"]).await;
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    engine.remove_reactor("R-101").await.unwrap();
    assert!(engine.list_reactors().await.is_empty());
    assert!(engine.get_reactor_for_entity(&b.id).is_none());
}

#[tokio::test]
async fn engine_remove_reactor_with_history_is_policy_violation() {
    let engine = engine_with("remove_reactor_history.wal", &["R-101", "R-102"]).await;
    engine
        .create_booking(actual(new_booking("R-101", t(0), t(4))))
        .await
        .unwrap();
    engine
        .create_downtime(new_downtime("R-102", t(0), t(4)))
        .await
        .unwrap();
    for serial in ["R-101", "R-102"] {
        let result = engine.remove_reactor(serial).await;
        assert!(matches!(result, Err(EngineError::PolicyViolation(_))));
    }
    assert_eq!(engine.list_reactors().await.len(), 2);
}

// ── Engine: bookings ─────────────────────────────────────

#[tokio::test]
async fn engine_create_booking_stamps_audit_fields() {
    let engine = engine_with("create_booking.wal", &["R-101"]).await;
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    assert!(b.created_at > 0);
    assert_eq!(b.created_at, b.updated_at);
    assert_eq!(engine.get_booking(b.id).await.unwrap(), b);
}

#[tokio::test]
async fn engine_booking_on_unknown_reactor_fails() {
    let engine = engine_with("booking_unknown.wal", &[]).await;
    let result = engine.create_booking(new_booking("R-404", t(0), t(4))).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn engine_overlapping_booking_rejected() {
    let engine = engine_with("overlap_booking.wal", &["R-101"]).await;
    let first = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    let result = engine.create_booking(new_booking("R-101", t(3), t(5))).await;
    match result {
        Err(EngineError::BookingConflict { id, .. }) => assert_eq!(id, first.id),
        other => panic!("expected booking conflict, got {other:?}"),
    }
    assert_eq!(engine.list_bookings(Some("R-101")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn engine_back_to_back_bookings_accepted() {
    let engine = engine_with("back_to_back.wal", &["R-101"]).await;
    engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    engine
        .create_booking(new_booking("R-101", t(4), t(8)))
        .await
        .unwrap();
    assert_eq!(engine.list_bookings(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn engine_cancelled_booking_can_be_created_over_active_one() {
    let engine = engine_with("cancelled_create.wal", &["R-101"]).await;
    engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    let mut nb = new_booking("R-101", t(1), t(2));
    nb.status = BookingStatus::Cancelled;
    assert!(engine.create_booking(nb).await.is_ok());
}

#[tokio::test]
async fn engine_booking_rejected_by_downtime() {
    let engine = engine_with("booking_downtime.wal", &["R-101"]).await;
    let dt = engine
        .create_downtime(new_downtime("R-101", t(2), t(6)))
        .await
        .unwrap();
    let result = engine.create_booking(new_booking("R-101", t(5), t(9))).await;
    match result {
        Err(EngineError::DowntimeConflict { id, kind, .. }) => {
            assert_eq!(id, dt.id);
            assert_eq!(kind, DowntimeKind::Cleaning);
        }
        other => panic!("expected downtime conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn engine_booking_chronology_rejected() {
    let engine = engine_with("booking_chronology.wal", &["R-101"]).await;
    let result = engine.create_booking(new_booking("R-101", t(4), t(4))).await;
    assert!(matches!(result, Err(EngineError::Chronology { .. })));
}

#[tokio::test]
async fn engine_edit_booking_excludes_itself() {
    let engine = engine_with("edit_self.wal", &["R-101"]).await;
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    let updated = engine
        .update_booking(
            b.id,
            BookingPatch {
                end: Some(t(6)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.span, Span::new(t(0), t(6)));
    assert_eq!(updated.created_at, b.created_at);
}

#[tokio::test]
async fn engine_edit_booking_into_neighbour_rejected() {
    let engine = engine_with("edit_neighbour.wal", &["R-101"]).await;
    let a = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    let b = engine
        .create_booking(new_booking("R-101", t(4), t(8)))
        .await
        .unwrap();
    let result = engine
        .update_booking(
            b.id,
            BookingPatch {
                start: Some(t(3)),
                ..Default::default()
            },
        )
        .await;
    match result {
        Err(EngineError::BookingConflict { id, .. }) => assert_eq!(id, a.id),
        other => panic!("expected booking conflict, got {other:?}"),
    }
    assert_eq!(engine.get_booking(b.id).await.unwrap().span.start, t(4));
}

#[tokio::test]
async fn engine_status_machine() {
    let engine = engine_with("status_machine.wal", &["R-101"]).await;
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    let to = |status| BookingPatch {
        status: Some(status),
        ..Default::default()
    };

    engine.update_booking(b.id, to(BookingStatus::Actual)).await.unwrap();
    let back = engine.update_booking(b.id, to(BookingStatus::Proposed)).await;
    assert!(matches!(back, Err(EngineError::PolicyViolation(_))));

    engine
        .update_booking(b.id, to(BookingStatus::Cancelled))
        .await
        .unwrap();
    let edit = engine
        .update_booking(
            b.id,
            BookingPatch {
                product_name: Some("Aspirin".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(edit, Err(EngineError::PolicyViolation(_))));
}

#[tokio::test]
async fn engine_cancelling_frees_the_slot() {
    let engine = engine_with("cancel_frees.wal", &["R-101"]).await;
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    engine
        .update_booking(
            b.id,
            BookingPatch {
                status: Some(BookingStatus::Cancelled),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(engine.validate("R-101", t(0), t(4), None).await.is_ok());
    engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
}

#[tokio::test]
async fn engine_move_booking_to_other_reactor() {
    let engine = engine_with("move_booking.wal", &["R-101", "R-102"]).await;
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    let moved = engine
        .update_booking(
            b.id,
            BookingPatch {
                reactor_serial_no: Some("R-102".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.reactor_serial_no, "R-102");
    assert!(engine.list_bookings(Some("R-101")).await.unwrap().is_empty());
    assert_eq!(engine.list_bookings(Some("R-102")).await.unwrap().len(), 1);
    assert_eq!(engine.get_reactor_for_entity(&b.id).as_deref(), Some("R-102"));
}

#[tokio::test]
async fn engine_move_booking_into_conflict_rejected() {
    let engine = engine_with("move_conflict.wal", &["R-101", "R-102"]).await;
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    engine
        .create_downtime(new_downtime("R-102", t(1), t(2)))
        .await
        .unwrap();
    let result = engine
        .update_booking(
            b.id,
            BookingPatch {
                reactor_serial_no: Some("R-102".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(EngineError::DowntimeConflict { .. })));
    assert_eq!(engine.list_bookings(Some("R-101")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn engine_delete_booking_rules() {
    let engine = engine_with("delete_booking.wal", &["R-101"]).await;
    let proposed = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    let executed = engine
        .create_booking(actual(new_booking("R-101", t(4), t(8))))
        .await
        .unwrap();

    engine.delete_booking(proposed.id).await.unwrap();
    assert!(matches!(
        engine.get_booking(proposed.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.delete_booking(executed.id).await,
        Err(EngineError::PolicyViolation(_))
    ));
    assert!(matches!(
        engine.delete_booking(Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn engine_batch_is_all_or_nothing() {
    let engine = engine_with("batch_atomic.wal", &["R-101", "R-102"]).await;
    engine
        .create_booking(new_booking("R-102", t(10), t(12)))
        .await
        .unwrap();

    let batch = vec![
        new_booking("R-101", t(0), t(4)),
        new_booking("R-102", t(11), t(13)),
    ];
    let result = engine.create_bookings(batch).await;
    assert!(matches!(result, Err(EngineError::BookingConflict { .. })));
    assert!(engine.list_bookings(Some("R-101")).await.unwrap().is_empty());

    let batch = vec![
        new_booking("R-101", t(0), t(4)),
        new_booking("R-102", t(12), t(13)),
    ];
    assert_eq!(engine.create_bookings(batch).await.unwrap().len(), 2);
}

#[tokio::test]
async fn engine_batch_checks_entries_against_each_other() {
    let engine = engine_with("batch_internal.wal", &["R-101"]).await;
    let batch = vec![
        new_booking("R-101", t(0), t(4)),
        new_booking("R-101", t(2), t(6)),
    ];
    let result = engine.create_bookings(batch).await;
    assert!(matches!(result, Err(EngineError::BookingConflict { .. })));
    assert!(engine.list_bookings(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn engine_batch_rejects_duplicate_ids() {
    let engine = engine_with("batch_dup.wal", &["R-101"]).await;
    let first = new_booking("R-101", t(0), t(1));
    let mut second = new_booking("R-101", t(2), t(3));
    second.id = first.id;
    let result = engine.create_bookings(vec![first, second]).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn engine_batch_survives_restart() {
    let path = test_wal_path("batch_restart.wal");
    let notify = Arc::new(NotifyHub::new());
    let ids: Vec<Ulid>;
    {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        engine.register_reactor(reactor("R-101")).await.unwrap();
        engine.register_reactor(reactor("R-102")).await.unwrap();
        let batch = vec![
            new_booking("R-101", t(0), t(2)),
            new_booking("R-102", t(0), t(2)),
            new_booking("R-101", t(2), t(4)),
        ];
        ids = batch.iter().map(|b| b.id).collect();
        engine.create_bookings(batch).await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 5);
    }

    let engine = Engine::new(path, notify).unwrap();
    for id in ids {
        engine.get_booking(id).await.unwrap();
    }
}

#[tokio::test]
async fn engine_rejected_insert_releases_its_id() {
    let engine = engine_with("released_id.wal", &["R-101"]).await;
    engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();

    let clash = new_booking("R-101", t(2), t(6));
    let id = clash.id;
    assert!(engine.create_booking(clash).await.is_err());

    let mut retry = new_booking("R-101", t(4), t(6));
    retry.id = id;
    engine.create_booking(retry).await.unwrap();
    assert_eq!(engine.get_booking(id).await.unwrap().span.start, t(4));
}

#[tokio::test]
async fn engine_batch_size_limit() {
    let engine = engine_with("batch_limit.wal", &["R-101"]).await;
    let batch: Vec<_> = (0..=MAX_BATCH_SIZE as i64)
        .map(|i| new_booking("R-101", t(i), t(i + 1)))
        .collect();
    assert!(matches!(
        engine.create_bookings(batch).await,
        Err(EngineError::LimitExceeded("batch too large"))
    ));
}

// ── Engine: downtime ─────────────────────────────────────

#[tokio::test]
async fn engine_downtime_rejected_by_booking() {
    let engine = engine_with("downtime_vs_booking.wal", &["R-101"]).await;
    engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    let result = engine.create_downtime(new_downtime("R-101", t(3), t(5))).await;
    assert!(matches!(result, Err(EngineError::BookingConflict { .. })));
}

#[tokio::test]
async fn engine_downtime_rejected_by_downtime() {
    let engine = engine_with("downtime_vs_downtime.wal", &["R-101"]).await;
    engine
        .create_downtime(new_downtime("R-101", t(0), t(4)))
        .await
        .unwrap();
    let result = engine.create_downtime(new_downtime("R-101", t(2), t(3))).await;
    assert!(matches!(result, Err(EngineError::DowntimeConflict { .. })));
}

#[tokio::test]
async fn engine_cancel_downtime_is_soft_and_terminal() {
    let engine = engine_with("cancel_downtime.wal", &["R-101"]).await;
    let dt = engine
        .create_downtime(new_downtime("R-101", t(0), t(4)))
        .await
        .unwrap();
    let cancelled = engine
        .cancel_downtime(dt.id, Some("lead@facility.com".into()))
        .await
        .unwrap();
    assert!(cancelled.is_cancelled);
    assert_eq!(cancelled.updated_by_email, "lead@facility.com");

    // Still stored, no longer blocking.
    assert_eq!(engine.list_downtime(Some("R-101")).await.unwrap().len(), 1);
    engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();

    let reinstate = engine
        .update_downtime(
            dt.id,
            DowntimePatch {
                is_cancelled: Some(false),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(reinstate, Err(EngineError::PolicyViolation(_))));
}

#[tokio::test]
async fn engine_update_downtime_excludes_itself() {
    let engine = engine_with("update_downtime.wal", &["R-101"]).await;
    let dt = engine
        .create_downtime(new_downtime("R-101", t(0), t(4)))
        .await
        .unwrap();
    let updated = engine
        .update_downtime(
            dt.id,
            DowntimePatch {
                start: Some(t(1)),
                kind: Some(DowntimeKind::Breakdown),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.span, Span::new(t(1), t(4)));
    assert_eq!(updated.kind, DowntimeKind::Breakdown);
}

// ── Engine: queries ──────────────────────────────────────

#[tokio::test]
async fn engine_validate_is_read_only() {
    let engine = engine_with("validate.wal", &["R-101"]).await;
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    assert!(engine.validate("R-101", t(2), t(3), None).await.is_err());
    assert!(engine.validate("R-101", t(2), t(3), Some(b.id)).await.is_ok());
    assert!(matches!(
        engine.validate("R-404", t(2), t(3), None).await,
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(engine.wal_appends_since_compact().await, 2);
}

#[tokio::test]
async fn engine_occupancy_filters_by_plant_and_block() {
    let engine = engine_with("occupancy_filters.wal", &[]).await;
    engine
        .register_reactor(reactor_in("R-101", "Plant Alpha", "Block A"))
        .await
        .unwrap();
    engine
        .register_reactor(reactor_in("R-102", "Plant Alpha", "Block B"))
        .await
        .unwrap();
    engine
        .register_reactor(reactor_in("R-201", "Plant Beta", "Block A"))
        .await
        .unwrap();
    engine
        .create_booking(actual(new_booking("R-102", t(0), t(12))))
        .await
        .unwrap();

    let (ws, we) = window_720h();
    let all = engine.occupancy(ws, we, None, None).await.unwrap();
    assert_eq!(all.len(), 3);

    let alpha = engine.occupancy(ws, we, Some("Plant Alpha"), None).await.unwrap();
    assert_eq!(alpha.len(), 2);

    let block_b = engine
        .occupancy(ws, we, Some("Plant Alpha"), Some("Block B"))
        .await
        .unwrap();
    assert_eq!(block_b.len(), 1);
    assert_eq!(block_b[0].actual_hours, 12.0);
}

#[tokio::test]
async fn engine_occupancy_window_limit() {
    let engine = engine_with("occupancy_limit.wal", &["R-101"]).await;
    let result = engine
        .occupancy(T0, T0 + MAX_QUERY_WINDOW_MS + 1, None, None)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::LimitExceeded("query window too wide"))
    ));
}

#[tokio::test]
async fn engine_occupancy_extreme_window_is_rejected() {
    let engine = engine_with("occupancy_extreme.wal", &["R-101"]).await;
    let result = engine.occupancy(i64::MIN, i64::MAX, None, None).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
    let result = engine.occupancy(i64::MIN, 0, None, None).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn engine_insights_fallback_without_advisor() {
    let engine = engine_with("insights.wal", &["R-101"]).await;
    let metrics = engine.occupancy(t(0), t(720), None, None).await.unwrap();
    assert_eq!(
        engine.insights(&metrics).await,
        crate::advisory::FALLBACK_INSIGHT
    );
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_bookings_commit_exactly_one() {
    let engine = Arc::new(engine_with("race.wal", &["R-101"]).await);

    let n = 32;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            // Every candidate overlaps every other one.
            eng.create_booking(new_booking("R-101", t(0), t(4) + i)).await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::BookingConflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, n - 1);
    assert_eq!(engine.list_bookings(None).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_on_different_reactors_all_commit() {
    let serials: Vec<String> = (0..8).map(|i| format!("R-{}", 100 + i)).collect();
    let refs: Vec<&str> = serials.iter().map(String::as_str).collect();
    let engine = Arc::new(engine_with("parallel_reactors.wal", &refs).await);

    let mut handles = Vec::new();
    for serial in serials.clone() {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_booking(new_booking(&serial, t(0), t(4))).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.list_bookings(None).await.unwrap().len(), serials.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_with_same_id_commit_once() {
    let engine = Arc::new(engine_with("same_id_race.wal", &["R-101"]).await);
    let held = engine
        .get_reactor_state("R-101")
        .unwrap()
        .write_owned()
        .await;

    let first = new_booking("R-101", t(0), t(2));
    let mut second = new_booking("R-101", t(4), t(6));
    second.id = first.id;
    let mut handles = Vec::new();
    for nb in [first, second] {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move { eng.create_booking(nb).await }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    let mut committed = Vec::new();
    let mut duplicates = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(b) => committed.push(b),
            Err(EngineError::AlreadyExists(_)) => duplicates += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(committed.len(), 1);
    assert_eq!(duplicates, 1);
    let stored = engine.list_bookings(None).await.unwrap();
    assert_eq!(stored, committed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_same_id_on_different_reactors_commits_once() {
    let engine = Arc::new(engine_with("same_id_cross.wal", &["R-101", "R-102"]).await);

    let a = new_booking("R-101", t(0), t(2));
    let mut b = new_downtime("R-102", t(0), t(2));
    b.id = a.id;
    let eng = engine.clone();
    let booking = tokio::spawn(async move { eng.create_booking(a).await });
    let eng = engine.clone();
    let downtime = tokio::spawn(async move { eng.create_downtime(b).await });

    let booked = booking.await.unwrap().is_ok();
    let down = downtime.await.unwrap().is_ok();
    assert!(booked ^ down, "exactly one insert may claim the id");
    let records = engine.list_bookings(None).await.unwrap().len()
        + engine.list_downtime(None).await.unwrap().len();
    assert_eq!(records, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_respect_reactor_cap() {
    let engine = Arc::new(
        Engine::new(test_wal_path("reactor_cap.wal"), Arc::new(NotifyHub::new()))
            .unwrap()
            .with_max_reactors(3),
    );

    let mut handles = Vec::new();
    for i in 0..10 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.register_reactor(reactor(&format!("R-{}", 200 + i))).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::LimitExceeded(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 3);
    assert_eq!(engine.list_reactors().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn edit_follows_booking_moved_while_waiting() {
    let engine = Arc::new(engine_with("edit_after_move.wal", &["R-101", "R-102"]).await);
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    let held = engine
        .get_reactor_state("R-101")
        .unwrap()
        .write_owned()
        .await;

    // Both queue on R-101; the move is first in line.
    let eng = engine.clone();
    let mover = tokio::spawn(async move {
        let patch = BookingPatch {
            reactor_serial_no: Some("R-102".into()),
            ..Default::default()
        };
        eng.update_booking(b.id, patch).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let eng = engine.clone();
    let editor = tokio::spawn(async move {
        let patch = BookingPatch {
            product_name: Some("Metformin".into()),
            ..Default::default()
        };
        eng.update_booking(b.id, patch).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    mover.await.unwrap().unwrap();
    let edited = editor.await.unwrap().unwrap();
    assert_eq!(edited.reactor_serial_no, "R-102");
    assert_eq!(edited.product_name, "Metformin");
    assert_eq!(engine.get_booking(b.id).await.unwrap(), edited);
}

#[tokio::test]
async fn lock_timeout_surfaces_as_timeout_error() {
    let engine = engine_with("lock_timeout.wal", &["R-101"])
        .await
        .with_lock_timeout(Duration::from_millis(20));
    let held = engine
        .get_reactor_state("R-101")
        .unwrap()
        .write_owned()
        .await;

    let result = engine.create_booking(new_booking("R-101", t(0), t(4))).await;
    assert!(matches!(result, Err(EngineError::Timeout(_))));
    drop(held);

    engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
}

// ── Change feed ──────────────────────────────────────────

#[tokio::test]
async fn subscribers_see_committed_events() {
    let engine = engine_with("feed.wal", &["R-101"]).await;
    let mut rx = engine.subscribe("R-101");
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        Event::BookingCommitted { booking } => assert_eq!(booking.id, b.id),
        other => panic!("unexpected event {other:?}"),
    }

    // Rejections publish nothing.
    let _ = engine.create_booking(new_booking("R-101", t(1), t(2))).await;
    assert!(rx.try_recv().is_err());
}

// ── WAL replay and compaction ────────────────────────────

#[tokio::test]
async fn engine_wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let notify = Arc::new(NotifyHub::new());

    let kept;
    let moved;
    let dt;
    {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        engine.register_reactor(reactor("R-101")).await.unwrap();
        engine.register_reactor(reactor("R-102")).await.unwrap();
        engine.register_reactor(reactor("R-103")).await.unwrap();

        kept = engine
            .create_booking(actual(new_booking("R-101", t(0), t(4))))
            .await
            .unwrap();
        let gone = engine
            .create_booking(new_booking("R-101", t(4), t(8)))
            .await
            .unwrap();
        engine.delete_booking(gone.id).await.unwrap();

        moved = engine
            .create_booking(new_booking("R-101", t(10), t(12)))
            .await
            .unwrap();
        engine
            .update_booking(
                moved.id,
                BookingPatch {
                    reactor_serial_no: Some("R-102".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        dt = engine
            .create_downtime(new_downtime("R-102", t(20), t(30)))
            .await
            .unwrap();
        engine.cancel_downtime(dt.id, None).await.unwrap();
        engine.remove_reactor("R-103").await.unwrap();
    }

    let engine = Engine::new(path, notify).unwrap();
    let serials: Vec<_> = engine
        .list_reactors()
        .await
        .into_iter()
        .map(|r| r.serial_no)
        .collect();
    assert_eq!(serials, vec!["R-101", "R-102"]);

    let r101 = engine.list_bookings(Some("R-101")).await.unwrap();
    assert_eq!(r101.len(), 1);
    assert_eq!(r101[0], kept);

    let r102 = engine.list_bookings(Some("R-102")).await.unwrap();
    assert_eq!(r102.len(), 1);
    assert_eq!(r102[0].id, moved.id);
    assert_eq!(engine.get_reactor_for_entity(&moved.id).as_deref(), Some("R-102"));

    assert!(engine.get_downtime(dt.id).await.unwrap().is_cancelled);

    // The replayed store still enforces conflicts.
    let result = engine.create_booking(new_booking("R-101", t(1), t(2))).await;
    assert!(matches!(result, Err(EngineError::BookingConflict { .. })));
}

#[tokio::test]
async fn compact_wal_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
    engine.register_reactor(reactor("R-101")).await.unwrap();

    // Churn: create and delete proposals.
    for i in 0..20 {
        let b = engine
            .create_booking(new_booking("R-101", t(i), t(i + 1)))
            .await
            .unwrap();
        engine.delete_booking(b.id).await.unwrap();
    }
    let kept = engine
        .create_booking(actual(new_booking("R-101", t(0), t(4))))
        .await
        .unwrap();

    let before = engine.occupancy(t(0), t(720), None, None).await.unwrap();
    let size_before = std::fs::metadata(&path).unwrap().len();

    engine.compact_wal().await.unwrap();

    let size_after = std::fs::metadata(&path).unwrap().len();
    assert!(
        size_after < size_before,
        "compacted WAL ({size_after}) should be smaller than original ({size_before})"
    );
    assert_eq!(engine.occupancy(t(0), t(720), None, None).await.unwrap(), before);
    assert_eq!(engine.list_bookings(None).await.unwrap(), vec![kept]);
}

#[tokio::test]
async fn compact_wal_survives_restart() {
    let path = test_wal_path("compact_restart.wal");
    let notify = Arc::new(NotifyHub::new());

    let booking_id;
    let downtime_id;
    {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        engine.register_reactor(reactor("R-101")).await.unwrap();
        booking_id = engine
            .create_booking(new_booking("R-101", t(0), t(4)))
            .await
            .unwrap()
            .id;
        engine.compact_wal().await.unwrap();

        // Appended after compaction.
        downtime_id = engine
            .create_downtime(new_downtime("R-101", t(10), t(12)))
            .await
            .unwrap()
            .id;
    }

    let engine = Engine::new(path, notify).unwrap();
    assert_eq!(engine.get_booking(booking_id).await.unwrap().span.start, t(0));
    assert!(!engine.get_downtime(downtime_id).await.unwrap().is_cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn commit_during_compaction_survives_restart() {
    let path = test_wal_path("compact_concurrent.wal");
    let notify = Arc::new(NotifyHub::new());
    let booking_id;
    {
        let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());
        engine.register_reactor(reactor("R-A")).await.unwrap();
        engine.register_reactor(reactor("R-B")).await.unwrap();

        // Stall the snapshot on R-B, after R-A has been read.
        let held = engine.get_reactor_state("R-B").unwrap().write_owned().await;
        let eng = engine.clone();
        let compaction = tokio::spawn(async move { eng.compact_wal().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let eng = engine.clone();
        let commit =
            tokio::spawn(async move { eng.create_booking(new_booking("R-A", t(0), t(4))).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        compaction.await.unwrap().unwrap();
        booking_id = commit.await.unwrap().unwrap().id;
        assert_eq!(engine.list_bookings(Some("R-A")).await.unwrap().len(), 1);
    }

    let engine = Engine::new(path, notify).unwrap();
    let bookings = engine.list_bookings(Some("R-A")).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].id, booking_id);
}

#[tokio::test]
async fn wal_appends_since_compact_through_channel() {
    let engine = engine_with("appends_counter.wal", &["R-101"]).await;
    let b = engine
        .create_booking(new_booking("R-101", t(0), t(4)))
        .await
        .unwrap();
    engine.delete_booking(b.id).await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 3);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

#[tokio::test]
async fn group_commit_batches_appends() {
    let path = test_wal_path("group_commit_batch.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.register_reactor(reactor(&format!("R-{i:03}"))).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.list_reactors().await.len(), n);

    let engine2 = Engine::new(path, notify).unwrap();
    assert_eq!(engine2.list_reactors().await.len(), n);
}
