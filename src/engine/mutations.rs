use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_conflict, check_reactor, now_ms, validate_span};
use super::{Engine, EngineError, IdReservation, WalCommand, apply_to_reactor};

fn check_text(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded(field));
    }
    Ok(())
}

fn check_serial(serial_no: &str) -> Result<(), EngineError> {
    if serial_no.trim().is_empty() {
        return Err(EngineError::PolicyViolation(
            "reactor serial number must not be empty".into(),
        ));
    }
    if serial_no.len() > MAX_SERIAL_LEN {
        return Err(EngineError::LimitExceeded("serial number too long"));
    }
    Ok(())
}

fn check_reactor_fields(r: &Reactor) -> Result<(), EngineError> {
    check_serial(&r.serial_no)?;
    check_text("capacity range too long", &r.capacity_range)?;
    check_text("moc too long", &r.moc)?;
    check_text("agitator type too long", &r.agitator_type)?;
    check_text("plant name too long", &r.plant_name)?;
    check_text("block name too long", &r.block_name)?;
    if let Some(notes) = &r.notes {
        check_text("notes too long", notes)?;
    }
    Ok(())
}

fn check_booking_fields(b: &Booking) -> Result<(), EngineError> {
    check_text("product name too long", &b.product_name)?;
    check_text("stage too long", &b.stage)?;
    check_text("batch number too long", &b.batch_number)?;
    check_text("operation too long", &b.operation)?;
    check_text("requester email too long", &b.requested_by_email)
}

fn check_downtime_fields(d: &Downtime) -> Result<(), EngineError> {
    check_text("reason too long", &d.reason)?;
    check_text("updater email too long", &d.updated_by_email)
}

fn check_capacity(rs: &ReactorState) -> Result<(), EngineError> {
    if rs.record_count() >= MAX_RECORDS_PER_REACTOR {
        return Err(EngineError::LimitExceeded("too many records on reactor"));
    }
    Ok(())
}

/// Count validator rejections by kind; pass the error through.
fn rejected(e: EngineError) -> EngineError {
    if e.is_conflict() || matches!(e, EngineError::Chronology { .. }) {
        let kind = match e.kind() {
            super::ErrorKind::BookingConflict => "booking",
            super::ErrorKind::DowntimeConflict => "downtime",
            _ => "chronology",
        };
        metrics::counter!(crate::observability::CONFLICTS_TOTAL, "kind" => kind).increment(1);
    }
    e
}

impl Engine {
    // ── Reactors ─────────────────────────────────────────────

    pub async fn register_reactor(&self, reactor: Reactor) -> Result<Reactor, EngineError> {
        check_reactor_fields(&reactor)?;
        let _gate = self.enter_mutation().await?;
        let _registering = self.registration.lock().await;
        if self.state.len() >= self.max_reactors {
            return Err(EngineError::LimitExceeded("too many reactors"));
        }

        // Publish the new state already write-locked: concurrent writers queue
        // behind us and see it vanish again if the WAL append fails.
        let serial = reactor.serial_no.clone();
        let rs = Arc::new(RwLock::new(ReactorState::new(reactor.clone())));
        let guard = rs.clone().write_owned().await;
        match self.state.entry(serial.clone()) {
            Entry::Occupied(_) => {
                return Err(EngineError::AlreadyExists(format!("reactor {serial}")));
            }
            Entry::Vacant(v) => {
                v.insert(rs);
            }
        }

        let event = Event::ReactorRegistered {
            reactor: reactor.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.state.remove(&serial);
            return Err(e);
        }
        drop(guard);
        self.notify.send(&event);
        info!(
            "reactor {serial} registered in {}/{}",
            reactor.plant_name, reactor.block_name
        );
        Ok(reactor)
    }

    pub async fn update_reactor(
        &self,
        serial_no: &str,
        patch: ReactorPatch,
    ) -> Result<Reactor, EngineError> {
        let _gate = self.enter_mutation().await?;
        let mut guard = self.lock_reactor(serial_no).await?;
        let mut reactor = guard.reactor.clone();
        patch.apply(&mut reactor);
        check_reactor_fields(&reactor)?;

        let event = Event::ReactorUpdated {
            reactor: reactor.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(reactor)
    }

    /// Remove a reactor that carries no audit history. Executed or cancelled
    /// bookings and downtime records must be kept, so their presence is a
    /// policy violation.
    pub async fn remove_reactor(&self, serial_no: &str) -> Result<(), EngineError> {
        let _gate = self.enter_mutation().await?;
        let guard = self.lock_reactor(serial_no).await?;
        if guard.has_audit_history() {
            return Err(EngineError::PolicyViolation(format!(
                "reactor {serial_no} has booking or downtime history and cannot be deleted"
            )));
        }

        let event = Event::ReactorRemoved {
            serial_no: serial_no.to_string(),
        };
        self.wal_append(&event).await?;
        self.state.remove(serial_no);
        self.unmap_records(&guard);
        drop(guard);
        self.notify.send(&event);
        self.notify.remove(serial_no);
        info!("reactor {serial_no} removed");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Validate a new booking's fields and claim its id.
    fn stage_booking(
        &self,
        new: NewBooking,
        now: Ms,
    ) -> Result<(Booking, IdReservation<'_>), EngineError> {
        let span = validate_span(new.start, new.end).map_err(rejected)?;
        let booking = Booking {
            id: new.id,
            reactor_serial_no: new.reactor_serial_no,
            team: new.team,
            product_name: new.product_name,
            stage: new.stage,
            batch_number: new.batch_number,
            operation: new.operation,
            span,
            status: new.status,
            requested_by_email: new.requested_by_email,
            created_at: now,
            updated_at: now,
        };
        check_booking_fields(&booking)?;
        let reservation = self.reserve_id(booking.id, &booking.reactor_serial_no)?;
        Ok((booking, reservation))
    }

    /// Validate and commit one booking. The reactor stays write-locked from
    /// the conflict check until the booking is durable and applied.
    pub async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        let _gate = self.enter_mutation().await?;
        let (booking, reservation) = self.stage_booking(new, now_ms())?;
        let mut guard = self.lock_reactor(&booking.reactor_serial_no).await?;
        check_capacity(&guard)?;
        if booking.is_active() {
            check_reactor(&guard, &booking.span, None).map_err(rejected)?;
        }

        let event = Event::BookingCommitted {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        reservation.keep();
        info!(
            "booking {} committed on {} by {} ({})",
            booking.id,
            booking.reactor_serial_no,
            booking.requested_by_email,
            booking.status.as_str()
        );
        Ok(booking)
    }

    /// Commit several bookings all-or-nothing. They may target different
    /// reactors and are also checked against each other.
    pub async fn create_bookings(
        &self,
        batch: Vec<NewBooking>,
    ) -> Result<Vec<Booking>, EngineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let _gate = self.enter_mutation().await?;
        let now = now_ms();
        let mut staged = Vec::with_capacity(batch.len());
        let mut reservations: Option<IdReservation<'_>> = None;
        for new in batch {
            // A repeated id inside the batch hits its own earlier claim.
            let (booking, claim) = self.stage_booking(new, now)?;
            match reservations.as_mut() {
                Some(all) => all.absorb(claim),
                None => reservations = Some(claim),
            }
            staged.push(booking);
        }

        // Lock in sorted serial order to prevent deadlocks.
        let serials: BTreeSet<&str> = staged.iter().map(|b| b.reactor_serial_no.as_str()).collect();
        let mut guards = BTreeMap::new();
        for serial in serials {
            let guard = self.lock_reactor(serial).await?;
            guards.insert(serial.to_string(), guard);
        }

        // Phase 1: validate against committed state and earlier batch entries.
        let mut accepted: Vec<Booking> = Vec::with_capacity(staged.len());
        for b in &staged {
            let guard = &guards[&b.reactor_serial_no];
            let pending = accepted
                .iter()
                .filter(|a| a.reactor_serial_no == b.reactor_serial_no)
                .count();
            if guard.record_count() + pending >= MAX_RECORDS_PER_REACTOR {
                return Err(EngineError::LimitExceeded("too many records on reactor"));
            }
            if b.is_active() {
                check_reactor(guard, &b.span, None).map_err(rejected)?;
                check_conflict(
                    &b.reactor_serial_no,
                    b.span.start,
                    b.span.end,
                    None,
                    &accepted,
                    &[],
                )
                .map_err(rejected)?;
            }
            accepted.push(b.clone());
        }

        // Phase 2: one WAL write for the whole batch, then apply.
        let events: Vec<Event> = accepted
            .iter()
            .map(|b| Event::BookingCommitted { booking: b.clone() })
            .collect();
        self.wal_append_all(events.clone()).await?;
        for event in &events {
            if let Some(guard) = guards.get_mut(event.reactor_serial_no()) {
                apply_to_reactor(guard, event, &self.entity_to_reactor);
            }
            self.notify.send(event);
        }
        if let Some(reservations) = reservations {
            reservations.keep();
        }
        info!("batch of {} bookings committed", accepted.len());
        Ok(accepted)
    }

    /// Apply a correction to a booking.
    ///
    /// Cancelled bookings are immutable and status moves follow
    /// [`BookingStatus::can_become`]. Unless the result is cancelled, the new
    /// interval is validated with the booking itself excluded.
    pub async fn update_booking(
        &self,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<Booking, EngineError> {
        let _gate = self.enter_mutation().await?;
        let missing = || EngineError::NotFound(format!("booking {id}"));

        // The booking may be moved while we wait for its reactor; follow it.
        let mut attempts = 0;
        let (from, to, mut from_guard, mut to_guard) = loop {
            let from = self.get_reactor_for_entity(&id).ok_or_else(missing)?;
            let to = patch.reactor_serial_no.clone().unwrap_or_else(|| from.clone());
            let (f, t) = self.lock_pair(&from, &to).await?;
            if self.get_reactor_for_entity(&id).as_deref() == Some(from.as_str()) {
                break (from, to, f, t);
            }
            attempts += 1;
            if attempts == super::MAX_RESOLVE_ATTEMPTS {
                return Err(missing());
            }
        };

        let current = from_guard
            .booking(id)
            .cloned()
            .ok_or_else(missing)?;
        if current.status == BookingStatus::Cancelled {
            return Err(EngineError::PolicyViolation(format!(
                "booking {id} is cancelled and cannot be changed"
            )));
        }
        let status = patch.status.unwrap_or(current.status);
        if !current.status.can_become(status) {
            return Err(EngineError::PolicyViolation(format!(
                "booking {id} cannot move from {} to {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        let start = patch.start.unwrap_or(current.span.start);
        let end = patch.end.unwrap_or(current.span.end);
        let span = validate_span(start, end).map_err(rejected)?;
        let updated = Booking {
            id,
            reactor_serial_no: to.clone(),
            team: patch.team.unwrap_or(current.team),
            product_name: patch.product_name.unwrap_or(current.product_name),
            stage: patch.stage.unwrap_or(current.stage),
            batch_number: patch.batch_number.unwrap_or(current.batch_number),
            operation: patch.operation.unwrap_or(current.operation),
            span,
            status,
            requested_by_email: patch
                .requested_by_email
                .unwrap_or(current.requested_by_email),
            created_at: current.created_at,
            updated_at: now_ms(),
        };
        check_booking_fields(&updated)?;

        match to_guard.as_mut() {
            None => {
                if updated.is_active() {
                    check_reactor(&from_guard, &span, Some(id)).map_err(rejected)?;
                }
                let event = Event::BookingRevised {
                    booking: updated.clone(),
                };
                self.persist_and_apply(&mut from_guard, &event).await?;
            }
            Some(to_guard) => {
                check_capacity(to_guard)?;
                if updated.is_active() {
                    check_reactor(to_guard, &span, Some(id)).map_err(rejected)?;
                }
                let event = Event::BookingMoved {
                    from_reactor_serial_no: from.clone(),
                    booking: updated.clone(),
                };
                self.wal_append(&event).await?;
                from_guard.remove_booking(id);
                apply_to_reactor(to_guard, &event, &self.entity_to_reactor);
                self.notify.send(&event);
            }
        }
        info!(
            "booking {id} revised on {to} ({})",
            updated.status.as_str()
        );
        Ok(updated)
    }

    /// Write locks on `from` and `to` (the same reactor or two), taken in
    /// serial order.
    async fn lock_pair(
        &self,
        from: &str,
        to: &str,
    ) -> Result<
        (
            OwnedRwLockWriteGuard<ReactorState>,
            Option<OwnedRwLockWriteGuard<ReactorState>>,
        ),
        EngineError,
    > {
        if from == to {
            Ok((self.lock_reactor(from).await?, None))
        } else if from < to {
            let f = self.lock_reactor(from).await?;
            let t = self.lock_reactor(to).await?;
            Ok((f, Some(t)))
        } else {
            let t = self.lock_reactor(to).await?;
            let f = self.lock_reactor(from).await?;
            Ok((f, Some(t)))
        }
    }

    /// Hard-delete a booking. Only proposals may go; executed work is audit
    /// history and must be cancelled instead.
    pub async fn delete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _gate = self.enter_mutation().await?;
        let (serial, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;
        if booking.status != BookingStatus::Proposed {
            return Err(EngineError::PolicyViolation(format!(
                "{} booking {id} cannot be deleted; only proposed bookings may be removed",
                booking.status.as_str()
            )));
        }

        let event = Event::BookingRemoved {
            id,
            reactor_serial_no: serial,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("booking {id} deleted from {}", booking.reactor_serial_no);
        Ok(booking)
    }

    // ── Downtime ─────────────────────────────────────────────

    pub async fn create_downtime(&self, new: NewDowntime) -> Result<Downtime, EngineError> {
        let span = validate_span(new.start, new.end).map_err(rejected)?;
        let downtime = Downtime {
            id: new.id,
            reactor_serial_no: new.reactor_serial_no,
            span,
            kind: new.kind,
            reason: new.reason,
            updated_by_email: new.updated_by_email,
            updated_at: now_ms(),
            is_cancelled: false,
        };
        check_downtime_fields(&downtime)?;

        let _gate = self.enter_mutation().await?;
        let reservation = self.reserve_id(downtime.id, &downtime.reactor_serial_no)?;
        let mut guard = self.lock_reactor(&downtime.reactor_serial_no).await?;
        check_capacity(&guard)?;
        check_reactor(&guard, &span, None).map_err(rejected)?;

        let event = Event::DowntimeCommitted {
            downtime: downtime.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        reservation.keep();
        info!(
            "{} downtime {} committed on {} by {}",
            downtime.kind.as_str(),
            downtime.id,
            downtime.reactor_serial_no,
            downtime.updated_by_email
        );
        Ok(downtime)
    }

    /// Revise a downtime record. A cancelled record is terminal; reinstating
    /// one is a policy violation.
    pub async fn update_downtime(
        &self,
        id: Ulid,
        patch: DowntimePatch,
    ) -> Result<Downtime, EngineError> {
        let _gate = self.enter_mutation().await?;
        let (_, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .downtime(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("downtime {id}")))?;
        if current.is_cancelled {
            return Err(EngineError::PolicyViolation(format!(
                "downtime {id} is cancelled and cannot be changed"
            )));
        }

        let start = patch.start.unwrap_or(current.span.start);
        let end = patch.end.unwrap_or(current.span.end);
        let span = validate_span(start, end).map_err(rejected)?;
        let updated = Downtime {
            span,
            kind: patch.kind.unwrap_or(current.kind),
            reason: patch.reason.unwrap_or(current.reason),
            updated_by_email: patch.updated_by_email.unwrap_or(current.updated_by_email),
            updated_at: now_ms(),
            is_cancelled: patch.is_cancelled.unwrap_or(false),
            ..current
        };
        check_downtime_fields(&updated)?;
        if !updated.is_cancelled {
            check_reactor(&guard, &span, Some(id)).map_err(rejected)?;
        }

        let event = Event::DowntimeRevised {
            downtime: updated.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(
            "downtime {id} revised on {}{}",
            updated.reactor_serial_no,
            if updated.is_cancelled { " (cancelled)" } else { "" }
        );
        Ok(updated)
    }

    /// Soft-delete: the record stays in the store flagged as cancelled.
    pub async fn cancel_downtime(
        &self,
        id: Ulid,
        updated_by_email: Option<String>,
    ) -> Result<Downtime, EngineError> {
        self.update_downtime(
            id,
            DowntimePatch {
                updated_by_email,
                is_cancelled: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Mutations are held off from the snapshot until the new log is in
    /// place; otherwise a commit landing in between would be lost with the
    /// old file.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.compaction_gate.write().await;
        let mut serials: Vec<String> = self.state.iter().map(|e| e.key().clone()).collect();
        serials.sort();

        let mut events = Vec::new();
        for serial in serials {
            let Some(rs) = self.get_reactor_state(&serial) else {
                continue;
            };
            let guard = rs.read().await;
            events.push(Event::ReactorRegistered {
                reactor: guard.reactor.clone(),
            });
            for b in &guard.bookings {
                events.push(Event::BookingCommitted { booking: b.clone() });
            }
            for d in &guard.downtime {
                events.push(Event::DowntimeCommitted {
                    downtime: d.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
