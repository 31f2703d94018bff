mod conflict;
mod error;
mod mutations;
mod occupancy;
mod queries;
#[cfg(test)]
mod tests;

pub use conflict::{check_conflict, validate_span};
pub use error::{EngineError, ErrorKind};
pub use occupancy::{Window, aggregate, clipped_ms, month_window, parse_month, window_len};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{
    Mutex, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, broadcast, mpsc, oneshot,
};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::advisory::Advisor;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedReactorState = Arc<RwLock<ReactorState>>;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// One or more events that become durable together or not at all.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued, then
/// issues a single fsync for the whole batch and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (events, response) = match cmd {
            WalCommand::Append { events, response } => (events, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(events, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        flush_and_respond(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    debug!("WAL writer stopped");
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    let event_count: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(event_count as f64);
    let flush_start = std::time::Instant::now();

    let result = batch
        .iter()
        .flat_map(|(events, _)| events.iter())
        .try_for_each(|event| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!("WAL flush failed for {event_count} events: {e}");
        // Every sender hears about the failure, so none of the group may
        // survive on disk.
        if let Err(e) = wal.discard_unsynced() {
            warn!("WAL rollback failed: {e}");
        }
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Authoritative in-memory store of reactors, bookings and downtime.
///
/// Every reactor sits behind its own `RwLock`; validate-then-commit runs
/// entirely under that reactor's write lock, so at most one mutation per
/// reactor is in flight at a time.
pub struct Engine {
    pub state: DashMap<String, SharedReactorState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking/downtime id → reactor serial number.
    pub(super) entity_to_reactor: DashMap<Ulid, String>,
    pub(super) lock_timeout: Duration,
    pub(super) advisor: Option<Arc<dyn Advisor>>,
    /// Held shared by every mutation and exclusively by compaction, so the
    /// compacted snapshot and the log swap see no commits in between.
    pub(super) compaction_gate: RwLock<()>,
    /// Serializes reactor registration so the reactor cap holds.
    pub(super) registration: Mutex<()>,
    pub(super) max_reactors: usize,
}

/// Apply an event directly to a ReactorState (caller holds the lock).
fn apply_to_reactor(rs: &mut ReactorState, event: &Event, entity_map: &DashMap<Ulid, String>) {
    match event {
        Event::ReactorUpdated { reactor } => {
            rs.reactor = reactor.clone();
        }
        Event::BookingCommitted { booking }
        | Event::BookingRevised { booking }
        | Event::BookingMoved { booking, .. } => {
            rs.upsert_booking(booking.clone());
            entity_map.insert(booking.id, booking.reactor_serial_no.clone());
        }
        Event::BookingRemoved { id, .. } => {
            rs.remove_booking(*id);
            entity_map.remove(id);
        }
        Event::DowntimeCommitted { downtime } | Event::DowntimeRevised { downtime } => {
            rs.upsert_downtime(downtime.clone());
            entity_map.insert(downtime.id, downtime.reactor_serial_no.clone());
        }
        // Registered/Removed are handled at the DashMap level, not here
        Event::ReactorRegistered { .. } | Event::ReactorRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_reactor: DashMap::new(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            advisor: None,
            compaction_gate: RwLock::new(()),
            registration: Mutex::new(()),
            max_reactors: crate::limits::MAX_REACTORS,
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never use blocking_write here: this may run inside a runtime.
        for event in &events {
            match event {
                Event::ReactorRegistered { reactor } => {
                    let rs = ReactorState::new(reactor.clone());
                    engine
                        .state
                        .insert(reactor.serial_no.clone(), Arc::new(RwLock::new(rs)));
                }
                Event::ReactorRemoved { serial_no } => {
                    if let Some((_, rs)) = engine.state.remove(serial_no)
                        && let Ok(guard) = rs.try_read()
                    {
                        engine.unmap_records(&guard);
                    }
                }
                other => {
                    if let Some(prev) = other.previous_reactor_serial_no()
                        && let Some(entry) = engine.state.get(prev)
                        && let Ok(mut guard) = entry.value().try_write()
                    {
                        if let Event::BookingMoved { booking, .. } = other {
                            guard.remove_booking(booking.id);
                        }
                    }
                    let serial = other.reactor_serial_no();
                    if let Some(entry) = engine.state.get(serial) {
                        let rs = entry.value().clone();
                        drop(entry);
                        match rs.try_write() {
                            Ok(mut guard) => {
                                apply_to_reactor(&mut guard, other, &engine.entity_to_reactor)
                            }
                            Err(_) => warn!("replay: reactor {serial} unexpectedly locked"),
                        }
                    } else {
                        warn!("replay: {} for unknown reactor {serial}", other.label());
                    }
                }
            }
        }
        debug!(
            "replayed {} events into {} reactors",
            events.len(),
            engine.state.len()
        );

        Ok(engine)
    }

    /// Bound on how long a mutation waits for a reactor's write lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_max_reactors(mut self, max: usize) -> Self {
        self.max_reactors = max;
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append_all(vec![event.clone()]).await
    }

    /// Write several events as one unit: all durable or none.
    async fn wal_append_all(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_reactor_state(&self, serial_no: &str) -> Option<SharedReactorState> {
        self.state.get(serial_no).map(|e| e.value().clone())
    }

    pub fn get_reactor_for_entity(&self, entity_id: &Ulid) -> Option<String> {
        self.entity_to_reactor.get(entity_id).map(|e| e.value().clone())
    }

    pub fn subscribe(&self, serial_no: &str) -> broadcast::Receiver<Event> {
        self.notify.subscribe(serial_no)
    }

    pub(super) fn unmap_records(&self, rs: &ReactorState) {
        for b in &rs.bookings {
            self.entity_to_reactor.remove(&b.id);
        }
        for d in &rs.downtime {
            self.entity_to_reactor.remove(&d.id);
        }
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ReactorState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_reactor(rs, event, &self.entity_to_reactor);
        self.notify.send(event);
        Ok(())
    }

    /// Shared side of the compaction gate. Taken once at the top of every
    /// mutation, before any reactor lock.
    pub(super) async fn enter_mutation(&self) -> Result<RwLockReadGuard<'_, ()>, EngineError> {
        tokio::time::timeout(self.lock_timeout, self.compaction_gate.read())
            .await
            .map_err(|_| EngineError::Timeout("waiting for WAL compaction".into()))
    }

    /// Acquire a reactor's write lock, giving up after `lock_timeout`.
    ///
    /// A reactor removed while we waited is reported as missing.
    pub(super) async fn lock_reactor(
        &self,
        serial_no: &str,
    ) -> Result<OwnedRwLockWriteGuard<ReactorState>, EngineError> {
        let missing = || EngineError::NotFound(format!("reactor {serial_no}"));
        let rs = self.get_reactor_state(serial_no).ok_or_else(missing)?;
        let guard = tokio::time::timeout(self.lock_timeout, rs.clone().write_owned())
            .await
            .map_err(|_| EngineError::Timeout(format!("lock on reactor {serial_no}")))?;
        match self.get_reactor_state(serial_no) {
            Some(current) if Arc::ptr_eq(&current, &rs) => Ok(guard),
            _ => Err(missing()),
        }
    }

    /// Lookup entity → reactor, then acquire that reactor's write lock.
    ///
    /// A booking moved while we waited is chased to its new reactor.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(String, OwnedRwLockWriteGuard<ReactorState>), EngineError> {
        let missing = || EngineError::NotFound(format!("record {entity_id}"));
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let serial = self.get_reactor_for_entity(entity_id).ok_or_else(missing)?;
            let guard = self.lock_reactor(&serial).await?;
            if self.get_reactor_for_entity(entity_id).as_deref() == Some(serial.as_str()) {
                return Ok((serial, guard));
            }
        }
        Err(missing())
    }

    /// Claim an id for a record about to be committed on `serial_no`. The
    /// claim is dropped unless the returned reservation is kept.
    pub(super) fn reserve_id(
        &self,
        id: Ulid,
        serial_no: &str,
    ) -> Result<IdReservation<'_>, EngineError> {
        match self.entity_to_reactor.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(EngineError::AlreadyExists(format!("record {id}")))
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(serial_no.to_string());
                Ok(IdReservation {
                    map: &self.entity_to_reactor,
                    ids: vec![id],
                    kept: false,
                })
            }
        }
    }
}

/// Bound on chasing a record that keeps moving between reactors.
const MAX_RESOLVE_ATTEMPTS: usize = 4;

/// Ids claimed in the entity index ahead of commit. Released on drop unless
/// `keep` is called once the records are applied.
pub(super) struct IdReservation<'a> {
    map: &'a DashMap<Ulid, String>,
    ids: Vec<Ulid>,
    kept: bool,
}

impl IdReservation<'_> {
    pub(super) fn absorb(&mut self, mut other: IdReservation<'_>) {
        self.ids.append(&mut other.ids);
    }

    pub(super) fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for IdReservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            for id in &self.ids {
                self.map.remove(id);
            }
        }
    }
}
