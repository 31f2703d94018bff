use ulid::Ulid;

use crate::advisory;
use crate::limits::*;
use crate::model::*;

use super::occupancy::aggregate;
use super::{Engine, EngineError, SharedReactorState};

impl Engine {
    /// Shared handles for every reactor, ordered by serial number.
    fn reactors_sorted(&self) -> Vec<SharedReactorState> {
        let mut entries: Vec<(String, SharedReactorState)> = self
            .state
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, rs)| rs).collect()
    }

    pub async fn list_reactors(&self) -> Vec<Reactor> {
        let mut out = Vec::with_capacity(self.state.len());
        for rs in self.reactors_sorted() {
            out.push(rs.read().await.reactor.clone());
        }
        out
    }

    pub async fn get_reactor(&self, serial_no: &str) -> Result<Reactor, EngineError> {
        let rs = self
            .get_reactor_state(serial_no)
            .ok_or_else(|| EngineError::NotFound(format!("reactor {serial_no}")))?;
        let guard = rs.read().await;
        Ok(guard.reactor.clone())
    }

    /// Bookings on one reactor, or on all reactors when `serial_no` is `None`.
    /// Ordered by reactor, then `(start, id)`.
    pub async fn list_bookings(&self, serial_no: Option<&str>) -> Result<Vec<Booking>, EngineError> {
        let mut out = Vec::new();
        for rs in self.scope(serial_no)? {
            out.extend(rs.read().await.bookings.iter().cloned());
        }
        Ok(out)
    }

    pub async fn list_downtime(
        &self,
        serial_no: Option<&str>,
    ) -> Result<Vec<Downtime>, EngineError> {
        let mut out = Vec::new();
        for rs in self.scope(serial_no)? {
            out.extend(rs.read().await.downtime.iter().cloned());
        }
        Ok(out)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let missing = || EngineError::NotFound(format!("booking {id}"));
        let serial = self.get_reactor_for_entity(&id).ok_or_else(missing)?;
        let rs = self.get_reactor_state(&serial).ok_or_else(missing)?;
        let guard = rs.read().await;
        guard.booking(id).cloned().ok_or_else(missing)
    }

    pub async fn get_downtime(&self, id: Ulid) -> Result<Downtime, EngineError> {
        let missing = || EngineError::NotFound(format!("downtime {id}"));
        let serial = self.get_reactor_for_entity(&id).ok_or_else(missing)?;
        let rs = self.get_reactor_state(&serial).ok_or_else(missing)?;
        let guard = rs.read().await;
        guard.downtime(id).cloned().ok_or_else(missing)
    }

    fn scope(&self, serial_no: Option<&str>) -> Result<Vec<SharedReactorState>, EngineError> {
        match serial_no {
            Some(serial) => self
                .get_reactor_state(serial)
                .map(|rs| vec![rs])
                .ok_or_else(|| EngineError::NotFound(format!("reactor {serial}"))),
            None => Ok(self.reactors_sorted()),
        }
    }

    /// Dry-run the conflict validator against the reactor's current records.
    /// Nothing is written.
    pub async fn validate(
        &self,
        serial_no: &str,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let rs = self
            .get_reactor_state(serial_no)
            .ok_or_else(|| EngineError::NotFound(format!("reactor {serial_no}")))?;
        let guard = rs.read().await;
        super::check_conflict(
            serial_no,
            start,
            end,
            exclude,
            &guard.bookings,
            &guard.downtime,
        )
    }

    /// Occupancy of every reactor matching the optional plant/block filters,
    /// ordered by serial number.
    pub async fn occupancy(
        &self,
        window_start: Ms,
        window_end: Ms,
        plant_name: Option<&str>,
        block_name: Option<&str>,
    ) -> Result<Vec<OccupancyMetric>, EngineError> {
        if super::window_len(window_start, window_end)? > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }

        let mut reactors = Vec::new();
        let mut bookings = Vec::new();
        let mut downtime = Vec::new();
        for rs in self.reactors_sorted() {
            let guard = rs.read().await;
            let r = &guard.reactor;
            if plant_name.is_some_and(|p| p != r.plant_name)
                || block_name.is_some_and(|b| b != r.block_name)
            {
                continue;
            }
            reactors.push(r.clone());
            bookings.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.span.overlaps_window(window_start, window_end))
                    .cloned(),
            );
            downtime.extend(
                guard
                    .downtime
                    .iter()
                    .filter(|d| d.span.overlaps_window(window_start, window_end))
                    .cloned(),
            );
        }
        aggregate(window_start, window_end, &reactors, &bookings, &downtime)
    }

    /// Narrative insights over a set of metrics. Falls back to a fixed message
    /// when no advisor is configured or it fails.
    pub async fn insights(&self, metrics: &[OccupancyMetric]) -> String {
        advisory::insights_or_fallback(self.advisor.as_deref(), metrics, advisory::ADVISOR_TIMEOUT)
            .await
    }
}
