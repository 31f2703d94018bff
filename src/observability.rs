use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "reactoplan_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "reactoplan_query_duration_seconds";

/// Counter: writes rejected by the scheduling rules. Labels: kind.
pub const CONFLICTS_TOTAL: &str = "reactoplan_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "reactoplan_connections_active";

pub const CONNECTIONS_TOTAL: &str = "reactoplan_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "reactoplan_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reactoplan_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "reactoplan_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "reactoplan_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
/// A failed install is logged and the server carries on without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("metrics exporter not installed: {e}"),
    }
}

pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertReactor(_) => "insert_reactor",
        Command::UpdateReactor { .. } => "update_reactor",
        Command::DeleteReactor { .. } => "delete_reactor",
        Command::InsertBooking(_) => "insert_booking",
        Command::BatchInsertBookings(_) => "batch_insert_bookings",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::InsertDowntime(_) => "insert_downtime",
        Command::UpdateDowntime { .. } => "update_downtime",
        Command::CancelDowntime { .. } => "cancel_downtime",
        Command::SelectReactors => "select_reactors",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectDowntime { .. } => "select_downtime",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectOccupancy(_) => "select_occupancy",
        Command::SelectOccupancyExport(_) => "select_occupancy_export",
        Command::SelectInsights(_) => "select_insights",
    }
}
