use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "fleetbook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "fleetbook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "fleetbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "fleetbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "fleetbook_connections_rejected_total";

/// Counter: connections that ended in an error, failed logins included.
pub const CONNECTION_ERRORS_TOTAL: &str = "fleetbook_connection_errors_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetbook_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: reservations accepted.
pub const RESERVATIONS_CREATED_TOTAL: &str = "fleetbook_reservations_created_total";

/// Counter: bookings refused because the dates were taken.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "fleetbook_reservation_conflicts_total";

/// Counter: vehicle status syncs that failed and were swallowed.
pub const STATUS_SYNC_FAILURES_TOTAL: &str = "fleetbook_status_sync_failures_total";

/// Counter: vehicles whose status the periodic sweep corrected.
pub const STATUS_SWEEP_REPAIRS_TOTAL: &str = "fleetbook_status_sweep_repairs_total";

/// Install the Prometheus exporter on `port`. No-op when no port is configured.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertVehicle { upsert: false, .. } => "insert_vehicle",
        Command::InsertVehicle { upsert: true, .. } => "upsert_vehicle",
        Command::DeleteVehicle { .. } => "delete_vehicle",
        Command::SelectVehicle { .. } => "select_vehicle",
        Command::SearchVehicles { .. } => "search_vehicles",
        Command::InsertExtra { .. } => "insert_extra",
        Command::SelectExtras { .. } => "select_extras",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::SetReservationStatus { .. } => "set_reservation_status",
        Command::SelectReservations => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::InsertReview { .. } => "insert_review",
        Command::SelectReviews { .. } => "select_reviews",
        Command::SelectDashboard => "select_dashboard",
    }
}
