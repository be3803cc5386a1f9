use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "vacancy_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "vacancy_query_duration_seconds";

/// Counter: availability checks. Labels: outcome
/// (available, fully_booked, no_rooms, invalid_input, not_found, storage_error).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "vacancy_availability_checks_total";

// ── Resource metrics ────────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "vacancy_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "vacancy_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "vacancy_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "vacancy_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "vacancy_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "vacancy_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "vacancy_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertProperty { .. } => "insert_property",
        Command::DeleteProperty { .. } => "delete_property",
        Command::InsertRoomType { .. } => "insert_room_type",
        Command::DeleteRoomType { .. } => "delete_room_type",
        Command::InsertRooms { .. } => "insert_rooms",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SetRoomStatus { .. } => "set_room_status",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::BatchInsertReservations { .. } => "batch_insert_reservations",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SetReservationStatus { .. } => "set_reservation_status",
        Command::SelectProperties => "select_properties",
        Command::SelectRoomTypes { .. } => "select_room_types",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectAvailabilitySummary { .. } => "select_availability_summary",
    }
}
