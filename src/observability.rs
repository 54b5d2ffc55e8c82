use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "dinespace_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "dinespace_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "dinespace_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "dinespace_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "dinespace_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "dinespace_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "dinespace_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "dinespace_wal_compactions_total";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: reservations admitted.
pub const RESERVATIONS_CREATED_TOTAL: &str = "dinespace_reservations_created_total";

/// Counter: reservations refused by admission. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "dinespace_reservations_rejected_total";

/// Counter: reservations deleted.
pub const RESERVATIONS_DELETED_TOTAL: &str = "dinespace_reservations_deleted_total";

/// Counter: occupancy reports served from cache.
pub const REPORT_CACHE_HITS_TOTAL: &str = "dinespace_report_cache_hits_total";

/// Counter: occupancy reports computed.
pub const REPORT_CACHE_MISSES_TOTAL: &str = "dinespace_report_cache_misses_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRestaurant { id: None, .. } => "insert_restaurant",
        Command::InsertRestaurant { id: Some(_), .. } => "replace_restaurant",
        Command::SelectRestaurants { .. } => "select_restaurants",
        Command::DeleteRestaurant { .. } => "delete_restaurant",
        Command::InsertSpace { .. } => "insert_space",
        Command::SelectSpaces { .. } => "select_spaces",
        Command::DeleteSpace { .. } => "delete_space",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectOccupancy { .. } => "select_occupancy",
        Command::SelectOccupancyReport { .. } => "select_occupancy_report",
        Command::SelectOccupancySummary { .. } => "select_occupancy_summary",
    }
}
