use std::net::SocketAddr;

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: command, status.
pub const REQUESTS_TOTAL: &str = "staybook_requests_total";

/// Histogram: request latency in seconds. Labels: command.
pub const REQUEST_DURATION_SECONDS: &str = "staybook_request_duration_seconds";

/// Counter: date-range searches answered.
pub const SEARCHES_TOTAL: &str = "staybook_searches_total";

/// Counter: commit attempts. Labels: kind (reservation, owner_block), outcome.
pub const COMMITS_TOTAL: &str = "staybook_commits_total";

/// Counter: commits refused because the room was taken in the meantime.
pub const COMMIT_CONFLICTS_TOTAL: &str = "staybook_commit_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "staybook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "staybook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staybook_connections_rejected_total";

/// Counter: sessions dropped by the sweeper after their idle lifetime.
pub const SESSIONS_EXPIRED_TOTAL: &str = "staybook_sessions_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (units per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staybook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a request variant to a short label for metrics.
pub fn command_label(req: &Request) -> &'static str {
    match req {
        Request::NewSession => "new_session",
        Request::Search { .. } => "search",
        Request::RoomFree { .. } => "room_free",
        Request::ChooseRoom { .. } => "choose_room",
        Request::BookRoom { .. } => "book_room",
        Request::Confirm { .. } => "confirm",
        Request::Summary { .. } => "summary",
        Request::Reset { .. } => "reset",
        Request::Rooms => "rooms",
        Request::OwnerBlock { .. } => "owner_block",
        Request::RemoveBlock { .. } => "remove_block",
        Request::Cancel { .. } => "cancel",
        Request::SetProcessed { .. } => "set_processed",
        Request::UpdateGuest { .. } => "update_guest",
        Request::Reservation { .. } => "reservation",
        Request::Reservations { .. } => "reservations",
        Request::Calendar { .. } => "calendar",
        Request::FreeSpans { .. } => "free_spans",
    }
}
