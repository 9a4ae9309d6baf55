use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::booking::BookingError;

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservations committed by `create`.
pub const RESERVATIONS_CREATED_TOTAL: &str = "roomslot_reservations_created_total";

/// Counter: reservations replaced by `update`.
pub const RESERVATIONS_UPDATED_TOTAL: &str = "roomslot_reservations_updated_total";

/// Counter: reservations deleted by `cancel`.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "roomslot_reservations_cancelled_total";

/// Counter: create/update attempts refused. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "roomslot_bookings_rejected_total";

/// Counter: per-day week fetches dropped because the room or week moved on.
pub const STALE_FETCHES_DISCARDED_TOTAL: &str = "roomslot_stale_fetches_discarded_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomslot_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomslot_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for the rejection counter.
pub fn rejection_label(err: &BookingError) -> &'static str {
    match err {
        BookingError::Unauthenticated => "unauthenticated",
        BookingError::NoRoomSelected => "no_room_selected",
        BookingError::Forbidden => "forbidden",
        BookingError::NotFound(_) => "not_found",
        BookingError::SubmissionInFlight => "submission_in_flight",
        BookingError::InvalidSchedule(_) => "invalid_schedule",
        BookingError::Violation(v) => v.reason(),
        BookingError::PersistenceFailure(_) => "persistence_failure",
    }
}
