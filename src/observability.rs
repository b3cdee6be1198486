use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::EngineError;

// ── Admission ───────────────────────────────────────────────────

/// Counter: admission decisions for creates and moving updates. Labels: outcome.
pub const ADMISSIONS_TOTAL: &str = "agenda_admissions_total";

/// Histogram: admission latency in seconds, lock wait included.
pub const ADMISSION_DURATION_SECONDS: &str = "agenda_admission_duration_seconds";

/// Counter: reservations removed outright.
pub const RESERVATIONS_DELETED_TOTAL: &str = "agenda_reservations_deleted_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: log group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "agenda_wal_flush_duration_seconds";

/// Histogram: log group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "agenda_wal_flush_batch_size";

/// Counter: completed log compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "agenda_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for an engine error, used as the admission outcome.
pub fn error_label(e: &EngineError) -> &'static str {
    match e {
        EngineError::MalformedTime(_) => "malformed_time",
        EngineError::InvalidWindow { .. } => "invalid_window",
        EngineError::SpaceNotFound(_) => "space_not_found",
        EngineError::SpaceInactive(_) => "space_inactive",
        EngineError::Conflict { .. } => "conflict",
        EngineError::NotFound(_) => "not_found",
        EngineError::Forbidden(_) => "forbidden",
        EngineError::Storage(_) => "storage",
    }
}
