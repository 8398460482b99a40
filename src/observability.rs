use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Admission metrics (request-driven) ──────────────────────────

/// Counter: admission decisions. Labels: resource (`slot`/`equipment`), outcome.
pub const ADMISSIONS_TOTAL: &str = "gymslot_admissions_total";

/// Histogram: admission latency in seconds, WAL commit included. Labels: resource.
pub const ADMISSION_DURATION_SECONDS: &str = "gymslot_admission_duration_seconds";

/// Counter: owner-checked deletions. Labels: resource, outcome.
pub const DELETIONS_TOTAL: &str = "gymslot_deletions_total";

/// Counter: stored slots skipped by the active-status sweep.
pub const MALFORMED_SLOTS_SKIPPED_TOTAL: &str = "gymslot_malformed_slots_skipped_total";

// ── Store metrics ───────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "gymslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "gymslot_wal_flush_batch_size";

pub const OUTCOME_ACCEPTED: &str = "accepted";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
