use tracing::trace;

// Trace-based counters; the Prometheus recorder installed at startup backs
// `/metrics`.

pub fn inc_requests(route: &'static str) {
    trace!(target = "woopl.metrics", route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "woopl.metrics",
        stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn import_counts(created: usize, duplicates: usize, skipped: usize) {
    trace!(
        target = "woopl.metrics",
        created = created as u64,
        duplicates = duplicates as u64,
        skipped = skipped as u64,
        "candidates_total_inc"
    );
}
