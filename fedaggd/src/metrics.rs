use std::sync::LazyLock;

use fedagg_metrics::{
    Histogram, IntCounter, IntCounterVec, IntGauge, REGISTRY, histogram_opts, opts,
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry,
};

pub(crate) static BYTES_RECEIVED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter_with_registry!(
        opts!("bytes_received_total", "Bytes of shares received from clients"),
        REGISTRY
    )
    .expect("metric registration should not fail")
});

pub(crate) static BYTES_SENT_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter_with_registry!(
        opts!(
            "bytes_sent_total",
            "Bytes of aggregated models sent, counted once per client"
        ),
        REGISTRY
    )
    .expect("metric registration should not fail")
});

pub(crate) static ROUNDS_COMPLETED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter_with_registry!(
        opts!(
            "rounds_completed_total",
            "Rounds drained from the buffer, whether or not the model was delivered"
        ),
        REGISTRY
    )
    .expect("metric registration should not fail")
});

/// Counter of submissions, labeled by result
pub(crate) static SUBMISSIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        opts!("submissions_total", "Shares submitted to the aggregator"),
        &["result"],
        REGISTRY
    )
    .expect("metric registration should not fail")
});

pub(crate) static BUFFERED_SHARES: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        opts!(
            "buffered_shares",
            "Shares waiting for the current round to fill up"
        ),
        REGISTRY
    )
    .expect("metric registration should not fail")
});

/// Time from accepting a share until the coordinator is done with it,
/// including the wait for the round lock
pub(crate) static SUBMISSION_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram_with_registry!(
        histogram_opts!(
            "submission_duration_seconds",
            "Duration of handling one submitted share"
        ),
        REGISTRY
    )
    .expect("metric registration should not fail")
});
