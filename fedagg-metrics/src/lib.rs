use std::sync::LazyLock;

pub use prometheus::{
    self, Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
    histogram_opts, opts, register_histogram_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry,
};

mod server;

pub use server::spawn_api_server;

/// Registry all fedagg metrics are registered in, under the `fedagg` prefix
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    Registry::new_custom(Some("fedagg".into()), None).expect("cannot fail")
});

/// Encodes all metrics of [`REGISTRY`] in the Prometheus text format
pub fn get_metrics() -> anyhow::Result<String> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
