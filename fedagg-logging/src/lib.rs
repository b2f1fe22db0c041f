//! Constants for categorizing the logging type
//!
//! To help stabilize logging targets, avoid typos and improve consistency,
//! it's preferable for logging statements use static target constants,
//! that we define in this module.
//!
//! All targets live under the `fa::` namespace, so `RUST_LOG=fa=debug`
//! selects everything the aggregator logs.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_ROUND: &str = "fa::round";
pub const LOG_NET_API: &str = "fa::net::api";
pub const LOG_BROADCAST: &str = "fa::broadcast";
pub const LOG_TASK: &str = "fa::task";
pub const LOG_CONFIG: &str = "fa::config";
pub const LOG_METRICS: &str = "fa::metrics";

const DEFAULT_LEVEL: &str = "info";

/// Consolidates the setup of logging and tracing
#[derive(Debug, Default)]
pub struct TracingSetup {
    extra_directives: Vec<String>,
}

impl TracingSetup {
    /// Adds a filter directive on top of `RUST_LOG` (or `info` when unset),
    /// e.g. `fa::round=debug`
    pub fn with_directive(&mut self, directive: impl Into<String>) -> &mut Self {
        self.extra_directives.push(directive.into());
        self
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        let mut filter =
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_LEVEL))?;

        for directive in &self.extra_directives {
            filter = filter.add_directive(directive.parse()?);
        }

        Ok(filter)
    }

    /// Initialize the logging, must be called for tracing to begin
    pub fn init(&mut self) -> anyhow::Result<()> {
        let fmt_layer = tracing_subscriber::fmt::layer().with_filter(self.filter()?);

        tracing_subscriber::registry().with(fmt_layer).try_init()?;

        Ok(())
    }
}
