use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, format_err};
use clap::Parser;
use fedagg_core::FixedPointCodec;
use fedagg_core::fixed_point::{DEFAULT_FRACTIONAL_BITS, MAX_FRACTIONAL_BITS};
use fedagg_logging::LOG_CONFIG;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::envs::{
    FEDAGG_BASE_PORT_ENV, FEDAGG_BIND_IP_ENV, FEDAGG_BIND_METRICS_ENV,
    FEDAGG_BROADCAST_TIMEOUT_SECS_ENV, FEDAGG_CLIENTS_ENV, FEDAGG_CONFIG_ENV,
    FEDAGG_FRACTIONAL_BITS_ENV, FEDAGG_LOG_DIRECTIVES_ENV, FEDAGG_MAX_SHARE_BYTES_ENV,
    FEDAGG_QUORUM_ENV,
};

pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_BASE_PORT: u16 = 8000;
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(60);
/// Room for models with tens of millions of parameters
pub const DEFAULT_MAX_SHARE_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, Parser)]
#[command(version)]
pub struct ServerOpts {
    /// Index of this server in the deployment, the API listens on
    /// `base-port + server-index`
    pub server_index: u16,
    /// JSON file with an `AggregatorFileConfig`, flags take precedence over it
    #[arg(long, env = FEDAGG_CONFIG_ENV)]
    pub config: Option<PathBuf>,
    /// Number of shares that complete a round
    #[arg(long, env = FEDAGG_QUORUM_ENV)]
    pub quorum: Option<NonZeroUsize>,
    /// URL the aggregated model is posted to, once per client
    #[arg(long = "client", env = FEDAGG_CLIENTS_ENV, value_delimiter = ',')]
    pub clients: Vec<Url>,
    #[arg(long, env = FEDAGG_BIND_IP_ENV)]
    pub bind_ip: Option<IpAddr>,
    #[arg(long, env = FEDAGG_BASE_PORT_ENV)]
    pub base_port: Option<u16>,
    /// Fractional bits of the fixed-point encoding, must match the clients
    #[arg(long, env = FEDAGG_FRACTIONAL_BITS_ENV)]
    pub fractional_bits: Option<u32>,
    /// Bind the prometheus metrics server
    #[arg(long, env = FEDAGG_BIND_METRICS_ENV)]
    pub bind_metrics: Option<SocketAddr>,
    #[arg(long, env = FEDAGG_BROADCAST_TIMEOUT_SECS_ENV)]
    pub broadcast_timeout_secs: Option<u64>,
    /// Largest share body accepted by `/recv`, in bytes
    #[arg(long, env = FEDAGG_MAX_SHARE_BYTES_ENV)]
    pub max_share_bytes: Option<usize>,
    /// Extra log filter directive, e.g. `fa::round=debug`
    #[arg(long = "log-directive", env = FEDAGG_LOG_DIRECTIVES_ENV, value_delimiter = ',')]
    pub log_directives: Vec<String>,
}

/// Settings that can be kept in the JSON config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregatorFileConfig {
    pub quorum: Option<NonZeroUsize>,
    pub clients: Vec<Url>,
    pub bind_ip: Option<IpAddr>,
    pub base_port: Option<u16>,
    pub fractional_bits: Option<u32>,
    pub bind_metrics: Option<SocketAddr>,
    pub broadcast_timeout_secs: Option<u64>,
    pub max_share_bytes: Option<usize>,
}

impl AggregatorFileConfig {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let string = fs::read_to_string(path)
            .with_context(|| format!("Unable to read config file {}", path.display()))?;
        serde_json::from_str(&string)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}

/// Fully resolved daemon configuration
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub server_index: u16,
    pub quorum: NonZeroUsize,
    pub clients: Vec<Url>,
    pub api_bind: SocketAddr,
    pub codec: FixedPointCodec,
    pub metrics_bind: Option<SocketAddr>,
    pub broadcast_timeout: Duration,
    pub max_share_bytes: usize,
}

impl AggregatorConfig {
    pub fn from_opts(opts: ServerOpts) -> anyhow::Result<Self> {
        let file = match &opts.config {
            Some(path) => AggregatorFileConfig::read(path)?,
            None => AggregatorFileConfig::default(),
        };
        Self::resolve(opts, file)
    }

    fn resolve(opts: ServerOpts, file: AggregatorFileConfig) -> anyhow::Result<Self> {
        let quorum = opts
            .quorum
            .or(file.quorum)
            .ok_or_else(|| format_err!("Quorum must be set with --quorum or in the config file"))?;

        let clients = if opts.clients.is_empty() {
            file.clients
        } else {
            opts.clients
        };
        if clients.is_empty() {
            warn!(
                target: LOG_CONFIG,
                "No clients configured, aggregated models will not be delivered"
            );
        }

        let fractional_bits = opts
            .fractional_bits
            .or(file.fractional_bits)
            .unwrap_or(DEFAULT_FRACTIONAL_BITS);
        let codec = FixedPointCodec::new(fractional_bits).ok_or_else(|| {
            format_err!(
                "Fractional bits must be at most {MAX_FRACTIONAL_BITS}, got {fractional_bits}"
            )
        })?;

        let bind_ip = opts.bind_ip.or(file.bind_ip).unwrap_or(DEFAULT_BIND_IP);
        let base_port = opts.base_port.or(file.base_port).unwrap_or(DEFAULT_BASE_PORT);
        let port = base_port.checked_add(opts.server_index).ok_or_else(|| {
            format_err!(
                "Server index {} is too large for base port {base_port}",
                opts.server_index
            )
        })?;

        let broadcast_timeout = opts
            .broadcast_timeout_secs
            .or(file.broadcast_timeout_secs)
            .map_or(DEFAULT_BROADCAST_TIMEOUT, Duration::from_secs);

        Ok(Self {
            server_index: opts.server_index,
            quorum,
            clients,
            api_bind: SocketAddr::new(bind_ip, port),
            codec,
            metrics_bind: opts.bind_metrics.or(file.bind_metrics),
            broadcast_timeout,
            max_share_bytes: opts
                .max_share_bytes
                .or(file.max_share_bytes)
                .unwrap_or(DEFAULT_MAX_SHARE_BYTES),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::SocketAddr;
    use std::time::Duration;

    use clap::Parser;

    use super::{AggregatorConfig, AggregatorFileConfig, ServerOpts};

    fn opts(args: &[&str]) -> ServerOpts {
        ServerOpts::try_parse_from(std::iter::once("fedaggd").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn listens_on_base_port_plus_index() -> anyhow::Result<()> {
        let cfg = AggregatorConfig::resolve(
            opts(&["2", "--quorum", "3", "--base-port", "9000"]),
            AggregatorFileConfig::default(),
        )?;

        assert_eq!(cfg.api_bind, "127.0.0.1:9002".parse::<SocketAddr>()?);
        assert_eq!(cfg.quorum.get(), 3);
        assert_eq!(cfg.codec.fractional_bits(), 16);
        assert_eq!(cfg.broadcast_timeout, Duration::from_secs(60));
        assert_eq!(cfg.max_share_bytes, super::DEFAULT_MAX_SHARE_BYTES);
        Ok(())
    }

    #[test]
    fn flags_override_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{
                "quorum": 5,
                "clients": ["http://10.0.0.1:7000/model", "http://10.0.0.2:7000/model"],
                "fractional_bits": 20,
                "broadcast_timeout_secs": 5,
                "max_share_bytes": 1048576
            }}"#
        )?;
        let path = file.path().to_str().expect("utf8 path");

        let cfg = AggregatorConfig::from_opts(opts(&[
            "0",
            "--config",
            path,
            "--quorum",
            "2",
            "--client",
            "http://10.0.0.3:7000/model",
        ]))?;

        assert_eq!(cfg.quorum.get(), 2);
        assert_eq!(cfg.clients.len(), 1);
        assert_eq!(cfg.codec.fractional_bits(), 20);
        assert_eq!(cfg.broadcast_timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_share_bytes, 1 << 20);
        Ok(())
    }

    #[test]
    fn clients_accept_comma_separated_list() {
        let opts = opts(&["0", "--client", "http://a:1/m,http://b:2/m"]);
        assert_eq!(opts.clients.len(), 2);
    }

    #[test]
    fn log_directives_are_collected() {
        let opts = opts(&[
            "0",
            "--log-directive",
            "fa::round=debug",
            "--log-directive",
            "fa::net::api=trace,fa::task=warn",
        ]);
        assert_eq!(
            opts.log_directives,
            vec!["fa::round=debug", "fa::net::api=trace", "fa::task=warn"]
        );
    }

    #[test]
    fn missing_quorum_is_an_error() {
        assert!(
            AggregatorConfig::resolve(opts(&["0"]), AggregatorFileConfig::default()).is_err()
        );
    }

    #[test]
    fn zero_quorum_is_rejected() {
        assert!(ServerOpts::try_parse_from(["fedaggd", "0", "--quorum", "0"]).is_err());
    }

    #[test]
    fn port_overflow_is_an_error() {
        assert!(
            AggregatorConfig::resolve(
                opts(&["10", "--quorum", "1", "--base-port", "65530"]),
                AggregatorFileConfig::default(),
            )
            .is_err()
        );
    }

    #[test]
    fn rejects_unknown_file_fields() {
        assert!(serde_json::from_str::<AggregatorFileConfig>(r#"{"quorom": 3}"#).is_err());
    }
}
