// Env variable holding the path of the JSON config file
pub const FEDAGG_CONFIG_ENV: &str = "FEDAGG_CONFIG";

// Env variable holding the number of shares that complete a round
pub const FEDAGG_QUORUM_ENV: &str = "FEDAGG_QUORUM";

// Env variable holding the comma separated URLs the model is broadcast to
pub const FEDAGG_CLIENTS_ENV: &str = "FEDAGG_CLIENTS";

// Env variable holding the IP the submission API binds to
pub const FEDAGG_BIND_IP_ENV: &str = "FEDAGG_BIND_IP";

// Env variable holding the port of server index 0
pub const FEDAGG_BASE_PORT_ENV: &str = "FEDAGG_BASE_PORT";

// Env variable holding the fractional bits of the fixed-point encoding
pub const FEDAGG_FRACTIONAL_BITS_ENV: &str = "FEDAGG_FRACTIONAL_BITS";

// Env variable to bind the prometheus metrics server
pub const FEDAGG_BIND_METRICS_ENV: &str = "FEDAGG_BIND_METRICS";

// Env variable holding the per client broadcast timeout in seconds
pub const FEDAGG_BROADCAST_TIMEOUT_SECS_ENV: &str = "FEDAGG_BROADCAST_TIMEOUT_SECS";

// Env variable holding the largest accepted share body in bytes
pub const FEDAGG_MAX_SHARE_BYTES_ENV: &str = "FEDAGG_MAX_SHARE_BYTES";

// Env variable holding comma separated extra log filter directives
pub const FEDAGG_LOG_DIRECTIVES_ENV: &str = "FEDAGG_LOG_DIRECTIVES";
