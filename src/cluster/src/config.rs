use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Node configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    /// Cluster RPC listen address
    pub listen_addr: String,
    /// Client protocol listen address
    pub client_addr: String,
    /// Prometheus exposition address
    pub metrics_addr: String,
    /// Address peers reach this node at; filtered out of discovery results
    pub advertise_addr: String,
    /// Configured peer cluster addresses (host:port)
    pub peers: Vec<String>,
    /// Configured cluster size: self + configured peers
    pub n: usize,

    // quorum parameters
    pub r: usize,
    pub w: usize,

    // timeouts
    pub replication_timeout: Duration,
    pub probe_interval: Duration,

    // adaptive quorum
    pub adaptive_enabled: bool,
    pub min_r: usize,
    pub max_r: usize,
    pub min_w: usize,
    pub max_w: usize,
    pub adaptive_interval: Duration,
    pub relax_threshold: f64,
    pub tighten_threshold: f64,
    pub hysteresis_lockout: Duration,

    // hlc and staleness
    pub hlc_max_drift: Duration,
    pub max_staleness: Duration,

    // reconciliation
    pub reconciliation_enabled: bool,
    pub reconciliation_interval: Duration,
    pub write_log_capacity: usize,
    pub write_log_max_age: Duration,

    // dynamic peer discovery
    pub discovery_host: Option<String>,
    pub discovery_interval: Duration,
}

impl NodeConfig {
    /// Load config from `FLUX_*` environment variables and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_id = get_env("FLUX_NODE_ID", "node1");
        if node_id.is_empty() {
            return Err(ConfigError::MissingNodeId);
        }

        let listen_addr = get_env("FLUX_LISTEN_ADDR", "127.0.0.1:7400");
        let advertise_addr = get_env("FLUX_ADVERTISE_ADDR", &listen_addr);

        let peers_str = get_env("FLUX_PEERS", "");
        let peers: Vec<String> = if peers_str.is_empty() {
            Vec::new()
        } else {
            peers_str.split(',').map(|s| s.trim().to_string()).collect()
        };
        let n = peers.len() + 1;

        let cfg = NodeConfig {
            client_addr: get_env("FLUX_CLIENT_ADDR", "127.0.0.1:7401"),
            metrics_addr: get_env("FLUX_METRICS_ADDR", "127.0.0.1:9100"),
            r: get_parsed_env("FLUX_QUORUM_R", 2),
            w: get_parsed_env("FLUX_QUORUM_W", 2),
            replication_timeout: get_duration_ms_env("FLUX_REPLICATION_TIMEOUT_MS", 500),
            probe_interval: get_duration_ms_env("FLUX_PROBE_INTERVAL_MS", 500),
            adaptive_enabled: get_bool_env("FLUX_ADAPTIVE_ENABLED", false),
            min_r: get_parsed_env("FLUX_MIN_R", 1),
            max_r: get_parsed_env("FLUX_MAX_R", n),
            min_w: get_parsed_env("FLUX_MIN_W", 1),
            max_w: get_parsed_env("FLUX_MAX_W", n),
            adaptive_interval: get_duration_ms_env("FLUX_ADAPTIVE_INTERVAL_MS", 2000),
            relax_threshold: get_parsed_env("FLUX_RELAX_THRESHOLD", 0.45),
            tighten_threshold: get_parsed_env("FLUX_TIGHTEN_THRESHOLD", 0.75),
            hysteresis_lockout: get_duration_ms_env("FLUX_HYSTERESIS_LOCKOUT_MS", 5000),
            hlc_max_drift: get_duration_ms_env("FLUX_HLC_MAX_DRIFT_MS", 500),
            max_staleness: get_duration_ms_env("FLUX_MAX_STALENESS_MS", 3000),
            reconciliation_enabled: get_bool_env("FLUX_RECONCILIATION_ENABLED", false),
            reconciliation_interval: get_duration_ms_env("FLUX_RECONCILIATION_INTERVAL_MS", 30_000),
            write_log_capacity: get_parsed_env("FLUX_WRITE_LOG_CAPACITY", 1000),
            write_log_max_age: get_duration_ms_env("FLUX_WRITE_LOG_MAX_AGE_MS", 300_000),
            discovery_host: env::var("FLUX_DISCOVERY_HOST").ok().filter(|s| !s.is_empty()),
            discovery_interval: get_duration_ms_env("FLUX_DISCOVERY_INTERVAL_MS", 30_000),
            node_id,
            listen_addr,
            advertise_addr,
            peers,
            n,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Startup validation; any violation is fatal before the node
    /// accepts requests.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::MissingNodeId);
        }
        if self.n < 3 {
            return Err(ConfigError::ClusterTooSmall { n: self.n });
        }
        if self.r < 1 || self.r > self.n {
            return Err(ConfigError::QuorumOutOfRange {
                param: "R",
                value: self.r,
                n: self.n,
            });
        }
        if self.w < 1 || self.w > self.n {
            return Err(ConfigError::QuorumOutOfRange {
                param: "W",
                value: self.w,
                n: self.n,
            });
        }
        if self.r + self.w <= self.n {
            return Err(ConfigError::IntersectionViolated {
                r: self.r,
                w: self.w,
                n: self.n,
            });
        }
        if self.min_r > self.r || self.r > self.max_r {
            return Err(ConfigError::InitialOutsideBounds {
                param: "R",
                value: self.r,
                min: self.min_r,
                max: self.max_r,
            });
        }
        if self.min_w > self.w || self.w > self.max_w {
            return Err(ConfigError::InitialOutsideBounds {
                param: "W",
                value: self.w,
                min: self.min_w,
                max: self.max_w,
            });
        }
        Ok(())
    }
}

/// Fatal configuration problems detected at startup.
#[derive(Debug)]
pub enum ConfigError {
    MissingNodeId,
    ClusterTooSmall { n: usize },
    QuorumOutOfRange { param: &'static str, value: usize, n: usize },
    IntersectionViolated { r: usize, w: usize, n: usize },
    InitialOutsideBounds { param: &'static str, value: usize, min: usize, max: usize },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingNodeId => write!(f, "FLUX_NODE_ID cannot be empty"),
            ConfigError::ClusterTooSmall { n } => {
                write!(f, "cluster must have at least 3 nodes, got {}", n)
            }
            ConfigError::QuorumOutOfRange { param, value, n } => {
                write!(f, "{} must be between 1 and {}, got {}", param, n, value)
            }
            ConfigError::IntersectionViolated { r, w, n } => {
                write!(f, "quorum intersection violated: R={} + W={} <= N={}", r, w, n)
            }
            ConfigError::InitialOutsideBounds { param, value, min, max } => {
                write!(f, "initial {}={} outside bounds [{}, {}]", param, value, min, max)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_parsed_env<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_duration_ms_env(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(get_parsed_env(key, default_ms))
}

fn get_bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
