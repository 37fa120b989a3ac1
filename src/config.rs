//! Process configuration. A single `Config` is parsed once at boot and
//! threaded through `Dependencies` rather than read from `std::env` ad hoc at call sites.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "chaos-operator", about = "Kubernetes chaos-engineering controller")]
pub struct Config {
    #[arg(long, env = "HISTORY_ENABLED", default_value_t = true)]
    pub history_enabled: bool,

    #[arg(long, env = "HISTORY_NAMESPACE", default_value = "chaos-system")]
    pub history_namespace: String,

    #[arg(long, env = "HISTORY_RETENTION_LIMIT", default_value_t = 100)]
    pub history_retention_limit: usize,

    /// Hours. 0 disables TTL cleanup. Minimum enforced value is 1 hour.
    #[arg(long, env = "HISTORY_TTL_HOURS", default_value_t = 720)]
    pub history_ttl_hours: u64,

    #[arg(long, env = "HISTORY_SAMPLING_RATE", default_value_t = 1.0)]
    pub history_sampling_rate: f64,

    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: String,

    #[arg(long, env = "METRICS_SECURE", default_value_t = false)]
    pub metrics_secure: bool,

    #[arg(long, env = "LEADER_ELECTION_LEASE_NAME", default_value = "chaos-operator-lock")]
    pub lease_name: String,

    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = "chaos-system")]
    pub lease_namespace: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Production-marker namespace label key.
    #[arg(long, env = "PRODUCTION_LABEL_KEY", default_value = "environment")]
    pub production_label_key: String,

    #[arg(long, env = "PRODUCTION_LABEL_VALUE", default_value = "production")]
    pub production_label_value: String,
}

impl Config {
    pub fn history_ttl(&self) -> Option<Duration> {
        if self.history_ttl_hours == 0 {
            None
        } else {
            Some(Duration::from_secs(self.history_ttl_hours.max(1) * 3600))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(std::iter::empty::<String>())
    }
}
