//! Command line and environment configuration.

use crate::server::RouterOptions;
use crate::session::ReconnectPolicy;
use crate::store::DEFAULT_SESSION_ID;
use clap::{ArgAction, Parser};
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Clone, Debug)]
#[command(name = "wa-relay", version, about = "WhatsApp message relay over HTTP")]
pub struct Config {
    /// IP address to bind the HTTP server to (IPv4 or IPv6).
    #[arg(long, env = "WA_RELAY_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Prefix for every route, e.g. `/api`.
    #[arg(long, env = "WA_RELAY_BASE_PATH", default_value = "")]
    pub base_path: String,

    /// Maximum request body size in MiB.
    #[arg(long, env = "WA_RELAY_BODY_LIMIT_MB", default_value_t = 50)]
    pub body_limit_mb: usize,

    /// Directory holding the session credentials.
    #[arg(long, env = "WA_RELAY_AUTH_DIR", default_value = "auth_info")]
    pub auth_dir: PathBuf,

    #[arg(long, env = "WA_RELAY_SESSION_ID", default_value = DEFAULT_SESSION_ID)]
    pub session_id: String,

    /// Seconds to wait before reconnecting after the connection dropped.
    #[arg(long, env = "WA_RELAY_RECONNECT_DELAY", default_value_t = 5)]
    pub reconnect_delay_secs: u64,

    /// Upper bound in seconds for logging out on reset and shutdown.
    #[arg(long, env = "WA_RELAY_TERMINATION_TIMEOUT", default_value_t = 10)]
    pub termination_timeout_secs: u64,

    /// Log the session out when the process is stopped.
    #[arg(
        long,
        env = "WA_RELAY_LOGOUT_ON_SHUTDOWN",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub logout_on_shutdown: bool,

    /// Loopback transport: link the device this many seconds after showing a
    /// pairing code. Unset means the code is never scanned.
    #[arg(long, env = "WA_RELAY_LOOPBACK_LINK_AFTER")]
    pub loopback_link_after_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WA_RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, env = "WA_RELAY_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

impl Config {
    /// Listen address; IPv6 binds need no brackets.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let ip: IpAddr = self.bind.trim().parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let after_failure = Duration::from_secs(self.reconnect_delay_secs);
        ReconnectPolicy {
            after_failure,
            after_connect_error: after_failure,
            termination_timeout: Duration::from_secs(self.termination_timeout_secs),
            ..ReconnectPolicy::default()
        }
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            base_path: self.base_path.clone(),
            body_limit: self.body_limit_mb.saturating_mul(1024 * 1024),
        }
    }

    pub fn loopback_link_after(&self) -> Option<Duration> {
        self.loopback_link_after_secs.map(Duration::from_secs)
    }
}
