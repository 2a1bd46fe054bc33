//! Daemon configuration sourced from `HAILO_DEVICE_*` environment variables.
//!
//! Every knob has a default suitable for a single-NPU Raspberry Pi host. The
//! server binary layers CLI flags on top of the values parsed here.

use std::{env, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Result};

/// Unix socket path for the device protocol.
pub const ENV_SOCKET: &str = "HAILO_DEVICE_SOCKET";
/// Group name applied to the socket file.
pub const ENV_SOCKET_GROUP: &str = "HAILO_DEVICE_SOCKET_GROUP";
/// Maximum framed message size in bytes.
pub const ENV_MAX_MESSAGE_BYTES: &str = "HAILO_DEVICE_MAX_MESSAGE_BYTES";
/// Executor queue bound.
pub const ENV_QUEUE_CAPACITY: &str = "HAILO_DEVICE_QUEUE_CAPACITY";
/// HTTP status bind address, or `off`.
pub const ENV_HTTP_BIND: &str = "HAILO_DEVICE_HTTP_BIND";
/// Drain timeout on shutdown, in seconds.
pub const ENV_SHUTDOWN_GRACE_SECS: &str = "HAILO_DEVICE_SHUTDOWN_GRACE_SECS";

pub const DEFAULT_SOCKET_PATH: &str = "/run/hailo/device.sock";
pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:5099";
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Bind target for the read-only HTTP status server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpBind {
    /// HTTP status server disabled.
    Off,
    /// Listen on the given address.
    Addr(SocketAddr),
}

impl FromStr for HttpBind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("off") {
            return Ok(Self::Off);
        }
        let addr = value
            .parse::<SocketAddr>()
            .map_err(|err| anyhow!("invalid HTTP bind address {value:?}: {err}"))?;
        Ok(Self::Addr(addr))
    }
}

impl Display for HttpBind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Addr(addr) => write!(f, "{addr}"),
        }
    }
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Group name chowned onto the socket file; `None` keeps the daemon's group.
    pub socket_group: Option<String>,
    /// Maximum framed message size, requests and responses alike.
    pub max_message_bytes: usize,
    /// Bound of the executor work queue.
    pub queue_capacity: usize,
    /// HTTP status server bind target.
    pub http_bind: HttpBind,
    /// How long shutdown waits for queued work to drain.
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            socket_group: None,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            http_bind: DEFAULT_HTTP_BIND.parse().expect("default bind parses"),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl Config {
    /// Build a configuration from the process environment.
    ///
    /// Unset variables fall back to defaults; set-but-invalid values are
    /// startup errors so a typo never silently runs with a default.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = env::var_os(ENV_SOCKET) {
            config.socket_path = PathBuf::from(path);
        }
        if let Ok(group) = env::var(ENV_SOCKET_GROUP) {
            if !group.is_empty() {
                config.socket_group = Some(group);
            }
        }
        if let Some(bytes) = env_parsed::<usize>(ENV_MAX_MESSAGE_BYTES)? {
            if bytes == 0 {
                bail!("{ENV_MAX_MESSAGE_BYTES} must be greater than zero");
            }
            config.max_message_bytes = bytes;
        }
        if let Some(capacity) = env_parsed::<usize>(ENV_QUEUE_CAPACITY)? {
            if capacity == 0 {
                bail!("{ENV_QUEUE_CAPACITY} must be greater than zero");
            }
            config.queue_capacity = capacity;
        }
        if let Some(bind) = env_parsed::<HttpBind>(ENV_HTTP_BIND)? {
            config.http_bind = bind;
        }
        if let Some(secs) = env_parsed::<u64>(ENV_SHUTDOWN_GRACE_SECS)? {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Err(_) => Ok(None),
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("invalid {name}={raw:?}: {err}")),
    }
}
