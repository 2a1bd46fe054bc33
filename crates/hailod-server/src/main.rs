//! `hailod`: the Hailo NPU device manager daemon.
//!
//! Owns the host's single device context, serves the device protocol on a
//! Unix socket, and mirrors status over a read-only HTTP endpoint. Configured
//! through `HAILO_DEVICE_*` environment variables with CLI flags on top.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use hailod_core::{backend::HailortAdapter, Config, HttpBind};
use hailod_server::{logging, Daemon};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hailod", about = "Hailo NPU device manager daemon", version)]
struct Args {
    /// Unix socket path (overrides HAILO_DEVICE_SOCKET).
    #[arg(long)]
    socket: Option<std::path::PathBuf>,

    /// Group owner for the socket file (overrides HAILO_DEVICE_SOCKET_GROUP).
    #[arg(long)]
    socket_group: Option<String>,

    /// HTTP status bind, `host:port` or `off` (overrides HAILO_DEVICE_HTTP_BIND).
    #[arg(long, value_parser = parse_http_bind)]
    http_bind: Option<HttpBind>,

    /// Maximum framed message size in bytes (overrides HAILO_DEVICE_MAX_MESSAGE_BYTES).
    #[arg(long)]
    max_message_bytes: Option<usize>,

    /// Executor queue bound (overrides HAILO_DEVICE_QUEUE_CAPACITY).
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Shutdown drain grace in seconds (overrides HAILO_DEVICE_SHUTDOWN_GRACE_SECS).
    #[arg(long)]
    shutdown_grace_secs: Option<u64>,

    /// Emit JSON log lines for fleet collection.
    #[arg(long)]
    log_json: bool,
}

fn parse_http_bind(value: &str) -> Result<HttpBind, String> {
    value.parse().map_err(|err| format!("{err}"))
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(socket) = &self.socket {
            config.socket_path = socket.clone();
        }
        if let Some(group) = &self.socket_group {
            config.socket_group = Some(group.clone());
        }
        if let Some(http_bind) = self.http_bind {
            config.http_bind = http_bind;
        }
        if let Some(bytes) = self.max_message_bytes {
            config.max_message_bytes = bytes;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(secs) = self.shutdown_grace_secs {
            config.shutdown_grace = std::time::Duration::from_secs(secs);
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_json);
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(event = "fatal", error = format!("{err:#}"), "Daemon exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    logging::lifecycle::server_startup(env!("CARGO_PKG_VERSION"));
    let mut config = Config::from_env()?;
    args.apply(&mut config);
    logging::lifecycle::config_resolved(&config);

    // The process supervisor restarts us if the device is not yet available.
    let adapter = HailortAdapter::open()
        .map_err(|err| anyhow::anyhow!("opening Hailo device: {err}"))?;

    let daemon = Daemon::start(config, adapter).await?;
    let signal = wait_for_signal().await;
    logging::lifecycle::server_shutdown(signal);
    daemon.shutdown().await
}

async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        () = ctrl_c => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}
