//! Structured logging helpers for wide-format events.
//!
//! Each daemon event is a single structured log line with an `event` field,
//! so fleet collection can filter and aggregate without parsing message text.

/// Daemon lifecycle events.
pub mod lifecycle {
    use hailod_core::Config;

    /// Emitted once at startup, before the device is opened.
    pub fn server_startup(version: &str) {
        tracing::info!(
            event = "server_startup",
            binary = "hailod",
            version = %version,
            "Device manager starting"
        );
    }

    /// Emitted after environment and CLI flags are merged.
    pub fn config_resolved(config: &Config) {
        tracing::info!(
            event = "config_resolved",
            socket_path = %config.socket_path.display(),
            socket_group = config.socket_group.as_deref().unwrap_or(""),
            max_message_bytes = config.max_message_bytes,
            queue_capacity = config.queue_capacity,
            http_bind = %config.http_bind,
            shutdown_grace_secs = config.shutdown_grace.as_secs(),
            "Configuration resolved"
        );
    }

    /// Emitted when the Unix socket is bound and permissioned.
    pub fn socket_bound(path: &str, group: Option<&str>) {
        tracing::info!(
            event = "socket_bound",
            path = %path,
            group = group.unwrap_or(""),
            "Device socket bound"
        );
    }

    /// Emitted when the HTTP status server is listening.
    pub fn http_bound(address: &str) {
        tracing::info!(
            event = "http_bound",
            address = %address,
            "HTTP status server bound"
        );
    }

    /// Emitted when a termination signal arrives.
    pub fn server_shutdown(signal: &str) {
        tracing::info!(
            event = "server_shutdown",
            signal = %signal,
            "Device manager shutting down"
        );
    }
}

/// Per-connection events.
pub mod connection {
    /// A client connected to the device socket.
    pub fn connected(connection: u64, active: usize) {
        tracing::debug!(
            event = "client_connected",
            connection,
            active,
            "Client connected"
        );
    }

    /// A client disconnected; `served` counts completed requests.
    pub fn disconnected(connection: u64, served: u64) {
        tracing::debug!(
            event = "client_disconnected",
            connection,
            served,
            "Client disconnected"
        );
    }

    /// A frame violated the protocol and the connection is being closed.
    pub fn frame_rejected(connection: u64, error: &str) {
        tracing::warn!(
            event = "frame_rejected",
            connection,
            error = %error,
            "Frame rejected; closing connection"
        );
    }

    /// A frame parsed as JSON but not as a request envelope.
    pub fn request_rejected(connection: u64, error: &str) {
        tracing::debug!(
            event = "request_rejected",
            connection,
            error = %error,
            "Request rejected"
        );
    }
}
