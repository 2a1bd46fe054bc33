//! Unix socket server for the device protocol.
//!
//! Binds the socket with the permissions that form the trust boundary
//! (parent directory `0755`, socket file `0660`, group from configuration),
//! then accepts connections and runs one read-frame/enqueue/reply loop per
//! connection task. JSON and field errors keep a connection open; framing
//! violations close it.

use std::{
    os::unix::fs::PermissionsExt,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use anyhow::{anyhow, Context, Result};
use flume::Sender;
use hailod_core::{
    protocol::{read_frame, write_frame, FrameError},
    Command, Config, Request, Response, WorkItem,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{UnixListener, UnixStream},
};

use crate::logging;

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(0);
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Bind the device socket and apply its permissions.
pub fn bind(config: &Config) -> Result<UnixListener> {
    let path = &config.socket_path;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating socket directory {}", parent.display()))?;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755))
                .with_context(|| format!("setting mode on {}", parent.display()))?;
        }
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(
            event = "stale_socket_removed",
            path = %path.display(),
            "Removed stale socket"
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("removing stale socket {}", path.display()))
        }
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("binding device socket {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))
        .with_context(|| format!("setting mode on {}", path.display()))?;

    if let Some(group_name) = &config.socket_group {
        let group = nix::unistd::Group::from_name(group_name)
            .with_context(|| format!("looking up group {group_name}"))?
            .ok_or_else(|| anyhow!("unknown group {group_name}"))?;
        nix::unistd::chown(path, None, Some(group.gid))
            .with_context(|| format!("setting group {group_name} on {}", path.display()))?;
    }

    logging::lifecycle::socket_bound(
        &path.display().to_string(),
        config.socket_group.as_deref(),
    );
    Ok(listener)
}

/// Accept loop. Runs until the task is aborted at shutdown; connections are
/// spawned detached so in-flight requests keep their reply path during the
/// drain grace period.
pub async fn serve(listener: UnixListener, queue: Sender<Command>, max_message_bytes: usize) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_connection(stream, queue.clone(), max_message_bytes));
            }
            Err(err) => {
                tracing::warn!(event = "accept_failed", error = %err, "Accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, queue: Sender<Command>, max_message_bytes: usize) {
    let connection = CONNECTION_IDS.fetch_add(1, Ordering::Relaxed);
    let active = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
    logging::connection::connected(connection, active);

    let (mut reader, mut writer) = stream.into_split();
    let served = run_connection(connection, &mut reader, &mut writer, &queue, max_message_bytes).await;

    let _ = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    logging::connection::disconnected(connection, served);
}

/// The per-connection loop; returns the number of requests answered.
async fn run_connection<R, W>(
    connection: u64,
    reader: &mut R,
    writer: &mut W,
    queue: &Sender<Command>,
    max_message_bytes: usize,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut served = 0u64;
    loop {
        let body = match read_frame(reader, max_message_bytes).await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(err @ FrameError::Oversize(_)) => {
                // Report the exact size on the wire, then drop the connection:
                // the unread body would desynchronize framing.
                logging::connection::frame_rejected(connection, &err.to_string());
                let _ = write_response(writer, &Response::error(err.to_string()), max_message_bytes)
                    .await;
                break;
            }
            Err(err) => {
                logging::connection::frame_rejected(connection, &err.to_string());
                break;
            }
        };

        let request = match serde_json::from_slice::<Request>(&body) {
            Ok(request) => request,
            Err(err) => {
                let message = format!("Invalid request: {err}");
                logging::connection::request_rejected(connection, &message);
                if write_response(writer, &Response::error(message), max_message_bytes)
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        let request_id = request.request_id.clone();
        let (reply_tx, reply_rx) = flume::bounded(1);
        let item = WorkItem {
            request,
            reply: reply_tx,
        };
        // send_async blocks while the queue is full: back-pressure, no drops.
        let enqueued = queue.send_async(Command::Work(item)).await.is_ok();
        let response = match enqueued {
            true => reply_rx.recv_async().await.ok(),
            false => None,
        };
        match response {
            Some(response) => {
                if write_response(writer, &response, max_message_bytes).await.is_err() {
                    break;
                }
                served += 1;
            }
            // The executor is gone: answer with the lifecycle error and close.
            None => {
                let response =
                    Response::error("Device shutting down").with_request_id(request_id);
                let _ = write_response(writer, &response, max_message_bytes).await;
                break;
            }
        }
    }
    served
}

async fn write_response<W>(
    writer: &mut W,
    response: &Response,
    max_message_bytes: usize,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(response).unwrap_or_else(|_| b"{\"error\":\"internal\"}".to_vec());
    match write_frame(writer, &body, max_message_bytes).await {
        Ok(()) => Ok(()),
        Err(err @ FrameError::Oversize(_)) => {
            // The result itself exceeded the frame limit; tell the client why.
            let fallback = Response {
                request_id: response.request_id.clone(),
                ..Response::error(err.to_string())
            };
            let body = serde_json::to_vec(&fallback)
                .unwrap_or_else(|_| b"{\"error\":\"internal\"}".to_vec());
            write_frame(writer, &body, max_message_bytes).await
        }
        Err(err) => Err(err),
    }
}
