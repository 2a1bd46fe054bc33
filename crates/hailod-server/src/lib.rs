//! Daemon assembly for the Hailo device manager.
//!
//! [`Daemon::start`] wires the executor, the Unix socket server, and the
//! optional HTTP status server together. The binary and the integration tests
//! both go through it, so tests exercise the real socket and HTTP stack
//! against whichever [`DeviceAdapter`] they provide.

pub mod http;
pub mod logging;
pub mod socket;

use std::sync::{atomic::Ordering, Arc};

use anyhow::Result;
use hailod_core::{executor, Command, Config, DeviceAdapter, ExecutorHandle, HttpBind};
use tokio::task::JoinHandle;

/// A running daemon: executor thread plus server tasks.
pub struct Daemon {
    config: Config,
    executor: ExecutorHandle,
    accept_task: JoinHandle<()>,
    http_task: Option<JoinHandle<()>>,
}

impl Daemon {
    /// Start serving. The caller opens the device adapter first; a failure
    /// there is a fatal startup error, not a daemon concern.
    ///
    /// Startup order: executor thread, Unix socket (bind + permissions),
    /// HTTP status server.
    pub async fn start<A>(config: Config, adapter: A) -> Result<Self>
    where
        A: DeviceAdapter + 'static,
    {
        let info = executor::DaemonInfo::new(adapter.device_id(), config.socket_path.clone());
        let executor = executor::spawn(adapter, info.clone(), config.queue_capacity)?;

        let listener = socket::bind(&config)?;
        let accept_task = tokio::spawn(socket::serve(
            listener,
            executor.queue.clone(),
            config.max_message_bytes,
        ));

        let http_task = match config.http_bind {
            HttpBind::Off => None,
            HttpBind::Addr(addr) => {
                let acceptor = http::bind(addr).await?;
                logging::lifecycle::http_bound(&addr.to_string());
                let state = http::StatusState {
                    info: Arc::new(info),
                    snapshot: executor.snapshot.clone(),
                    queue: executor.queue.clone(),
                };
                Some(tokio::spawn(http::serve(acceptor, state)))
            }
        };

        Ok(Self {
            config,
            executor,
            accept_task,
            http_task,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Graceful stop: no new connections, drain queued work within the grace
    /// period, release every model, close the device, unlink the socket.
    /// Work still queued when the grace expires is answered with
    /// `Device shutting down`.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            config,
            executor,
            accept_task,
            http_task,
        } = self;

        accept_task.abort();

        let ExecutorHandle {
            queue,
            cancel,
            thread,
            snapshot: _,
        } = executor;
        let _ = queue.send_async(Command::Shutdown).await;
        drop(queue);

        let mut join = tokio::task::spawn_blocking(move || thread.join());
        if tokio::time::timeout(config.shutdown_grace, &mut join)
            .await
            .is_err()
        {
            tracing::warn!(
                event = "shutdown_grace_expired",
                grace_secs = config.shutdown_grace.as_secs(),
                "Grace expired; refusing remaining queued work"
            );
            cancel.store(true, Ordering::Relaxed);
            let _ = (&mut join).await;
        }

        if let Some(task) = http_task {
            task.abort();
        }
        match std::fs::remove_file(&config.socket_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                event = "socket_unlink_failed",
                path = %config.socket_path.display(),
                error = %err,
                "Could not unlink socket"
            ),
        }
        Ok(())
    }
}
