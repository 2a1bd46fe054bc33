//! Single-writer device executor.
//!
//! One OS thread owns the [`DeviceAdapter`] and the [`Registry`] and consumes
//! a bounded FIFO queue of work items. Connection tasks block on `send_async`
//! when the queue is full (back-pressure, never dropping) and await a reply
//! channel. Because every mutation happens on this thread, no locks guard the
//! device or the registry; status readers get copies through a watch channel.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use flume::{Receiver, Sender, TryRecvError};
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::{
    device::{DeviceAdapter, DeviceError, ModelType},
    protocol::{Request, Response},
    registry::{now_unix, LoadedModel, ModelKey, ModelSession, Registry},
};

/// Commands consumed by the executor thread.
pub enum Command {
    /// One client request and the channel its response goes to.
    Work(WorkItem),
    /// Drain whatever is queued, release everything, and exit.
    Shutdown,
}

/// A request pulled off a connection, paired with its reply channel.
pub struct WorkItem {
    pub request: Request,
    pub reply: Sender<Response>,
}

/// Static daemon facts baked into every status payload.
#[derive(Debug, Clone)]
pub struct DaemonInfo {
    pub device_id: String,
    pub socket_path: PathBuf,
    pub started_at: Instant,
}

impl DaemonInfo {
    pub fn new(device_id: String, socket_path: PathBuf) -> Self {
        Self {
            device_id,
            socket_path,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Build the payload shared by `ping`, `status`, `device_status`, and the
/// HTTP status route.
pub fn status_response(info: &DaemonInfo, models: &[LoadedModel], queue_depth: usize) -> Response {
    Response::ok()
        .field("device_id", json!(info.device_id))
        .field(
            "loaded_models",
            serde_json::to_value(models).unwrap_or_else(|_| json!([])),
        )
        .field("uptime_seconds", json!(info.uptime_seconds()))
        .field(
            "socket_path",
            json!(info.socket_path.display().to_string()),
        )
        .field("queue_depth", json!(queue_depth))
}

/// Running executor plus the handles the rest of the daemon needs.
pub struct ExecutorHandle {
    /// Producer side of the bounded work queue.
    pub queue: Sender<Command>,
    /// Latest registry snapshot, republished on every mutation.
    pub snapshot: watch::Receiver<Vec<LoadedModel>>,
    /// Set after the shutdown grace expires; queued work is then refused.
    pub cancel: Arc<AtomicBool>,
    /// The device thread itself.
    pub thread: std::thread::JoinHandle<()>,
}

/// Spawn the device-owning executor thread.
pub fn spawn<A>(
    adapter: A,
    info: DaemonInfo,
    queue_capacity: usize,
) -> std::io::Result<ExecutorHandle>
where
    A: DeviceAdapter + 'static,
{
    let (queue_tx, queue_rx) = flume::bounded(queue_capacity);
    let (snapshot_tx, snapshot_rx) = watch::channel(Vec::new());
    let cancel = Arc::new(AtomicBool::new(false));
    let executor = Executor::new(adapter, info, queue_rx, snapshot_tx, cancel.clone());
    let thread = std::thread::Builder::new()
        .name("hailo-executor".into())
        .spawn(move || executor.run())?;
    Ok(ExecutorHandle {
        queue: queue_tx,
        snapshot: snapshot_rx,
        cancel,
        thread,
    })
}

struct Executor<A: DeviceAdapter> {
    adapter: A,
    registry: Registry<A::Session>,
    info: DaemonInfo,
    queue: Receiver<Command>,
    snapshot: watch::Sender<Vec<LoadedModel>>,
    cancel: Arc<AtomicBool>,
    degraded: bool,
}

impl<A: DeviceAdapter> Executor<A> {
    fn new(
        adapter: A,
        info: DaemonInfo,
        queue: Receiver<Command>,
        snapshot: watch::Sender<Vec<LoadedModel>>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            adapter,
            registry: Registry::default(),
            info,
            queue,
            snapshot,
            cancel,
            degraded: false,
        }
    }

    fn run(mut self) {
        tracing::info!(
            event = "executor_started",
            device_id = %self.info.device_id,
            "Executor running"
        );
        while let Ok(command) = self.queue.recv() {
            match command {
                Command::Work(item) => self.handle(item),
                Command::Shutdown => break,
            }
        }
        self.drain();
        self.teardown();
    }

    /// Answer everything still queued. Items that arrived before the grace
    /// expired are executed; afterwards they are refused.
    fn drain(&mut self) {
        let mut executed = 0usize;
        let mut refused = 0usize;
        loop {
            match self.queue.try_recv() {
                Ok(Command::Work(item)) => {
                    if self.cancel.load(Ordering::Relaxed) {
                        refused += 1;
                        let _ = item.reply.send(
                            Response::error(DeviceError::ShuttingDown.to_string())
                                .with_request_id(item.request.request_id.clone()),
                        );
                    } else {
                        executed += 1;
                        self.handle(item);
                    }
                }
                Ok(Command::Shutdown) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        tracing::info!(
            event = "queue_drained",
            executed,
            refused,
            "Work queue drained"
        );
    }

    fn teardown(&mut self) {
        for session in self.registry.drain() {
            tracing::info!(
                event = "model_unloaded",
                model_path = %session.key.model_path.display(),
                model_type = %session.key.model_type,
                "Releasing model at shutdown"
            );
            self.adapter.release(session.session);
        }
        let _ = self.snapshot.send(Vec::new());
        self.adapter.close();
        tracing::info!(event = "executor_stopped", "Executor stopped");
    }

    fn handle(&mut self, item: WorkItem) {
        let request_id = item.request.request_id.clone();
        let response = if self.cancel.load(Ordering::Relaxed) {
            Response::error(DeviceError::ShuttingDown.to_string())
        } else {
            match self.execute(&item.request) {
                Ok(response) => response,
                Err(err) => Response::error(err.to_string()),
            }
        };
        // A disconnected client discards its reply; the work already ran.
        let _ = item.reply.send(response.with_request_id(request_id));
    }

    fn execute(&mut self, request: &Request) -> Result<Response, DeviceError> {
        match request.action.as_str() {
            "ping" | "status" | "device_status" => Ok(self.status()),
            "load_model" => self.load_model(request),
            "infer" => self.infer(request),
            "unload_model" => self.unload_model(request),
            other => Err(DeviceError::InvalidInput(format!("Unknown action: {other}"))),
        }
    }

    fn status(&self) -> Response {
        status_response(&self.info, &self.registry.snapshot(), self.queue.len())
    }

    fn load_model(&mut self, request: &Request) -> Result<Response, DeviceError> {
        let key = self.model_key(request)?;
        if self.registry.contains(&key) {
            return Ok(self
                .model_response(&key)
                .field("message", json!("Model already loaded")));
        }
        self.ensure_device()?;
        let params = request
            .model_params
            .clone()
            .unwrap_or_else(|| json!({}));
        self.load_session(&key, params)?;
        Ok(self
            .model_response(&key)
            .field("message", json!("Model loaded")))
    }

    fn infer(&mut self, request: &Request) -> Result<Response, DeviceError> {
        let key = self.model_key(request)?;
        let input_data = request.input_data.as_ref().ok_or_else(|| {
            DeviceError::InvalidInput("Missing required field: input_data".into())
        })?;
        self.ensure_device()?;
        if !self.registry.contains(&key) {
            let params = request
                .model_params
                .clone()
                .unwrap_or_else(|| json!({}));
            self.load_session(&key, params)?;
        }

        let start = Instant::now();
        let session = self
            .registry
            .get_mut(&key)
            .ok_or(DeviceError::Unavailable)?;
        match self.adapter.infer(&mut session.session, input_data) {
            Ok(result) => {
                session.last_used = now_unix();
                let inference_time_ms = start.elapsed().as_millis() as u64;
                self.publish();
                tracing::info!(
                    event = "inference_complete",
                    model_path = %key.model_path.display(),
                    model_type = %key.model_type,
                    inference_time_ms,
                    "Inference complete"
                );
                Ok(Response::ok()
                    .field("result", result)
                    .field("inference_time_ms", json!(inference_time_ms)))
            }
            Err(err) => {
                tracing::error!(
                    event = "inference_failed",
                    model_path = %key.model_path.display(),
                    model_type = %key.model_type,
                    error = %err,
                    "Inference failed"
                );
                if err.releases_session() {
                    if let Some(session) = self.registry.remove(&key) {
                        self.adapter.release(session.session);
                    }
                    self.publish();
                }
                if err.is_device_loss() {
                    self.degrade();
                }
                Err(err)
            }
        }
    }

    fn unload_model(&mut self, request: &Request) -> Result<Response, DeviceError> {
        let key = self.model_key(request)?;
        if !self.registry.contains(&key) {
            return Ok(self
                .model_response(&key)
                .field("message", json!("Model not loaded")));
        }
        self.ensure_device()?;
        if let Some(session) = self.registry.remove(&key) {
            self.adapter.release(session.session);
            self.publish();
            tracing::info!(
                event = "model_unloaded",
                model_path = %key.model_path.display(),
                model_type = %key.model_type,
                "Model unloaded"
            );
        }
        Ok(self
            .model_response(&key)
            .field("message", json!("Model unloaded")))
    }

    /// Load, insert, and publish one session. The key must not be resident.
    fn load_session(&mut self, key: &ModelKey, params: Value) -> Result<(), DeviceError> {
        preflight(&key.model_path)?;
        let start = Instant::now();
        match self
            .adapter
            .load(&key.model_path, key.model_type, &params)
        {
            Ok(session) => {
                self.registry
                    .insert(ModelSession::new(key.clone(), params, session));
                self.publish();
                tracing::info!(
                    event = "model_loaded",
                    model_path = %key.model_path.display(),
                    model_type = %key.model_type,
                    load_time_ms = start.elapsed().as_millis() as u64,
                    resident = self.registry.len(),
                    "Model loaded"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    event = "model_load_failed",
                    model_path = %key.model_path.display(),
                    model_type = %key.model_type,
                    error = %err,
                    "Model load failed"
                );
                if err.is_device_loss() {
                    self.degrade();
                }
                Err(err)
            }
        }
    }

    fn model_key(&self, request: &Request) -> Result<ModelKey, DeviceError> {
        let model_path = request.model_path.as_deref().ok_or_else(|| {
            DeviceError::InvalidInput("Missing required field: model_path".into())
        })?;
        let type_name = request.model_type.as_deref().ok_or_else(|| {
            DeviceError::InvalidInput("Missing required field: model_type".into())
        })?;
        let model_type = ModelType::from_name(type_name)
            .ok_or_else(|| DeviceError::UnsupportedModelType(type_name.into()))?;
        Ok(ModelKey {
            model_path: PathBuf::from(model_path),
            model_type,
        })
    }

    fn model_response(&self, key: &ModelKey) -> Response {
        Response::ok()
            .field(
                "model_path",
                json!(key.model_path.display().to_string()),
            )
            .field("model_type", json!(key.model_type.name()))
    }

    /// Degraded devices get one reopen attempt per request; until one
    /// succeeds every device-touching action fails fast.
    fn ensure_device(&mut self) -> Result<(), DeviceError> {
        if !self.degraded {
            return Ok(());
        }
        match self.adapter.reopen() {
            Ok(()) => {
                self.degraded = false;
                tracing::info!(event = "device_reopened", "Device recovered");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(event = "device_reopen_failed", error = %err, "Device reopen failed");
                Err(DeviceError::Unavailable)
            }
        }
    }

    /// A lost device invalidates every resident session; release them all so
    /// a later reopen starts from an empty registry.
    fn degrade(&mut self) {
        self.degraded = true;
        let stale = self.registry.drain();
        let released = stale.len();
        for session in stale {
            self.adapter.release(session.session);
        }
        self.publish();
        tracing::error!(
            event = "device_lost",
            device_id = %self.info.device_id,
            released,
            "Device lost; marking degraded"
        );
    }

    fn publish(&self) {
        let _ = self.snapshot.send(self.registry.snapshot());
    }
}

/// Reject missing, unreadable, or empty model files before any device work.
fn preflight(model_path: &Path) -> Result<(), DeviceError> {
    match std::fs::metadata(model_path) {
        Ok(metadata) if metadata.is_file() && metadata.len() > 0 => Ok(()),
        _ => Err(DeviceError::ModelNotFound(
            model_path.display().to_string(),
        )),
    }
}
