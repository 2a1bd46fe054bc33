//! Async client for the Hailo device manager.
//!
//! Co-hosted model services use [`DeviceClient`] instead of opening
//! `/dev/hailo0` themselves. One client holds one connection with a single
//! in-flight request; services that want concurrency open more clients. Every
//! call stamps a UUID `request_id` and checks the echo. Idempotent calls
//! (`ping`, `status`, `load_model`, `unload_model`) transparently reconnect
//! once if the daemon restarted underneath them; `infer` surfaces the
//! transport error instead, since the caller may not want to re-run work.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde_json::Value;
use thiserror::Error;
use tokio::net::UnixStream;
use uuid::Uuid;

use hailod_core::{
    config::DEFAULT_MAX_MESSAGE_BYTES,
    protocol::{read_frame, write_frame},
    FrameError, Request, Response,
};

/// Client-side failures, split so callers can tell a broken transport from a
/// daemon-reported error string.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Frame(#[from] FrameError),
    #[error("connection closed by daemon")]
    Closed,
    #[error("invalid response: {0}")]
    Protocol(String),
    #[error("{0}")]
    Daemon(String),
    #[error("request timed out")]
    Timeout,
}

/// Handle to the device manager socket.
pub struct DeviceClient {
    socket_path: PathBuf,
    stream: Option<UnixStream>,
    max_message_bytes: usize,
    timeout: Option<Duration>,
}

impl DeviceClient {
    /// Connect to the daemon socket.
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&socket_path).await?;
        Ok(Self {
            socket_path,
            stream: Some(stream),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            timeout: None,
        })
    }

    /// Apply a per-call timeout. The daemon never times out a backend, so
    /// bounding waits is the caller's decision.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Raise or lower the frame size limit to match a non-default daemon.
    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    /// Liveness check; returns the full status payload.
    pub async fn ping(&mut self) -> Result<Response, ClientError> {
        self.call(Request::new("ping"), true).await
    }

    /// Status snapshot: loaded models, uptime, queue depth.
    pub async fn status(&mut self) -> Result<Response, ClientError> {
        self.call(Request::new("status"), true).await
    }

    /// Load a model. Idempotent: loading a resident model succeeds without
    /// touching the device.
    pub async fn load_model(
        &mut self,
        model_path: impl AsRef<Path>,
        model_type: &str,
        model_params: Option<Value>,
    ) -> Result<Response, ClientError> {
        let request = Request {
            action: "load_model".into(),
            model_path: Some(model_path.as_ref().display().to_string()),
            model_type: Some(model_type.into()),
            model_params,
            ..Default::default()
        };
        self.call(request, true).await
    }

    /// Run one inference; loads the model first if it is not resident.
    pub async fn infer(
        &mut self,
        model_path: impl AsRef<Path>,
        input_data: Value,
        model_type: &str,
        model_params: Option<Value>,
    ) -> Result<Response, ClientError> {
        let request = Request {
            action: "infer".into(),
            model_path: Some(model_path.as_ref().display().to_string()),
            model_type: Some(model_type.into()),
            model_params,
            input_data: Some(input_data),
            ..Default::default()
        };
        self.call(request, false).await
    }

    /// Unload a model. Idempotent: unloading a missing model succeeds.
    pub async fn unload_model(
        &mut self,
        model_path: impl AsRef<Path>,
        model_type: &str,
    ) -> Result<Response, ClientError> {
        let request = Request {
            action: "unload_model".into(),
            model_path: Some(model_path.as_ref().display().to_string()),
            model_type: Some(model_type.into()),
            ..Default::default()
        };
        self.call(request, true).await
    }

    /// Close the connection. The client can be reused; the next call
    /// reconnects.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stream.shutdown().await;
        }
    }

    async fn call(&mut self, mut request: Request, idempotent: bool) -> Result<Response, ClientError> {
        request.request_id = Some(Uuid::new_v4().to_string());

        match self.round_trip(&request).await {
            Ok(response) => self.check(&request, response),
            Err(err) if idempotent && is_transport(&err) => {
                tracing::debug!(
                    socket = %self.socket_path.display(),
                    error = %err,
                    "Reconnecting after transport error"
                );
                self.stream = None;
                let response = self.round_trip(&request).await?;
                self.check(&request, response)
            }
            Err(err) => Err(err),
        }
    }

    async fn round_trip(&mut self, request: &Request) -> Result<Response, ClientError> {
        let max_bytes = self.max_message_bytes;
        let call_timeout = self.timeout;
        if self.stream.is_none() {
            self.stream = Some(UnixStream::connect(&self.socket_path).await?);
        }
        let stream = self.stream.as_mut().expect("stream just ensured");

        let exchange = async move {
            let body = serde_json::to_vec(request)
                .map_err(|err| ClientError::Protocol(err.to_string()))?;
            write_frame(stream, &body, max_bytes).await?;
            let body = read_frame(stream, max_bytes)
                .await?
                .ok_or(ClientError::Closed)?;
            serde_json::from_slice::<Response>(&body)
                .map_err(|err| ClientError::Protocol(err.to_string()))
        };

        let result = match call_timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .unwrap_or(Err(ClientError::Timeout)),
            None => exchange.await,
        };
        if result.is_err() {
            // Connection state is unknown after any failure; start fresh.
            self.stream = None;
        }
        result
    }

    fn check(&self, request: &Request, response: Response) -> Result<Response, ClientError> {
        if let Some(message) = &response.error {
            return Err(ClientError::Daemon(message.clone()));
        }
        if !response.is_ok() {
            return Err(ClientError::Protocol(
                "response has neither status nor error".into(),
            ));
        }
        if response.request_id != request.request_id {
            return Err(ClientError::Protocol(format!(
                "request_id mismatch: sent {:?}, got {:?}",
                request.request_id, response.request_id
            )));
        }
        Ok(response)
    }
}

fn is_transport(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::Io(_) | ClientError::Frame(_) | ClientError::Closed
    )
}
