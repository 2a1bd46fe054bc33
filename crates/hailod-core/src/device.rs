//! The device adapter seam.
//!
//! The executor talks to the NPU exclusively through [`DeviceAdapter`]. The
//! production implementation ([`crate::backend::HailortAdapter`]) drives
//! HailoRT; the test suite substitutes a scripted adapter. Exactly one adapter
//! exists per daemon and it is owned by the executor thread, so implementations
//! never need interior locking.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tensor::{TensorError, TENSOR_SCHEMA_ERROR};

/// Closed set of model families the daemon can host.
///
/// Each variant names a backend; the wire form is the snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Vlm,
    VlmChat,
    Clip,
    Whisper,
    Ocr,
    Depth,
    FlorenceEncoder,
    FlorenceDecoder,
    Pose,
}

impl ModelType {
    /// Resolve a wire name. Unknown names are a validation error, not a parse
    /// failure, so the caller can report `Unsupported model_type: <name>`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "vlm" => Some(Self::Vlm),
            "vlm_chat" => Some(Self::VlmChat),
            "clip" => Some(Self::Clip),
            "whisper" => Some(Self::Whisper),
            "ocr" => Some(Self::Ocr),
            "depth" => Some(Self::Depth),
            "florence_encoder" => Some(Self::FlorenceEncoder),
            "florence_decoder" => Some(Self::FlorenceDecoder),
            "pose" => Some(Self::Pose),
            _ => None,
        }
    }

    /// The wire name of this model type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Vlm => "vlm",
            Self::VlmChat => "vlm_chat",
            Self::Clip => "clip",
            Self::Whisper => "whisper",
            Self::Ocr => "ocr",
            Self::Depth => "depth",
            Self::FlorenceEncoder => "florence_encoder",
            Self::FlorenceDecoder => "florence_decoder",
            Self::Pose => "pose",
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed adapter errors. `Display` is the client-facing message.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Model file missing or unreadable; reported before any device work.
    #[error("Model file not found: {0}")]
    ModelNotFound(String),
    /// `model_type` outside the supported set.
    #[error("Unsupported model_type: {0}")]
    UnsupportedModelType(String),
    /// Malformed `input_data` or tensor payload. The session stays resident.
    #[error("{0}")]
    InvalidInput(String),
    /// Backend failure (HEF mismatch, inference error). The session is
    /// released and removed from the registry.
    #[error("{0}")]
    Backend(String),
    /// The device itself went away mid-call. The executor degrades the
    /// device and answers later requests with `Unavailable` until a reopen
    /// succeeds.
    #[error("{0}")]
    DeviceLost(String),
    /// Device is degraded and a reopen has not yet succeeded.
    #[error("Device unavailable")]
    Unavailable,
    /// Daemon is draining for shutdown.
    #[error("Device shutting down")]
    ShuttingDown,
}

impl DeviceError {
    /// Whether this error means the device handle itself is gone.
    pub fn is_device_loss(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }

    /// Whether the owning session must be released and forgotten.
    pub fn releases_session(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::DeviceLost(_))
    }
}

impl From<TensorError> for DeviceError {
    fn from(err: TensorError) -> Self {
        tracing::debug!(event = "tensor_decode_failed", error = %err, "Tensor decode failed");
        Self::InvalidInput(TENSOR_SCHEMA_ERROR.into())
    }
}

/// Abstraction over the exclusive NPU handle and its per-model-type backends.
///
/// All methods are blocking; the executor invokes them from its dedicated
/// device thread, which is what serializes device access.
pub trait DeviceAdapter: Send {
    /// Backend-specific state of one loaded model.
    type Session: Send;

    /// Stable identifier of the underlying device.
    fn device_id(&self) -> String;

    /// Load a model onto the device.
    fn load(
        &mut self,
        model_path: &Path,
        model_type: ModelType,
        params: &Value,
    ) -> Result<Self::Session, DeviceError>;

    /// Run one inference against a loaded session.
    fn infer(
        &mut self,
        session: &mut Self::Session,
        input_data: &Value,
    ) -> Result<Value, DeviceError>;

    /// Release a session's device resources. Infallible; failures are logged.
    fn release(&mut self, session: Self::Session);

    /// Try to re-acquire the device after a loss.
    fn reopen(&mut self) -> Result<(), DeviceError>;

    /// Final device teardown at shutdown.
    fn close(&mut self) {}
}
