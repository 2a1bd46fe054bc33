//! Length-prefixed JSON wire protocol.
//!
//! Every message on the device socket is a 4-byte big-endian length followed
//! by that many bytes of UTF-8 JSON. Both directions enforce the configured
//! maximum body size. One request object produces exactly one response object
//! on the same connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Framing failures.
///
/// `Oversize` renders as the exact client-facing message; the server reports
/// it on the connection before closing.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Message too large: {0} bytes")]
    Oversize(usize),
    #[error("connection closed mid-frame")]
    Truncated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Request envelope.
///
/// Only `action` is required at the protocol layer; per-action field checks
/// happen in the executor so a missing field is reported over the same
/// connection instead of tearing it down. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
}

impl Request {
    /// A bare request with the given action.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }
}

/// Response envelope: `status: "ok"` with action fields, or `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl Response {
    /// A success response.
    pub fn ok() -> Self {
        Self {
            status: Some("ok".into()),
            ..Default::default()
        }
    }

    /// An error response carrying the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Echo the request id, if the request carried one.
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Attach an extra top-level field.
    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Whether this is a success response.
    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("ok")
    }
}

/// Read one framed message body.
///
/// Returns `Ok(None)` when the peer closed the connection at a frame
/// boundary. A prefix exceeding `max_bytes` yields [`FrameError::Oversize`]
/// without consuming the body.
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_bytes {
        return Err(FrameError::Oversize(len));
    }
    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(Some(body)),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::Truncated),
        Err(err) => Err(err.into()),
    }
}

/// Write one framed message body.
pub async fn write_frame<W>(writer: &mut W, body: &[u8], max_bytes: usize) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > max_bytes {
        return Err(FrameError::Oversize(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}
