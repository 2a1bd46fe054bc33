//! Tensor payload schema for the wire protocol.
//!
//! Tensors cross the socket as `{dtype, shape, data_b64}` objects: a
//! numpy-style dtype name, a non-empty shape, and standard base64 over the raw
//! little-endian bytes. Decoding verifies the byte count against
//! `product(shape) * element_size(dtype)` so backends always see buffers of
//! the advertised size.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Canonical client-facing message for any malformed tensor payload.
pub const TENSOR_SCHEMA_ERROR: &str = "tensor must include dtype, shape, and data_b64";

/// Errors raised while decoding or encoding tensor payloads.
///
/// The per-variant detail is for logs; on the wire every variant collapses to
/// [`TENSOR_SCHEMA_ERROR`].
#[derive(Debug, Error)]
pub enum TensorError {
    #[error("tensor payload is not an object")]
    NotAnObject,
    #[error("unknown dtype {0:?}")]
    UnknownDtype(String),
    #[error("tensor shape must be a non-empty array of non-negative integers")]
    InvalidShape,
    #[error("invalid base64 in data_b64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("tensor byte length {actual} does not match shape ({expected} bytes expected)")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("tensor element count overflows")]
    Overflow,
    #[error("missing tensor field: {0}")]
    MissingField(&'static str),
}

/// Element types supported on the wire, named after their numpy dtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
}

impl Dtype {
    /// Parse a numpy dtype name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uint8" => Some(Self::Uint8),
            "int8" => Some(Self::Int8),
            "uint16" => Some(Self::Uint16),
            "int16" => Some(Self::Int16),
            "uint32" => Some(Self::Uint32),
            "int32" => Some(Self::Int32),
            "int64" => Some(Self::Int64),
            "float16" => Some(Self::Float16),
            "float32" => Some(Self::Float32),
            "float64" => Some(Self::Float64),
            _ => None,
        }
    }

    /// The numpy name of this dtype.
    pub fn name(self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Int8 => "int8",
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Uint32 => "uint32",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Size of one element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 | Self::Float16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }
}

/// The wire form of a tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorPayload {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub data_b64: String,
}

/// A decoded tensor: verified dtype, shape, and raw bytes.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl TensorPayload {
    /// Decode and verify the payload.
    pub fn decode(&self) -> Result<Tensor, TensorError> {
        let dtype =
            Dtype::from_name(&self.dtype).ok_or_else(|| TensorError::UnknownDtype(self.dtype.clone()))?;
        if self.shape.is_empty() {
            return Err(TensorError::InvalidShape);
        }
        let elements = self
            .shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or(TensorError::Overflow)?;
        let expected = elements
            .checked_mul(dtype.element_size())
            .ok_or(TensorError::Overflow)?;
        let data = BASE64.decode(&self.data_b64)?;
        if data.len() != expected {
            return Err(TensorError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Tensor {
            dtype,
            shape: self.shape.clone(),
            data,
        })
    }
}

impl Tensor {
    /// Build a float32 tensor from host values.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Self {
        let mut data = Vec::with_capacity(values.len() * 4);
        for value in values {
            data.extend_from_slice(&value.to_le_bytes());
        }
        Self {
            dtype: Dtype::Float32,
            shape,
            data,
        }
    }

    /// Reinterpret the buffer as f32 values. Fails unless the dtype is float32.
    pub fn as_f32(&self) -> Result<Vec<f32>, TensorError> {
        if self.dtype != Dtype::Float32 {
            return Err(TensorError::UnknownDtype(self.dtype.name().into()));
        }
        Ok(self
            .data
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Encode back into the wire form.
    pub fn into_payload(self) -> TensorPayload {
        TensorPayload {
            dtype: self.dtype.name().into(),
            shape: self.shape,
            data_b64: BASE64.encode(&self.data),
        }
    }
}

/// Pull a tensor out of an `input_data` field.
///
/// Accepts the raw JSON value of a named field (e.g. `input_data.image`) and
/// returns the decoded tensor. Failures log the specific cause and surface the
/// canonical schema message.
pub fn decode_tensor(field: &'static str, value: Option<&Value>) -> Result<Tensor, TensorError> {
    let value = value.ok_or(TensorError::MissingField(field))?;
    if !value.is_object() {
        return Err(TensorError::NotAnObject);
    }
    let payload: TensorPayload =
        serde_json::from_value(value.clone()).map_err(|_| TensorError::NotAnObject)?;
    payload.decode()
}
