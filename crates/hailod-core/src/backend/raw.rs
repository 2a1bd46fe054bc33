//! Raw tensor passthrough backend.
//!
//! Serves the extension model types (Florence encoder/decoder, pose) whose
//! post-processing lives in the calling service: inputs are tensors in stream
//! order, outputs come back as byte tensors in stream order. The caller
//! compiled the HEF and knows how to interpret the buffers.

use serde_json::{json, Value};

use crate::device::DeviceError;
use crate::tensor::{decode_tensor, Dtype, Tensor};

use super::hailort::RawSession;

pub struct RawModelSession {
    raw: RawSession,
}

impl RawModelSession {
    pub fn new(raw: RawSession) -> Self {
        Self { raw }
    }

    pub fn infer(&mut self, input_data: &Value) -> Result<Value, DeviceError> {
        let tensors = match input_data.get("inputs") {
            Some(Value::Array(entries)) => {
                let mut tensors = Vec::with_capacity(entries.len());
                for entry in entries {
                    tensors.push(decode_tensor("inputs", Some(entry))?);
                }
                tensors
            }
            Some(_) => {
                return Err(DeviceError::InvalidInput(
                    "inputs must be an array of tensors".into(),
                ))
            }
            None => vec![decode_tensor("input", input_data.get("input"))?],
        };

        let frames: Vec<&[u8]> = tensors.iter().map(|tensor| tensor.data.as_slice()).collect();
        let outputs = self.raw.infer(&frames)?;

        let payloads: Vec<Value> = outputs
            .into_iter()
            .map(|frame| {
                let len = frame.len();
                let tensor = Tensor {
                    dtype: Dtype::Uint8,
                    shape: vec![len],
                    data: frame,
                };
                serde_json::to_value(tensor.into_payload())
            })
            .collect::<Result<_, _>>()
            .map_err(|err| DeviceError::Backend(format!("result encoding failed: {err}")))?;
        Ok(json!({ "outputs": payloads }))
    }
}
