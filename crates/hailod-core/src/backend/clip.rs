//! CLIP embedding backend.
//!
//! Consumes either `{image: Tensor}` (vision tower) or `{tokens: Tensor}`
//! (text tower) and produces `{embedding: [f32…]}`, L2-normalized. Image and
//! text towers are separate HEFs and load as separate sessions.

use serde_json::{json, Value};

use crate::device::DeviceError;
use crate::tensor::decode_tensor;

use super::hailort::RawSession;
use super::{bytes_to_f32, l2_normalize};

pub struct ClipSession {
    raw: RawSession,
}

impl ClipSession {
    pub fn new(raw: RawSession) -> Self {
        Self { raw }
    }

    pub fn infer(&mut self, input_data: &Value) -> Result<Value, DeviceError> {
        let tensor = match (input_data.get("image"), input_data.get("tokens")) {
            (Some(image), _) => decode_tensor("image", Some(image))?,
            (None, Some(tokens)) => decode_tensor("tokens", Some(tokens))?,
            (None, None) => {
                return Err(DeviceError::InvalidInput(
                    "clip input_data must include an image or tokens tensor".into(),
                ))
            }
        };
        let outputs = self.raw.infer(&[&tensor.data])?;
        let embedding = l2_normalize(bytes_to_f32(&outputs[0]));
        Ok(json!({ "embedding": embedding }))
    }
}
