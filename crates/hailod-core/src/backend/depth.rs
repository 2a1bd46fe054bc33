//! Monocular depth backend.
//!
//! Consumes `{image: Tensor}` in NCHW `[1, 3, H, W]` layout and returns the
//! depth map as a `[1, 1, H, W]` float32 tensor payload.

use serde_json::Value;

use crate::device::DeviceError;
use crate::tensor::{decode_tensor, Tensor};

use super::bytes_to_f32;
use super::hailort::RawSession;

pub struct DepthSession {
    raw: RawSession,
}

impl DepthSession {
    pub fn new(raw: RawSession) -> Self {
        Self { raw }
    }

    pub fn infer(&mut self, input_data: &Value) -> Result<Value, DeviceError> {
        let tensor = decode_tensor("image", input_data.get("image"))?;
        let &[batch, channels, height, width] = tensor.shape.as_slice() else {
            return Err(DeviceError::InvalidInput(
                "depth input must be a [1, 3, H, W] tensor".into(),
            ));
        };
        if batch != 1 || channels != 3 {
            return Err(DeviceError::InvalidInput(
                "depth input must be a [1, 3, H, W] tensor".into(),
            ));
        }

        let outputs = self.raw.infer(&[&tensor.data])?;
        let depth = bytes_to_f32(&outputs[0]);
        if depth.len() != height * width {
            return Err(DeviceError::Backend(format!(
                "depth output has {} values, expected {}",
                depth.len(),
                height * width
            )));
        }
        let payload = Tensor::from_f32(vec![1, 1, height, width], &depth).into_payload();
        serde_json::to_value(payload)
            .map_err(|err| DeviceError::Backend(format!("depth result encoding failed: {err}")))
    }
}
