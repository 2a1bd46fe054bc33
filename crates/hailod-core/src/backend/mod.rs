//! Per-model-type device backends.
//!
//! A tagged-variant dispatch keyed on [`ModelType`]: every variant wraps a
//! [`hailort::RawSession`] and implements the load/infer/release triad with
//! its own `model_params` schema and `input_data` shape. Post-processing
//! (normalization, token decode, detection parsing) runs on the CPU inside
//! the executor thread.

pub mod hailort;

mod clip;
mod depth;
mod ocr;
mod raw;
mod vlm;
mod whisper;

use std::{path::Path, sync::Arc};

use serde_json::Value;

use crate::device::{DeviceAdapter, DeviceError, ModelType};
use hailort::{HailoApi, RawSession, VDevice};

/// One loaded model, tagged by backend.
pub enum BackendSession {
    Vlm(vlm::VlmSession),
    Clip(clip::ClipSession),
    Whisper(whisper::WhisperSession),
    Ocr(ocr::OcrSession),
    Depth(depth::DepthSession),
    Raw(raw::RawModelSession),
}

/// The production adapter: owns the exclusive vdevice and dispatches to the
/// per-type backends.
pub struct HailortAdapter {
    api: Arc<HailoApi>,
    vdevice: Option<VDevice>,
    device_id: String,
}

impl HailortAdapter {
    /// Load HailoRT and acquire the single device context.
    pub fn open() -> Result<Self, DeviceError> {
        let api = HailoApi::load()?;
        let vdevice = VDevice::create(api.clone())?;
        let device_id = format!("hailo-{}", uuid::Uuid::new_v4());
        tracing::info!(event = "device_opened", device_id = %device_id, "Device context acquired");
        Ok(Self {
            api,
            vdevice: Some(vdevice),
            device_id,
        })
    }

    fn vdevice(&self) -> Result<&VDevice, DeviceError> {
        self.vdevice.as_ref().ok_or(DeviceError::Unavailable)
    }
}

impl DeviceAdapter for HailortAdapter {
    type Session = BackendSession;

    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    fn load(
        &mut self,
        model_path: &Path,
        model_type: ModelType,
        params: &Value,
    ) -> Result<BackendSession, DeviceError> {
        let raw = RawSession::open(self.api.clone(), self.vdevice()?, model_path)?;
        let session = match model_type {
            ModelType::Vlm => BackendSession::Vlm(vlm::VlmSession::load(raw, params, false)?),
            ModelType::VlmChat => BackendSession::Vlm(vlm::VlmSession::load(raw, params, true)?),
            ModelType::Clip => BackendSession::Clip(clip::ClipSession::new(raw)),
            ModelType::Whisper => BackendSession::Whisper(whisper::WhisperSession::load(raw, params)?),
            ModelType::Ocr => BackendSession::Ocr(ocr::OcrSession::load(raw, params)?),
            ModelType::Depth => BackendSession::Depth(depth::DepthSession::new(raw)),
            ModelType::FlorenceEncoder | ModelType::FlorenceDecoder | ModelType::Pose => {
                BackendSession::Raw(raw::RawModelSession::new(raw))
            }
        };
        Ok(session)
    }

    fn infer(
        &mut self,
        session: &mut BackendSession,
        input_data: &Value,
    ) -> Result<Value, DeviceError> {
        match session {
            BackendSession::Vlm(session) => session.infer(input_data),
            BackendSession::Clip(session) => session.infer(input_data),
            BackendSession::Whisper(session) => session.infer(input_data),
            BackendSession::Ocr(session) => session.infer(input_data),
            BackendSession::Depth(session) => session.infer(input_data),
            BackendSession::Raw(session) => session.infer(input_data),
        }
    }

    fn release(&mut self, session: BackendSession) {
        // RawSession teardown logs its own failures.
        drop(session);
    }

    fn reopen(&mut self) -> Result<(), DeviceError> {
        self.vdevice = None;
        self.vdevice = Some(VDevice::create(self.api.clone())?);
        tracing::info!(event = "device_reopened", device_id = %self.device_id, "Device context re-acquired");
        Ok(())
    }

    fn close(&mut self) {
        self.vdevice = None;
    }
}

/// Reinterpret a little-endian byte buffer as f32 values.
pub(crate) fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// L2-normalize in place; zero vectors are returned unchanged.
pub(crate) fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut values {
            *value /= norm;
        }
    }
    values
}

/// Greedy argmax over consecutive `vocab_size` chunks of logits.
pub(crate) fn argmax_chunks(logits: &[f32], vocab_size: usize) -> Vec<u32> {
    if vocab_size == 0 {
        return Vec::new();
    }
    logits
        .chunks_exact(vocab_size)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(index, _)| index as u32)
                .unwrap_or(0)
        })
        .collect()
}

/// Token-id vocabulary for text-producing backends.
///
/// Accepts either a JSON array of token strings or an object mapping id to
/// token, which covers both tokenizer export formats used by the fleet's
/// model conversion scripts.
pub(crate) struct Vocab {
    tokens: Vec<String>,
}

impl Vocab {
    pub fn load(path: &Path) -> Result<Self, DeviceError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            DeviceError::InvalidInput(format!("cannot read vocab file {}: {err}", path.display()))
        })?;
        let value: Value = serde_json::from_str(&contents).map_err(|err| {
            DeviceError::InvalidInput(format!("invalid vocab file {}: {err}", path.display()))
        })?;
        let tokens = match value {
            Value::Array(entries) => entries
                .into_iter()
                .map(|entry| entry.as_str().unwrap_or_default().to_string())
                .collect(),
            Value::Object(entries) => {
                let mut tokens = Vec::new();
                for (id, token) in entries {
                    let Ok(index) = id.parse::<usize>() else {
                        continue;
                    };
                    if index >= tokens.len() {
                        tokens.resize(index + 1, String::new());
                    }
                    tokens[index] = token.as_str().unwrap_or_default().to_string();
                }
                tokens
            }
            _ => {
                return Err(DeviceError::InvalidInput(format!(
                    "vocab file {} must be a JSON array or object",
                    path.display()
                )))
            }
        };
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn decode(&self, token_ids: &[u32]) -> String {
        token_ids
            .iter()
            .filter_map(|&id| self.tokens.get(id as usize))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_unit_length() {
        let normalized = l2_normalize(vec![3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
        let norm = normalized.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn argmax_chunks_picks_per_step_max() {
        let logits = [0.1, 0.9, 0.0, 0.7, 0.2, 0.1];
        assert_eq!(argmax_chunks(&logits, 3), vec![1, 0]);
    }

    #[test]
    fn bytes_round_trip_f32() {
        let values = [1.5f32, -2.25];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(bytes_to_f32(&bytes), values);
    }
}
