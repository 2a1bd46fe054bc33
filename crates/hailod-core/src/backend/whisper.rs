//! Whisper speech-to-text backend.
//!
//! Consumes `{audio: Tensor (mono float32), language?, temperature?}` and
//! produces `{segments: [{start, end, text}], text, language}`. The HEF is
//! treated as one fused artifact whose output is token logits; decode is
//! greedy against the vocabulary from `model_params`, and the transcript is
//! reported as a single segment spanning the submitted audio.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::device::DeviceError;
use crate::tensor::{decode_tensor, Dtype};

use super::hailort::RawSession;
use super::{argmax_chunks, bytes_to_f32, Vocab};

fn default_sample_rate() -> u32 {
    16_000
}

#[derive(Debug, Deserialize)]
pub struct WhisperParams {
    vocab_path: std::path::PathBuf,
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,
}

#[derive(Debug, Deserialize)]
struct WhisperInput {
    audio: Value,
    #[serde(default)]
    language: Option<String>,
    // Accepted for forward compatibility; greedy decode ignores it.
    #[serde(default)]
    #[allow(dead_code)]
    temperature: Option<f32>,
}

pub struct WhisperSession {
    raw: RawSession,
    vocab: Vocab,
    sample_rate: u32,
}

impl WhisperSession {
    pub fn load(raw: RawSession, params: &Value) -> Result<Self, DeviceError> {
        let params: WhisperParams = serde_json::from_value(params.clone())
            .map_err(|err| DeviceError::InvalidInput(format!("invalid model_params: {err}")))?;
        let vocab = Vocab::load(&params.vocab_path)?;
        if vocab.len() == 0 {
            return Err(DeviceError::InvalidInput(format!(
                "vocab file {} is empty",
                params.vocab_path.display()
            )));
        }
        Ok(Self {
            raw,
            vocab,
            sample_rate: params.sample_rate,
        })
    }

    pub fn infer(&mut self, input_data: &Value) -> Result<Value, DeviceError> {
        let input: WhisperInput = serde_json::from_value(input_data.clone()).map_err(|_| {
            DeviceError::InvalidInput("whisper input_data must include an audio tensor".into())
        })?;
        let audio = decode_tensor("audio", Some(&input.audio))?;
        if audio.dtype != Dtype::Float32 {
            return Err(DeviceError::InvalidInput(
                "whisper audio must be mono float32 samples".into(),
            ));
        }

        let sample_count = audio.data.len() / 4;
        let duration_secs = sample_count as f64 / f64::from(self.sample_rate);

        let outputs = self.raw.infer(&[&audio.data])?;
        let logits = bytes_to_f32(outputs.last().ok_or_else(|| {
            DeviceError::Backend("model produced no output streams".into())
        })?);
        let tokens = argmax_chunks(&logits, self.vocab.len());
        let text = self.vocab.decode(&tokens);

        let language = input.language.unwrap_or_else(|| "en".into());
        Ok(json!({
            "segments": [{ "start": 0.0, "end": duration_secs, "text": text }],
            "text": text,
            "language": language,
        }))
    }
}
