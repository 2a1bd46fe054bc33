//! Vision-language backend (`vlm` and `vlm_chat`).
//!
//! Consumes `{prompt, frames: [Tensor…], temperature?, seed?,
//! max_generated_tokens?}` and produces a caption or answer string under
//! `result`. Tokens come from the model's logits output; sampling and decode
//! run on the CPU against the vocabulary named in `model_params`. The chat
//! variant is stateless per call: context is dropped when the call returns,
//! never carried into the next request.

use serde::Deserialize;
use serde_json::Value;

use crate::device::DeviceError;
use crate::tensor::decode_tensor;

use super::bytes_to_f32;
use super::hailort::RawSession;
use super::Vocab;

fn default_max_tokens() -> usize {
    128
}

#[derive(Debug, Deserialize)]
pub struct VlmParams {
    /// Token-id vocabulary exported alongside the HEF.
    vocab_path: std::path::PathBuf,
    /// End-of-sequence token id.
    #[serde(default)]
    eos_token_id: u32,
    #[serde(default = "default_max_tokens")]
    max_generated_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct VlmInput {
    prompt: String,
    #[serde(default)]
    frames: Vec<Value>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    max_generated_tokens: Option<usize>,
}

pub struct VlmSession {
    raw: RawSession,
    vocab: Vocab,
    eos_token_id: u32,
    max_generated_tokens: usize,
    chat: bool,
}

impl VlmSession {
    pub fn load(raw: RawSession, params: &Value, chat: bool) -> Result<Self, DeviceError> {
        let params: VlmParams = serde_json::from_value(params.clone())
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
            eos_token_id: params.eos_token_id,
            max_generated_tokens: params.max_generated_tokens,
            chat,
        })
    }

    pub fn infer(&mut self, input_data: &Value) -> Result<Value, DeviceError> {
        let input: VlmInput = serde_json::from_value(input_data.clone()).map_err(|_| {
            DeviceError::InvalidInput("vlm input_data must include a prompt string".into())
        })?;
        if input.prompt.is_empty() {
            return Err(DeviceError::InvalidInput(
                "vlm input_data must include a prompt string".into(),
            ));
        }

        let mut frames = Vec::with_capacity(input.frames.len());
        for frame in &input.frames {
            frames.push(decode_tensor("frames", Some(frame))?);
        }
        let expected = self.raw.input_frame_sizes().len();
        if frames.len() != expected {
            return Err(DeviceError::InvalidInput(format!(
                "model expects {expected} frame tensors, got {}",
                frames.len()
            )));
        }

        let buffers: Vec<&[u8]> = frames.iter().map(|frame| frame.data.as_slice()).collect();
        let outputs = self.raw.infer(&buffers)?;
        let logits = bytes_to_f32(outputs.last().ok_or_else(|| {
            DeviceError::Backend("model produced no output streams".into())
        })?);

        let max_tokens = input
            .max_generated_tokens
            .unwrap_or(self.max_generated_tokens);
        let tokens = sample_tokens(
            &logits,
            self.vocab.len(),
            max_tokens,
            input.temperature.unwrap_or(0.0),
            input.seed,
            self.eos_token_id,
        );
        let text = self.vocab.decode(&tokens);

        if self.chat {
            tracing::debug!(event = "chat_context_cleared", "Chat context cleared");
        }
        Ok(Value::String(text))
    }
}

/// Turn a flat logits buffer into token ids, one per `vocab_size` chunk, up
/// to `max_tokens` or the first EOS. Zero temperature is greedy argmax;
/// otherwise softmax sampling with an optional fixed seed.
fn sample_tokens(
    logits: &[f32],
    vocab_size: usize,
    max_tokens: usize,
    temperature: f32,
    seed: Option<u64>,
    eos_token_id: u32,
) -> Vec<u32> {
    let mut rng = match seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };
    let mut tokens = Vec::new();
    for chunk in logits.chunks_exact(vocab_size).take(max_tokens) {
        let token = if temperature <= 0.0 {
            chunk
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(index, _)| index as u32)
                .unwrap_or(0)
        } else {
            softmax_sample(chunk, temperature, &mut rng)
        };
        if token == eos_token_id {
            break;
        }
        tokens.push(token);
    }
    tokens
}

fn softmax_sample(logits: &[f32], temperature: f32, rng: &mut fastrand::Rng) -> u32 {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let weights: Vec<f32> = logits
        .iter()
        .map(|&logit| ((logit - max) / temperature).exp())
        .collect();
    let total: f32 = weights.iter().sum();
    let mut target = rng.f32() * total;
    for (index, weight) in weights.iter().enumerate() {
        target -= weight;
        if target <= 0.0 {
            return index as u32;
        }
    }
    (logits.len() - 1) as u32
}
