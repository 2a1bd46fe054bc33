//! OCR backend.
//!
//! Consumes `{image: Tensor}` and produces `{boxes: […], text: string}`.
//! Detection boxes come from the HEF's on-device NMS output (per-class record
//! format: a count followed by `count` × `[y_min, x_min, y_max, x_max, score]`
//! rows). Text comes from CTC greedy decode of the recognition head against
//! the charset supplied in `model_params`.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::device::DeviceError;
use crate::tensor::decode_tensor;

use super::bytes_to_f32;
use super::hailort::RawSession;

fn default_score_threshold() -> f32 {
    0.3
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OcrParams {
    /// Characters of the recognition alphabet, in class order. Class 0 is the
    /// CTC blank.
    charset: Option<String>,
    #[serde(default = "default_score_threshold")]
    score_threshold: f32,
}

pub struct OcrSession {
    raw: RawSession,
    charset: Vec<char>,
    score_threshold: f32,
}

impl OcrSession {
    pub fn load(raw: RawSession, params: &Value) -> Result<Self, DeviceError> {
        let params: OcrParams = serde_json::from_value(params.clone())
            .map_err(|err| DeviceError::InvalidInput(format!("invalid model_params: {err}")))?;
        Ok(Self {
            raw,
            charset: params.charset.unwrap_or_default().chars().collect(),
            score_threshold: params.score_threshold,
        })
    }

    pub fn infer(&mut self, input_data: &Value) -> Result<Value, DeviceError> {
        let tensor = decode_tensor("image", input_data.get("image"))?;
        let outputs = self.raw.infer(&[&tensor.data])?;

        // Single-output HEFs carry only the recognition head.
        let (boxes, text) = match outputs.len() {
            1 => (Vec::new(), self.decode_text(&outputs[0])),
            _ => (
                parse_nms_boxes(&bytes_to_f32(&outputs[0]), self.score_threshold),
                self.decode_text(&outputs[1]),
            ),
        };

        Ok(json!({ "boxes": boxes, "text": text }))
    }

    fn decode_text(&self, frame: &[u8]) -> String {
        if self.charset.is_empty() {
            return String::new();
        }
        ctc_greedy(&bytes_to_f32(frame), &self.charset)
    }
}

/// Parse the NMS-by-class output buffer into `[x_min, y_min, x_max, y_max,
/// score]` rows above the threshold.
fn parse_nms_boxes(values: &[f32], score_threshold: f32) -> Vec<Vec<f32>> {
    let mut boxes = Vec::new();
    let mut cursor = 0usize;
    while cursor < values.len() {
        let count = values[cursor] as usize;
        cursor += 1;
        for _ in 0..count {
            if cursor + 5 > values.len() {
                return boxes;
            }
            let [y_min, x_min, y_max, x_max, score] = [
                values[cursor],
                values[cursor + 1],
                values[cursor + 2],
                values[cursor + 3],
                values[cursor + 4],
            ];
            cursor += 5;
            if score >= score_threshold {
                boxes.push(vec![x_min, y_min, x_max, y_max, score]);
            }
        }
    }
    boxes
}

/// CTC greedy decode: per-timestep argmax over `charset.len() + 1` classes,
/// collapse repeats, drop blanks (class 0).
fn ctc_greedy(logits: &[f32], charset: &[char]) -> String {
    let classes = charset.len() + 1;
    if classes < 2 || logits.len() < classes {
        return String::new();
    }
    let mut text = String::new();
    let mut previous = 0usize;
    for step in logits.chunks_exact(classes) {
        let class = step
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(index, _)| index)
            .unwrap_or(0);
        if class != 0 && class != previous {
            text.push(charset[class - 1]);
        }
        previous = class;
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_boxes_respect_threshold() {
        // One class, two detections; the second is below threshold.
        let values = [2.0, 0.1, 0.2, 0.5, 0.6, 0.9, 0.3, 0.3, 0.4, 0.4, 0.1];
        let boxes = parse_nms_boxes(&values, 0.3);
        assert_eq!(boxes, vec![vec![0.2, 0.1, 0.6, 0.5, 0.9]]);
    }

    #[test]
    fn nms_parser_survives_truncated_buffers() {
        let values = [3.0, 0.1, 0.2];
        assert!(parse_nms_boxes(&values, 0.0).is_empty());
    }

    #[test]
    fn ctc_collapses_repeats_and_blanks() {
        // Charset "ab"; classes: blank, a, b. Timesteps: a a blank b.
        let logits = [
            0.0, 1.0, 0.0, //
            0.0, 1.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0,
        ];
        assert_eq!(ctc_greedy(&logits, &['a', 'b']), "ab");
    }

    #[test]
    fn ctc_emits_repeat_after_blank() {
        let logits = [
            0.0, 1.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0,
        ];
        assert_eq!(ctc_greedy(&logits, &['a', 'b']), "aa");
    }
}
