//! Scripted device adapter for integration tests.
//!
//! Records every backend call with start/finish timestamps so tests can
//! assert that device calls never overlap and that loads happen exactly once
//! per resident key.

#![allow(dead_code)]

use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use hailod_core::{DeviceAdapter, DeviceError, ModelType};
use serde_json::{json, Value};

/// One recorded backend invocation.
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub op: &'static str,
    pub model_path: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Shared call recorder; clone it before handing the adapter to the daemon.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<BackendCall>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|call| call.op == op).count()
    }

    fn record(&self, op: &'static str, model_path: &Path, started: Instant) {
        self.0.lock().unwrap().push(BackendCall {
            op,
            model_path: model_path.display().to_string(),
            started,
            finished: Instant::now(),
        });
    }
}

pub struct MockSession {
    model_type: ModelType,
    model_path: std::path::PathBuf,
}

/// Scripted adapter: canned per-type results, optional artificial latency,
/// optional failure injection.
pub struct MockAdapter {
    pub log: CallLog,
    infer_delay: Duration,
    fail_infer: Option<DeviceError>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            log: CallLog::default(),
            infer_delay: Duration::ZERO,
            fail_infer: None,
        }
    }

    /// Make every inference take at least `delay` of wall-clock time.
    pub fn with_infer_delay(mut self, delay: Duration) -> Self {
        self.infer_delay = delay;
        self
    }

    /// Fail the next inference with a backend error.
    pub fn with_failing_infer(mut self) -> Self {
        self.fail_infer = Some(DeviceError::Backend("injected inference failure".into()));
        self
    }
}

impl DeviceAdapter for MockAdapter {
    type Session = MockSession;

    fn device_id(&self) -> String {
        "hailo-mock".into()
    }

    fn load(
        &mut self,
        model_path: &Path,
        model_type: ModelType,
        _params: &Value,
    ) -> Result<MockSession, DeviceError> {
        let started = Instant::now();
        self.log.record("load", model_path, started);
        Ok(MockSession {
            model_type,
            model_path: model_path.to_path_buf(),
        })
    }

    fn infer(
        &mut self,
        session: &mut MockSession,
        input_data: &Value,
    ) -> Result<Value, DeviceError> {
        let started = Instant::now();
        if !self.infer_delay.is_zero() {
            std::thread::sleep(self.infer_delay);
        }
        let result = if let Some(err) = self.fail_infer.take() {
            Err(err)
        } else {
            Ok(match session.model_type {
                ModelType::Clip => json!({ "embedding": vec![0.044194174f32; 512] }),
                // Echo the input tensor so tests can verify byte round-trips
                // across framing and base64.
                ModelType::Depth => input_data.get("image").cloned().unwrap_or(Value::Null),
                ModelType::Vlm | ModelType::VlmChat => json!("a red apple on a table"),
                ModelType::Whisper => json!({
                    "segments": [{ "start": 0.0, "end": 1.0, "text": "hello" }],
                    "text": "hello",
                    "language": "en",
                }),
                _ => json!({ "ok": true }),
            })
        };
        self.log.record("infer", &session.model_path, started);
        result
    }

    fn release(&mut self, session: MockSession) {
        let started = Instant::now();
        self.log.record("release", &session.model_path, started);
    }

    fn reopen(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}
