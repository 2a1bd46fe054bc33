//! In-memory table of resident model sessions.
//!
//! Keyed by `(model_path, model_type)`, owned and mutated only by the
//! executor. Status paths never see live sessions; they read [`LoadedModel`]
//! snapshots published over a watch channel after every mutation.

use std::{
    collections::HashMap,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use derivative::Derivative;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::ModelType;

/// Resident-session count above which the daemon starts warning. There is no
/// eviction; operators budget device memory themselves.
pub const RESIDENT_WARN_THRESHOLD: usize = 8;

/// Unique identity of a loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub model_path: PathBuf,
    pub model_type: ModelType,
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.model_path.display(), self.model_type)
    }
}

/// One loaded model with its backend runtime state.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ModelSession<S> {
    pub key: ModelKey,
    /// Unix seconds at load time.
    pub loaded_at: u64,
    /// Unix seconds of the most recent inference.
    pub last_used: u64,
    /// Opaque backend configuration captured at load time.
    pub model_params: Value,
    #[derivative(Debug = "ignore")]
    pub session: S,
}

impl<S> ModelSession<S> {
    pub fn new(key: ModelKey, model_params: Value, session: S) -> Self {
        let now = now_unix();
        Self {
            key,
            loaded_at: now,
            last_used: now,
            model_params,
            session,
        }
    }
}

/// Snapshot entry for `status`/`device_status` payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedModel {
    pub model_type: String,
    pub model_path: String,
    pub loaded_at: u64,
    pub last_used: u64,
}

/// The session table. At most one entry per key at any moment.
pub struct Registry<S> {
    sessions: HashMap<ModelKey, ModelSession<S>>,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<S> Registry<S> {
    pub fn contains(&self, key: &ModelKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn get_mut(&mut self, key: &ModelKey) -> Option<&mut ModelSession<S>> {
        self.sessions.get_mut(key)
    }

    /// Insert a freshly loaded session. Callers check residency first; the
    /// load path treats an already-present key as success without reloading.
    pub fn insert(&mut self, session: ModelSession<S>) {
        debug_assert!(!self.sessions.contains_key(&session.key));
        self.sessions.insert(session.key.clone(), session);
        if self.sessions.len() > RESIDENT_WARN_THRESHOLD {
            tracing::warn!(
                event = "registry_pressure",
                resident = self.sessions.len(),
                "Many models resident; no eviction is performed"
            );
        }
    }

    /// Remove a session, handing it back so the caller can release backend
    /// resources before dropping it.
    pub fn remove(&mut self, key: &ModelKey) -> Option<ModelSession<S>> {
        self.sessions.remove(key)
    }

    /// Drain every session, oldest first, for shutdown release.
    pub fn drain(&mut self) -> Vec<ModelSession<S>> {
        self.sessions
            .drain()
            .map(|(_, session)| session)
            .sorted_by_key(|session| session.loaded_at)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Copy-out of the table for status payloads, ordered by load time.
    pub fn snapshot(&self) -> Vec<LoadedModel> {
        self.sessions
            .values()
            .sorted_by_key(|session| (session.loaded_at, session.key.model_path.clone()))
            .map(|session| LoadedModel {
                model_type: session.key.model_type.name().into(),
                model_path: session.key.model_path.display().to_string(),
                loaded_at: session.loaded_at,
                last_used: session.last_used,
            })
            .collect()
    }
}

/// Current time as unix seconds.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn key(path: &str, model_type: ModelType) -> ModelKey {
        ModelKey {
            model_path: PathBuf::from(path),
            model_type,
        }
    }

    #[test]
    fn one_entry_per_key() {
        let mut registry = Registry::<u32>::default();
        registry.insert(ModelSession::new(key("/m/a.hef", ModelType::Clip), Value::Null, 1));
        assert!(registry.contains(&key("/m/a.hef", ModelType::Clip)));
        // Same path under a different type is a distinct key.
        registry.insert(ModelSession::new(key("/m/a.hef", ModelType::Depth), Value::Null, 2));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_returns_the_session() {
        let mut registry = Registry::<u32>::default();
        registry.insert(ModelSession::new(key("/m/a.hef", ModelType::Clip), Value::Null, 7));
        let removed = registry.remove(&key("/m/a.hef", ModelType::Clip)).unwrap();
        assert_eq!(removed.session, 7);
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_reports_wire_fields() {
        let mut registry = Registry::<u32>::default();
        registry.insert(ModelSession::new(key("/m/clip_img.hef", ModelType::Clip), Value::Null, 0));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].model_type, "clip");
        assert_eq!(snapshot[0].model_path, "/m/clip_img.hef");
        assert!(snapshot[0].loaded_at > 0);
        assert_eq!(snapshot[0].loaded_at, snapshot[0].last_used);
    }
}
