//! Partial record: merge-on-write snapshot of a job's pipeline progress

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Persisted form `{ "flags": {phase: bool}, "last_phase": str, "data": {...} }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialRecord {
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub last_phase: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl PartialRecord {
    /// Fold one completed phase in: flag it, shallow-merge `payload`
    /// (key-level overwrite), and make it the last phase.
    ///
    /// A non-object payload only sets the flag and last phase.
    pub fn merge_phase(&mut self, phase: &str, payload: &Value) {
        self.flags.insert(phase.to_string(), true);
        if let Value::Object(fields) = payload {
            for (key, value) in fields {
                self.data.insert(key.clone(), value.clone());
            }
        }
        self.last_phase = phase.to_string();
    }

    pub fn has_phase(&self, phase: &str) -> bool {
        self.flags.get(phase).copied().unwrap_or(false)
    }
}
