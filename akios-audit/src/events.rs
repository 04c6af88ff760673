//! `AuditEvent`: immutable record with a SHA-256 hash over its own
//! canonically-sorted-key JSON serialization, ported from
//! `akios.core.audit.events.AuditEvent`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepResult {
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub workflow_id: String,
    pub step: u32,
    pub agent: String,
    pub action: String,
    pub result: StepResult,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

/// Subset of `AuditEvent` whose canonical JSON is hashed; `hash` itself is
/// excluded, matching the original's `_calculate_hash` field set.
#[derive(Serialize)]
struct Hashable<'a> {
    workflow_id: &'a str,
    step: u32,
    agent: &'a str,
    action: &'a str,
    result: StepResult,
    metadata: &'a BTreeMap<String, serde_json::Value>,
    timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        workflow_id: impl Into<String>,
        step: u32,
        agent: impl Into<String>,
        action: impl Into<String>,
        result: StepResult,
        metadata: BTreeMap<String, serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let workflow_id = workflow_id.into();
        let agent = agent.into();
        let action = action.into();
        let hash = Self::calculate_hash(&workflow_id, step, &agent, &action, result, &metadata, timestamp);
        Self { workflow_id, step, agent, action, result, metadata, timestamp, hash }
    }

    #[allow(clippy::too_many_arguments)]
    fn calculate_hash(
        workflow_id: &str,
        step: u32,
        agent: &str,
        action: &str,
        result: StepResult,
        metadata: &BTreeMap<String, serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> String {
        let hashable = Hashable { workflow_id, step, agent, action, result, metadata, timestamp };
        // BTreeMap-backed fields plus serde_json's default key ordering on
        // the struct itself give a deterministic, canonically-sorted
        // serialization to hash over.
        let serialized = serde_json::to_vec(&hashable).expect("AuditEvent fields are always serializable");
        hex::encode(Sha256::digest(&serialized))
    }

    /// Recomputes the hash from the event's current fields and compares
    /// against the stored one; used by integrity verification to catch a
    /// corrupted or hand-edited ledger line.
    pub fn hash_matches(&self) -> bool {
        let expected = Self::calculate_hash(
            &self.workflow_id,
            self.step,
            &self.agent,
            &self.action,
            self.result,
            &self.metadata,
            self.timestamp,
        );
        expected == self.hash
    }

    pub fn to_jsonl_line(&self) -> String {
        serde_json::to_string(self).expect("AuditEvent is always serializable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_for_identical_fields() {
        let ts = Utc::now();
        let a = AuditEvent::new("wf_1", 0, "llm", "call", StepResult::Success, BTreeMap::new(), ts);
        let b = AuditEvent::new("wf_1", 0, "llm", "call", StepResult::Success, BTreeMap::new(), ts);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn hash_matches_detects_tampering() {
        let ts = Utc::now();
        let mut event = AuditEvent::new("wf_1", 0, "llm", "call", StepResult::Success, BTreeMap::new(), ts);
        assert!(event.hash_matches());
        event.action = "tampered".to_string();
        assert!(!event.hash_matches());
    }
}
