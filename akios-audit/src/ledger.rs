//! Append-only audit ledger: buffered JSONL writes, a resident in-memory
//! window bounded by `memory_cap`, size-triggered rotation into
//! `archive/ledger_<ts>.jsonl` with a `archive/chain.jsonl` linkage record,
//! and full-reload integrity verification.
//!
//! Ported from `akios.core.audit.ledger.AuditLedger`. The two-lock split
//! (`state` before `buffer`, never the reverse) and the rotation-inside-
//! the-state-lock ordering fix a TOCTOU race present in an earlier version
//! of the original: a rotation decided outside the state lock could race
//! an in-flight append and silently drop it.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{AuditEvent, StepResult};
use crate::merkle::MerkleTree;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct LedgerConfig {
    pub buffer_size: usize,
    pub rotation_threshold: u64,
    pub memory_cap: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { buffer_size: 100, rotation_threshold: 50_000, memory_cap: 1_000 }
    }
}

#[derive(Debug, Clone)]
struct LedgerPaths {
    ledger_file: PathBuf,
    counter_file: PathBuf,
    root_file: PathBuf,
    archive_dir: PathBuf,
    chain_file: PathBuf,
}

impl LedgerPaths {
    fn new(root: &Path) -> Self {
        let archive_dir = root.join("archive");
        Self {
            ledger_file: root.join("audit.jsonl"),
            counter_file: root.join(".event_count"),
            root_file: root.join("merkle_root.hash"),
            chain_file: archive_dir.join("chain.jsonl"),
            archive_dir,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ChainLink {
    segment: String,
    merkle_root: String,
    event_count: u64,
    rotated_at: chrono::DateTime<Utc>,
}

struct LedgerState {
    events: VecDeque<AuditEvent>,
    tree: MerkleTree,
    counter: u64,
}

pub struct NewEvent {
    pub workflow_id: String,
    pub step: u32,
    pub agent: String,
    pub action: String,
    pub result: StepResult,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

pub struct AuditLedger {
    state: Mutex<LedgerState>,
    buffer: Mutex<Vec<String>>,
    paths: LedgerPaths,
    config: LedgerConfig,
}

impl AuditLedger {
    pub fn open(root: impl AsRef<Path>, config: LedgerConfig) -> Result<Self, LedgerError> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let paths = LedgerPaths::new(root);
        fs::create_dir_all(&paths.archive_dir)?;

        let counter = Self::read_counter(&paths.counter_file)?;
        let resident = Self::load_resident_window(&paths.ledger_file, config.memory_cap)?;
        let mut tree = MerkleTree::new();
        for event in &resident {
            tree.append(&event.to_jsonl_line());
        }

        Ok(Self {
            state: Mutex::new(LedgerState { events: resident, tree, counter }),
            buffer: Mutex::new(Vec::new()),
            paths,
            config,
        })
    }

    fn read_counter(path: &Path) -> Result<u64, LedgerError> {
        match fs::read_to_string(path) {
            Ok(s) => Ok(s.trim().parse().unwrap_or(0)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn load_resident_window(path: &Path, cap: usize) -> Result<VecDeque<AuditEvent>, LedgerError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(VecDeque::new()),
            Err(e) => return Err(e.into()),
        };
        let mut all: VecDeque<AuditEvent> = VecDeque::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<AuditEvent>(&line) {
                all.push_back(event);
                if all.len() > cap {
                    all.pop_front();
                }
            }
        }
        Ok(all)
    }

    /// Appends a new event. Checks for rotation *inside* the state lock so
    /// a concurrent append can never race a rotation decision.
    pub fn append(&self, new_event: NewEvent) -> Result<AuditEvent, LedgerError> {
        let mut state = self.state.lock();

        if state.counter >= self.config.rotation_threshold {
            self.rotate_locked(&mut state)?;
        }

        let event = AuditEvent::new(
            new_event.workflow_id,
            new_event.step,
            new_event.agent,
            new_event.action,
            new_event.result,
            new_event.metadata,
            Utc::now(),
        );

        state.counter += 1;
        let line = event.to_jsonl_line();
        state.tree.append(&line);
        state.events.push_back(event.clone());
        if state.events.len() > self.config.memory_cap {
            state.events.pop_front();
            let mut rebuilt = MerkleTree::new();
            for e in &state.events {
                rebuilt.append(&e.to_jsonl_line());
            }
            state.tree = rebuilt;
        }
        drop(state);

        let mut buffer = self.buffer.lock();
        buffer.push(line);
        let should_flush = buffer.len() >= self.config.buffer_size;
        drop(buffer);
        if should_flush {
            self.flush()?;
        }

        Ok(event)
    }

    pub fn flush(&self) -> Result<(), LedgerError> {
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.paths.ledger_file)?;
        for line in buffer.iter() {
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
        buffer.clear();
        drop(buffer);

        let state = self.state.lock();
        fs::write(&self.paths.counter_file, state.counter.to_string())?;
        if let Some(root) = state.tree.root() {
            fs::write(&self.paths.root_file, root)?;
        }
        Ok(())
    }

    /// Flushes pending writes, archives the active file, appends a chain
    /// link, and resets in-memory state. Caller must already hold `state`.
    fn rotate_locked(&self, state: &mut LedgerState) -> Result<(), LedgerError> {
        {
            let mut buffer = self.buffer.lock();
            if !buffer.is_empty() {
                let mut file = OpenOptions::new().create(true).append(true).open(&self.paths.ledger_file)?;
                for line in buffer.iter() {
                    writeln!(file, "{line}")?;
                }
                file.sync_all()?;
                buffer.clear();
            }
        }

        let event_count = state.counter;
        let rotated_at = Utc::now();
        let archive_name = format!("ledger_{}.jsonl", rotated_at.format("%Y%m%d_%H%M%S_%f"));
        let archive_path = self.paths.archive_dir.join(&archive_name);

        if self.paths.ledger_file.exists() {
            fs::rename(&self.paths.ledger_file, &archive_path)?;
        }

        // `state.tree` only covers the memory-capped resident window, not the
        // full archived segment (up to `rotation_threshold` events). Rebuild
        // from the archived file so the chain link's root matches an
        // independent re-hash of the whole segment.
        let root = Self::root_of_segment(&archive_path)?.unwrap_or_default();

        let link = ChainLink { segment: archive_name, merkle_root: root, event_count, rotated_at };
        let mut chain_file = OpenOptions::new().create(true).append(true).open(&self.paths.chain_file)?;
        writeln!(chain_file, "{}", serde_json::to_string(&link)?)?;
        chain_file.sync_all()?;

        File::create(&self.paths.ledger_file)?;

        state.events.clear();
        state.tree = MerkleTree::new();
        state.counter = 0;
        fs::write(&self.paths.counter_file, "0")?;
        let _ = fs::remove_file(&self.paths.root_file);

        Ok(())
    }

    /// Rebuilds a `MerkleTree` from an archived segment file and returns its
    /// root. `None` if the segment doesn't exist (nothing was archived).
    fn root_of_segment(path: &Path) -> Result<Option<String>, LedgerError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut tree = MerkleTree::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            tree.append(&line);
        }
        Ok(tree.root())
    }

    /// Reloads the *entire* active segment from disk (not just the
    /// resident window) and rebuilds a fresh tree to compare against the
    /// persisted root. A single corrupted line still fails the check.
    pub fn verify_integrity(&self) -> Result<bool, LedgerError> {
        self.flush()?;

        let recorded_root = match fs::read_to_string(&self.paths.root_file) {
            Ok(s) => s.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        let file = File::open(&self.paths.ledger_file)?;
        let mut tree = MerkleTree::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => {
                    if !event.hash_matches() {
                        tracing::warn!(workflow_id = %event.workflow_id, step = event.step, "audit event hash mismatch");
                    }
                    tree.append(&line);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable audit ledger line");
                    return Ok(false);
                }
            }
        }

        Ok(tree.root().as_deref() == Some(recorded_root.as_str()))
    }
}

impl Drop for AuditLedger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(error = %e, "failed to flush audit ledger on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn event(n: u32) -> NewEvent {
        NewEvent {
            workflow_id: "wf_test".into(),
            step: n,
            agent: "llm".into(),
            action: "call".into(),
            result: StepResult::Success,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn append_and_verify_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AuditLedger::open(dir.path(), LedgerConfig::default()).unwrap();
        for i in 0..10 {
            ledger.append(event(i)).unwrap();
        }
        assert!(ledger.verify_integrity().unwrap());
    }

    #[test]
    fn rotation_archives_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig { buffer_size: 1, rotation_threshold: 5, memory_cap: 100 };
        let ledger = AuditLedger::open(dir.path(), config).unwrap();
        for i in 0..12 {
            ledger.append(event(i)).unwrap();
        }
        ledger.flush().unwrap();
        let archive_dir = dir.path().join("archive");
        let entries: Vec<_> = fs::read_dir(&archive_dir).unwrap().collect();
        assert!(entries.len() >= 2, "expected at least one archived segment plus chain.jsonl");
    }

    #[test]
    fn tampered_ledger_line_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AuditLedger::open(dir.path(), LedgerConfig::default()).unwrap();
        ledger.append(event(0)).unwrap();
        ledger.flush().unwrap();
        drop(ledger);

        let ledger_file = dir.path().join("audit.jsonl");
        let mut contents = fs::read_to_string(&ledger_file).unwrap();
        contents = contents.replace("\"action\":\"call\"", "\"action\":\"tampered\"");
        fs::write(&ledger_file, contents).unwrap();

        let reopened = AuditLedger::open(dir.path(), LedgerConfig::default()).unwrap();
        assert!(!reopened.verify_integrity().unwrap());
    }
}
