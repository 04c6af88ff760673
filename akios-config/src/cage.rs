//! Cage controller: posture state machine persisted as a flat `KEY=VALUE`
//! file, plus the secure-wipe procedure for `cage down`.
//!
//! The five recognized keys are exactly enumerated below; a generic `.env`
//! parser (e.g. `dotenvy`) would accept arbitrary keys the cage state
//! doesn't model, so this is a small hand-rolled parser instead. Provider
//! API key lines are passed through verbatim on read-modify-write so
//! `cage up`/`cage down` never clobbers secrets.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;
use thiserror::Error;

const KEYS: &[&str] = &[
    "AKIOS_PII_REDACTION_ENABLED",
    "AKIOS_NETWORK_ACCESS_ALLOWED",
    "AKIOS_SANDBOX_ENABLED",
    "AKIOS_AUDIT_ENABLED",
    "AKIOS_COST_KILL_ENABLED",
];

#[derive(Debug, Error)]
pub enum CageError {
    #[error("cage io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CagePosture {
    Active,
    Relaxed,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CageState {
    pub pii_redaction: bool,
    pub network_locked: bool,
    pub sandbox_enabled: bool,
    pub audit_enabled: bool,
    pub cost_kill_enabled: bool,
}

impl CageState {
    pub fn active() -> Self {
        Self { pii_redaction: true, network_locked: true, sandbox_enabled: true, audit_enabled: true, cost_kill_enabled: true }
    }

    pub fn relaxed() -> Self {
        Self { pii_redaction: false, network_locked: false, sandbox_enabled: false, audit_enabled: true, cost_kill_enabled: false }
    }

    pub fn posture(&self) -> CagePosture {
        if *self == Self::active() {
            CagePosture::Active
        } else if *self == Self::relaxed() {
            CagePosture::Relaxed
        } else {
            CagePosture::Custom
        }
    }
}

#[derive(Debug, Default)]
pub struct WipeReport {
    pub audit_files: u64,
    pub output_files: u64,
    pub input_files: u64,
    pub total_bytes: u64,
}

pub struct CageController {
    env_file: PathBuf,
    data_root: PathBuf,
}

impl CageController {
    pub fn new(env_file: impl Into<PathBuf>, data_root: impl Into<PathBuf>) -> Self {
        Self { env_file: env_file.into(), data_root: data_root.into() }
    }

    pub fn up(&self, no_pii: bool, no_audit: bool, no_budget: bool) -> Result<CageState, CageError> {
        let mut state = CageState::active();
        if no_pii {
            state.pii_redaction = false;
        }
        if no_audit {
            state.audit_enabled = false;
        }
        if no_budget {
            state.cost_kill_enabled = false;
        }
        self.persist(&state)?;
        Ok(state)
    }

    pub fn down(&self, keep_data: bool, passes: u32, fast: bool) -> Result<(CageState, Option<WipeReport>), CageError> {
        let state = CageState::relaxed();
        self.persist(&state)?;

        if keep_data {
            return Ok((state, None));
        }

        let report = self.secure_wipe(passes.max(1), fast)?;
        Ok((state, Some(report)))
    }

    pub fn status(&self) -> Result<CageState, CageError> {
        self.load()
    }

    fn persist(&self, state: &CageState) -> Result<(), CageError> {
        let passthrough = self.read_passthrough_lines()?;
        let mut out = String::new();
        out.push_str(&format!("AKIOS_PII_REDACTION_ENABLED={}\n", state.pii_redaction));
        out.push_str(&format!("AKIOS_NETWORK_ACCESS_ALLOWED={}\n", !state.network_locked));
        out.push_str(&format!("AKIOS_SANDBOX_ENABLED={}\n", state.sandbox_enabled));
        out.push_str(&format!("AKIOS_AUDIT_ENABLED={}\n", state.audit_enabled));
        out.push_str(&format!("AKIOS_COST_KILL_ENABLED={}\n", state.cost_kill_enabled));
        for line in passthrough {
            out.push_str(&line);
            out.push('\n');
        }
        fs::write(&self.env_file, out)?;
        Ok(())
    }

    fn read_passthrough_lines(&self) -> Result<Vec<String>, CageError> {
        if !self.env_file.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.env_file)?;
        Ok(raw
            .lines()
            .filter(|line| {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    return false;
                }
                let Some((key, _)) = trimmed.split_once('=') else {
                    return true;
                };
                !KEYS.contains(&key)
            })
            .map(String::from)
            .collect())
    }

    fn load(&self) -> Result<CageState, CageError> {
        if !self.env_file.exists() {
            return Ok(CageState::relaxed());
        }
        let raw = fs::read_to_string(&self.env_file)?;
        let mut state = CageState::relaxed();
        for line in raw.lines() {
            let Some((key, value)) = line.trim().split_once('=') else { continue };
            let flag = value.trim().eq_ignore_ascii_case("true");
            match key {
                "AKIOS_PII_REDACTION_ENABLED" => state.pii_redaction = flag,
                "AKIOS_NETWORK_ACCESS_ALLOWED" => state.network_locked = !flag,
                "AKIOS_SANDBOX_ENABLED" => state.sandbox_enabled = flag,
                "AKIOS_AUDIT_ENABLED" => state.audit_enabled = flag,
                "AKIOS_COST_KILL_ENABLED" => state.cost_kill_enabled = flag,
                _ => {}
            }
        }
        Ok(state)
    }

    /// Overwrites every file under `audit/`, `data/output/`, `data/input/`
    /// with random bytes then zeros (`passes` times, `fsync`ed after each
    /// pass) before unlinking, then recreates the empty directories.
    /// `fast` skips the overwrite passes and only unlinks.
    fn secure_wipe(&self, passes: u32, fast: bool) -> Result<WipeReport, CageError> {
        let mut report = WipeReport::default();
        let categories: [(&str, &mut u64); 3] = [
            ("audit", &mut report.audit_files),
            ("data/output", &mut report.output_files),
            ("data/input", &mut report.input_files),
        ];

        let mut total_bytes = 0u64;
        for (category, counter) in categories {
            let dir = self.data_root.join(category);
            if !dir.exists() {
                continue;
            }
            for entry in walk_files(&dir)? {
                let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if !fast {
                    wipe_file_contents(entry.path(), len, passes)?;
                }
                fs::remove_file(entry.path())?;
                *counter += 1;
                total_bytes += len;
            }
            fs::remove_dir_all(&dir).ok();
            fs::create_dir_all(&dir)?;
        }
        report.total_bytes = total_bytes;
        Ok(report)
    }
}

fn walk_files(dir: &Path) -> Result<Vec<fs::DirEntry>, CageError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry);
        }
    }
    Ok(files)
}

fn wipe_file_contents(path: &Path, len: u64, passes: u32) -> Result<(), CageError> {
    if len == 0 {
        return Ok(());
    }
    let mut file = fs::OpenOptions::new().write(true).open(path)?;
    let mut rng = rand::thread_rng();
    for _ in 0..passes {
        let mut buf = vec![0u8; len as usize];
        rng.fill_bytes(&mut buf);
        file.set_len(0)?;
        file.write_all(&buf)?;
        file.sync_all()?;

        let zeros = vec![0u8; len as usize];
        file.set_len(0)?;
        file.write_all(&zeros)?;
        file.sync_all()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_sets_active_posture() {
        let dir = tempfile::tempdir().unwrap();
        let controller = CageController::new(dir.path().join(".env"), dir.path().to_path_buf());
        let state = controller.up(false, false, false).unwrap();
        assert_eq!(state.posture(), CagePosture::Active);
        assert_eq!(controller.status().unwrap().posture(), CagePosture::Active);
    }

    #[test]
    fn down_wipes_output_data() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("data/output");
        fs::create_dir_all(&output_dir).unwrap();
        fs::write(output_dir.join("result.txt"), b"secret content").unwrap();

        let controller = CageController::new(dir.path().join(".env"), dir.path().to_path_buf());
        controller.up(false, false, false).unwrap();
        let (state, report) = controller.down(false, 1, true).unwrap();

        assert_eq!(state.posture(), CagePosture::Relaxed);
        let report = report.unwrap();
        assert_eq!(report.output_files, 1);
        assert!(!output_dir.join("result.txt").exists());
    }

    #[test]
    fn down_with_keep_data_preserves_files() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("data/output");
        fs::create_dir_all(&output_dir).unwrap();
        fs::write(output_dir.join("result.txt"), b"keep me").unwrap();

        let controller = CageController::new(dir.path().join(".env"), dir.path().to_path_buf());
        let (_, report) = controller.down(true, 1, true).unwrap();
        assert!(report.is_none());
        assert!(output_dir.join("result.txt").exists());
    }

    #[test]
    fn passthrough_preserves_provider_keys() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "OPENAI_API_KEY=sk-test-123\n").unwrap();

        let controller = CageController::new(env_path.clone(), dir.path().to_path_buf());
        controller.up(false, false, false).unwrap();

        let contents = fs::read_to_string(&env_path).unwrap();
        assert!(contents.contains("OPENAI_API_KEY=sk-test-123"));
    }
}
