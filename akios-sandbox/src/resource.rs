//! Resource sandbox: cgroups v2 CPU/memory/FD quotas with a graceful,
//! logged degrade to policy-based mode when the kernel mechanism is
//! unavailable.
//!
//! Ported from `frankenterm-core::memory_budget`'s cgroups-v2-filesystem
//! approach: write `memory.max`/`cpu.max` under a per-process cgroup,
//! never fail the caller when the write doesn't succeed.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

const DEFAULT_CGROUP_BASE: &str = "/sys/fs/cgroup/akios";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("cgroup filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    KernelHard,
    PolicyBased,
}

pub struct ResourceSandbox {
    pub mode: SandboxMode,
    cgroup_path: Option<PathBuf>,
}

impl ResourceSandbox {
    /// Attempts to install kernel-enforced CPU/memory/FD limits for the
    /// current process via cgroups v2. Never returns an error: any
    /// unavailability degrades to `SandboxMode::PolicyBased` and the
    /// caller is expected to log/audit the returned mode.
    pub fn enforce_limits(cpu_fraction: f64, memory_bytes: u64, max_open_files: u64) -> Self {
        if !cgroups_v2_available(Path::new(DEFAULT_CGROUP_BASE)) {
            tracing::warn!("cgroups v2 unavailable; degrading to policy-based resource sandbox");
            return Self { mode: SandboxMode::PolicyBased, cgroup_path: None };
        }

        let pid = std::process::id();
        let cgroup_path = Path::new(DEFAULT_CGROUP_BASE).join(format!("step-{pid}"));

        match Self::install(&cgroup_path, cpu_fraction, memory_bytes, max_open_files) {
            Ok(()) => Self { mode: SandboxMode::KernelHard, cgroup_path: Some(cgroup_path) },
            Err(e) => {
                tracing::warn!(error = %e, "failed to install cgroup limits; degrading to policy-based resource sandbox");
                Self { mode: SandboxMode::PolicyBased, cgroup_path: None }
            }
        }
    }

    fn install(
        cgroup_path: &Path,
        cpu_fraction: f64,
        memory_bytes: u64,
        max_open_files: u64,
    ) -> Result<(), SandboxError> {
        fs::create_dir_all(cgroup_path)?;

        let quota = (cpu_fraction * 100_000.0).round() as u64;
        fs::write(cgroup_path.join("cpu.max"), format!("{quota} 100000"))?;
        fs::write(cgroup_path.join("memory.max"), memory_bytes.to_string())?;
        fs::write(cgroup_path.join("cgroup.procs"), std::process::id().to_string())?;

        raise_fd_limit(max_open_files)?;
        Ok(())
    }

    pub fn current_memory_bytes(&self) -> Option<u64> {
        let path = self.cgroup_path.as_ref()?.join("memory.current");
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    pub fn teardown(&self) {
        if let Some(path) = &self.cgroup_path {
            let _ = fs::remove_dir(path);
        }
    }
}

impl Drop for ResourceSandbox {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn cgroups_v2_available(base: &Path) -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }
    Path::new("/sys/fs/cgroup/cgroup.controllers").exists()
        && (base.exists() || base.parent().is_some_and(|p| p.exists()))
}

#[cfg(target_os = "linux")]
fn raise_fd_limit(max_open_files: u64) -> Result<(), SandboxError> {
    let limit = libc::rlimit { rlim_cur: max_open_files, rlim_max: max_open_files };
    // Best-effort: a non-root process may only lower its soft limit, and a
    // failure here should not abort an otherwise-successful cgroup install.
    unsafe {
        libc::setrlimit(libc::RLIMIT_NOFILE, &limit);
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn raise_fd_limit(_max_open_files: u64) -> Result<(), SandboxError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degrades_gracefully_without_cgroups() {
        let sandbox = ResourceSandbox::enforce_limits(0.5, 512 * 1024 * 1024, 256);
        // On a CI/sandboxed machine without cgroups v2 mounted at our base
        // path, this must still return a usable sandbox, not panic or error.
        assert!(matches!(sandbox.mode, SandboxMode::KernelHard | SandboxMode::PolicyBased));
    }
}
