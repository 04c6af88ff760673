//! Syscall interceptor: a process-global, install-once seccomp-bpf filter.
//!
//! Grounded on `docklock::filter::SyscallFilter` (`seccompiler` +
//! `libc::SYS_*` name-to-number mapping, dummy-filter fallback on install
//! failure). AKIOS narrows the allowed set per agent kind rather than
//! docklock's single fixed profile.

use std::sync::OnceLock;

use thiserror::Error;

use crate::resource::SandboxMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentProfile {
    Llm,
    Filesystem,
    Http,
    ToolExecutor,
    Webhook,
    Database,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("seccomp filter install failed while cage is active: {0}")]
    FilterRequired(String),
    #[error("seccomp filter install failed: {0}")]
    InstallFailed(String),
}

static INSTALLED: OnceLock<()> = OnceLock::new();

pub struct SyscallInterceptor;

impl SyscallInterceptor {
    pub fn new() -> Self {
        Self
    }

    /// Installs the seccomp filter for `profile`. A second call for any
    /// profile within the process is a no-op (seccomp filters only ever
    /// narrow, and a process may only install one at a time in practice).
    ///
    /// When `cage_active` is true and the platform genuinely supports
    /// seccomp (Linux + root), an install failure is fatal rather than a
    /// silent degrade: it means libseccomp itself is broken, not merely
    /// unavailable.
    pub fn apply_policy(&self, profile: AgentProfile, cage_active: bool) -> Result<SandboxMode, SandboxError> {
        if INSTALLED.get().is_some() {
            return Ok(SandboxMode::KernelHard);
        }

        match imp::install(profile) {
            Ok(()) => {
                let _ = INSTALLED.set(());
                Ok(SandboxMode::KernelHard)
            }
            Err(e) => {
                if cage_active && imp::platform_supports_seccomp() {
                    Err(SandboxError::FilterRequired(e))
                } else {
                    tracing::warn!(error = %e, "seccomp filter unavailable; degrading to policy-based syscall sandbox");
                    Ok(SandboxMode::PolicyBased)
                }
            }
        }
    }
}

impl Default for SyscallInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::collections::BTreeMap;

    use seccompiler::{
        BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch,
    };

    use super::AgentProfile;

    const ESSENTIAL: &[&str] = &[
        "read", "write", "open", "openat", "close", "mmap", "munmap", "brk", "exit", "exit_group",
        "mprotect", "rt_sigaction", "rt_sigprocmask", "futex", "sched_yield", "poll", "epoll_wait",
        "epoll_ctl", "nanosleep", "clock_gettime", "getrandom", "fcntl", "lseek", "stat", "fstat",
        "ioctl",
    ];

    const NETWORK: &[&str] = &["socket", "connect", "sendto", "recvfrom"];
    const PROCESS: &[&str] = &["execve", "fork", "clone", "wait4"];

    const BLOCKLIST: &[&str] = &[
        "mount", "umount2", "ptrace", "kexec_load", "bpf", "setns", "keyctl", "reboot",
        "init_module", "delete_module", "pivot_root", "swapon", "swapoff",
    ];

    fn allowed_for(profile: AgentProfile) -> Vec<&'static str> {
        let mut set: Vec<&'static str> = ESSENTIAL.to_vec();
        match profile {
            AgentProfile::Llm | AgentProfile::Http | AgentProfile::Webhook => {
                set.extend_from_slice(NETWORK);
            }
            AgentProfile::ToolExecutor => {
                set.extend_from_slice(NETWORK);
                set.extend_from_slice(PROCESS);
            }
            AgentProfile::Filesystem | AgentProfile::Database => {}
        }
        set.retain(|s| !BLOCKLIST.contains(s));
        set
    }

    fn syscall_number(name: &str) -> Option<i64> {
        // Minimal x86_64 name -> number map for the fixed syscall sets
        // above; extend as new agent profiles need new syscalls.
        let n = match name {
            "read" => libc::SYS_read,
            "write" => libc::SYS_write,
            "open" => libc::SYS_open,
            "openat" => libc::SYS_openat,
            "close" => libc::SYS_close,
            "mmap" => libc::SYS_mmap,
            "munmap" => libc::SYS_munmap,
            "brk" => libc::SYS_brk,
            "exit" => libc::SYS_exit,
            "exit_group" => libc::SYS_exit_group,
            "mprotect" => libc::SYS_mprotect,
            "rt_sigaction" => libc::SYS_rt_sigaction,
            "rt_sigprocmask" => libc::SYS_rt_sigprocmask,
            "futex" => libc::SYS_futex,
            "sched_yield" => libc::SYS_sched_yield,
            "poll" => libc::SYS_poll,
            "epoll_wait" => libc::SYS_epoll_wait,
            "epoll_ctl" => libc::SYS_epoll_ctl,
            "nanosleep" => libc::SYS_nanosleep,
            "clock_gettime" => libc::SYS_clock_gettime,
            "getrandom" => libc::SYS_getrandom,
            "fcntl" => libc::SYS_fcntl,
            "lseek" => libc::SYS_lseek,
            "stat" => libc::SYS_stat,
            "fstat" => libc::SYS_fstat,
            "ioctl" => libc::SYS_ioctl,
            "socket" => libc::SYS_socket,
            "connect" => libc::SYS_connect,
            "sendto" => libc::SYS_sendto,
            "recvfrom" => libc::SYS_recvfrom,
            "execve" => libc::SYS_execve,
            "fork" => libc::SYS_fork,
            "clone" => libc::SYS_clone,
            "wait4" => libc::SYS_wait4,
            _ => return None,
        };
        Some(n)
    }

    pub fn platform_supports_seccomp() -> bool {
        nix_is_root() && std::path::Path::new("/proc/sys/kernel/seccomp").exists()
    }

    fn nix_is_root() -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    pub fn install(profile: AgentProfile) -> Result<(), String> {
        let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
        for name in allowed_for(profile) {
            if let Some(num) = syscall_number(name) {
                rules.insert(num, vec![]);
            }
        }

        let filter = SeccompFilter::new(
            rules,
            SeccompAction::Trap,
            SeccompAction::Allow,
            TargetArch::x86_64,
        )
        .map_err(|e| e.to_string())?;

        let program: BpfProgram = filter.try_into().map_err(|e: seccompiler::BackendError| e.to_string())?;
        seccompiler::apply_filter(&program).map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::AgentProfile;

    pub fn platform_supports_seccomp() -> bool {
        false
    }

    pub fn install(_profile: AgentProfile) -> Result<(), String> {
        Err("seccomp-bpf is only available on Linux".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degrades_when_not_root_or_not_linux() {
        let interceptor = SyscallInterceptor::new();
        let result = interceptor.apply_policy(AgentProfile::Filesystem, false);
        assert!(result.is_ok());
    }
}
