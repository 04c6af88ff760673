//! Resource sandbox (cgroups v2) and syscall interceptor (seccomp-bpf),
//! both degrading to a logged policy-based mode rather than failing the
//! caller when the kernel mechanism is unavailable.

mod resource;
mod syscall;

pub use resource::{ResourceSandbox, SandboxMode};
pub use syscall::{AgentProfile, SandboxError, SyscallInterceptor};
