//! Child processes for out-of-process agents.
//!
//! On Linux an agent runs inside its own cgroup v2 with a memory and a process-count limit,
//! and killing it kills everything it spawned. Elsewhere, or when cgroups are unavailable and
//! uncontained agents are allowed, it is a plain child process.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(not(target_os = "linux"))]
mod stub;

#[cfg(not(target_os = "linux"))]
pub use stub::*;

use std::{
    path::Path,
    process::{Child, Stdio},
    time::Duration,
};

use anyhow::Context;

/// Maximum number of processes an agent may run at once.
pub const MAX_AGENT_PIDS: i64 = 64;

/// How long `Drop` waits for a process to go away.
pub(crate) const DROP_CLEANUP: Duration = Duration::from_millis(100);

fn create_process(program: &Path, args: &[String], allow_stderr: bool) -> anyhow::Result<Child> {
    let mut cmd = std::process::Command::new(program);
    cmd.args(args).stdin(Stdio::null()).stdout(Stdio::null());
    if !allow_stderr {
        cmd.stderr(Stdio::null());
    }
    cmd.spawn()
        .with_context(|| format!("command '{}' not found", program.display()))
}
