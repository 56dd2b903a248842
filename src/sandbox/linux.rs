use std::{
    path::Path,
    process::Child,
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use cgroups_rs::{cgroup_builder::CgroupBuilder, Cgroup, CgroupPid, MaxValue};
use tracing::{trace, warn};

use super::{create_process, DROP_CLEANUP};

fn current_user_id() -> anyhow::Result<String> {
    let output = std::process::Command::new("id")
        .arg("-u")
        .output()
        .context("Could not launch 'id -u'")?;
    let id = std::str::from_utf8(&output.stdout).context("id is not a valid string")?;
    Ok(id.trim().to_string())
}

fn cgroup_path(user_id: &str, group_name: &str) -> String {
    format!("user.slice/user-{user_id}.slice/user@{user_id}.service/{group_name}")
}

/// Create a cgroup at `path`.
///
/// * `max_memory` - Maximum memory in bytes. Non-positive means no restriction.
/// * `max_pids` - Maximum number of processes at any time. Non-positive means no restriction.
fn create_cgroup(path: &str, max_memory: i64, max_pids: i64) -> anyhow::Result<Cgroup> {
    let mut builder = CgroupBuilder::new(path);
    if max_memory > 0 {
        builder = builder.memory().memory_hard_limit(max_memory).done();
    }
    if max_pids > 0 {
        builder = builder
            .pid()
            .maximum_number_of_processes(MaxValue::Value(max_pids))
            .done();
    }
    builder
        .build(cgroups_rs::hierarchies::auto())
        .context("could not create cgroup")
}

fn wait_for_cleanup(cgroup: &Cgroup, pid: u64, max_duration: Duration) -> anyhow::Result<()> {
    let deadline = Instant::now() + max_duration;
    while cgroup.tasks().iter().any(|task| task.pid == pid) {
        if Instant::now() > deadline {
            return Err(anyhow!("process {pid} still alive after {max_duration:?}"));
        }
        std::thread::sleep(Duration::from_millis(10).min(max_duration / 10));
    }
    Ok(())
}

/// A child process, optionally confined to its own cgroup.
///
/// The process, and its cgroup if any, are cleaned up on drop.
#[derive(Debug)]
pub struct LimitedProcess {
    child: Child,
    cgroup: Option<Cgroup>,
    cleaned_up: bool,
}

impl LimitedProcess {
    /// Start `program` inside a fresh cgroup limited to `max_memory` bytes and `max_pids`
    /// processes.
    ///
    /// # Errors
    /// cgroups v2 is unavailable or not delegated to this user, or `program` cannot start.
    pub fn launch(
        program: &Path,
        args: &[String],
        max_memory: i64,
        max_pids: i64,
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        let user_id = current_user_id().context("could not get user id")?;
        let group_name = format!(
            "RPSLS_AGENT_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = cgroup_path(&user_id, &group_name);
        let group = create_cgroup(&path, max_memory, max_pids)?;

        let mut child = match create_process(program, args, allow_stderr) {
            Ok(child) => child,
            Err(e) => {
                let _ = group.delete();
                return Err(e.context("could not create process in cgroup"));
            }
        };
        if let Err(e) = group.add_task_by_tgid(CgroupPid {
            pid: child.id() as u64,
        }) {
            let _ = child.kill();
            let _ = child.wait();
            let _ = group.delete();
            return Err(e).context("could not add process to cgroup");
        }
        trace!(pid = child.id(), %path, "agent confined");

        Ok(LimitedProcess {
            child,
            cgroup: Some(group),
            cleaned_up: false,
        })
    }

    /// Start `program` as a plain child process.
    pub fn launch_without_container(
        program: &Path,
        args: &[String],
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        let child =
            create_process(program, args, allow_stderr).context("could not create process")?;
        Ok(LimitedProcess {
            child,
            cgroup: None,
            cleaned_up: false,
        })
    }

    /// Process id of the agent.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Kill the process, and everything in its cgroup, waiting up to `max_duration` for them
    /// to disappear.
    pub fn try_kill(&mut self, max_duration: Duration) -> anyhow::Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        match &self.cgroup {
            Some(cgroup) => {
                if let Err(e) = cgroup.kill() {
                    warn!("could not kill cgroup, killing the agent alone: {e}");
                    self.child.kill().context("could not kill process")?;
                }
                wait_for_cleanup(cgroup, self.child.id() as u64, max_duration)
                    .context("process cleanup timed out")?;
                let _ = self.child.wait();
                self.cleaned_up = true;
                if let Err(e) = cgroup.delete() {
                    warn!("Failed to remove cgroup. If this happens a lot, it may slow down the computer. {e}");
                }
            }
            None => {
                self.child.kill().context("could not kill process")?;
                self.child.wait().context("could not reap process")?;
                self.cleaned_up = true;
            }
        }
        Ok(())
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        if let Err(e) = self.try_kill(DROP_CLEANUP) {
            warn!("could not kill agent process {}: {e:#}", self.child.id());
        }
    }
}
