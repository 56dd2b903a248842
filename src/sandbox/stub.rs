use std::{path::Path, process::Child, time::Duration};

use anyhow::{bail, Context};
use tracing::warn;

use super::{create_process, DROP_CLEANUP};

/// A child process. Containment is only available on Linux.
#[derive(Debug)]
pub struct LimitedProcess {
    child: Child,
    cleaned_up: bool,
}

impl LimitedProcess {
    /// Always fails: cgroups only exist on Linux.
    pub fn launch(
        _program: &Path,
        _args: &[String],
        _max_memory: i64,
        _max_pids: i64,
        _allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        bail!("cgroups only available on linux")
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
            cleaned_up: false,
        })
    }

    /// Process id of the agent.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Kill the process and reap it.
    pub fn try_kill(&mut self, _max_duration: Duration) -> anyhow::Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.child.kill().context("could not kill process")?;
        self.child.wait().context("could not reap process")?;
        self.cleaned_up = true;
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
