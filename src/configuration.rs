//! Config for the league runner behaviors
//!
//! Nothing here changes what a match computes, see [`Rules`](crate::rules::Rules) for that.
//! This module only controls how matches are run: how strategies are isolated, how many
//! matches run at once, where diagnostics go, and how agent processes are started.
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Flags are case-insensitive: set the value to `"true"` to enable one.
//!
//! - `LEAGUE_VERBOSE`: print match results to stdout (default: `true`)
//! - `LEAGUE_LOG_DIR`: write a tracing log file in this directory (default: unset, no file)
//! - `LEAGUE_ISOLATION`: `inline` or `worker` (default: `worker`)
//! - `LEAGUE_WORKERS`: maximum number of concurrent matches (default: logical CPU count)
//! - `LEAGUE_ALLOW_UNCONTAINED`: run agent processes without a cgroup when cgroups are
//!   unavailable (default: `false`)
//! - `LEAGUE_DEBUG_AGENT_STDERR`: forward agent stderr for debugging (default: `false`)

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::guard::Isolation;

/// Configuration for league runner behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log_dir: Option<PathBuf>,
    pub(crate) isolation: Isolation,
    pub(crate) workers: usize,
    pub(crate) allow_uncontained: bool,
    pub(crate) debug_agent_stderr: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Match results are printed to stdout.
    /// - Logging to file is disabled.
    /// - Every strategy call runs on its own thread ([`Isolation::Worker`]).
    /// - As many matches run at once as there are logical CPUs.
    /// - Agent processes must run inside a cgroup.
    /// - Agent stderr output is disabled.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log_dir: None,
            isolation: Isolation::Worker,
            workers: num_cpus::get(),
            allow_uncontained: false,
            debug_agent_stderr: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// The following environment variables are recognized:
    /// - `LEAGUE_VERBOSE`: if set to `"true"`, enables verbose output (default: `true`)
    /// - `LEAGUE_LOG_DIR`: directory of the tracing log file (default: none)
    /// - `LEAGUE_ISOLATION`: `"inline"` or `"worker"` (default: `"worker"`)
    /// - `LEAGUE_WORKERS`: positive number of concurrent matches (default: logical CPU count)
    /// - `LEAGUE_ALLOW_UNCONTAINED`: if set to `"true"`, allows uncontained agents (default: `false`)
    /// - `LEAGUE_DEBUG_AGENT_STDERR`: if set to `"true"`, enables agent stderr debug output (default: `false`)
    ///
    /// Any other value (including unset) will result in using the default value for each field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        let defaults = Self::new();
        let isolation = match std::env::var("LEAGUE_ISOLATION") {
            Ok(val) if val.eq_ignore_ascii_case("inline") => Isolation::Inline,
            Ok(val) if val.eq_ignore_ascii_case("worker") => Isolation::Worker,
            Ok(val) => {
                warn!("unknown LEAGUE_ISOLATION {val:?}, using {:?}", defaults.isolation);
                defaults.isolation
            }
            Err(_) => defaults.isolation,
        };
        let workers = std::env::var("LEAGUE_WORKERS")
            .ok()
            .and_then(|val| val.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.workers);

        Self {
            verbose: get_env_flag("LEAGUE_VERBOSE", defaults.verbose),
            log_dir: std::env::var_os("LEAGUE_LOG_DIR").map(PathBuf::from),
            isolation,
            workers,
            allow_uncontained: get_env_flag("LEAGUE_ALLOW_UNCONTAINED", false),
            debug_agent_stderr: get_env_flag("LEAGUE_DEBUG_AGENT_STDERR", false),
        }
    }

    /// Enable or disable printing match results.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Write a tracing log file in `dir`.
    pub fn with_log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Choose how strategy calls are isolated.
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Maximum number of matches running at once. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Enable or disable running agent processes without a cgroup.
    pub fn with_allow_uncontained(mut self, value: bool) -> Self {
        self.allow_uncontained = value;
        self
    }

    /// Enable or disable agent stderr output (debug purposes only).
    pub fn with_debug_agent_stderr(mut self, value: bool) -> Self {
        self.debug_agent_stderr = value;
        self
    }

    /// Isolation backend for in-process strategies.
    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// Maximum number of matches played at once.
    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
