#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{path::PathBuf, time::Duration};

use bon::Builder;

/// Deadlines applied to each execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time allowed for a compile step.
    pub compile: Duration,
    /// Maximum time allowed for a run step.
    pub run:     Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            compile: Duration::from_secs(30),
            run:     Duration::from_secs(10),
        }
    }
}

/// Runtime settings, read once at start-up and passed down explicitly.
#[derive(Debug, Clone, Builder)]
pub struct Settings {
    /// Per-step deadlines.
    #[builder(default)]
    timeouts:    Timeouts,
    /// Size of the evaluation worker pool.
    #[builder(default = num_cpus::get().max(1))]
    workers:     usize,
    /// Parent directory for per-call scratch directories.
    #[builder(default = std::env::temp_dir(), into)]
    scratch_dir: PathBuf,
    /// Directory holding the JSON store files used by the CLI.
    #[builder(default = PathBuf::from(".autograder"), into)]
    data_dir:    PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Settings {
    /// Builds settings from `AUTOGRADER_*` environment variables, falling back
    /// to defaults for anything missing or unparsable.
    pub fn from_env() -> Self {
        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            compile: read_timeout_secs(
                "AUTOGRADER_COMPILE_TIMEOUT_SECS",
                defaults.compile.as_secs(),
            ),
            run:     read_timeout_secs("AUTOGRADER_RUN_TIMEOUT_SECS", defaults.run.as_secs()),
        };

        let workers = std::env::var("AUTOGRADER_WORKERS")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or_else(|| num_cpus::get().max(1));

        let scratch_dir = std::env::var_os("AUTOGRADER_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let data_dir = std::env::var_os("AUTOGRADER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".autograder"));

        Self {
            timeouts,
            workers,
            scratch_dir,
            data_dir,
        }
    }

    /// Returns the per-step deadlines.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Returns the worker pool size.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Returns the scratch parent directory.
    pub fn scratch_dir(&self) -> &std::path::Path {
        &self.scratch_dir
    }

    /// Returns the store directory.
    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }
}

/// Parses an environment variable into a `Duration`, falling back to
/// `default_secs` when parsing fails or the variable is missing.
fn read_timeout_secs(env: &str, default_secs: u64) -> Duration {
    std::env::var(env)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_timeout_falls_back_to_default() {
        let timeout = read_timeout_secs("AUTOGRADER_TEST_UNSET_TIMEOUT_SECS", 7);
        assert_eq!(timeout, Duration::from_secs(7));
    }

    #[test]
    fn builder_defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.timeouts().compile, Duration::from_secs(30));
        assert_eq!(settings.timeouts().run, Duration::from_secs(10));
        assert!(settings.workers() >= 1);
        assert_eq!(settings.data_dir(), std::path::Path::new(".autograder"));
    }
}
