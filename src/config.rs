//! Runtime configuration and plan files.
//!
//! Settings come from the environment with the defaults below; command-line
//! flags are applied on top by the binary.
//!
//! | Variable                       | Default             |
//! |--------------------------------|---------------------|
//! | `WORKDIR`                      | `~/.kubesandbox`    |
//! | `GENERATE_REPORT`              | `true`              |
//! | `DUMP_OUTPUT`                  | `false`             |
//! | `INSTALLER_CONFIG`             | built-in sources    |
//! | `KUBESANDBOX_PRIVILEGE_PROBE`  | `sudo ls`           |

use crate::error::{Result, SandboxError};
use crate::installer::{DEFAULT_PRIVILEGE_PROBE, InstallationSources};
use crate::step::Step;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Log file written inside the workdir
pub const LOG_FILE_NAME: &str = "kubesandbox.log";

/// Settings for one planner run
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Directory holding the log file and report files
    pub workdir: PathBuf,
    pub generate_report: bool,
    pub dump_output: bool,
    pub installation_sources: InstallationSources,
    /// Privileged no-op run before installing missing programs
    pub privilege_probe: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            generate_report: true,
            dump_output: false,
            installation_sources: InstallationSources::default(),
            privilege_probe: DEFAULT_PRIVILEGE_PROBE.to_string(),
        }
    }
}

impl PlannerConfig {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps variable names to values
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(workdir) = lookup("WORKDIR").filter(|v| !v.trim().is_empty()) {
            config.workdir = PathBuf::from(workdir);
        }
        if let Some(value) = lookup("GENERATE_REPORT") {
            config.generate_report = parse_flag(&value);
        }
        if let Some(value) = lookup("DUMP_OUTPUT") {
            config.dump_output = parse_flag(&value);
        }
        if let Some(json) = lookup("INSTALLER_CONFIG") {
            config.installation_sources = InstallationSources::from_json(&json)
                .map_err(|e| SandboxError::config(format!("INSTALLER_CONFIG: {}", e)))?;
        }
        if let Some(probe) = lookup("KUBESANDBOX_PRIVILEGE_PROBE").filter(|v| !v.trim().is_empty()) {
            config.privilege_probe = probe;
        }

        Ok(config)
    }

    pub fn log_file(&self) -> PathBuf {
        self.workdir.join(LOG_FILE_NAME)
    }
}

/// Truthy values accepted for boolean settings
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "t"
    )
}

fn default_workdir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".kubesandbox"))
        .unwrap_or_else(|| PathBuf::from(".kubesandbox"))
}

/// Load the top-level steps of a plan from a JSON array
pub fn load_plan_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<Step>> {
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read plan from {:?}", path.as_ref()))?;

    let steps: Vec<Step> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse plan JSON in {:?}", path.as_ref()))?;

    Ok(steps)
}

/// Load installation sources from a JSON object keyed by program name
pub fn load_sources_file<P: AsRef<Path>>(path: P) -> anyhow::Result<InstallationSources> {
    let content = fs::read_to_string(&path).with_context(|| {
        format!("Failed to read installation sources from {:?}", path.as_ref())
    })?;

    InstallationSources::from_json(&content)
        .with_context(|| format!("Failed to parse installation sources in {:?}", path.as_ref()))
}
