//! Dependency bootstrapping
//!
//! Before any step runs, the planner checks that every program named in the
//! top-level steps' `dependencies` is on the host `PATH`. Missing programs are
//! installed by downloading their upstream install script and running it with
//! `bash -c`.
//!
//! # Failure policy
//!
//! - The root access probe runs first; if it fails nothing is installed.
//! - The first package that cannot be installed aborts the whole installer.
//! - Each successful install advances the plan's progress by one.

use crate::display::{LogKind, ProgressDisplay, ProgressId};
use crate::error::{Result, SandboxError};
use crate::process_guard::InterruptScope;
use crate::shell::CommandRunner;
use crate::step::{Invocation, Step};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, info};

/// Default command used to acquire root access before installing
pub const DEFAULT_PRIVILEGE_PROBE: &str = "sudo ls";

/// How to bootstrap a missing program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationSource {
    /// Where the install script is downloaded from
    pub url: String,
    #[serde(default)]
    pub request_params: Option<HashMap<String, String>>,
    #[serde(default)]
    pub request_headers: Option<HashMap<String, String>>,
    /// Kept for plan compatibility; the downloaded script is always what runs
    #[serde(default)]
    pub install_command: Option<String>,
    #[serde(default)]
    pub requires_root: bool,
}

impl InstallationSource {
    pub fn new(url: impl Into<String>, requires_root: bool) -> Self {
        Self {
            url: url.into(),
            request_params: None,
            request_headers: None,
            install_command: None,
            requires_root,
        }
    }
}

/// Installation sources keyed by program name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallationSources(BTreeMap<String, InstallationSource>);

impl InstallationSources {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn get(&self, package: &str) -> Option<&InstallationSource> {
        self.0.get(package)
    }

    pub fn insert(&mut self, package: impl Into<String>, source: InstallationSource) {
        self.0.insert(package.into(), source);
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl Default for InstallationSources {
    /// Upstream install scripts for the tools the sandbox generators use
    fn default() -> Self {
        let mut sources = Self::empty();
        sources.insert("docker", InstallationSource::new("https://get.docker.com", true));
        sources.insert(
            "k3d",
            InstallationSource::new(
                "https://raw.githubusercontent.com/k3d-io/k3d/main/install.sh",
                false,
            ),
        );
        sources.insert(
            "kubectl",
            InstallationSource::new(
                "https://raw.githubusercontent.com/Prakhar225/placeholder/main/kubectl.sh",
                true,
            ),
        );
        sources.insert(
            "helm",
            InstallationSource::new(
                "https://raw.githubusercontent.com/helm/helm/main/scripts/get-helm-3",
                false,
            ),
        );
        sources
    }
}

/// Answers whether a program can be executed on this host
pub trait HostProbe {
    fn is_available(&self, program: &str) -> bool;
}

/// Looks programs up on `PATH`, like `which`
#[derive(Debug, Clone, Default)]
pub struct PathProbe {
    path: Option<OsString>,
}

impl PathProbe {
    /// Probe the current process `PATH`
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe an explicit search path instead of the environment
    pub fn with_path(path: impl Into<OsString>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

impl HostProbe for PathProbe {
    fn is_available(&self, program: &str) -> bool {
        if program.contains('/') {
            return is_executable(Path::new(program));
        }
        let search_path = match self.path.clone().or_else(|| std::env::var_os("PATH")) {
            Some(path) => path,
            None => return false,
        };
        std::env::split_paths(&search_path).any(|dir| is_executable(&dir.join(program)))
    }
}

/// Programs required by `steps` that `probe` cannot find.
///
/// Only the top-level steps' own `dependencies` are inspected; dependencies
/// declared on continuation steps are not pre-installed.
pub fn missing_dependencies(steps: &[Step], probe: &dyn HostProbe) -> BTreeSet<String> {
    steps
        .iter()
        .flat_map(|step| step.dependencies.iter())
        .filter(|program| !probe.is_available(program))
        .cloned()
        .collect()
}

/// Downloads install scripts
pub trait ScriptFetcher {
    fn fetch(&self, package: &str, source: &InstallationSource) -> Result<String>;
}

/// Fetches install scripts over HTTP(S) with a blocking client
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptFetcher for HttpFetcher {
    fn fetch(&self, package: &str, source: &InstallationSource) -> Result<String> {
        info!(
            "Downloading script for package \"{}\" from \"{}\"",
            package, source.url
        );

        let mut request = self.client.get(&source.url);
        if let Some(params) = &source.request_params {
            request = request.query(params);
        }
        if let Some(headers) = &source.request_headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request
            .send()
            .map_err(|e| SandboxError::installation_failed(package, format!("download error: {}", e)))?;
        let status = response.status();
        debug!("Status code - {}", status);

        if !status.is_success() {
            return Err(SandboxError::installation_failed(
                package,
                format!("failed to download script (HTTP {})", status.as_u16()),
            ));
        }

        response
            .text()
            .map_err(|e| SandboxError::installation_failed(package, format!("download error: {}", e)))
    }
}

/// Installs missing programs from their [`InstallationSource`]s
pub struct DependencyInstaller {
    sources: InstallationSources,
    fetcher: Box<dyn ScriptFetcher>,
    privilege_probe: String,
}

impl DependencyInstaller {
    pub fn new(sources: InstallationSources) -> Self {
        Self::with_fetcher(sources, Box::new(HttpFetcher::new()))
    }

    pub fn with_fetcher(sources: InstallationSources, fetcher: Box<dyn ScriptFetcher>) -> Self {
        Self {
            sources,
            fetcher,
            privilege_probe: DEFAULT_PRIVILEGE_PROBE.to_string(),
        }
    }

    /// Replace the privileged no-op run before installing
    pub fn privilege_probe(mut self, command: impl Into<String>) -> Self {
        self.privilege_probe = command.into();
        self
    }

    /// Install every package in order, stopping at the first failure.
    ///
    /// Starts the display once root access is granted. On failure the
    /// display is stopped before the error is returned.
    pub fn install_packages(
        &self,
        packages: &BTreeSet<String>,
        runner: &mut dyn CommandRunner,
        display: &mut dyn ProgressDisplay,
        progress: ProgressId,
    ) -> Result<()> {
        let listing: Vec<&str> = packages.iter().map(String::as_str).collect();
        display.add_item_to_logs(
            &format!(
                "The following packages are missing from the system: {}. \
                 Please provide root access to install them or press Ctrl + C to exit and install manually.",
                listing.join(", ")
            ),
            LogKind::Warning,
        );

        self.acquire_root(runner)?;

        display.start();
        display.add_item_to_logs("Installing packages", LogKind::Heading);
        for package in packages {
            if let Err(e) = self.install_package(package, runner, display, progress) {
                display.add_item_to_logs(&e.to_string(), LogKind::Error);
                display.stop();
                return Err(e);
            }
        }
        Ok(())
    }

    fn acquire_root(&self, runner: &mut dyn CommandRunner) -> Result<()> {
        let scope = InterruptScope::enter()?;
        let result = runner.run_interactive(&self.privilege_probe);
        if scope.interrupted() {
            info!("Root access probe interrupted");
            return Err(SandboxError::InstallationAborted);
        }
        if !result.success() {
            return Err(SandboxError::PrivilegeRequired);
        }
        Ok(())
    }

    fn install_package(
        &self,
        package: &str,
        runner: &mut dyn CommandRunner,
        display: &mut dyn ProgressDisplay,
        progress: ProgressId,
    ) -> Result<()> {
        let source = self.sources.get(package).ok_or_else(|| {
            display.add_item_to_logs(
                &format!("No installation source available for the package {}", package),
                LogKind::Error,
            );
            SandboxError::UnknownPackage(package.to_string())
        })?;

        info!("Installing package {} (requires_root={})", package, source.requires_root);
        display.add_item_to_logs(
            &format!("Downloading installation script for package {}", package),
            LogKind::Loading,
        );
        let script = match self.fetcher.fetch(package, source) {
            Ok(script) => script,
            Err(e) => {
                display.add_item_to_logs(
                    &format!("Failed to download script for {}", package),
                    LogKind::Error,
                );
                return Err(e);
            }
        };

        display.add_item_to_logs(&format!("Installing {}", package), LogKind::Loading);
        let result = runner.run(&Invocation::Command {
            program: "bash".to_string(),
            args: vec!["-c".to_string(), script],
        });

        if !result.success() {
            info!("Installation failed");
            display.add_item_to_logs("Installation failed", LogKind::Error);
            return Err(SandboxError::installation_failed(
                package,
                format!("install script exited with code {}", result.exit_code),
            ));
        }

        info!("{} installed successfully", package);
        display.add_item_to_logs(&format!("{} installed successfully", package), LogKind::Success);
        display.advance_progress_bar(progress, 1);
        Ok(())
    }
}
