//! KubeSandbox Library
//!
//! Step execution planner for provisioning a local Kubernetes sandbox: a plan
//! of step trees is executed one command at a time, with missing programs
//! installed first and progress reported through a [`ProgressDisplay`].

pub mod chores;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod installer;
pub mod planner;
pub mod process_guard;
pub mod shell;
pub mod step;
pub mod storage;

// Re-export main types for convenience
pub use chores::Chores;
pub use config::{PlannerConfig, load_plan_file, load_sources_file};
pub use display::{ConsoleDisplay, LogKind, NullDisplay, ProgressDisplay, ProgressId};
pub use error::{Result, SandboxError};
pub use installer::{
    DependencyInstaller, HostProbe, HttpFetcher, InstallationSource, InstallationSources,
    PathProbe, ScriptFetcher, missing_dependencies,
};
pub use planner::{ExecutionPlanner, compute_effort};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use shell::{CommandRunner, ProcessResult, Shell};
pub use step::{DisplayMessages, Invocation, Step, StepBuilder};
pub use storage::{CommandOutput, ReportNote, Resource, RuntimeData};
