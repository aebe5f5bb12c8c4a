//! Operation descriptors for the execution planner.
//!
//! A `Step` is one node of a binary-branching tree: an external command plus
//! optional continuations that run when the command succeeds or fails.
//! Steps are assembled once by the plan generators (k3d, helm, kubectl) and
//! handed to the planner, which only ever writes `execution_effort`.
//!
//! # Invariants
//!
//! - Every step carries exactly one invocation. Building a step without one
//!   fails with [`SandboxError::NoCommandSpecified`], both through
//!   [`StepBuilder::build`] and through deserialization.
//! - Continuations are exclusively owned (`Box`), so the tree has no cycles
//!   and no shared sub-trees.

use crate::error::{Result, SandboxError};
use crate::storage::Resource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a step's command is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Program plus argument list, executed without shell interpretation
    Command { program: String, args: Vec<String> },
    /// A pre-quoted command line executed through the system shell.
    /// Quoting is the responsibility of whoever built the step.
    Quoted(String),
}

impl Invocation {
    fn resolve(command: Option<String>, args: Vec<String>, quoted: Option<String>) -> Result<Self> {
        match (command, quoted) {
            (Some(program), _) if !program.trim().is_empty() => {
                Ok(Invocation::Command { program, args })
            }
            (_, Some(line)) if !line.trim().is_empty() => Ok(Invocation::Quoted(line)),
            _ => Err(SandboxError::NoCommandSpecified),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Command { program, args } if args.is_empty() => write!(f, "{}", program),
            Invocation::Command { program, args } => write!(f, "{} {}", program, args.join(" ")),
            Invocation::Quoted(line) => write!(f, "{}", line),
        }
    }
}

/// Messages shown while a step runs and once it finishes.
///
/// The instructions are not shown live: they are appended as notes to the
/// run report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayMessages {
    pub success_message: Option<String>,
    pub failure_message: Option<String>,
    pub ongoing_message: Option<String>,
    pub description: Option<String>,
    pub success_instructions: Option<String>,
    pub failure_instructions: Option<String>,
}

/// One node of the execution tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StepDocument", into = "StepDocument")]
pub struct Step {
    pub name: String,
    /// External programs that must be on the host `PATH` before this step runs
    pub dependencies: Vec<String>,
    invocation: Invocation,
    /// A failed optional step is logged but does not abort the plan
    pub optional: bool,
    pub on_success: Option<Box<Step>>,
    pub on_failure: Option<Box<Step>>,
    pub display_messages: DisplayMessages,
    /// Registered with the run's result store only if this step succeeds
    pub resources: Vec<Resource>,
    execution_effort: u32,
}

impl Step {
    /// Start building a step named `name`
    pub fn builder(name: impl Into<String>) -> StepBuilder {
        StepBuilder::new(name)
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Progress weight assigned by the planner; zero until the plan starts.
    pub fn execution_effort(&self) -> u32 {
        self.execution_effort
    }

    pub(crate) fn set_execution_effort(&mut self, effort: u32) {
        self.execution_effort = effort;
    }
}

/// Builder for [`Step`]; `build` enforces the invocation invariant.
#[derive(Debug, Clone, Default)]
pub struct StepBuilder {
    name: String,
    dependencies: Vec<String>,
    command: Option<String>,
    args: Vec<String>,
    quoted_command: Option<String>,
    optional: bool,
    on_success: Option<Box<Step>>,
    on_failure: Option<Box<Step>>,
    display_messages: DisplayMessages,
    resources: Vec<Resource>,
}

impl StepBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Argv-style invocation: `program` followed by `args`
    pub fn command<I, S>(mut self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(program.into());
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Shell-interpreted invocation
    pub fn quoted_command(mut self, line: impl Into<String>) -> Self {
        self.quoted_command = Some(line.into());
        self
    }

    pub fn dependency(mut self, program: impl Into<String>) -> Self {
        self.dependencies.push(program.into());
        self
    }

    pub fn dependencies<I, S>(mut self, programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(programs.into_iter().map(Into::into));
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn on_success(mut self, step: Step) -> Self {
        self.on_success = Some(Box::new(step));
        self
    }

    pub fn on_failure(mut self, step: Step) -> Self {
        self.on_failure = Some(Box::new(step));
        self
    }

    pub fn display_messages(mut self, messages: DisplayMessages) -> Self {
        self.display_messages = messages;
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn build(self) -> Result<Step> {
        let invocation = Invocation::resolve(self.command, self.args, self.quoted_command)?;
        Ok(Step {
            name: self.name,
            dependencies: self.dependencies,
            invocation,
            optional: self.optional,
            on_success: self.on_success,
            on_failure: self.on_failure,
            display_messages: self.display_messages,
            resources: self.resources,
            execution_effort: 0,
        })
    }
}

/// Wire shape of a step in plan files.
///
/// `execution_effort` is accepted for compatibility with plans dumped from a
/// previous run but always discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepDocument {
    name: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quoted_command: Option<String>,
    #[serde(default)]
    optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_success: Option<Box<Step>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_failure: Option<Box<Step>>,
    #[serde(default)]
    display_messages: DisplayMessages,
    #[serde(default)]
    resources: Vec<Resource>,
    #[serde(default, skip_serializing)]
    #[allow(dead_code)]
    execution_effort: u32,
}

impl TryFrom<StepDocument> for Step {
    type Error = SandboxError;

    fn try_from(doc: StepDocument) -> Result<Self> {
        StepBuilder {
            name: doc.name,
            dependencies: doc.dependencies,
            command: doc.command,
            args: doc.args,
            quoted_command: doc.quoted_command,
            optional: doc.optional,
            on_success: doc.on_success,
            on_failure: doc.on_failure,
            display_messages: doc.display_messages,
            resources: doc.resources,
        }
        .build()
    }
}

impl From<Step> for StepDocument {
    fn from(step: Step) -> Self {
        let (command, args, quoted_command) = match step.invocation {
            Invocation::Command { program, args } => (Some(program), args, None),
            Invocation::Quoted(line) => (None, Vec::new(), Some(line)),
        };
        StepDocument {
            name: step.name,
            dependencies: step.dependencies,
            command,
            args,
            quoted_command,
            optional: step.optional,
            on_success: step.on_success,
            on_failure: step.on_failure,
            display_messages: step.display_messages,
            resources: step.resources,
            execution_effort: 0,
        }
    }
}
