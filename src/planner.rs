//! Execution planner
//!
//! Walks a list of top-level [`Step`] trees and executes them one at a time:
//!
//! 1. Find the programs the top-level steps need and install missing ones
//! 2. Assign every node its effort and size the progress bar
//! 3. Execute each top-level step, following `on_success` / `on_failure`
//! 4. Top the progress bar up to the step's allocated effort
//!
//! # Effort
//!
//! `effort(step) = 1 + effort(on_success) + effort(on_failure)`. Both branches
//! are counted even though only one of them can run, so the progress target is
//! known before anything executes. After each top-level step the unspent part
//! of its allocation is added back, which makes the bar land exactly on its
//! total once the plan finishes.
//!
//! # Failure
//!
//! A mandatory step that exits nonzero aborts the plan with
//! [`SandboxError::ExecutionFailure`], after its failure continuation (if any)
//! has run. Optional steps only log their failure.

use crate::display::{LogKind, ProgressDisplay, ProgressId};
use crate::error::{Result, SandboxError};
use crate::installer::{DependencyInstaller, HostProbe, PathProbe, missing_dependencies};
use crate::shell::{CommandRunner, ProcessResult, Shell};
use crate::step::Step;
use crate::storage::RuntimeData;
use strum::Display;
use tracing::{debug, info};

/// Characters of command output shown in the details panel on failure
pub const FAILURE_DETAILS_LIMIT: usize = 1000;

/// Position of a step in the tree; only affects how it is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StepRole {
    Parent,
    SuccessChild,
    FailureChild,
}

/// Assign `step` and every node below it its effort; returns the effort of `step`.
pub fn compute_effort(step: &mut Step) -> u32 {
    let mut effort = 1;
    if let Some(child) = step.on_success.as_deref_mut() {
        effort += compute_effort(child);
    }
    if let Some(child) = step.on_failure.as_deref_mut() {
        effort += compute_effort(child);
    }
    step.set_execution_effort(effort);
    effort
}

/// Executes a plan of steps.
pub struct ExecutionPlanner {
    steps: Vec<Step>,
    installer: DependencyInstaller,
    runner: Box<dyn CommandRunner>,
    probe: Box<dyn HostProbe>,
    progress_id: ProgressId,
    current_step_total_effort: u32,
    current_step_spent_effort: u32,
}

impl ExecutionPlanner {
    /// Planner running commands on the host and probing its `PATH`
    pub fn new(steps: Vec<Step>, installer: DependencyInstaller) -> Self {
        Self::with_parts(
            steps,
            installer,
            Box::new(Shell::new()),
            Box::new(PathProbe::new()),
        )
    }

    pub fn with_parts(
        steps: Vec<Step>,
        installer: DependencyInstaller,
        runner: Box<dyn CommandRunner>,
        probe: Box<dyn HostProbe>,
    ) -> Self {
        Self {
            steps,
            installer,
            runner,
            probe,
            progress_id: ProgressId(0),
            current_step_total_effort: 0,
            current_step_spent_effort: 0,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Programs the top-level steps need that are not on this host
    pub fn missing_dependencies(&self) -> std::collections::BTreeSet<String> {
        missing_dependencies(&self.steps, self.probe.as_ref())
    }

    /// Assign efforts to every step and return the sum over top-level steps
    pub fn plan_effort(&mut self) -> u32 {
        self.steps.iter_mut().map(compute_effort).sum()
    }

    /// Run the whole plan.
    ///
    /// The display is stopped on every exit path. Outputs, notes and
    /// resources are appended to `storage` as steps finish, so they survive
    /// a failed run.
    pub fn execute(
        &mut self,
        storage: &mut RuntimeData,
        display: &mut dyn ProgressDisplay,
    ) -> Result<()> {
        info!("Checking for missing dependencies");
        let dependencies = self.missing_dependencies();

        let plan_effort = self.plan_effort() + dependencies.len() as u32;
        self.progress_id = display.add_progress_bar("Progress", plan_effort);
        info!("Plan effort: {}", plan_effort);

        if dependencies.is_empty() {
            info!("No missing dependencies found");
            display.start();
        } else {
            info!("Missing dependencies: {:?}", dependencies);
            self.installer.install_packages(
                &dependencies,
                self.runner.as_mut(),
                display,
                self.progress_id,
            )?;
        }

        info!("Executing steps");
        let result = self.execute_steps(storage, display);
        display.stop();
        result
    }

    fn execute_steps(
        &mut self,
        storage: &mut RuntimeData,
        display: &mut dyn ProgressDisplay,
    ) -> Result<()> {
        // Steps are moved out so the recursion can borrow them while `self`
        // keeps the progress counters; they are put back on every path.
        let steps = std::mem::take(&mut self.steps);
        let mut outcome = Ok(());
        for step in &steps {
            self.current_step_total_effort = step.execution_effort();
            debug!(
                "Effort required for the step \"{}\": {}",
                step.name, self.current_step_total_effort
            );
            outcome = self.execute_step(step, StepRole::Parent, storage, display);
            if outcome.is_err() {
                break;
            }
            debug!(
                "Effort spent on the step \"{}\": {}",
                step.name, self.current_step_spent_effort
            );
            self.rectify_progress(display);
        }
        self.steps = steps;
        outcome
    }

    fn execute_step(
        &mut self,
        step: &Step,
        role: StepRole,
        storage: &mut RuntimeData,
        display: &mut dyn ProgressDisplay,
    ) -> Result<()> {
        self.announce_step(step, role, display);

        let result = self.runner.run(step.invocation());

        display.advance_progress_bar(self.progress_id, 1);
        self.current_step_spent_effort += 1;

        storage.append_output(
            step.name.as_str(),
            result.stdout.as_str(),
            result.stderr.as_str(),
            result.exit_code,
        );

        if result.success() {
            self.on_step_success(step, storage, display)
        } else {
            self.on_step_failure(step, &result, storage, display)
        }
    }

    fn on_step_success(
        &mut self,
        step: &Step,
        storage: &mut RuntimeData,
        display: &mut dyn ProgressDisplay,
    ) -> Result<()> {
        info!("Step succeeded");
        let messages = &step.display_messages;
        display.add_item_to_logs(
            messages.success_message.as_deref().unwrap_or_default(),
            LogKind::Success,
        );

        if let Some(instructions) = &messages.success_instructions {
            storage.append_note(instructions.as_str(), None);
        }
        for resource in &step.resources {
            storage.append_resource(resource.clone());
        }

        match step.on_success.as_deref() {
            Some(next) => {
                info!("Executing on_success continuation");
                self.execute_step(next, StepRole::SuccessChild, storage, display)
            }
            None => Ok(()),
        }
    }

    fn on_step_failure(
        &mut self,
        step: &Step,
        result: &ProcessResult,
        storage: &mut RuntimeData,
        display: &mut dyn ProgressDisplay,
    ) -> Result<()> {
        info!("Step failed");
        let messages = &step.display_messages;
        let failure_message = messages.failure_message.as_deref().unwrap_or_default();
        display.add_item_to_logs(failure_message, LogKind::Error);
        display.set_details_message(&result.combined_output(FAILURE_DETAILS_LIMIT), true);

        if let Some(instructions) = &messages.failure_instructions {
            storage.append_note(instructions.as_str(), None);
        }

        if let Some(next) = step.on_failure.as_deref() {
            info!("Executing on_failure continuation");
            self.execute_step(next, StepRole::FailureChild, storage, display)?;
        }

        if step.optional {
            return Ok(());
        }
        Err(SandboxError::ExecutionFailure {
            step: step.name.clone(),
            message: failure_message.to_string(),
        })
    }

    fn announce_step(&self, step: &Step, role: StepRole, display: &mut dyn ProgressDisplay) {
        info!("Executing step {} \"{}\"", role, step.name);
        if role == StepRole::Parent {
            display.add_item_to_logs(&title_case(&step.name), LogKind::Heading);
        }

        if let Some(description) = &step.display_messages.description {
            debug!("Description available");
            display.set_details_message(description, false);
        }

        display.add_item_to_logs(
            step.display_messages.ongoing_message.as_deref().unwrap_or_default(),
            LogKind::Loading,
        );
    }

    /// Advance by whatever part of the top-level step's allocation the
    /// traversed path did not consume, then reset the counter.
    fn rectify_progress(&mut self, display: &mut dyn ProgressDisplay) {
        if self.current_step_total_effort > self.current_step_spent_effort {
            let remaining = self.current_step_total_effort - self.current_step_spent_effort;
            debug!("Rectifying progress by {}", remaining);
            display.advance_progress_bar(self.progress_id, remaining);
        } else {
            debug!("No rectification required");
        }
        self.current_step_spent_effort = 0;
    }
}

/// Capitalize the first letter of every word
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}
