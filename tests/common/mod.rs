//! Test doubles shared by the integration tests

#![allow(dead_code)]

use kubesandbox::{CommandRunner, HostProbe, Invocation, LogKind, ProcessResult, ProgressDisplay, ProgressId};
use std::collections::{HashMap, HashSet};

/// Everything the planner pushed into the display, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Stop,
    Bar(String, u32),
    Advance(u32),
    Log(String, LogKind),
    Details(String, bool),
}

#[derive(Debug, Default)]
pub struct RecordingDisplay {
    pub events: Vec<Event>,
}

impl RecordingDisplay {
    pub fn total(&self) -> u32 {
        self.events
            .iter()
            .find_map(|e| match e {
                Event::Bar(_, total) => Some(*total),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn advanced(&self) -> u32 {
        self.events
            .iter()
            .map(|e| match e {
                Event::Advance(n) => *n,
                _ => 0,
            })
            .sum()
    }

    pub fn logs_of(&self, kind: LogKind) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Log(text, k) if *k == kind => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.iter().filter(|e| *e == event).count()
    }
}

impl ProgressDisplay for RecordingDisplay {
    fn start(&mut self) {
        self.events.push(Event::Start);
    }

    fn stop(&mut self) {
        self.events.push(Event::Stop);
    }

    fn add_progress_bar(&mut self, title: &str, total: u32) -> ProgressId {
        self.events.push(Event::Bar(title.to_string(), total));
        ProgressId(0)
    }

    fn advance_progress_bar(&mut self, _id: ProgressId, advance_by: u32) {
        self.events.push(Event::Advance(advance_by));
    }

    fn add_item_to_logs(&mut self, text: &str, kind: LogKind) {
        self.events.push(Event::Log(text.to_string(), kind));
    }

    fn set_details_message(&mut self, message: &str, raw: bool) {
        self.events.push(Event::Details(message.to_string(), raw));
    }
}

/// Answers every invocation from a table keyed by its command line.
/// Unlisted commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    results: HashMap<String, ProcessResult>,
    pub executed: Vec<String>,
    pub interactive: Vec<String>,
    pub probe_exit_code: i32,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, line: &str, result: ProcessResult) -> Self {
        self.results.insert(line.to_string(), result);
        self
    }

    pub fn fail(self, line: &str, exit_code: i32) -> Self {
        self.respond(line, ProcessResult::new(exit_code, "", format!("{} failed", line)))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&mut self, invocation: &Invocation) -> ProcessResult {
        let line = invocation.to_string();
        self.executed.push(line.clone());
        self.results
            .get(&line)
            .cloned()
            .unwrap_or_else(|| ProcessResult::new(0, format!("{} done", line), ""))
    }

    fn run_interactive(&mut self, line: &str) -> ProcessResult {
        self.interactive.push(line.to_string());
        ProcessResult::new(self.probe_exit_code, "", "")
    }
}

/// Hands the executed command lines back to the test after the runner has
/// been moved into a planner
#[derive(Debug, Default, Clone)]
pub struct SharedRunner(pub std::rc::Rc<std::cell::RefCell<ScriptedRunner>>);

impl SharedRunner {
    pub fn new(runner: ScriptedRunner) -> Self {
        Self(std::rc::Rc::new(std::cell::RefCell::new(runner)))
    }

    pub fn executed(&self) -> Vec<String> {
        self.0.borrow().executed.clone()
    }

    pub fn interactive(&self) -> Vec<String> {
        self.0.borrow().interactive.clone()
    }
}

impl CommandRunner for SharedRunner {
    fn run(&mut self, invocation: &Invocation) -> ProcessResult {
        self.0.borrow_mut().run(invocation)
    }

    fn run_interactive(&mut self, line: &str) -> ProcessResult {
        self.0.borrow_mut().run_interactive(line)
    }
}

/// Host where only the listed programs exist
#[derive(Debug, Default)]
pub struct FakeProbe(pub HashSet<String>);

impl FakeProbe {
    pub fn with(programs: &[&str]) -> Self {
        Self(programs.iter().map(|p| p.to_string()).collect())
    }
}

impl HostProbe for FakeProbe {
    fn is_available(&self, program: &str) -> bool {
        self.0.contains(program)
    }
}
