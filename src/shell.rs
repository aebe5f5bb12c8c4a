//! Process execution for planner steps.
//!
//! All step commands and installation scripts go through [`Shell`]. Every
//! command runs to completion before the next one starts: output is captured
//! in full, never streamed, and there is no timeout.
//!
//! # Process hygiene
//!
//! Captured commands are spawned in their own process group and registered
//! with the global [`ChildRegistry`](crate::process_guard::ChildRegistry)
//! while they run, so a killed planner takes its children down with it.

use crate::process_guard::{self, CommandProcessGroup};
use crate::step::Invocation;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, info, warn};

/// Exit code reported when the program could not be found
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported when the program could not be started for another reason
pub const EXIT_CANNOT_EXECUTE: i32 = 126;

/// Outcome of one executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Exit code; `-1` when the process was terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `stdout` and `stderr` joined by a newline, cut to `limit` characters
    pub fn combined_output(&self, limit: usize) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
            .chars()
            .take(limit)
            .collect()
    }

    fn spawn_failure(program: &str, err: &io::Error) -> Self {
        let exit_code = match err.kind() {
            io::ErrorKind::NotFound => EXIT_NOT_FOUND,
            _ => EXIT_CANNOT_EXECUTE,
        };
        warn!("Failed to start {}: {}", program, err);
        Self::new(exit_code, "", format!("{}: {}", program, err))
    }
}

/// Seam between the planner and real processes.
pub trait CommandRunner {
    /// Run `invocation` with captured output and wait for it to exit.
    fn run(&mut self, invocation: &Invocation) -> ProcessResult;

    /// Run a shell line attached to the terminal (stdin/stdout/stderr
    /// inherited). Used for the root access probe, where `sudo` must be able
    /// to prompt for a password. Nothing is captured.
    fn run_interactive(&mut self, line: &str) -> ProcessResult;
}

/// Executes commands on the host.
#[derive(Debug, Clone)]
pub struct Shell {
    interpreter: String,
}

impl Default for Shell {
    fn default() -> Self {
        Self {
            interpreter: "sh".to_string(),
        }
    }
}

impl Shell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `program` with `args`, no shell interpretation
    pub fn execute_command(&self, program: &str, args: &[String]) -> ProcessResult {
        info!("Executing command: \"{} {}\"", program, args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.capture(program, cmd)
    }

    /// Execute a pre-quoted command line through the system shell
    pub fn execute_direct(&self, line: &str) -> ProcessResult {
        info!("Executing command: \"{}\"", line);
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-c").arg(line);
        self.capture(&self.interpreter, cmd)
    }

    fn capture(&self, program: &str, mut cmd: Command) -> ProcessResult {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ProcessResult::spawn_failure(program, &e),
        };
        let pid = child.id();
        process_guard::track_child(pid);

        let output = child.wait_with_output();
        process_guard::untrack_child(pid);

        let result = match output {
            Ok(output) => ProcessResult::new(
                exit_code(output.status),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            ),
            Err(e) => ProcessResult::spawn_failure(program, &e),
        };

        info!("Command exited with code {}", result.exit_code);
        debug!("Stdout: {}\nStderr: {}", result.stdout, result.stderr);
        result
    }
}

impl CommandRunner for Shell {
    fn run(&mut self, invocation: &Invocation) -> ProcessResult {
        match invocation {
            Invocation::Command { program, args } => self.execute_command(program, args),
            Invocation::Quoted(line) => self.execute_direct(line),
        }
    }

    fn run_interactive(&mut self, line: &str) -> ProcessResult {
        info!("Executing interactive command: \"{}\"", line);
        let status = Command::new(&self.interpreter)
            .arg("-c")
            .arg(line)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status();

        match status {
            Ok(status) => {
                let code = exit_code(status);
                info!("Interactive command exited with code {}", code);
                ProcessResult::new(code, "", "")
            }
            Err(e) => ProcessResult::spawn_failure(&self.interpreter, &e),
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => {
            warn!(
                "Process terminated by signal {}",
                status.signal().unwrap_or_default()
            );
            -1
        }
    }
}
