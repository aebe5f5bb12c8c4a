//! Ctrl+C during the root access prompt, with the global signal handlers
//! installed as the binary does.
//!
//! Kept in its own test binary: the handlers are process-wide and exit the
//! process on an unscoped SIGINT.

mod common;

use common::{RecordingDisplay, ScriptedRunner};
use kubesandbox::{
    CommandRunner, DependencyInstaller, InstallationSource, InstallationSources, Invocation,
    ProcessResult, ProgressId, SandboxError, process_guard,
};
use std::collections::BTreeSet;
use std::time::Duration;

/// Behaves like a user pressing Ctrl+C at the password prompt
struct InterruptedPrompt(ScriptedRunner);

impl CommandRunner for InterruptedPrompt {
    fn run(&mut self, invocation: &Invocation) -> ProcessResult {
        self.0.run(invocation)
    }

    fn run_interactive(&mut self, line: &str) -> ProcessResult {
        self.0.run_interactive(line);
        let _ = nix::sys::signal::raise(nix::sys::signal::Signal::SIGINT);
        ProcessResult::new(1, "", "")
    }
}

#[test]
fn test_interrupted_prompt_returns_abort_and_process_survives() {
    process_guard::init_signal_handlers().unwrap();

    let mut sources = InstallationSources::empty();
    sources.insert("k3d", InstallationSource::new("https://get.example.com/k3d.sh", false));
    let installer = DependencyInstaller::new(sources);
    let mut runner = InterruptedPrompt(ScriptedRunner::new());
    let packages: BTreeSet<String> = ["k3d".to_string()].into_iter().collect();

    for _ in 0..3 {
        let result = installer.install_packages(
            &packages,
            &mut runner,
            &mut RecordingDisplay::default(),
            ProgressId(0),
        );
        assert!(matches!(result, Err(SandboxError::InstallationAborted)));
    }

    // Give the handler thread time to act on the signals it was woken for
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(runner.0.interactive.len(), 3);
    assert!(runner.0.executed.is_empty());
}
