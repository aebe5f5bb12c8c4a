//! Process lifecycle management for planner subprocesses
//!
//! A sandbox run chains long-lived external tools (`k3d cluster create`,
//! `helm install --wait`, `kubectl apply`). If the planner is killed while
//! one of them runs, the tool must not keep mutating the cluster on its own.
//!
//! - Children are spawned in their own process group with a parent-death signal
//! - Every child PID is tracked in a global registry while it runs
//! - On SIGTERM/SIGHUP/SIGINT (or when `ProcessGuard` drops) every tracked
//!   group gets SIGTERM, then SIGKILL after a grace period
//!
//! SIGINT is special while an [`InterruptScope`] is active: the privilege
//! probe turns Ctrl+C into an "aborted by user" error instead of exiting.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use signal_hook::SigId;
use signal_hook::consts::signal::SIGINT;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Number of live `InterruptScope`s
static INTERRUPT_SCOPES: AtomicUsize = AtomicUsize::new(0);

/// Set at delivery time for a SIGINT that arrived while no scope was alive
static UNSCOPED_SIGINT: AtomicBool = AtomicBool::new(false);

/// Registry tracking all running child processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Prevents double cleanup when both a signal and Drop fire
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("Registered child process PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("Unregistered child process PID {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// SIGTERM every tracked group, give them `grace_period` to exit, then
    /// SIGKILL whatever is left. Runs at most once per registry.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if std::mem::replace(&mut self.cleanup_initiated, true) {
            debug!("Cleanup already initiated, skipping");
            return;
        }
        let pids: Vec<u32> = self.pids.drain().collect();
        if pids.is_empty() {
            return;
        }

        info!("Stopping {} running command(s)", pids.len());
        for &pid in &pids {
            signal_group(pid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + grace_period;
        while Instant::now() < deadline {
            if !pids.iter().any(|&pid| is_process_alive(pid)) {
                info!("All commands stopped");
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for pid in pids.into_iter().filter(|&pid| is_process_alive(pid)) {
            warn!("Command {} ignored SIGTERM, sending SIGKILL", pid);
            signal_group(pid, Signal::SIGKILL);
        }
    }
}

/// Register `pid` with the global registry
pub(crate) fn track_child(pid: u32) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.register(pid);
    }
}

/// Remove `pid` from the global registry once it has been reaped
pub(crate) fn untrack_child(pid: u32) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }
}

/// Signal the whole group so grandchildren of `sh -c` pipelines are reached,
/// falling back to the PID alone if the group is gone.
fn signal_group(pid: u32, sig: Signal) {
    let pid = pid as i32;
    if let Err(e) = signal::kill(Pid::from_raw(-pid), sig) {
        debug!("Group signal {} to {} failed: {}", sig, pid, e);
        if let Err(e) = signal::kill(Pid::from_raw(pid), sig) {
            error!("Failed to send {} to {}: {}", sig, pid, e);
        }
    }
}

/// Alive means existing and not a zombie
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/pid/stat is the state
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// RAII guard that terminates all tracked children on drop.
/// The binary holds one for the duration of a run.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        debug!("ProcessGuard dropped, initiating cleanup");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Captures SIGINT for as long as it is alive.
///
/// A SIGINT delivered while any scope exists is ignored by the global handler
/// installed by [`init_signal_handlers`] and left to the scope owner. The
/// decision is made when the signal arrives, not when the handler thread
/// wakes up, so a scope dropped in between does not turn it into an exit.
pub struct InterruptScope {
    flag: Arc<AtomicBool>,
    id: SigId,
}

impl InterruptScope {
    pub fn enter() -> std::io::Result<Self> {
        let flag = Arc::new(AtomicBool::new(false));
        // Counted before the flag exists so no SIGINT is treated as unscoped
        // while the scope is being set up.
        INTERRUPT_SCOPES.fetch_add(1, Ordering::SeqCst);
        match signal_hook::flag::register(SIGINT, Arc::clone(&flag)) {
            Ok(id) => Ok(Self { flag, id }),
            Err(e) => {
                INTERRUPT_SCOPES.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Drop for InterruptScope {
    fn drop(&mut self) {
        signal_hook::low_level::unregister(self.id);
        INTERRUPT_SCOPES.fetch_sub(1, Ordering::SeqCst);
    }
}

fn interrupt_scope_active() -> bool {
    INTERRUPT_SCOPES.load(Ordering::SeqCst) > 0
}

/// Consume the pending unscoped SIGINT, if any
fn take_unscoped_sigint() -> bool {
    UNSCOPED_SIGINT.swap(false, Ordering::SeqCst)
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP that terminate tracked
/// children and exit with `128 + signal`. Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    // Registered before the iterator so it runs first inside the handler:
    // the flag is settled before the handler thread can be woken.
    // SAFETY: the action only touches atomics, which is async-signal-safe.
    unsafe {
        signal_hook::low_level::register(SIGINT, || {
            if !interrupt_scope_active() {
                UNSCOPED_SIGINT.store(true, Ordering::SeqCst);
            }
        })?;
    }
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            if sig == SIGINT && !take_unscoped_sigint() {
                debug!("SIGINT delivered to an active interrupt scope");
                continue;
            }

            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };
            info!("Received {} signal, cleaning up...", signal_name);

            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to set up process groups
pub trait CommandProcessGroup {
    /// Run the command in its own process group and deliver SIGTERM to it
    /// if the planner dies first.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe functions
        // (setpgid, prctl) between fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                nix::sys::prctl::set_pdeathsig(Signal::SIGTERM).map_err(std::io::Error::other)
            });
        }
        self
    }
}

/// Serializes unit tests that raise SIGINT or hold an `InterruptScope`
#[cfg(test)]
pub(crate) fn sigint_test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn wait_for_process_death(pid: u32, timeout: Duration) -> bool {
        use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};

        let start = Instant::now();
        let nix_pid = Pid::from_raw(pid as i32);

        while start.elapsed() < timeout {
            match waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, _)) | Ok(WaitStatus::Signaled(_, _, _)) => return true,
                Err(nix::errno::Errno::ECHILD) if !is_process_alive(pid) => return true,
                _ => {}
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();

        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);

        registry.unregister(5678);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_all_kills_process_group() {
        // The sleep is a grandchild of the registered shell; only a group
        // signal reaches it.
        let child = Command::new("sh")
            .args(["-c", "sleep 60; true"])
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sh");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        assert!(is_process_alive(pid));

        registry.terminate_all(Duration::from_millis(500));

        assert!(wait_for_process_death(pid, Duration::from_secs(2)));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_cleanup_initiated_flag_prevents_double_cleanup() {
        let mut registry = ChildRegistry::default();
        registry.register(999_999);

        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);

        registry.register(999_998);
        registry.terminate_all(Duration::from_millis(10));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(999_999));
    }

    #[test]
    fn test_interrupt_scope_counts_and_starts_clear() {
        let _sigint = sigint_test_lock();
        let scope = InterruptScope::enter().expect("register SIGINT flag");
        assert!(interrupt_scope_active());
        assert!(!scope.interrupted());
    }
}
