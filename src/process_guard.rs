//! Tool process isolation and operator interrupts
//!
//! Tools run in their own process group, so a Ctrl+C typed at the terminal
//! reaches only the installer and never a running `mkfs`, `cryptsetup` or
//! `pacstrap`. Signals are turned into an interrupt request that the pipeline
//! honours between steps; a step that has started always runs to completion.

use nix::unistd::Pid;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

static RUNNING_TOOLS: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Tool processes currently running, keyed by PID
#[derive(Debug, Default)]
pub struct ChildRegistry {
    tools: BTreeMap<u32, String>,
}

impl ChildRegistry {
    /// Registry shared by every `SystemExecutor` in the process
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        RUNNING_TOOLS
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn started(&mut self, pid: u32, program: &str) {
        log::debug!("{} started as PID {}", program, pid);
        self.tools.insert(pid, program.to_string());
    }

    pub fn finished(&mut self, pid: u32) {
        if let Some(program) = self.tools.remove(&pid) {
            log::debug!("{} (PID {}) exited", program, pid);
        }
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// `program (pid N)` for each running tool, oldest PID first
    pub fn describe(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|(pid, program)| format!("{program} (pid {pid})"))
            .collect()
    }
}

/// Shared flag raised when the operator asks the installer to stop.
///
/// Remembers the first signal that raised it; 0 means not raised.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicI32>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop at the next step boundary
    pub fn request(&self) {
        self.raise(SIGINT);
    }

    fn raise(&self, signal: i32) {
        let _ = self
            .0
            .compare_exchange(0, signal, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst) != 0
    }

    /// Name of the signal that raised the flag
    pub fn signal_name(&self) -> Option<&'static str> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            SIGINT => Some("SIGINT"),
            SIGTERM => Some("SIGTERM"),
            SIGHUP => Some("SIGHUP"),
            _ => Some("signal"),
        }
    }
}

/// Route SIGINT, SIGTERM and SIGHUP into `flag`. Nothing is killed.
pub fn init_signal_handlers(flag: InterruptFlag) -> Result<(), std::io::Error> {
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        for signal in signals.forever() {
            flag.raise(signal);

            let running = ChildRegistry::global()
                .lock()
                .map(|r| r.describe())
                .unwrap_or_default();
            if running.is_empty() {
                log::warn!(
                    "Received {}, stopping before the next step",
                    flag.signal_name().unwrap_or("signal")
                );
            } else {
                log::warn!(
                    "Received {}, stopping once {} finishes",
                    flag.signal_name().unwrap_or("signal"),
                    running.join(", ")
                );
            }
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Configure the command to run in its own process group
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid is async-signal-safe and touches no parent state
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                Ok(())
            });
        }
        self
    }
}
