//! Child processes and their termination.
//!
//! Invoke [`wait`] to obtain an [`Event`], or use the helpers on [`Process`].
//!
//! [`wait`]: fn.wait.html
//! [`Event`]: struct.Event.html
//! [`Process`]: struct.Process.html

use super::signal;
use bitflags::bitflags;
use errno::errno;
use failure::Fail;
use std::fmt;

/// The terminate reasons for a process vanished from the OS or in limbo.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TerminateReason {
    Exit { status: i32 },
    Signal { signal: i32, has_coredump: bool },
}

impl TerminateReason {
    /// Returns `Some(result)` if the status denotes terminated process. Returns
    /// `None` if not this case.
    pub fn decode(status: i32) -> Option<Self> {
        unsafe {
            if libc::WIFEXITED(status) {
                // Bits:
                // - 0-6: 0
                // - 7
                // - 8-15: exit code
                Some(TerminateReason::Exit {
                    status: libc::WEXITSTATUS(status),
                })
            } else if libc::WIFSIGNALED(status) {
                // Bits:
                // - 0-6: terminal signal in [1, 0x7f)
                // - 7: have coredump?
                Some(TerminateReason::Signal {
                    signal: libc::WTERMSIG(status),
                    has_coredump: libc::WCOREDUMP(status),
                })
            } else {
                None
            }
        }
    }

    /// Returns whether the process exited with status 0.
    pub fn success(&self) -> bool {
        *self == TerminateReason::Exit { status: 0 }
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TerminateReason::Exit { status } => write!(f, "exit status {}", status),
            TerminateReason::Signal {
                signal,
                has_coredump,
            } => {
                write!(f, "killed by {}", signal::describe(*signal))?;
                if *has_coredump {
                    write!(f, ", core dumped")?;
                }
                Ok(())
            }
        }
    }
}

/// A child has terminated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Event {
    /// The child which has terminated. It is reaped already.
    pub process: Process,
    pub reason: TerminateReason,
}

/// Error returned by `wait`.
#[derive(Debug, Fail, Clone, Copy, Eq, PartialEq)]
pub enum WaitError {
    #[fail(display = "no child process")]
    NoChild,
    #[fail(display = "no event available")]
    NoEvent,
}

/// Checks for the next termination of a child.
///
/// Blocking mode (`WaitOptions::NONBLOCK` is NOT set):
/// * Wait and returns `Ok(Event)` denoting the event;
/// * Immediately returns `Err(WaitError::NoChild)` if no child exists.
///
/// Nonblocking mode (`WaitOptions::NONBLOCK` is set):
/// * Returns `Ok(event)` if an event is available;
/// * Returns `Err(NoChild)` if no child exists or the child is filtered out;
/// * Returns `Err(NoEvent)` if no event is immediately available.
pub fn wait(target: WaitTarget, options: WaitOptions) -> Result<Event, WaitError> {
    let mut status = 0;
    loop {
        match unsafe { libc::waitpid(target.0, &mut status as _, options.bits()) } {
            -1 => {
                let err = errno();
                match err.0 {
                    libc::ECHILD => return Err(WaitError::NoChild),
                    // Interrupted by signal: retry.
                    libc::EINTR => continue,
                    // EINVAL: the options are built from valid flags only.
                    _ => panic!("unknown waitpid error: {}", err),
                }
            }
            0 => return Err(WaitError::NoEvent),
            pid => {
                // Without WUNTRACED or WCONTINUED, only terminations are
                // reported.
                if let Some(reason) = TerminateReason::decode(status) {
                    return Ok(Event {
                        process: Process::from(pid as u32),
                        reason,
                    });
                }
            }
        }
    }
}

/// Helper for specifying target(s) for `wait`.
pub struct WaitTarget(i32);

impl WaitTarget {
    /// Wait for the child whose process ID is equal to `pid`.
    pub fn by_pid(pid: u32) -> Self {
        Self(pid as _)
    }
}

bitflags! {
    /// Options for invoking `wait`.
    pub struct WaitOptions : i32 {
        /// Only wait child of current thread. If not specified, waits for child
        /// of all threads inside current process.
        const ONLY_CURRENT_THREAD_CHILD = libc::__WNOTHREAD;

        /// Do not wait for the next event. Return immediately even if no event
        /// is available.
        const NONBLOCK = libc::WNOHANG;
    }
}

impl WaitOptions {
    /// Recommended options for just waiting for exit status.
    pub fn default_exit() -> WaitOptions {
        WaitOptions::ONLY_CURRENT_THREAD_CHILD
    }
}

/// Thin wrapper for raw process id.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Process {
    pid: u32,
}

impl Process {
    /// Returns the process id (`getpid()` or `Tgid` in procfs)
    pub fn pid(self) -> u32 {
        self.pid
    }

    /// Blocks until the process terminates, and reaps it.
    pub fn wait_exit(self) -> Result<TerminateReason, WaitError> {
        wait(WaitTarget::by_pid(self.pid), WaitOptions::default_exit()).map(|event| event.reason)
    }

    /// Returns `Some(TerminateReason)` and reaps the process if it has
    /// terminated. Returns `None` if still running.
    pub fn try_wait(self) -> Result<Option<TerminateReason>, WaitError> {
        match wait(
            WaitTarget::by_pid(self.pid),
            WaitOptions::default_exit() | WaitOptions::NONBLOCK,
        ) {
            Ok(event) => Ok(Some(event.reason)),
            Err(WaitError::NoEvent) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl From<u32> for Process {
    fn from(pid: u32) -> Process {
        Process { pid }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::{Command, FdActions, SpawnOptions};
    use std::time::Duration;

    fn spawn_quiet(argv: &[&str]) -> Process {
        let opts = SpawnOptions {
            fd_actions: FdActions::new_with_suppress_all(),
        };
        let mut cmd = Command::new(argv[0]);
        cmd.args(&argv[1..]);
        cmd.spawn(&opts).unwrap()
    }

    #[test]
    fn test_decode() {
        // Exit status lives in bits 8-15.
        assert_eq!(
            TerminateReason::decode(3 << 8),
            Some(TerminateReason::Exit { status: 3 })
        );
        assert_eq!(
            TerminateReason::decode(libc::SIGSEGV | 0x80),
            Some(TerminateReason::Signal {
                signal: libc::SIGSEGV,
                has_coredump: true,
            })
        );
        // Stopped by SIGSTOP.
        assert_eq!(TerminateReason::decode((libc::SIGSTOP << 8) | 0x7f), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(TerminateReason::Exit { status: 4 }.to_string(), "exit status 4");
        let reason = TerminateReason::Signal {
            signal: libc::SIGKILL,
            has_coredump: false,
        };
        assert_eq!(
            reason.to_string(),
            format!("killed by SIGKILL ({})", libc::SIGKILL)
        );
    }

    #[test]
    fn test_wait_without_child() {
        let stranger = Process::from(i32::max_value() as u32);
        assert_eq!(stranger.wait_exit(), Err(WaitError::NoChild));
        assert_eq!(stranger.try_wait(), Err(WaitError::NoChild));
    }

    #[test]
    fn test_try_wait_running() {
        let process = spawn_quiet(&["sleep", "1"]);
        assert_eq!(process.try_wait(), Ok(None));
        assert!(process.wait_exit().unwrap().success());
    }

    #[test]
    fn test_try_wait_exited() {
        let process = spawn_quiet(&["true"]);
        let reason = loop {
            if let Some(reason) = process.try_wait().unwrap() {
                break reason;
            }
            std::thread::sleep(Duration::from_millis(10));
        };
        assert_eq!(reason, TerminateReason::Exit { status: 0 });
        // Reaped by `try_wait`.
        assert_eq!(process.try_wait(), Err(WaitError::NoChild));
    }
}
