//! Spawn a new process.
use super::process::Process;
use errno::{errno, Errno};
use failure::Fail;
use log::*;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::panic::{self, AssertUnwindSafe};

/// Exit code of a forked child whose body panicked.
pub const PANIC_EXIT_CODE: i32 = 101;

/// Exit code of a child that failed before or during `exec`.
const EXEC_FAILURE_EXIT_CODE: i32 = 127;

/// Configure and spawn processes.
#[derive(Debug, Clone)]
pub struct Command {
    program: CString,
    args: Vec<CString>,
    /// Used to report error on `exec` when `program` or `args` contains NULL.
    has_null: bool,
}

/// Advanced configurations for spawning a process ([`Command.spawn`]).
///
/// [`Command.spawn`]: struct.Command.html#method.spawn
#[derive(Debug)]
pub struct SpawnOptions {
    pub fd_actions: FdActions,
}

#[derive(Debug, Clone, Copy)]
enum FdActionKind {
    Preserve,
    Dup(i32),
    Suppress,
}

/// Used to manipulate file descriptors in the child process.
///
/// Descriptors without an action are inherited, except the ones marked
/// `FD_CLOEXEC` (which libstd sets on everything it opens).
#[derive(Debug, Clone)]
pub struct FdActions {
    // Optimize for a small number of actions
    actions: Vec<(i32, FdActionKind)>,
}

impl FdActions {
    /// Constructs an `FdActions` which redirects `/dev/null` to stdin, stdout,
    /// and stderr.
    pub fn new_with_suppress_all() -> Self {
        let actions = vec![
            (libc::STDIN_FILENO, FdActionKind::Suppress),
            (libc::STDOUT_FILENO, FdActionKind::Suppress),
            (libc::STDERR_FILENO, FdActionKind::Suppress),
        ];
        FdActions { actions }
    }

    /// Constructs an `FdActions` which only preserves stderr. stdin and stdout
    /// are suppressed.
    pub fn new_with_stderr_only() -> Self {
        let actions = vec![
            (libc::STDIN_FILENO, FdActionKind::Suppress),
            (libc::STDOUT_FILENO, FdActionKind::Suppress),
            (libc::STDERR_FILENO, FdActionKind::Preserve),
        ];
        FdActions { actions }
    }

    /// Close the fd, and make it a duplicate of the `old`-fd. In other words,
    /// replace `fd` with `old`.
    pub fn add_dup(&mut self, new_fd: i32, old_fd: i32) -> &mut Self {
        self.set(new_fd, FdActionKind::Dup(old_fd))
    }

    /// Later actions on the same fd replace earlier ones.
    fn set(&mut self, fd: i32, kind: FdActionKind) -> &mut Self {
        self.actions.retain(|(action_fd, _)| *action_fd != fd);
        self.actions.push((fd, kind));
        self
    }

    /// Executes the actions (in the child process). Only async-signal-safe
    /// functions are called.
    unsafe fn execute(&self) -> Result<(), ()> {
        let mut dev_null_fd = -1i32;

        for (fd, action_kind) in &self.actions {
            match action_kind {
                FdActionKind::Preserve => {}
                FdActionKind::Dup(old) => {
                    if libc::dup2(*old, *fd) == -1 {
                        return Err(());
                    }
                    // dup2 is a no-op when both are equal, and FD_CLOEXEC
                    // survives then.
                    if old == fd && libc::fcntl(*fd, libc::F_SETFD, 0) == -1 {
                        return Err(());
                    }
                }
                FdActionKind::Suppress => {
                    if dev_null_fd == -1 {
                        dev_null_fd = libc::open(
                            b"/dev/null\0".as_ptr() as _,
                            libc::O_RDWR | libc::O_CLOEXEC,
                        );
                        if dev_null_fd == -1 {
                            return Err(());
                        }
                    }
                    if libc::dup2(dev_null_fd, *fd) == -1 {
                        return Err(());
                    }
                }
            }
        }

        Ok(())
    }
}

/// Error type for spawning.
#[derive(Debug, Fail, Clone, Copy, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Error {
    #[fail(display = "program path or arguments contains NULL")]
    HasNull,
    #[fail(display = "cannot reset signal mask")]
    Sigmask,
    #[fail(display = "cannot find the executable, interpreter, or shared library")]
    NotFound,
    #[fail(display = "path resolution is denied, or the execution permission is missing")]
    PermissionDenied,
    #[fail(display = "executable format is not recognized")]
    NotExecutable,
    #[fail(display = "cannot complete file descriptor actions")]
    FdAction,
    #[fail(display = "insufficient system resource")]
    InsufficientResource,
    #[fail(display = "other execution errors for execve")]
    OtherExec,
}

impl Command {
    /// Constructs a new `Command` for launching `program`, with the following
    /// default configuration:
    ///
    /// * No arguments to the program
    /// * Inherit the current process's environment
    /// * Inherit the current process's working directory
    ///
    /// A `program` without `/` is searched in `PATH`.
    pub fn new<S: AsRef<OsStr>>(program: S) -> Command {
        let mut has_null = false;
        let program = to_cstring(program.as_ref(), &mut has_null);
        Command {
            has_null,
            program,
            args: Default::default(),
        }
    }

    /// Adds an argument to pass to the program.
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Command {
        self.args.push(to_cstring(arg.as_ref(), &mut self.has_null));
        self
    }

    /// Adds multiple arguments to pass to the program.
    pub fn args<I: IntoIterator<Item = S>, S: AsRef<OsStr>>(&mut self, args: I) -> &mut Command {
        let mut has_null = self.has_null;
        self.args.extend(
            args.into_iter()
                .map(|arg| to_cstring(arg.as_ref(), &mut has_null)),
        );
        self.has_null = has_null;
        self
    }

    /// Returns the program followed by the arguments.
    pub fn argv(&self) -> Vec<&OsStr> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|arg| OsStr::from_bytes(arg.as_bytes()))
            .collect()
    }

    /// Really do the fork & exec stuff.
    unsafe fn exec(&self, opts: &SpawnOptions) -> Result<(u32, File), Error> {
        if self.has_null {
            return Err(Error::HasNull);
        }

        // Everything the child touches is allocated before fork.
        let program = self.program.as_ptr();
        let args: Vec<*const libc::c_char> = std::iter::once(program)
            .chain(self.args.iter().map(|arg| arg.as_ptr()))
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        let (reader, writer) = match pipe2() {
            Ok(pipes) => pipes,
            Err(_errno) => return Err(Error::InsufficientResource),
        };

        let ret = libc::fork();
        if ret != 0 {
            return match ret {
                // Fork has failed.
                -1 => Err(Error::InsufficientResource),
                // We are in the parent process.
                pid => Ok((pid as _, reader)),
            };
        }

        // fork() = 0: we are in the child process. The writer stays open until
        // `execvp` succeeds and the kernel closes it (O_CLOEXEC).
        if opts.fd_actions.execute().is_err() {
            child_panic(&writer, Error::FdAction);
        }

        // Clear sigmask.
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        if libc::pthread_sigmask(libc::SIG_SETMASK, &set, std::ptr::null_mut()) != 0 {
            child_panic(&writer, Error::Sigmask);
        }

        libc::execvp(program, args.as_ptr());

        // If we have reached here, exec has encountered error.
        let reason = match errno().0 {
            libc::ENOENT | libc::ENOTDIR => Error::NotFound,
            libc::EACCES => Error::PermissionDenied,
            libc::ENOEXEC => Error::NotExecutable,
            libc::ENOMEM | libc::E2BIG => Error::InsufficientResource,
            _ => Error::OtherExec,
        };
        child_panic(&writer, reason);
    }

    /// Spawns a new process.
    pub fn spawn(&self, opts: &SpawnOptions) -> Result<Process, Error> {
        let (pid, mut reader) = unsafe { self.exec(opts) }?;

        // Read the pipe for error in child process.
        let mut buf = [0u8; 1];
        let len = loop {
            match reader.read(&mut buf) {
                Ok(len) => break len,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break 0,
            }
        };

        if len == 0 {
            // Everything goes smoothly. The child process is replaced with the
            // target program, and the pipe is closed without sending anything.
            trace!(target: "spawn", "spawned {:?} as {}", self.program, pid);
            Ok(pid.into())
        } else {
            // Errors occur while preparing or doing execve. The cause is sent
            // through the pipe, and the child has exited.
            if let Err(e) = Process::from(pid).wait_exit() {
                debug!(target: "spawn", "cannot reap failed child {}: {}", pid, e);
            }
            let error = Error::from_u8(buf[0]).unwrap_or(Error::OtherExec);
            debug!(target: "spawn", "cannot spawn {:?}: {}", self.program, error);
            Err(error)
        }
    }
}

/// Forks a child process which runs `body`, and exits with the code `body`
/// returns, or [`PANIC_EXIT_CODE`] if `body` panics.
///
/// The child is a copy of a possibly multi-threaded parent: only the calling
/// thread survives, so `body` must not rely on locks other threads may hold.
///
/// [`PANIC_EXIT_CODE`]: constant.PANIC_EXIT_CODE.html
pub fn fork<F: FnOnce() -> i32>(body: F) -> Result<Process, Error> {
    match unsafe { libc::fork() } {
        -1 => Err(Error::InsufficientResource),
        0 => {
            let code = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(PANIC_EXIT_CODE);
            unsafe { libc::_exit(code) }
        }
        pid => Ok(Process::from(pid as u32)),
    }
}

fn to_cstring(s: &OsStr, has_null: &mut bool) -> CString {
    CString::new(s.as_bytes()).unwrap_or_else(|_| {
        *has_null = true;
        CString::default()
    })
}

/// Returns (reader, writer)
unsafe fn pipe2() -> Result<(File, File), Errno> {
    let mut fds = [0; 2];
    match libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) {
        0 => (),
        _error => return Err(errno()),
    }
    let reader = File::from_raw_fd(fds[0]);
    let writer = File::from_raw_fd(fds[1]);
    Ok((reader, writer))
}

fn child_panic(file: &File, error: Error) -> ! {
    let code = [error as u8];
    unsafe {
        libc::write(file.as_raw_fd(), code.as_ptr() as _, 1);
        libc::_exit(EXEC_FAILURE_EXIT_CODE);
    }
}
