use crate::client::Caller;
use dfuzz_os::process::{Process, TerminateReason, WaitError};
use dfuzz_os::spawn;
use failure::{format_err, Error};
use log::*;

/// Issues exactly `calls` sequential calls, and returns how many were issued.
/// Outcomes are only logged: a failing call never stops the loop.
pub fn run_calls<C: Caller + ?Sized>(caller: &C, calls: u64) -> u64 {
    let mut issued = 0;
    for i in 0..calls {
        match caller.call() {
            Ok(reason) if reason.success() => trace!("call #{}: ok", i),
            Ok(reason) => debug!("call #{}: client {}", i, reason),
            Err(e) => debug!("call #{}: {}", i, e),
        }
        issued += 1;
    }
    issued
}

/// A forked process running [`run_calls`].
///
/// [`run_calls`]: fn.run_calls.html
#[derive(Debug)]
pub struct Worker {
    pub id: usize,
    pub process: Process,
}

impl Worker {
    pub fn launch<C: Caller + ?Sized>(id: usize, caller: &C, calls: u64) -> Result<Self, spawn::Error> {
        let process = spawn::fork(|| {
            let issued = run_calls(caller, calls);
            debug!("worker #{}: {} calls issued", id, issued);
            0
        })?;
        info!("worker #{} started (pid = {}, calls = {})", id, process.pid(), calls);
        Ok(Worker { id, process })
    }

    /// Blocks until the worker finishes.
    pub fn join(self) -> Result<TerminateReason, WaitError> {
        let reason = self.process.wait_exit()?;
        if reason.success() {
            info!("worker #{} finished", self.id);
        } else {
            warn!("worker #{} terminated: {}", self.id, reason);
        }
        Ok(reason)
    }
}

/// Launches `workers` workers through `launch`, then joins every one that
/// started.
///
/// Launching stops at the first failure, but the workers already running are
/// still joined before that failure is returned. A failed join is logged, and
/// the remaining workers are joined anyway.
pub fn run_all<F>(workers: usize, mut launch: F) -> Result<(), Error>
where
    F: FnMut(usize) -> Result<Worker, spawn::Error>,
{
    let mut started = Vec::with_capacity(workers);
    let mut launch_error = None;
    for id in 0..workers {
        match launch(id) {
            Ok(worker) => started.push(worker),
            Err(e) => {
                launch_error = Some(format_err!("cannot start worker #{}: {}", id, e));
                break;
            }
        }
    }

    let mut join_error = None;
    for worker in started {
        let id = worker.id;
        if let Err(e) = worker.join() {
            warn!("cannot join worker #{}: {}", id, e);
            if join_error.is_none() {
                join_error = Some(format_err!("cannot join worker #{}: {}", id, e));
            }
        }
    }

    match launch_error.or(join_error) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Counter {
        calls: Cell<u64>,
        fail: bool,
    }

    impl Caller for Counter {
        fn call(&self) -> Result<TerminateReason, Error> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                Err(format_err!("connection refused"))
            } else {
                Ok(TerminateReason::Exit { status: 4 })
            }
        }
    }

    /// Appends one byte to a file per call, so that calls made in forked
    /// workers are visible to the test.
    struct Recorder {
        path: PathBuf,
    }

    impl Caller for Recorder {
        fn call(&self) -> Result<TerminateReason, Error> {
            let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
            file.write_all(b".")?;
            Ok(TerminateReason::Exit { status: 0 })
        }
    }

    #[test]
    fn test_run_calls() {
        let counter = Counter::default();
        assert_eq!(run_calls(&counter, 17), 17);
        assert_eq!(counter.calls.get(), 17);

        assert_eq!(run_calls(&counter, 0), 0);
        assert_eq!(counter.calls.get(), 17);
    }

    #[test]
    fn test_run_calls_ignores_failures() {
        let counter = Counter {
            fail: true,
            ..Default::default()
        };
        assert_eq!(run_calls(&counter, 5), 5);
        assert_eq!(counter.calls.get(), 5);
    }

    #[test]
    fn test_workers() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder {
            path: dir.path().join("calls"),
        };

        let workers: Vec<_> = (0..2)
            .map(|id| Worker::launch(id, &recorder, 25).unwrap())
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap().success());
        }

        let recorded = std::fs::read(&recorder.path).unwrap();
        assert_eq!(recorded.len(), 50);
    }

    #[test]
    fn test_worker_panic() {
        struct Panicker;
        impl Caller for Panicker {
            fn call(&self) -> Result<TerminateReason, Error> {
                panic!("server gone")
            }
        }

        let worker = Worker::launch(0, &Panicker, 1).unwrap();
        assert_eq!(
            worker.join().unwrap(),
            TerminateReason::Exit {
                status: spawn::PANIC_EXIT_CODE
            }
        );
    }

    #[test]
    fn test_run_all() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder {
            path: dir.path().join("calls"),
        };

        run_all(3, |id| Worker::launch(id, &recorder, 4)).unwrap();
        assert_eq!(std::fs::read(&recorder.path).unwrap().len(), 12);
    }

    #[test]
    fn test_run_all_joins_started_workers() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder {
            path: dir.path().join("calls"),
        };

        let mut pids = vec![];
        let err = run_all(2, |id| {
            if id == 1 {
                return Err(spawn::Error::InsufficientResource);
            }
            let worker = Worker::launch(id, &recorder, 30)?;
            pids.push(worker.process);
            Ok(worker)
        })
        .unwrap_err();
        assert!(err.to_string().starts_with("cannot start worker #1"));

        // Worker #0 ran to completion and has been reaped.
        assert_eq!(std::fs::read(&recorder.path).unwrap().len(), 30);
        assert_eq!(pids.len(), 1);
        assert_eq!(pids[0].try_wait(), Err(WaitError::NoChild));
    }

    #[test]
    fn test_run_all_keeps_joining() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder {
            path: dir.path().join("calls"),
        };

        // Worker #0 has been reaped already, so joining it fails.
        let err = run_all(2, |id| {
            let worker = Worker::launch(id, &recorder, 5)?;
            if id == 0 {
                worker.process.wait_exit().unwrap();
            }
            Ok(worker)
        })
        .unwrap_err();
        assert!(err.to_string().starts_with("cannot join worker #0"));
        assert_eq!(std::fs::read(&recorder.path).unwrap().len(), 10);
    }
}
