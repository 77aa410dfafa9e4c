//! Process engine
//!
//! One forked child per task, windowed by launched/completed counts. The
//! parent forks until the window is full, then blocks in `waitpid(-1)` for
//! any child and refills. Children share nothing with the parent: each
//! performs exactly one unit of work and leaves through `_exit`, reporting
//! success (0) or task failure (1) in its exit status.
//!
//! # Fork safety
//!
//! The harness is multithreaded (echo server threads, test harness threads),
//! so a child may only run async-signal-safe code in principle. In practice
//! the child performs no heap allocation: payload and receive buffers are
//! allocated before forking, and the CPU loop touches only the stack. The
//! child never returns into Rust's runtime; destructors and atexit handlers
//! are skipped by `_exit`.

use super::window::Window;
use super::{Engine, Model, RunStats};
use crate::config::WorkloadConfig;
use crate::workload::net::{exchange_blocking, loopback, payload};
use crate::workload::{cpu_work, WorkloadKind};
use crate::Result;
use anyhow::Context;
use std::collections::HashSet;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

const EXIT_SUCCESS: libc::c_int = 0;
const EXIT_TASK_FAILED: libc::c_int = 1;

/// Children forked by one engine invocation
///
/// `waitpid(-1)` returns any child of the process. Pids not in the set
/// belong to someone else and are ignored.
#[derive(Debug, Default)]
struct ChildSet {
    pids: HashSet<libc::pid_t>,
}

impl ChildSet {
    fn insert(&mut self, pid: libc::pid_t) {
        self.pids.insert(pid);
    }

    fn len(&self) -> usize {
        self.pids.len()
    }

    /// Block until one of our children exits; returns whether it succeeded
    fn wait_any(&mut self) -> io::Result<bool> {
        loop {
            let mut status: libc::c_int = 0;
            // SAFETY: `status` is a valid out-pointer for the duration of the call
            let pid = unsafe { libc::waitpid(-1, &mut status, 0) };
            if pid < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if !self.pids.remove(&pid) {
                debug!("ignoring exit of foreign child {}", pid);
                continue;
            }
            return Ok(libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == EXIT_SUCCESS);
        }
    }

    /// Reap every outstanding child, returning how many were collected
    fn reap_all(&mut self) -> usize {
        let mut reaped = 0;
        while !self.pids.is_empty() {
            match self.wait_any() {
                Ok(_) => reaped += 1,
                Err(e) => {
                    warn!("stopped reaping with {} children outstanding: {}", self.pids.len(), e);
                    break;
                }
            }
        }
        reaped
    }
}

/// Fork a child that runs `work` once and exits with its outcome
fn spawn_child<F>(work: &mut F) -> io::Result<libc::pid_t>
where
    F: FnMut() -> bool,
{
    // SAFETY: the child only runs `work` (which does not allocate) and then
    // terminates with `_exit`, never returning to the caller.
    let pid = unsafe { libc::fork() };
    match pid {
        -1 => Err(io::Error::last_os_error()),
        0 => {
            let ok = panic::catch_unwind(AssertUnwindSafe(|| work())).unwrap_or(false);
            let code = if ok { EXIT_SUCCESS } else { EXIT_TASK_FAILED };
            // SAFETY: `_exit` is async-signal-safe and does not return
            unsafe { libc::_exit(code) }
        }
        child => Ok(child),
    }
}

/// Fork one child per task running `work`
fn run_forked<F>(workload: &WorkloadConfig, mut work: F) -> Result<RunStats>
where
    F: FnMut() -> bool,
{
    run_windowed(workload, &mut ChildSet::default(), || spawn_child(&mut work))
}

/// Run `tasks` children through a window of `concurrency`
///
/// On a launch failure every child in `children` is reaped before the error
/// is returned.
fn run_windowed<S>(workload: &WorkloadConfig, children: &mut ChildSet, mut spawn: S) -> Result<RunStats>
where
    S: FnMut() -> io::Result<libc::pid_t>,
{
    let mut window = Window::new(workload.tasks, workload.concurrency);
    let mut failed = 0u64;

    while !window.is_done() {
        while window.can_launch() {
            match spawn() {
                Ok(pid) => {
                    children.insert(pid);
                    window.launch();
                }
                Err(e) => {
                    let outstanding = children.len();
                    let reaped = children.reap_all();
                    return Err(e).with_context(|| {
                        format!(
                            "fork failed after {} launches ({} of {} outstanding children reaped)",
                            window.launched(),
                            reaped,
                            outstanding
                        )
                    });
                }
            }
        }

        let succeeded = children.wait_any().context("Failed to wait for child process")?;
        if !succeeded {
            failed += 1;
        }
        window.complete();
    }

    Ok(RunStats {
        completed: window.completed() as u64,
        failed,
        peak_in_flight: window.peak(),
        checksum: None,
    })
}

/// Forked process engine
#[derive(Debug, Default)]
pub struct ProcessEngine;

impl ProcessEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for ProcessEngine {
    fn model(&self) -> Model {
        Model::Processes
    }

    fn run(&mut self, workload: &WorkloadConfig, kind: WorkloadKind) -> Result<RunStats> {
        match kind {
            WorkloadKind::Cpu => {
                let units = workload.cpu_units;
                run_forked(workload, || {
                    cpu_work(units);
                    true
                })
            }
            WorkloadKind::Io { port } => {
                let addr = loopback(port);
                let timeout = workload.timeout();
                let sent = payload(workload.payload_size);
                let mut received = vec![0u8; workload.payload_size];
                run_forked(workload, || {
                    exchange_blocking(addr, &sent, &mut received, timeout).is_ok()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::EchoServer;
    use std::sync::Mutex;

    // waitpid(-1) would steal children forked by a concurrently running test
    static FORK_LOCK: Mutex<()> = Mutex::new(());

    fn workload(tasks: usize, concurrency: usize) -> WorkloadConfig {
        WorkloadConfig {
            tasks,
            concurrency,
            cpu_units: 10_000,
            payload_size: 256,
            timeout_ms: 5_000,
        }
    }

    #[test]
    fn test_cpu_scenario_a() {
        let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let stats = ProcessEngine::new().run(&workload(10, 3), WorkloadKind::Cpu).unwrap();
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.peak_in_flight, 3);
        assert_eq!(stats.checksum, None);
    }

    #[test]
    fn test_single_task_high_concurrency() {
        let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let stats = ProcessEngine::new().run(&workload(1, 100), WorkloadKind::Cpu).unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.peak_in_flight, 1);
    }

    #[test]
    fn test_child_failure_is_counted() {
        let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let stats = run_forked(&workload(4, 2), || false).unwrap();
        assert_eq!(stats.completed, 4);
        assert_eq!(stats.failed, 4);
    }

    #[test]
    fn test_foreign_child_is_ignored() {
        let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _foreign = std::process::Command::new("true").spawn().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let stats = ProcessEngine::new().run(&workload(6, 2), WorkloadKind::Cpu).unwrap();
        assert_eq!(stats.completed, 6);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.peak_in_flight, 2);
    }

    #[test]
    fn test_fork_failure_reaps_outstanding_children() {
        let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut children = ChildSet::default();
        let mut launches = 0;
        let mut work = || true;
        let err = run_windowed(&workload(5, 3), &mut children, || {
            launches += 1;
            if launches == 3 {
                Err(io::Error::from_raw_os_error(libc::EAGAIN))
            } else {
                spawn_child(&mut work)
            }
        })
        .unwrap_err();

        assert!(err.to_string().contains("after 2 launches"), "{:#}", err);
        assert_eq!(children.len(), 0);
    }

    #[test]
    fn test_io_against_echo_server() {
        let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let server = EchoServer::start(128).unwrap();
        let stats = ProcessEngine::new()
            .run(&workload(10, 3), WorkloadKind::Io { port: server.port() })
            .unwrap();
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.failed, 0);
        assert!(stats.peak_in_flight <= 3);
        server.stop();
    }

    #[test]
    fn test_io_refused_counts_failures() {
        let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let stats = ProcessEngine::new()
            .run(&workload(3, 3), WorkloadKind::Io { port })
            .unwrap();
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.failed, 3);
    }
}
