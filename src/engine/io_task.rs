//! Reactor-driven I/O coroutines
//!
//! Each I/O task is an explicit state machine living in a slot of a
//! [`TaskArena`]. Resuming a task advances it as far as the socket allows;
//! when an operation would block, the task arms a one-shot registration on
//! the [`Reactor`] and suspends. The reactor resumes it when the descriptor
//! becomes ready.
//!
//! ```text
//! Connecting ──▶ AwaitingConnect ──▶ Sending ⇄ AwaitingSend
//!                                       │
//!                                       ▼
//!                       Done ◀── Receiving ⇄ AwaitingRecv
//!
//!         (any state) ──▶ Failed
//! ```
//!
//! Whatever the outcome, a finished task is deregistered, its socket closed,
//! and the shared [`PendingCounter`] decremented exactly once.

use super::window::Window;
use super::RunStats;
use crate::config::WorkloadConfig;
use crate::error::{ReactorError, TaskError};
use crate::reactor::{Direction, Dispatch, PendingCounter, Reactor, Slot};
use crate::util::socket::{connect_nonblocking, nonblocking_stream, ConnectStatus};
use crate::workload::net::{loopback, payload};
use crate::Result;
use std::io::{self, Read, Write};
use std::net::{SocketAddrV4, TcpStream};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};
use tracing::debug;

/// Position of a task in its exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    Connecting,
    AwaitingConnect,
    Sending,
    AwaitingSend,
    Receiving,
    AwaitingRecv,
    Done,
    Failed,
}

/// Result of one resumption
#[derive(Debug)]
pub enum Step {
    /// Suspended on a reactor registration
    Pending,
    /// Reached a terminal state
    Finished(std::result::Result<(), TaskError>),
}

/// Parameters shared by every task of one run
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub addr: SocketAddrV4,
    pub payload: &'a [u8],
    pub timeout: Duration,
}

/// One echo exchange as a resumable state machine
#[derive(Debug)]
pub struct IoTask {
    state: IoState,
    stream: Option<TcpStream>,
    sent: usize,
    received: usize,
    recv_buf: Vec<u8>,
    deadline: Instant,
}

impl IoTask {
    pub fn new(payload_size: usize, deadline: Instant) -> Self {
        Self {
            state: IoState::Connecting,
            stream: None,
            sent: 0,
            received: 0,
            recv_buf: vec![0u8; payload_size],
            deadline,
        }
    }

    pub fn state(&self) -> IoState {
        self.state
    }

    /// Bytes echoed back so far
    pub fn received(&self) -> &[u8] {
        &self.recv_buf[..self.received]
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    fn fail(&mut self, err: TaskError) -> Step {
        self.state = IoState::Failed;
        Step::Finished(Err(err))
    }

    fn suspend(
        &mut self,
        reactor: &mut Reactor,
        slot: Slot,
        direction: Direction,
        state: IoState,
    ) -> std::result::Result<Step, ReactorError> {
        match &self.stream {
            Some(stream) => {
                reactor.arm(stream.as_raw_fd(), direction, slot)?;
                self.state = state;
                Ok(Step::Pending)
            }
            None => Ok(self.fail(TaskError::Socket(io::ErrorKind::NotConnected.into()))),
        }
    }

    /// Advance until the task blocks or finishes
    ///
    /// Only reactor failures are returned as errors; everything that goes
    /// wrong with the exchange itself ends the task as `Finished(Err(_))`.
    pub fn resume(
        &mut self,
        slot: Slot,
        ctx: &TaskContext<'_>,
        reactor: &mut Reactor,
    ) -> std::result::Result<Step, ReactorError> {
        loop {
            match self.state {
                IoState::Connecting => {
                    let stream = match nonblocking_stream() {
                        Ok(stream) => stream,
                        Err(e) => return Ok(self.fail(TaskError::Socket(e))),
                    };
                    let status = connect_nonblocking(&stream, ctx.addr);
                    self.stream = Some(stream);
                    match status {
                        Ok(ConnectStatus::Connected) => self.state = IoState::Sending,
                        Ok(ConnectStatus::InProgress) => {
                            return self.suspend(reactor, slot, Direction::Writable, IoState::AwaitingConnect)
                        }
                        Err(e) => return Ok(self.fail(TaskError::Connect(e))),
                    }
                }

                IoState::AwaitingConnect => {
                    let Some(stream) = self.stream.as_ref() else {
                        return Ok(self.fail(TaskError::Connect(io::ErrorKind::NotConnected.into())));
                    };
                    match stream.take_error() {
                        Ok(None) => self.state = IoState::Sending,
                        Ok(Some(e)) | Err(e) => return Ok(self.fail(TaskError::Connect(e))),
                    }
                }

                IoState::Sending | IoState::AwaitingSend => {
                    let Some(stream) = self.stream.as_mut() else {
                        return Ok(self.fail(TaskError::Socket(io::ErrorKind::NotConnected.into())));
                    };
                    while self.sent < ctx.payload.len() {
                        match stream.write(&ctx.payload[self.sent..]) {
                            Ok(0) => {
                                let sent = self.sent;
                                return Ok(self.fail(TaskError::Send {
                                    sent,
                                    source: io::ErrorKind::WriteZero.into(),
                                }));
                            }
                            Ok(n) => self.sent += n,
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                                return self.suspend(reactor, slot, Direction::Writable, IoState::AwaitingSend)
                            }
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                            Err(source) => {
                                let sent = self.sent;
                                return Ok(self.fail(TaskError::Send { sent, source }));
                            }
                        }
                    }
                    self.state = IoState::Receiving;
                }

                IoState::Receiving | IoState::AwaitingRecv => {
                    let Some(stream) = self.stream.as_mut() else {
                        return Ok(self.fail(TaskError::Socket(io::ErrorKind::NotConnected.into())));
                    };
                    let expected = self.recv_buf.len();
                    while self.received < expected {
                        match stream.read(&mut self.recv_buf[self.received..]) {
                            Ok(0) => {
                                let received = self.received;
                                return Ok(self.fail(TaskError::PeerClosed { received, expected }));
                            }
                            Ok(n) => self.received += n,
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                                return self.suspend(reactor, slot, Direction::Readable, IoState::AwaitingRecv)
                            }
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                            Err(source) => {
                                let received = self.received;
                                return Ok(self.fail(TaskError::Recv { received, source }));
                            }
                        }
                    }
                    if self.recv_buf != ctx.payload {
                        return Ok(self.fail(TaskError::Mismatch));
                    }
                    self.state = IoState::Done;
                    return Ok(Step::Finished(Ok(())));
                }

                // Terminal tasks report again so a stray wakeup still frees the slot
                IoState::Done => return Ok(Step::Finished(Ok(()))),
                IoState::Failed => {
                    return Ok(Step::Finished(Err(TaskError::Socket(io::ErrorKind::NotConnected.into()))))
                }
            }
        }
    }

    /// Deregister and close the socket
    pub fn close(&mut self, reactor: &mut Reactor) -> std::result::Result<(), ReactorError> {
        match self.stream.take() {
            Some(stream) => reactor.deregister(stream.as_raw_fd()),
            None => Ok(()),
        }
    }
}

/// Slot arena owning the in-flight tasks of one run
pub struct TaskArena<'a> {
    tasks: Vec<Option<IoTask>>,
    free: Vec<Slot>,
    ctx: TaskContext<'a>,
    pending: &'a PendingCounter,
    failed: u64,
    finished_since_refill: usize,
    refill_wanted: bool,
}

impl<'a> TaskArena<'a> {
    pub fn new(capacity: usize, ctx: TaskContext<'a>, pending: &'a PendingCounter) -> Self {
        Self {
            tasks: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            ctx,
            pending,
            failed: 0,
            finished_since_refill: 0,
            refill_wanted: false,
        }
    }

    /// Tasks that ended in failure so far
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Start a new task and resume it once
    pub fn launch(&mut self, reactor: &mut Reactor) -> std::result::Result<(), ReactorError> {
        let task = IoTask::new(self.ctx.payload.len(), Instant::now() + self.ctx.timeout);
        let slot = match self.free.pop() {
            Some(slot) => {
                self.tasks[slot] = Some(task);
                slot
            }
            None => {
                self.tasks.push(Some(task));
                self.tasks.len() - 1
            }
        };
        self.pending.increment();
        self.drive(slot, reactor)
    }

    /// Start a scheduling round; `wanted` says whether unlaunched tasks remain
    pub fn begin_round(&mut self, wanted: bool) {
        self.refill_wanted = wanted;
        self.finished_since_refill = 0;
    }

    fn drive(&mut self, slot: Slot, reactor: &mut Reactor) -> std::result::Result<(), ReactorError> {
        let Some(task) = self.tasks.get_mut(slot).and_then(Option::as_mut) else {
            return Ok(());
        };
        match task.resume(slot, &self.ctx, reactor)? {
            Step::Pending => Ok(()),
            Step::Finished(outcome) => self.finish(slot, outcome, reactor),
        }
    }

    fn finish(
        &mut self,
        slot: Slot,
        outcome: std::result::Result<(), TaskError>,
        reactor: &mut Reactor,
    ) -> std::result::Result<(), ReactorError> {
        let Some(mut task) = self.tasks.get_mut(slot).and_then(Option::take) else {
            return Ok(());
        };
        self.free.push(slot);
        let closed = task.close(reactor);
        self.pending.decrement();
        self.finished_since_refill += 1;
        if let Err(e) = outcome {
            self.failed += 1;
            debug!("io task in slot {} failed: {}", slot, e);
        }
        closed
    }
}

impl Dispatch for TaskArena<'_> {
    fn resume(&mut self, slot: Slot, _direction: Direction, reactor: &mut Reactor) -> std::result::Result<(), ReactorError> {
        self.drive(slot, reactor)
    }

    /// Fail every task whose deadline has passed
    fn after_wake(&mut self, reactor: &mut Reactor) -> std::result::Result<(), ReactorError> {
        let now = Instant::now();
        let timeout_ms = self.ctx.timeout.as_millis() as u64;
        for slot in 0..self.tasks.len() {
            let expired = self.tasks[slot].as_ref().is_some_and(|t| t.is_expired(now));
            if expired {
                self.finish(slot, Err(TaskError::TimedOut(timeout_ms)), reactor)?;
            }
        }
        Ok(())
    }

    fn should_yield(&self) -> bool {
        self.refill_wanted && self.finished_since_refill > 0
    }
}

/// Run the I/O workload on a single thread driven by one reactor
///
/// Launches up to `concurrency` tasks, drives the reactor until at least one
/// finishes (or all do), accounts `in_flight - pending` completions and
/// refills, until every task has been launched and finished.
pub fn run_io_coroutines(workload: &WorkloadConfig, port: u16) -> Result<RunStats> {
    let payload = payload(workload.payload_size);
    let pending = PendingCounter::new();
    let mut reactor = Reactor::new()?;
    let ctx = TaskContext {
        addr: loopback(port),
        payload: &payload,
        timeout: workload.timeout(),
    };
    let mut arena = TaskArena::new(workload.concurrency.min(workload.tasks), ctx, &pending);
    let mut window = Window::new(workload.tasks, workload.concurrency);
    let mut rounds = 0u64;

    loop {
        while window.can_launch() {
            window.launch();
            arena.launch(&mut reactor)?;
        }

        // Tasks may have finished synchronously during launch
        if pending.get() == window.in_flight() {
            arena.begin_round(window.remaining() > 0);
            reactor.run_until(&pending, &mut arena)?;
        }
        rounds += 1;

        window.complete_many(window.in_flight() - pending.get());
        if window.is_done() {
            break;
        }
    }

    debug!(
        "io coroutines finished {} tasks ({} failed) in {} rounds",
        window.completed(),
        arena.failed(),
        rounds
    );

    Ok(RunStats {
        completed: window.completed() as u64,
        failed: arena.failed(),
        peak_in_flight: window.peak(),
        checksum: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::EchoServer;
    use std::net::TcpListener;
    use std::thread;

    /// Drives one task to completion outside an arena
    struct Single<'a> {
        task: IoTask,
        ctx: TaskContext<'a>,
        outcome: Option<std::result::Result<(), TaskError>>,
    }

    impl<'a> Single<'a> {
        fn run(addr: SocketAddrV4, payload: &'a [u8]) -> Self {
            let ctx = TaskContext {
                addr,
                payload,
                timeout: Duration::from_secs(5),
            };
            let mut single = Single {
                task: IoTask::new(payload.len(), Instant::now() + ctx.timeout),
                ctx,
                outcome: None,
            };
            let mut reactor = Reactor::new().unwrap();
            single.resume(0, Direction::Writable, &mut reactor).unwrap();
            while single.outcome.is_none() {
                reactor.turn(Duration::from_secs(1), &mut single).unwrap();
            }
            single.task.close(&mut reactor).unwrap();
            assert_eq!(reactor.registered(), 0);
            single
        }
    }

    impl Dispatch for Single<'_> {
        fn resume(&mut self, slot: Slot, _dir: Direction, reactor: &mut Reactor) -> std::result::Result<(), ReactorError> {
            if let Step::Finished(outcome) = self.task.resume(slot, &self.ctx, reactor)? {
                self.outcome = Some(outcome);
            }
            Ok(())
        }
    }

    fn closed_port() -> u16 {
        TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    fn workload(tasks: usize, concurrency: usize, timeout_ms: u64) -> WorkloadConfig {
        WorkloadConfig {
            tasks,
            concurrency,
            payload_size: 256,
            timeout_ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip_256_bytes() {
        let server = EchoServer::start(64).unwrap();
        let sent = payload(256);
        let single = Single::run(loopback(server.port()), &sent);

        assert!(matches!(single.outcome, Some(Ok(()))));
        assert_eq!(single.task.state(), IoState::Done);
        assert_eq!(single.task.received().len(), 256);
        assert_eq!(single.task.received(), &sent[..]);
    }

    #[test]
    fn test_terminal_task_resumes_as_finished() {
        let server = EchoServer::start(64).unwrap();
        let sent = payload(16);
        let mut done = Single::run(loopback(server.port()), &sent);
        let mut reactor = Reactor::new().unwrap();
        let step = done.task.resume(0, &done.ctx, &mut reactor).unwrap();
        assert!(matches!(step, Step::Finished(Ok(()))));
        assert_eq!(done.task.state(), IoState::Done);

        let mut failed = Single::run(loopback(closed_port()), &sent);
        assert_eq!(failed.task.state(), IoState::Failed);
        let step = failed.task.resume(0, &failed.ctx, &mut reactor).unwrap();
        assert!(matches!(step, Step::Finished(Err(_))));
        assert_eq!(reactor.registered(), 0);
    }

    #[test]
    fn test_large_payload_suspends_and_completes() {
        let server = EchoServer::start(64).unwrap();
        let sent = payload(64 * 1024);
        let single = Single::run(loopback(server.port()), &sent);

        assert!(matches!(single.outcome, Some(Ok(()))));
        assert_eq!(single.task.received().len(), sent.len());
    }

    #[test]
    fn test_refused_connection_fails_task() {
        let sent = payload(16);
        let single = Single::run(loopback(closed_port()), &sent);

        assert!(matches!(single.outcome, Some(Err(TaskError::Connect(_)))));
        assert_eq!(single.task.state(), IoState::Failed);
    }

    #[test]
    fn test_wrong_echo_is_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 8];
            conn.read_exact(&mut buf).unwrap();
            conn.write_all(b"yyyyyyyy").unwrap();
        });

        let sent = payload(8);
        let single = Single::run(loopback(port), &sent);
        peer.join().unwrap();

        assert!(matches!(single.outcome, Some(Err(TaskError::Mismatch))));
    }

    #[test]
    fn test_early_close_is_peer_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 8];
            conn.read_exact(&mut buf).unwrap();
            conn.write_all(&buf[..3]).unwrap();
        });

        let sent = payload(8);
        let single = Single::run(loopback(port), &sent);
        peer.join().unwrap();

        assert!(matches!(
            single.outcome,
            Some(Err(TaskError::PeerClosed { received: 3, expected: 8 }))
        ));
    }

    #[test]
    fn test_engine_scenario_a() {
        let server = EchoServer::start(64).unwrap();
        let stats = run_io_coroutines(&workload(10, 3, 5_000), server.port()).unwrap();
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.failed, 0);
        assert!(stats.peak_in_flight <= 3);
        assert_eq!(stats.checksum, None);
    }

    #[test]
    fn test_engine_scenario_c() {
        let server = EchoServer::start(64).unwrap();
        let stats = run_io_coroutines(&workload(1, 100, 5_000), server.port()).unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.peak_in_flight, 1);
    }

    #[test]
    fn test_engine_many_tasks() {
        let server = EchoServer::start(512).unwrap();
        let stats = run_io_coroutines(&workload(300, 50, 5_000), server.port()).unwrap();
        assert_eq!(stats.completed, 300);
        assert_eq!(stats.failed, 0);
        assert!(stats.peak_in_flight <= 50);
    }

    #[test]
    fn test_engine_counts_refused_as_failed() {
        let stats = run_io_coroutines(&workload(5, 2, 5_000), closed_port()).unwrap();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.failed, 5);
    }

    #[test]
    fn test_engine_expires_silent_peer() {
        // Connections complete via the backlog but nothing is ever echoed
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let started = Instant::now();
        let stats = run_io_coroutines(&workload(2, 2, 50), port).unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 2);
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }
}
