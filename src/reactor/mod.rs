//! epoll reactor
//!
//! A thin, singly-owned wrapper over Linux `epoll` that lets state-machine
//! tasks suspend on socket readiness. It offers two suspension points, "await
//! readable" and "await writable", both expressed through [`Reactor::arm`].
//!
//! # Registration model
//!
//! Every registration is one-shot and edge-triggered
//! (`EPOLLONESHOT | EPOLLET`): it fires at most once and must be re-armed
//! before the task may suspend on that descriptor again. Each registration
//! binds a descriptor to a task slot and carries a generation number inside
//! the epoll token; an event whose generation no longer matches the current
//! registration is stale and dropped.
//!
//! Descriptors are owned by the tasks, not by the reactor. A task must call
//! [`Reactor::deregister`] before closing its descriptor so the number can be
//! reused by a later registration.
//!
//! # Implementation
//!
//! Direct syscalls via `libc`; no event-loop crate is involved. `EINTR` from
//! `epoll_wait` is retried, every other failure becomes a [`ReactorError`].

use crate::error::ReactorError;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Maximum events collected per `epoll_wait`
const MAX_EVENTS: usize = 256;

/// Default upper bound for one blocking wait
pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);

/// Index of a task in the dispatcher's arena
pub type Slot = usize;

/// Readiness a task is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Readable,
    Writable,
}

impl Direction {
    fn epoll_flags(self) -> u32 {
        let interest = match self {
            Direction::Readable => libc::EPOLLIN,
            Direction::Writable => libc::EPOLLOUT,
        };
        (interest | libc::EPOLLONESHOT | libc::EPOLLET) as u32
    }
}

/// Receiver of readiness notifications
///
/// Implemented by the task arena that owns the state machines. Callbacks get
/// the reactor back so a resumed task can re-arm or deregister.
pub trait Dispatch {
    /// Resume the task in `slot`, whose `direction` registration fired
    fn resume(&mut self, slot: Slot, direction: Direction, reactor: &mut Reactor) -> Result<(), ReactorError>;

    /// Called once after every wake, including waits that timed out
    fn after_wake(&mut self, _reactor: &mut Reactor) -> Result<(), ReactorError> {
        Ok(())
    }

    /// Return true to make [`Reactor::run_until`] hand control back early
    fn should_yield(&self) -> bool {
        false
    }
}

/// Outstanding-task count shared between a dispatcher and its driver
///
/// Decrements publish with `Release` and reads use `Acquire`, so a driver
/// that observes zero also observes every completed task's effects.
#[derive(Debug, Default)]
pub struct PendingCounter(AtomicUsize);

impl PendingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Release);
    }

    pub fn decrement(&self) {
        let prev = self.0.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "pending counter underflow");
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy)]
enum CtlOp {
    Add,
    Modify,
    Delete,
}

impl CtlOp {
    fn raw(self) -> libc::c_int {
        match self {
            CtlOp::Add => libc::EPOLL_CTL_ADD,
            CtlOp::Modify => libc::EPOLL_CTL_MOD,
            CtlOp::Delete => libc::EPOLL_CTL_DEL,
        }
    }

    fn name(self) -> &'static str {
        match self {
            CtlOp::Add => "add",
            CtlOp::Modify => "mod",
            CtlOp::Delete => "del",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    slot: Slot,
    direction: Direction,
    generation: u32,
    armed: bool,
}

#[inline]
fn token(generation: u32, fd: RawFd) -> u64 {
    ((generation as u64) << 32) | (fd as u32 as u64)
}

#[inline]
fn split_token(token: u64) -> (u32, RawFd) {
    ((token >> 32) as u32, token as u32 as RawFd)
}

/// Singly-owned epoll instance
pub struct Reactor {
    epfd: OwnedFd,
    registrations: HashMap<RawFd, Registration>,
    events: Vec<libc::epoll_event>,
    fired: Vec<(Slot, Direction)>,
    next_generation: u32,
    wait_timeout: Duration,
}

impl Reactor {
    /// Create a reactor with the default one-second wait bound
    pub fn new() -> Result<Self, ReactorError> {
        Self::with_wait_timeout(DEFAULT_WAIT)
    }

    pub fn with_wait_timeout(wait_timeout: Duration) -> Result<Self, ReactorError> {
        // SAFETY: epoll_create1 has no memory-safety preconditions
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(ReactorError::Create(io::Error::last_os_error()));
        }
        // SAFETY: fd was just returned by epoll_create1 and is owned by nobody else
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };

        Ok(Self {
            epfd,
            registrations: HashMap::new(),
            events: vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS],
            fired: Vec::with_capacity(MAX_EVENTS),
            next_generation: 0,
            wait_timeout,
        })
    }

    /// Number of descriptors currently known to the reactor
    pub fn registered(&self) -> usize {
        self.registrations.len()
    }

    /// Suspend `slot` until `fd` becomes ready in `direction`
    ///
    /// The first arm of a descriptor adds it to the epoll set; later arms
    /// modify the existing entry and supersede any earlier registration.
    pub fn arm(&mut self, fd: RawFd, direction: Direction, slot: Slot) -> Result<(), ReactorError> {
        self.next_generation = self.next_generation.wrapping_add(1);
        let generation = self.next_generation;

        let op = if self.registrations.contains_key(&fd) {
            CtlOp::Modify
        } else {
            CtlOp::Add
        };
        let mut event = libc::epoll_event {
            events: direction.epoll_flags(),
            u64: token(generation, fd),
        };
        self.ctl(op, fd, &mut event)?;

        self.registrations.insert(
            fd,
            Registration {
                slot,
                direction,
                generation,
                armed: true,
            },
        );
        Ok(())
    }

    /// Remove `fd` from the epoll set; a no-op for unknown descriptors
    pub fn deregister(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        if self.registrations.remove(&fd).is_none() {
            return Ok(());
        }
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        self.ctl(CtlOp::Delete, fd, &mut event)
    }

    fn ctl(&self, op: CtlOp, fd: RawFd, event: &mut libc::epoll_event) -> Result<(), ReactorError> {
        // SAFETY: epfd is a live epoll descriptor and `event` outlives the call
        let rc = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op.raw(), fd, event) };
        if rc < 0 {
            return Err(ReactorError::Control {
                op: op.name(),
                fd,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Block for up to `timeout` and collect fired registrations into `fired`
    fn wait(&mut self, timeout: Duration) -> Result<(), ReactorError> {
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let n = loop {
            // SAFETY: the events buffer holds MAX_EVENTS initialized entries
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd.as_raw_fd(),
                    self.events.as_mut_ptr(),
                    MAX_EVENTS as libc::c_int,
                    timeout_ms,
                )
            };
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(ReactorError::Wait(err));
            }
        };

        for event in &self.events[..n] {
            let (generation, fd) = split_token(event.u64);
            let Some(reg) = self.registrations.get_mut(&fd) else {
                continue;
            };
            if reg.generation != generation || !reg.armed {
                continue;
            }
            reg.armed = false;
            self.fired.push((reg.slot, reg.direction));
        }
        Ok(())
    }

    /// One wait-and-dispatch round; returns how many tasks were resumed
    ///
    /// Every task whose registration fired is resumed exactly once, then
    /// [`Dispatch::after_wake`] runs.
    pub fn turn<D: Dispatch>(&mut self, timeout: Duration, dispatch: &mut D) -> Result<usize, ReactorError> {
        debug_assert!(self.fired.is_empty());
        self.wait(timeout)?;

        let mut fired = std::mem::take(&mut self.fired);
        let count = fired.len();
        let mut outcome = Ok(());
        for &(slot, direction) in &fired {
            outcome = dispatch.resume(slot, direction, self);
            if outcome.is_err() {
                break;
            }
        }
        fired.clear();
        self.fired = fired;
        outcome?;

        dispatch.after_wake(self)?;
        Ok(count)
    }

    /// Turn until `pending` drops to zero or the dispatcher asks to yield
    pub fn run_until<D: Dispatch>(&mut self, pending: &PendingCounter, dispatch: &mut D) -> Result<(), ReactorError> {
        while pending.get() > 0 {
            self.turn(self.wait_timeout, dispatch)?;
            if dispatch.should_yield() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    const SHORT: Duration = Duration::from_millis(20);

    #[derive(Default)]
    struct Recorder {
        resumed: Vec<(Slot, Direction)>,
        wakes: usize,
        yield_after: Option<usize>,
    }

    impl Dispatch for Recorder {
        fn resume(&mut self, slot: Slot, direction: Direction, _reactor: &mut Reactor) -> Result<(), ReactorError> {
            self.resumed.push((slot, direction));
            Ok(())
        }

        fn after_wake(&mut self, _reactor: &mut Reactor) -> Result<(), ReactorError> {
            self.wakes += 1;
            Ok(())
        }

        fn should_yield(&self) -> bool {
            self.yield_after.is_some_and(|n| self.resumed.len() >= n)
        }
    }

    #[test]
    fn test_token_round_trip() {
        assert_eq!(split_token(token(7, 42)), (7, 42));
        assert_eq!(split_token(token(u32::MAX, 0)), (u32::MAX, 0));
    }

    #[test]
    fn test_registration_fires_once_per_arm() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new().unwrap();
        let mut rec = Recorder::default();

        reactor.arm(a.as_raw_fd(), Direction::Writable, 3).unwrap();
        assert_eq!(reactor.turn(SHORT, &mut rec).unwrap(), 1);
        assert_eq!(rec.resumed, vec![(3, Direction::Writable)]);

        // Still writable, but the registration was consumed
        assert_eq!(reactor.turn(SHORT, &mut rec).unwrap(), 0);
        assert_eq!(rec.resumed.len(), 1);

        reactor.arm(a.as_raw_fd(), Direction::Writable, 3).unwrap();
        assert_eq!(reactor.turn(SHORT, &mut rec).unwrap(), 1);
        assert_eq!(rec.resumed.len(), 2);
        assert_eq!(rec.wakes, 3);
    }

    #[test]
    fn test_readable_waits_for_data() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new().unwrap();
        let mut rec = Recorder::default();

        reactor.arm(b.as_raw_fd(), Direction::Readable, 9).unwrap();
        assert_eq!(reactor.turn(SHORT, &mut rec).unwrap(), 0);

        a.write_all(b"ping").unwrap();
        assert_eq!(reactor.turn(Duration::from_secs(1), &mut rec).unwrap(), 1);
        assert_eq!(rec.resumed, vec![(9, Direction::Readable)]);
    }

    #[test]
    fn test_rearm_supersedes_previous_registration() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new().unwrap();
        let mut rec = Recorder::default();

        reactor.arm(b.as_raw_fd(), Direction::Readable, 1).unwrap();
        reactor.arm(b.as_raw_fd(), Direction::Readable, 2).unwrap();
        a.write_all(b"x").unwrap();
        reactor.turn(Duration::from_secs(1), &mut rec).unwrap();

        assert_eq!(rec.resumed, vec![(2, Direction::Readable)]);
        assert_eq!(reactor.registered(), 1);
    }

    #[test]
    fn test_deregistered_descriptor_never_fires() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new().unwrap();
        let mut rec = Recorder::default();

        reactor.arm(a.as_raw_fd(), Direction::Writable, 0).unwrap();
        reactor.deregister(a.as_raw_fd()).unwrap();
        assert_eq!(reactor.registered(), 0);
        assert_eq!(reactor.turn(SHORT, &mut rec).unwrap(), 0);

        // Unknown descriptors deregister as a no-op
        reactor.deregister(a.as_raw_fd()).unwrap();
    }

    #[test]
    fn test_arm_invalid_descriptor_is_fatal() {
        let mut reactor = Reactor::new().unwrap();
        let err = reactor.arm(-1, Direction::Readable, 0).unwrap_err();
        assert!(matches!(err, ReactorError::Control { op: "add", fd: -1, .. }));
        assert_eq!(reactor.registered(), 0);
    }

    #[test]
    fn test_run_until_stops_on_yield() {
        let (a, _b) = UnixStream::pair().unwrap();
        let (c, _d) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::with_wait_timeout(SHORT).unwrap();
        let pending = PendingCounter::new();
        pending.increment();
        pending.increment();

        reactor.arm(a.as_raw_fd(), Direction::Writable, 0).unwrap();
        reactor.arm(c.as_raw_fd(), Direction::Writable, 1).unwrap();

        let mut rec = Recorder {
            yield_after: Some(1),
            ..Default::default()
        };
        reactor.run_until(&pending, &mut rec).unwrap();
        assert_eq!(rec.resumed.len(), 2);
        assert_eq!(pending.get(), 2);
    }

    #[test]
    fn test_run_until_returns_at_zero_pending() {
        struct Finisher<'a> {
            pending: &'a PendingCounter,
        }

        impl Dispatch for Finisher<'_> {
            fn resume(&mut self, _slot: Slot, _dir: Direction, _reactor: &mut Reactor) -> Result<(), ReactorError> {
                self.pending.decrement();
                Ok(())
            }
        }

        let (a, _b) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::with_wait_timeout(SHORT).unwrap();
        let pending = PendingCounter::new();
        pending.increment();
        reactor.arm(a.as_raw_fd(), Direction::Writable, 0).unwrap();

        reactor.run_until(&pending, &mut Finisher { pending: &pending }).unwrap();
        assert_eq!(pending.get(), 0);
    }
}
