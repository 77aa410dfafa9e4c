//! Error types for modelbench
//!
//! Errors come in two tiers. [`ReactorError`] means the execution environment
//! is broken (the kernel refused an epoll operation) and the process cannot
//! meaningfully continue. [`TaskError`] describes why a single unit of I/O
//! work failed; engines absorb these, close the task's socket and move on.

use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Fatal reactor failure
#[derive(Error, Debug)]
pub enum ReactorError {
    #[error("epoll_create1 failed: {0}")]
    Create(#[source] io::Error),

    #[error("epoll_ctl({op}) failed for fd {fd}: {source}")]
    Control {
        op: &'static str,
        fd: RawFd,
        source: io::Error,
    },

    #[error("epoll_wait failed: {0}")]
    Wait(#[source] io::Error),
}

/// Failure of a single I/O exchange
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("socket setup failed: {0}")]
    Socket(#[source] io::Error),

    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("send failed after {sent} bytes: {source}")]
    Send { sent: usize, source: io::Error },

    #[error("recv failed after {received} bytes: {source}")]
    Recv { received: usize, source: io::Error },

    #[error("peer closed after {received} of {expected} bytes")]
    PeerClosed { received: usize, expected: usize },

    #[error("echoed payload differs from sent payload")]
    Mismatch,

    #[error("task exceeded its {0}ms deadline")]
    TimedOut(u64),
}
