//! Loopback echo server
//!
//! The I/O benchmarks need a peer that returns every byte it receives. The
//! server listens on an ephemeral `127.0.0.1` port, accepts on a dedicated
//! thread and gives each connection its own echo thread, so it never becomes
//! the bottleneck of the model under test.

use crate::util::socket::listen_loopback;
use crate::Result;
use anyhow::Context;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

const ECHO_BUF_SIZE: usize = 4096;

/// Running echo server
///
/// Dropping the server stops the accept thread. Connection threads that are
/// still echoing finish on their own when their peer closes.
pub struct EchoServer {
    listener: Arc<TcpListener>,
    port: u16,
    stopping: Arc<AtomicBool>,
    accepted: Arc<AtomicU64>,
    accept_thread: Option<JoinHandle<()>>,
}

impl EchoServer {
    /// Bind, listen with `backlog` and start accepting
    pub fn start(backlog: i32) -> Result<Self> {
        let listener = listen_loopback(backlog).context("Failed to bind echo server")?;
        let port = listener
            .local_addr()
            .context("Failed to read echo server address")?
            .port();

        let listener = Arc::new(listener);
        let stopping = Arc::new(AtomicBool::new(false));
        let accepted = Arc::new(AtomicU64::new(0));

        let accept_thread = {
            let listener = Arc::clone(&listener);
            let stopping = Arc::clone(&stopping);
            let accepted = Arc::clone(&accepted);
            thread::Builder::new()
                .name("echo-accept".to_string())
                .spawn(move || accept_loop(&listener, &stopping, &accepted))
                .context("Failed to spawn echo accept thread")?
        };

        debug!("echo server listening on 127.0.0.1:{} (backlog {})", port, backlog);

        Ok(Self {
            listener,
            port,
            stopping,
            accepted,
            accept_thread: Some(accept_thread),
        })
    }

    /// Ephemeral port the server listens on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Stop accepting and join the accept thread
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.accept_thread.take() else {
            return;
        };
        self.stopping.store(true, Ordering::Release);
        // Wakes the blocked accept(2) with EINVAL. The Arc keeps the fd open
        // until the accept thread has returned.
        // SAFETY: the listener fd is valid for as long as `self.listener` lives
        unsafe {
            libc::shutdown(self.listener.as_raw_fd(), libc::SHUT_RDWR);
        }
        if handle.join().is_err() {
            warn!("echo accept thread panicked");
        }
        debug!("echo server on port {} stopped after {} connection(s)", self.port, self.accepted());
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: &TcpListener, stopping: &AtomicBool, accepted: &AtomicU64) {
    loop {
        match listener.accept() {
            Ok((conn, _)) => {
                accepted.fetch_add(1, Ordering::Relaxed);
                let spawned = thread::Builder::new()
                    .name("echo-conn".to_string())
                    .spawn(move || echo(conn));
                if let Err(e) = spawned {
                    warn!("dropping echo connection, thread spawn failed: {}", e);
                }
            }
            Err(_) if stopping.load(Ordering::Acquire) => break,
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted) => {
                continue
            }
            Err(e) => {
                warn!("echo accept failed, no longer accepting: {}", e);
                break;
            }
        }
    }
}

/// Copy every received byte back until the peer closes or an error occurs
fn echo(mut conn: TcpStream) {
    let mut buf = [0u8; ECHO_BUF_SIZE];
    loop {
        let n = match conn.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        if conn.write_all(&buf[..n]).is_err() {
            break;
        }
    }
}
