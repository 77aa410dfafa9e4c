//! Raw socket helpers
//!
//! `std::net` covers blocking connects and ordinary reads and writes, but it
//! cannot start a non-blocking connect or choose the listen backlog. These
//! helpers issue the few syscalls std does not expose and hand the descriptor
//! back as a std type, so ownership (and closing) stays with std.

use std::io;
use std::mem;
use std::net::{SocketAddrV4, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

/// Outcome of starting a non-blocking connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// The connection completed synchronously (common on loopback)
    Connected,
    /// The connection is underway; wait for writability, then check `SO_ERROR`
    InProgress,
}

fn sockaddr_in(addr: SocketAddrV4) -> libc::sockaddr_in {
    // SAFETY: sockaddr_in is plain old data, all-zero is a valid value
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = addr.port().to_be();
    sa.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    sa
}

fn new_socket(flags: libc::c_int) -> io::Result<OwnedFd> {
    // SAFETY: socket(2) has no memory-safety preconditions
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC | flags, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by socket(2) and is owned by nobody else
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Create an unconnected, non-blocking IPv4 TCP socket
pub fn nonblocking_stream() -> io::Result<TcpStream> {
    new_socket(libc::SOCK_NONBLOCK).map(TcpStream::from)
}

/// Start connecting `stream` to `addr` without blocking
pub fn connect_nonblocking(stream: &TcpStream, addr: SocketAddrV4) -> io::Result<ConnectStatus> {
    let sa = sockaddr_in(addr);
    loop {
        // SAFETY: sa is a valid sockaddr_in and the length matches it
        let rc = unsafe {
            libc::connect(
                stream.as_raw_fd(),
                &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            return Ok(ConnectStatus::Connected);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINPROGRESS) => return Ok(ConnectStatus::InProgress),
            Some(libc::EINTR) => continue,
            _ => return Err(err),
        }
    }
}

/// Bind a listener on `127.0.0.1:0` with `SO_REUSEADDR` and the given backlog
pub fn listen_loopback(backlog: i32) -> io::Result<TcpListener> {
    let fd = new_socket(0)?;
    let one: libc::c_int = 1;
    // SAFETY: option value points at a live c_int of the advertised size
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    let sa = sockaddr_in(SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, 0));
    // SAFETY: sa is a valid sockaddr_in and the length matches it
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &sa as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: listen(2) on an owned, bound socket
    if unsafe { libc::listen(fd.as_raw_fd(), backlog) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(TcpListener::from(fd))
}
