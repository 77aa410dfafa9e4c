//! Loopback echo exchange
//!
//! The wire protocol has no framing: the client sends exactly `payload_size`
//! bytes and reads exactly `payload_size` bytes back. The blocking variant
//! here serves the thread and process engines; the reactor-driven variant
//! lives in `engine::io_task`.
//!
//! [`exchange_blocking`] performs no heap allocation, so forked children can
//! call it with buffers prepared by the parent.

use crate::error::TaskError;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::time::Duration;

/// Byte every payload is filled with
pub const PAYLOAD_FILL: u8 = b'x';

/// Build the payload for one exchange
pub fn payload(size: usize) -> Vec<u8> {
    vec![PAYLOAD_FILL; size]
}

/// Loopback address of the echo server
pub fn loopback(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

/// Perform one blocking exchange
///
/// Connects with `timeout`, binds the same value as send and receive timeout,
/// writes `payload`, then fills `recv_buf` (which must be `payload.len()`
/// bytes) with the echo. The socket is closed on every path when the stream
/// drops.
pub fn exchange_blocking(
    addr: SocketAddrV4,
    payload: &[u8],
    recv_buf: &mut [u8],
    timeout: Duration,
) -> Result<(), TaskError> {
    debug_assert_eq!(payload.len(), recv_buf.len());

    let mut stream =
        TcpStream::connect_timeout(&SocketAddr::V4(addr), timeout).map_err(TaskError::Connect)?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(TaskError::Socket)?;

    let mut sent = 0;
    while sent < payload.len() {
        match stream.write(&payload[sent..]) {
            Ok(0) => {
                return Err(TaskError::Send {
                    sent,
                    source: io::ErrorKind::WriteZero.into(),
                })
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(TaskError::Send { sent, source }),
        }
    }

    let mut received = 0;
    while received < recv_buf.len() {
        match stream.read(&mut recv_buf[received..]) {
            Ok(0) => {
                return Err(TaskError::PeerClosed {
                    received,
                    expected: recv_buf.len(),
                })
            }
            Ok(n) => received += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(TaskError::Recv { received, source }),
        }
    }

    if recv_buf != payload {
        return Err(TaskError::Mismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::EchoServer;
    use std::net::TcpListener;

    #[test]
    fn test_payload_fill() {
        let p = payload(4);
        assert_eq!(p, b"xxxx");
        assert!(payload(0).is_empty());
    }

    #[test]
    fn test_exchange_round_trip_256() {
        let server = EchoServer::start(128).unwrap();
        let sent = payload(256);
        let mut received = vec![0u8; 256];

        exchange_blocking(loopback(server.port()), &sent, &mut received, Duration::from_secs(5))
            .unwrap();

        assert_eq!(received.len(), 256);
        assert_eq!(received, sent);
        server.stop();
    }

    #[test]
    fn test_exchange_large_payload_spans_many_segments() {
        let server = EchoServer::start(128).unwrap();
        let sent: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();
        let mut received = vec![0u8; sent.len()];

        exchange_blocking(loopback(server.port()), &sent, &mut received, Duration::from_secs(10))
            .unwrap();

        assert_eq!(received, sent);
        server.stop();
    }

    #[test]
    fn test_exchange_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let sent = payload(16);
        let mut received = vec![0u8; 16];

        let err = exchange_blocking(loopback(port), &sent, &mut received, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, TaskError::Connect(_)));
    }

    #[test]
    fn test_exchange_peer_closes_early() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let closer = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 8];
            conn.read_exact(&mut buf).unwrap();
            conn.write_all(&buf[..4]).unwrap();
        });

        let sent = payload(8);
        let mut received = vec![0u8; 8];
        let err = exchange_blocking(loopback(port), &sent, &mut received, Duration::from_secs(5))
            .unwrap_err();
        closer.join().unwrap();

        match err {
            TaskError::PeerClosed { received, expected } => {
                assert_eq!(received, 4);
                assert_eq!(expected, 8);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
