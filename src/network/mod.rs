//! Network subsystem: voice transport, session sync and the local
//! simulator feed

pub mod feed;
pub mod stop;
pub mod sync;
pub mod voice;

pub use feed::{LosListener, SnapshotListener, StateBroadcaster};
pub use stop::StopSignal;
pub use sync::{SyncClient, SyncConfig};
pub use voice::{VoiceConfig, VoiceTransport};

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use crate::error::NetworkError;

/// Poll interval for blocking reads that must notice a stop
pub const READ_POLL: Duration = Duration::from_millis(250);

/// Connect a TCP stream with a timeout, Nagle disabled
pub fn connect_tcp(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
    socket
        .connect_timeout(&addr.into(), timeout)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => NetworkError::Timeout,
            _ => NetworkError::ConnectionFailed(format!("{}: {}", addr, e)),
        })?;
    socket
        .set_nodelay(true)
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

    let stream: TcpStream = socket.into();
    stream
        .set_read_timeout(Some(READ_POLL))
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
    Ok(stream)
}

/// Bind a UDP socket on all interfaces with `SO_REUSEADDR`.
/// Port 0 picks an ephemeral port.
pub fn bind_udp(port: u16) -> Result<UdpSocket, NetworkError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(READ_POLL))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    Ok(socket)
}

/// Read timeouts surface as either of these depending on platform
pub(crate) fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_tcp_sets_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = connect_tcp(listener.local_addr().unwrap(), Duration::from_secs(2)).unwrap();
        assert!(stream.nodelay().unwrap());
        // the kernel rounds SO_RCVTIMEO to its tick
        let timeout = stream.read_timeout().unwrap().unwrap();
        assert!(timeout >= READ_POLL && timeout < READ_POLL + Duration::from_millis(20));
    }

    #[test]
    fn test_bind_udp_sets_read_poll() {
        let socket = bind_udp(0).unwrap();
        let timeout = socket.read_timeout().unwrap().unwrap();
        assert!(timeout >= READ_POLL && timeout < READ_POLL + Duration::from_millis(20));
    }

    #[test]
    fn test_connect_tcp_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = connect_tcp(SocketAddr::from(([127, 0, 0, 1], port)), Duration::from_secs(2));
        assert!(result.is_err());
    }

    #[test]
    fn test_bind_udp_ephemeral() {
        let socket = bind_udp(0).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }
}
