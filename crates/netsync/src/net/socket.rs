use std::io;
use std::net::{SocketAddr, UdpSocket};

/// Non-blocking datagram transport keyed by peer address.
pub trait DatagramSocket {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Returns `Ok(None)` when nothing is waiting.
    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl<T: DatagramSocket + ?Sized> DatagramSocket for Box<T> {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        (**self).send_to(data, addr)
    }

    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        (**self).try_recv_from(buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// Errors that end the current drain without meaning the socket is dead.
pub fn is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => true,
        // ICMP port unreachable from an earlier send surfaces on the next call.
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused => true,
        _ => false,
    }
}

#[derive(Debug)]
pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    /// Binds and enables sending to the broadcast address.
    pub fn bind_broadcast(addr: SocketAddr) -> io::Result<Self> {
        let endpoint = Self::bind(addr)?;
        endpoint.socket.set_broadcast(true)?;
        Ok(endpoint)
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

impl DatagramSocket for UdpEndpoint {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr)
    }

    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, addr)) => Ok(Some((len, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_empty_socket_returns_none() {
        let mut endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut buf = [0u8; 64];
        assert!(endpoint.try_recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_loopback_send_receive() {
        let mut a = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut b = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(b"ping", b_addr).unwrap();

        let mut buf = [0u8; 64];
        let mut received = None;
        for _ in 0..100 {
            if let Some(got) = b.try_recv_from(&mut buf).unwrap() {
                received = Some(got);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let (len, from) = received.expect("datagram never arrived");
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }
}
