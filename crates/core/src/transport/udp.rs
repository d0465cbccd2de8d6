use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::Result;

/// UDP endpoint used for RTP or RTCP delivery.
///
/// Binds an IPv4 socket on the requested local port (`0` for ephemeral) and
/// opens an IPv6 companion on the same port the first time an IPv6 peer is
/// addressed. Both sockets are non-blocking, so [`try_recv`](Self::try_recv)
/// can be polled from the sender loop.
///
/// This layer is address-only; it does not know about sessions or modules.
#[derive(Debug)]
pub struct UdpTransport {
    v4: UdpSocket,
    v6: Option<UdpSocket>,
    port: u16,
}

impl UdpTransport {
    /// Bind a socket on `0.0.0.0:port`.
    pub fn bind(port: u16) -> Result<Self> {
        let v4 = open_socket(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))?;
        let port = v4.local_addr()?.port();
        tracing::debug!(port, "UDP socket bound");
        Ok(Self { v4, v6: None, port })
    }

    /// Local port shared by both address families.
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Send one datagram to `addr`.
    pub fn send_to(&mut self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        let socket = match addr {
            SocketAddr::V4(_) => &self.v4,
            SocketAddr::V6(_) => self.v6_socket()?,
        };
        match socket.send_to(payload, addr) {
            Ok(n) => Ok(n),
            // A full send buffer drops the datagram like the network would.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Receive one pending datagram without blocking.
    pub fn try_recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        for socket in std::iter::once(&self.v4).chain(self.v6.as_ref()) {
            match socket.recv_from(buf) {
                Ok(received) => return Ok(Some(received)),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::ConnectionRefused
                    ) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    fn v6_socket(&mut self) -> Result<&UdpSocket> {
        let socket = match self.v6.take() {
            Some(socket) => socket,
            None => {
                let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), self.port);
                let socket = open_socket(addr)?;
                tracing::debug!(port = self.port, "IPv6 UDP socket bound");
                socket
            }
        };
        Ok(&*self.v6.insert(socket))
    }
}

fn open_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn send_and_poll_loopback() {
        let mut a = UdpTransport::bind(0).unwrap();
        let b = UdpTransport::bind(0).unwrap();
        let to_b = SocketAddr::from(([127, 0, 0, 1], b.local_port()));

        a.send_to(b"ping", to_b).unwrap();

        let mut buf = [0u8; 16];
        let mut got = None;
        for _ in 0..100 {
            if let Some(r) = b.try_recv(&mut buf).unwrap() {
                got = Some(r);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let (n, from) = got.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from.port(), a.local_port());
    }

    #[test]
    fn empty_poll_is_none() {
        let t = UdpTransport::bind(0).unwrap();
        let mut buf = [0u8; 16];
        assert!(t.try_recv(&mut buf).unwrap().is_none());
    }
}
