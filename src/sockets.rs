//! Socket construction and transport channels
//!
//! The engine talks to the network through two narrow traits — a
//! connectionless datagram channel and a byte-stream channel — produced
//! by a [`SocketFactory`]. Production code uses [`SystemSockets`], which
//! builds nonblocking OS sockets; tests substitute scripted fakes and
//! never touch the network.

use crate::ip::Ip;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use socket2::{Domain, Protocol, Socket, Type};

/// IP address family of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl Family {
    /// The family an address belongs to
    pub fn of(ip: &Ip) -> Self {
        if ip.is_v4() {
            Family::V4
        } else {
            Family::V6
        }
    }
}

/// A nonblocking, unconnected UDP socket
pub trait UdpChannel {
    /// Send one datagram; may fail with `WouldBlock`
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram; fails with `WouldBlock` when drained
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// The fd to register with the reactor
    fn raw_fd(&self) -> RawFd;
}

/// A nonblocking TCP connection, possibly still connecting
pub trait TcpChannel {
    /// The fd to register with the reactor
    fn raw_fd(&self) -> RawFd;

    /// The pending socket error, if the in-progress connect failed
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    /// Write some bytes; may fail with `WouldBlock`
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read some bytes; 0 means the peer closed, `WouldBlock` means try
    /// again after the next readiness event
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Produces the sockets the engine runs on
pub trait SocketFactory {
    /// Open an unconnected nonblocking UDP socket bound to an ephemeral
    /// port in `family`
    fn open_udp(&self, family: Family) -> io::Result<Box<dyn UdpChannel>>;

    /// Start a nonblocking TCP connect to `addr`
    ///
    /// Returns as soon as the connect is in flight; completion is
    /// observed through write-readiness and [`TcpChannel::take_error`].
    fn connect_tcp(&self, addr: SocketAddr) -> io::Result<Box<dyn TcpChannel>>;
}

/// The real thing: OS sockets built through `socket2`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSockets;

impl SocketFactory for SystemSockets {
    fn open_udp(&self, family: Family) -> io::Result<Box<dyn UdpChannel>> {
        let domain = match family {
            Family::V4 => Domain::IPV4,
            Family::V6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        // an ephemeral local port per socket; the random port is part of
        // the anti-spoofing entropy alongside the transaction id
        let bind_addr: SocketAddr = match family {
            Family::V4 => "0.0.0.0:0".parse().unwrap(),
            Family::V6 => "[::]:0".parse().unwrap(),
        };
        socket.bind(&bind_addr.into())?;
        socket.set_nonblocking(true)?;

        let socket: UdpSocket = socket.into();
        Ok(Box::new(SystemUdp { socket }))
    }

    fn connect_tcp(&self, addr: SocketAddr) -> io::Result<Box<dyn TcpChannel>> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;

        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(err)
                if err.raw_os_error() == Some(libc::EINPROGRESS)
                    || err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err),
        }

        let stream: TcpStream = socket.into();
        Ok(Box::new(SystemTcp { stream }))
    }
}

struct SystemUdp {
    socket: UdpSocket,
}

impl UdpChannel for SystemUdp {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, target)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

struct SystemTcp {
    stream: TcpStream,
}

impl TcpChannel for SystemTcp {
    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.stream.take_error()
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}
