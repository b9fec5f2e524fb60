//! The shared UDP socket pool
//!
//! Every in-flight query shares a small, fixed set of UDP sockets; a
//! single socket routinely carries thousands of simultaneous transaction
//! ids. The pool round-robins outbound datagrams across its sockets,
//! buffers everything that arrives, and lets the core pull buffered
//! datagrams in bounded batches so one busy reactor turn cannot starve
//! the rest of the application.
//!
//! Sockets are opened lazily per address family: a v4-only configuration
//! never opens a v6 socket, and a socket is never asked to carry both
//! families. The round-robin cursor cycles within a family.

use crate::reactor::{EventToken, Reactor, ReactorSink, WatchToken};
use crate::sockets::{Family, SocketFactory, UdpChannel};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// Tag bits marking an [`EventToken`] as belonging to a pool socket.
///
/// The resolver core owns the rest of the token space; tags are the top
/// four bits of the token value.
pub(crate) const TAG_UDP: u64 = 1;

pub(crate) fn udp_token(family: Family, index: usize) -> EventToken {
    let family_bit = match family {
        Family::V4 => 0u64,
        Family::V6 => 1u64,
    };
    EventToken(TAG_UDP << 60 | family_bit << 32 | index as u64)
}

pub(crate) fn decode_udp_token(token: EventToken) -> Option<(Family, usize)> {
    if token.0 >> 60 != TAG_UDP {
        return None;
    }
    let family = if token.0 >> 32 & 1 == 0 {
        Family::V4
    } else {
        Family::V6
    };
    Some((family, (token.0 & 0xffff_ffff) as usize))
}

/// One pooled socket: the channel, its reactor watch, and the FIFO of
/// datagrams received but not yet delivered.
struct PoolSocket {
    channel: Box<dyn UdpChannel>,
    watch: WatchToken,
    inbox: VecDeque<(SocketAddr, Vec<u8>)>,
}

/// The sockets of one address family plus its round-robin cursor.
#[derive(Default)]
struct SubPool {
    sockets: Vec<PoolSocket>,
    next: usize,
}

/// Fixed-size pool of shared UDP sockets
pub struct UdpPool {
    factory: Rc<dyn SocketFactory>,
    socketcount: usize,
    buffersize: usize,
    v4: SubPool,
    v6: SubPool,
}

impl UdpPool {
    /// Create an empty pool; sockets open on first send per family
    pub fn new(factory: Rc<dyn SocketFactory>, socketcount: usize, buffersize: u16) -> Self {
        Self {
            factory,
            socketcount: socketcount.max(1),
            buffersize: usize::from(buffersize).max(512),
            v4: SubPool::default(),
            v6: SubPool::default(),
        }
    }

    fn sub_pool(&mut self, family: Family) -> &mut SubPool {
        match family {
            Family::V4 => &mut self.v4,
            Family::V6 => &mut self.v6,
        }
    }

    /// Send one datagram to `target`
    ///
    /// Opens and registers the family's sockets on first use. The
    /// round-robin cursor advances on every send; a send failure other
    /// than `WouldBlock` falls through to the next socket in the family.
    /// `WouldBlock` counts as sent: the per-attempt retry timer already
    /// covers a datagram the kernel dropped on the floor.
    pub fn send(
        &mut self,
        bytes: &[u8],
        target: SocketAddr,
        reactor: &dyn Reactor,
        sink: &Weak<dyn ReactorSink>,
    ) -> io::Result<()> {
        let family = if target.is_ipv4() {
            Family::V4
        } else {
            Family::V6
        };
        self.open_family(family, reactor, sink)?;

        let count = self.socketcount;
        let pool = self.sub_pool(family);
        let mut last_error = None;

        for _ in 0..count {
            let index = pool.next % pool.sockets.len();
            pool.next = pool.next.wrapping_add(1);
            let socket = &pool.sockets[index];

            match socket.channel.send_to(bytes, target) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    debug!("udp send to {} backpressured, relying on retry", target);
                    return Ok(());
                }
                Err(err) => {
                    warn!("udp send to {} failed on socket {}: {}", target, index, err);
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no socket accepted the send")))
    }

    /// Open the family's sockets if not yet open, registering each fd
    fn open_family(
        &mut self,
        family: Family,
        reactor: &dyn Reactor,
        sink: &Weak<dyn ReactorSink>,
    ) -> io::Result<()> {
        if !self.sub_pool(family).sockets.is_empty() {
            return Ok(());
        }
        for index in 0..self.socketcount {
            let channel = self.factory.open_udp(family)?;
            let watch = reactor.register_fd(
                channel.raw_fd(),
                true,
                false,
                sink.clone(),
                udp_token(family, index),
            );
            self.sub_pool(family).sockets.push(PoolSocket {
                channel,
                watch,
                inbox: VecDeque::new(),
            });
        }
        debug!("opened {} udp socket(s) for {:?}", self.socketcount, family);
        Ok(())
    }

    /// Drain everything readable on one socket into its inbox
    ///
    /// Called when the reactor reports the socket readable. Transient
    /// read errors are swallowed; the datagram in question is gone either
    /// way and the query-level retry machinery covers the loss. Returns
    /// the number of datagrams buffered.
    pub fn drain(&mut self, family: Family, index: usize) -> usize {
        let buffersize = self.buffersize;
        let pool = self.sub_pool(family);
        let socket = match pool.sockets.get_mut(index) {
            Some(socket) => socket,
            None => return 0,
        };

        let mut buffered = 0;
        loop {
            let mut buf = vec![0u8; buffersize];
            match socket.channel.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    buf.truncate(len);
                    socket.inbox.push_back((peer, buf));
                    buffered += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    debug!("udp recv error ignored: {}", err);
                    break;
                }
            }
        }
        buffered
    }

    /// Is at least one datagram buffered anywhere in the pool?
    pub fn buffered(&self) -> bool {
        self.v4
            .sockets
            .iter()
            .chain(self.v6.sockets.iter())
            .any(|socket| !socket.inbox.is_empty())
    }

    /// Pop one buffered datagram, oldest-first per socket
    pub fn take(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        for socket in self
            .v4
            .sockets
            .iter_mut()
            .chain(self.v6.sockets.iter_mut())
        {
            if let Some(datagram) = socket.inbox.pop_front() {
                return Some(datagram);
            }
        }
        None
    }

    /// Cancel all reactor watches and close the sockets
    ///
    /// Watches go first so no readiness event can arrive for a closed fd.
    /// Buffered datagrams are discarded.
    pub fn close(&mut self, reactor: &dyn Reactor) {
        for socket in self
            .v4
            .sockets
            .drain(..)
            .chain(self.v6.sockets.drain(..))
        {
            reactor.cancel_fd(socket.watch);
            drop(socket.channel);
        }
        self.v4.next = 0;
        self.v6.next = 0;
    }
}
