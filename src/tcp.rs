//! TCP fallback for truncated responses
//!
//! When a UDP answer comes back with the TC bit set, the lookup retries
//! the same query over TCP, where RFC 1035 §4.2.2 frames messages with a
//! two-byte length prefix. These connections are strictly one-shot: one
//! connect, one framed query, one framed response, then the socket is
//! closed.
//!
//! The whole exchange is nonblocking. The state machine below advances on
//! reactor readiness events: writability first (which is also how a
//! pending connect reports completion or failure), then readability until
//! the framed response is complete.

use crate::ip::Ip;
use crate::reactor::{EventToken, Reactor, ReactorSink, WatchToken};
use crate::sockets::{SocketFactory, TcpChannel};
use std::io;
use std::rc::Weak;
use tracing::debug;

/// Largest framed response we are willing to buffer.
const MAX_TCP_MESSAGE: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TcpState {
    /// Waiting for the nonblocking connect to finish
    Connecting,
    /// Writing the length prefix and query
    Sending,
    /// Reading the length prefix and response
    Reading,
}

/// What a readiness event did to the exchange
pub enum TcpProgress {
    /// Nothing conclusive yet; keep waiting
    Pending,
    /// The framed response, prefix stripped
    Response(Vec<u8>),
    /// The exchange failed; the lookup moves to its next nameserver
    Failed(io::Error),
}

/// One in-flight TCP exchange owned by a lookup
pub struct TcpExchange {
    channel: Box<dyn TcpChannel>,
    watch: Option<WatchToken>,
    token: EventToken,
    state: TcpState,
    /// length prefix plus query bytes, partially written
    outbound: Vec<u8>,
    sent: usize,
    /// length prefix plus response bytes, partially read
    inbound: Vec<u8>,
    server: Ip,
}

impl TcpExchange {
    /// Start a nonblocking exchange of `query` with `server`
    ///
    /// Registers the new socket for writability under `token`; the owner
    /// routes matching readiness events back into [`on_ready`].
    ///
    /// [`on_ready`]: TcpExchange::on_ready
    pub fn start(
        factory: &dyn SocketFactory,
        server: Ip,
        query: &[u8],
        reactor: &dyn Reactor,
        sink: &Weak<dyn ReactorSink>,
        token: EventToken,
    ) -> io::Result<Self> {
        let channel = factory.connect_tcp(server.socket_addr())?;

        let mut outbound = Vec::with_capacity(query.len() + 2);
        outbound.extend_from_slice(&(query.len() as u16).to_be_bytes());
        outbound.extend_from_slice(query);

        let watch = reactor.register_fd(channel.raw_fd(), false, true, sink.clone(), token);
        debug!("tcp fallback to {} started", server);

        Ok(Self {
            channel,
            watch: Some(watch),
            token,
            state: TcpState::Connecting,
            outbound,
            sent: 0,
            inbound: Vec::new(),
            server,
        })
    }

    /// The nameserver this exchange talks to
    pub fn server(&self) -> Ip {
        self.server
    }

    /// Advance the exchange after a readiness event
    pub fn on_ready(
        &mut self,
        readable: bool,
        writable: bool,
        reactor: &dyn Reactor,
        sink: &Weak<dyn ReactorSink>,
    ) -> TcpProgress {
        if self.state == TcpState::Connecting && writable {
            match self.channel.take_error() {
                Ok(None) => self.state = TcpState::Sending,
                Ok(Some(err)) | Err(err) => return self.fail(reactor, err),
            }
        }

        if self.state == TcpState::Sending && writable {
            match self.write_some() {
                Ok(true) => {
                    // fully written; swap the watch over to readability
                    self.cancel_watch(reactor);
                    self.watch = Some(reactor.register_fd(
                        self.channel.raw_fd(),
                        true,
                        false,
                        sink.clone(),
                        self.token,
                    ));
                    self.state = TcpState::Reading;
                }
                Ok(false) => return TcpProgress::Pending,
                Err(err) => return self.fail(reactor, err),
            }
        }

        if self.state == TcpState::Reading && readable {
            return match self.read_some() {
                Ok(Some(response)) => {
                    self.cancel_watch(reactor);
                    TcpProgress::Response(response)
                }
                Ok(None) => TcpProgress::Pending,
                Err(err) => self.fail(reactor, err),
            };
        }

        TcpProgress::Pending
    }

    /// Tear down the exchange; safe to call in any state
    pub fn close(&mut self, reactor: &dyn Reactor) {
        self.cancel_watch(reactor);
    }

    fn fail(&mut self, reactor: &dyn Reactor, err: io::Error) -> TcpProgress {
        debug!("tcp fallback to {} failed: {}", self.server, err);
        self.cancel_watch(reactor);
        TcpProgress::Failed(err)
    }

    fn cancel_watch(&mut self, reactor: &dyn Reactor) {
        if let Some(watch) = self.watch.take() {
            reactor.cancel_fd(watch);
        }
    }

    /// Write until done or blocked; Ok(true) when everything is out
    fn write_some(&mut self) -> io::Result<bool> {
        while self.sent < self.outbound.len() {
            match self.channel.write(&self.outbound[self.sent..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "tcp peer stopped accepting bytes",
                    ))
                }
                Ok(n) => self.sent += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    /// Read until the framed response is complete or the socket blocks
    fn read_some(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.channel.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "tcp peer closed before the full response",
                    ))
                }
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    if self.inbound.len() > MAX_TCP_MESSAGE + 2 {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "tcp response exceeds frame limit",
                        ));
                    }
                    if let Some(response) = self.complete_frame() {
                        return Ok(Some(response));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }

    fn complete_frame(&self) -> Option<Vec<u8>> {
        if self.inbound.len() < 2 {
            return None;
        }
        let expected = u16::from_be_bytes([self.inbound[0], self.inbound[1]]) as usize;
        if self.inbound.len() < expected + 2 {
            return None;
        }
        Some(self.inbound[2..expected + 2].to_vec())
    }
}
