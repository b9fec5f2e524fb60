//! Shared helpers for the integration tests: a deterministic reactor
//! with virtual time, scripted sockets that never touch the network,
//! and a handler that records every callback it sees.

use lazyresolv::reactor::{EventToken, Reactor, ReactorSink, TimerToken, WatchToken};
use lazyresolv::sockets::{Family, SocketFactory, TcpChannel, UdpChannel};
use lazyresolv::types::{RecordType, ResponseCode};
use lazyresolv::wire::name::write_name;
use lazyresolv::{Context, Handler, Operation, ResolvConf, Response};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::time::Duration;

// ---------------------------------------------------------------- reactor

struct Timer {
    id: u64,
    due: Duration,
    order: u64,
    sink: Weak<dyn ReactorSink>,
    event: EventToken,
}

struct Watch {
    id: u64,
    fd: RawFd,
    readable: bool,
    writable: bool,
    sink: Weak<dyn ReactorSink>,
    event: EventToken,
}

struct ReactorState {
    now: Duration,
    next: u64,
    timers: Vec<Timer>,
    watches: Vec<Watch>,
}

/// A reactor with a virtual clock, advanced explicitly by the test.
pub struct TestReactor {
    state: RefCell<ReactorState>,
}

impl TestReactor {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(ReactorState {
                now: Duration::ZERO,
                next: 1,
                timers: Vec::new(),
                watches: Vec::new(),
            }),
        })
    }

    /// Advance virtual time, firing every timer that becomes due, in due
    /// order. Timers armed by the callbacks themselves fire too when
    /// they fall inside the window; `advance(Duration::ZERO)` runs the
    /// pending zero-delay turn.
    pub fn advance(&self, delta: Duration) {
        let target = self.state.borrow().now + delta;
        loop {
            let fired = {
                let mut state = self.state.borrow_mut();
                let next = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by_key(|(_, timer)| (timer.due, timer.order))
                    .map(|(index, _)| index);
                match next {
                    Some(index) => {
                        let timer = state.timers.remove(index);
                        state.now = state.now.max(timer.due);
                        Some(timer)
                    }
                    None => None,
                }
            };
            match fired {
                Some(timer) => {
                    if let Some(sink) = timer.sink.upgrade() {
                        sink.on_timer(timer.event);
                    }
                }
                None => break,
            }
        }
        self.state.borrow_mut().now = target;
    }

    /// Run one reactor turn: fire what is already due, move no clock
    pub fn run(&self) {
        self.advance(Duration::ZERO);
    }

    fn notify(&self, fd: RawFd, readable: bool, writable: bool) {
        let targets: Vec<(Weak<dyn ReactorSink>, EventToken)> = {
            let state = self.state.borrow();
            state
                .watches
                .iter()
                .filter(|watch| {
                    watch.fd == fd
                        && ((readable && watch.readable) || (writable && watch.writable))
                })
                .map(|watch| (watch.sink.clone(), watch.event))
                .collect()
        };
        for (sink, event) in targets {
            if let Some(sink) = sink.upgrade() {
                sink.on_fd_ready(event, readable, writable);
            }
        }
    }

    /// Report read-readiness on `fd` to whoever watches it
    pub fn notify_readable(&self, fd: RawFd) {
        self.notify(fd, true, false);
    }

    /// Report write-readiness on `fd` to whoever watches it
    pub fn notify_writable(&self, fd: RawFd) {
        self.notify(fd, false, true);
    }

    pub fn timer_count(&self) -> usize {
        self.state.borrow().timers.len()
    }

    pub fn watch_count(&self) -> usize {
        self.state.borrow().watches.len()
    }
}

impl Reactor for TestReactor {
    fn now(&self) -> Duration {
        self.state.borrow().now
    }

    fn register_fd(
        &self,
        fd: RawFd,
        readable: bool,
        writable: bool,
        sink: Weak<dyn ReactorSink>,
        token: EventToken,
    ) -> WatchToken {
        let mut state = self.state.borrow_mut();
        let id = state.next;
        state.next += 1;
        state.watches.push(Watch {
            id,
            fd,
            readable,
            writable,
            sink,
            event: token,
        });
        WatchToken(id)
    }

    fn arm_timer(
        &self,
        delay: Duration,
        sink: Weak<dyn ReactorSink>,
        token: EventToken,
    ) -> TimerToken {
        let mut state = self.state.borrow_mut();
        let id = state.next;
        state.next += 1;
        let due = state.now + delay;
        let order = id;
        state.timers.push(Timer {
            id,
            due,
            order,
            sink,
            event: token,
        });
        TimerToken(id)
    }

    fn cancel_fd(&self, token: WatchToken) {
        self.state.borrow_mut().watches.retain(|watch| watch.id != token.0);
    }

    fn cancel_timer(&self, token: TimerToken) {
        self.state.borrow_mut().timers.retain(|timer| timer.id != token.0);
    }
}

// ---------------------------------------------------------------- sockets

pub struct NetState {
    next_fd: RawFd,
    /// every datagram the resolver sent, in order
    pub sent: Vec<(SocketAddr, Vec<u8>)>,
    /// datagrams waiting to be received, with their claimed sender
    pub inbox: VecDeque<(SocketAddr, Vec<u8>)>,
    /// fds of the opened UDP sockets
    pub udp_fds: Vec<RawFd>,
    /// addresses TCP connects were issued to
    pub tcp_connects: Vec<SocketAddr>,
    /// fds of the opened TCP sockets
    pub tcp_fds: Vec<RawFd>,
    /// bytes written to any TCP socket
    pub tcp_written: Vec<u8>,
    /// scripted TCP read results, shared by all connections
    pub tcp_reads: VecDeque<io::Result<Vec<u8>>>,
    /// error reported for the next in-progress connect
    pub tcp_connect_error: Option<io::Error>,
    /// when set, opening or connecting sockets fails outright
    pub refuse_sockets: bool,
}

/// Socket factory producing scripted in-memory channels.
pub struct TestSockets {
    pub state: Rc<RefCell<NetState>>,
}

impl TestSockets {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            state: Rc::new(RefCell::new(NetState {
                next_fd: 1000,
                sent: Vec::new(),
                inbox: VecDeque::new(),
                udp_fds: Vec::new(),
                tcp_connects: Vec::new(),
                tcp_fds: Vec::new(),
                tcp_written: Vec::new(),
                tcp_reads: VecDeque::new(),
                tcp_connect_error: None,
                refuse_sockets: false,
            })),
        })
    }

    /// Queue a datagram as if `peer` had sent it
    pub fn push_datagram(&self, peer: SocketAddr, bytes: Vec<u8>) {
        self.state.borrow_mut().inbox.push_back((peer, bytes));
    }

    /// Queue one TCP read result
    pub fn push_tcp_read(&self, result: io::Result<Vec<u8>>) {
        self.state.borrow_mut().tcp_reads.push_back(result);
    }

    pub fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.state.borrow().sent.clone()
    }

    pub fn udp_fd(&self, index: usize) -> RawFd {
        self.state.borrow().udp_fds[index]
    }

    pub fn tcp_fd(&self, index: usize) -> RawFd {
        self.state.borrow().tcp_fds[index]
    }

    pub fn tcp_connect_count(&self) -> usize {
        self.state.borrow().tcp_connects.len()
    }
}

impl SocketFactory for TestSockets {
    fn open_udp(&self, _family: Family) -> io::Result<Box<dyn UdpChannel>> {
        let mut state = self.state.borrow_mut();
        if state.refuse_sockets {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "refused"));
        }
        let fd = state.next_fd;
        state.next_fd += 1;
        state.udp_fds.push(fd);
        Ok(Box::new(FakeUdp {
            fd,
            state: self.state.clone(),
        }))
    }

    fn connect_tcp(&self, addr: SocketAddr) -> io::Result<Box<dyn TcpChannel>> {
        let mut state = self.state.borrow_mut();
        if state.refuse_sockets {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "refused"));
        }
        let fd = state.next_fd;
        state.next_fd += 1;
        state.tcp_connects.push(addr);
        state.tcp_fds.push(fd);
        Ok(Box::new(FakeTcp {
            fd,
            state: self.state.clone(),
        }))
    }
}

struct FakeUdp {
    fd: RawFd,
    state: Rc<RefCell<NetState>>,
}

impl UdpChannel for FakeUdp {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.state.borrow_mut().sent.push((target, buf.to_vec()));
        Ok(buf.len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self.state.borrow_mut().inbox.pop_front() {
            Some((peer, bytes)) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok((len, peer))
            }
            None => Err(io::Error::new(io::ErrorKind::WouldBlock, "drained")),
        }
    }

    fn raw_fd(&self) -> RawFd {
        self.fd
    }
}

struct FakeTcp {
    fd: RawFd,
    state: Rc<RefCell<NetState>>,
}

impl TcpChannel for FakeTcp {
    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        Ok(self.state.borrow_mut().tcp_connect_error.take())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.borrow_mut().tcp_written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.state.borrow_mut().tcp_reads.pop_front() {
            Some(Ok(bytes)) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Some(Err(err)) => Err(err),
            None => Err(io::Error::new(io::ErrorKind::WouldBlock, "drained")),
        }
    }
}

// ---------------------------------------------------------------- handler

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Received {
        rcode: ResponseCode,
        answers: u16,
        truncated: bool,
    },
    Timeout,
    Failure,
    Cancelled,
}

/// Records every callback; optionally asserts it never fires while the
/// test holds the resolver entry points on the stack.
pub struct RecordingHandler {
    pub events: RefCell<Vec<Event>>,
    pub forbidden: Option<Rc<Cell<bool>>>,
}

impl RecordingHandler {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            events: RefCell::new(Vec::new()),
            forbidden: None,
        })
    }

    /// A handler that panics when invoked while `flag` is set
    pub fn guarded(flag: Rc<Cell<bool>>) -> Rc<Self> {
        Rc::new(Self {
            events: RefCell::new(Vec::new()),
            forbidden: Some(flag),
        })
    }

    fn record(&self, event: Event) {
        if let Some(flag) = &self.forbidden {
            assert!(
                !flag.get(),
                "handler invoked re-entrantly from query() or cancel()"
            );
        }
        self.events.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }
}

impl Handler for RecordingHandler {
    fn on_received(&self, _op: &Operation, response: &Response<'_>) {
        self.record(Event::Received {
            rcode: response.rcode(),
            answers: response.answer_count(),
            truncated: response.truncated(),
        });
    }

    fn on_timeout(&self, _op: &Operation) {
        self.record(Event::Timeout);
    }

    fn on_failure(&self, _op: &Operation) {
        self.record(Event::Failure);
    }

    fn on_cancelled(&self, _op: &Operation) {
        self.record(Event::Cancelled);
    }
}

// ---------------------------------------------------------------- wiring

/// One fully wired test fixture.
pub struct Fixture {
    pub reactor: Rc<TestReactor>,
    pub sockets: Rc<TestSockets>,
    pub context: Context,
}

/// Build a context over the test reactor and scripted sockets
pub fn fixture(conf: ResolvConf) -> Fixture {
    let reactor = TestReactor::new();
    let sockets = TestSockets::new();
    let context = Context::with_factory(reactor.clone(), conf, sockets.clone());
    Fixture {
        reactor,
        sockets,
        context,
    }
}

/// A configuration with the given nameservers and test-friendly knobs
pub fn conf(nameservers: &[&str]) -> ResolvConf {
    let mut conf = ResolvConf::new();
    for server in nameservers {
        conf.nameservers.push(server.parse().unwrap());
    }
    conf
}

pub fn ns_addr(ip: &str) -> SocketAddr {
    SocketAddr::new(ip.parse().unwrap(), 53)
}

// ------------------------------------------------------------- messages

/// The transaction id of a wire message
pub fn wire_id(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// The question name of a wire message
pub fn wire_qname(bytes: &[u8]) -> String {
    let response = Response::parse(bytes).expect("parseable message");
    response.question(0).expect("one question").qname().to_string()
}

/// Hand-build a response message
///
/// The header mirrors what a recursor echoes back: QR and RA set, RD
/// copied, plus the requested rcode and truncation flag. Answers are A
/// records for `name`.
pub fn response_bytes(
    id: u16,
    name: &str,
    qtype: RecordType,
    rcode: u8,
    truncated: bool,
    answers: &[[u8; 4]],
) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&id.to_be_bytes());
    let mut flags: u16 = 0x8000 | 0x0100 | 0x0080;
    if truncated {
        flags |= 0x0200;
    }
    flags |= u16::from(rcode) & 0x0f;
    bytes.extend_from_slice(&flags.to_be_bytes());
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&(answers.len() as u16).to_be_bytes());
    bytes.extend_from_slice(&0u16.to_be_bytes());
    bytes.extend_from_slice(&0u16.to_be_bytes());

    write_name(&mut bytes, name).expect("encodable name");
    bytes.extend_from_slice(&qtype.to_u16().to_be_bytes());
    bytes.extend_from_slice(&1u16.to_be_bytes());

    for ip in answers {
        write_name(&mut bytes, name).expect("encodable name");
        bytes.extend_from_slice(&RecordType::A.to_u16().to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&300u32.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        bytes.extend_from_slice(ip);
    }
    bytes
}

/// Frame a message with the TCP two-byte length prefix
pub fn framed(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}
