//! The resolver core
//!
//! A [`Context`] owns everything a set of concurrent queries shares: the
//! configuration snapshot, the nameserver list, the UDP socket pool, the
//! transaction-id generator, and the table of live lookups. It is the
//! entry point for new queries and the demultiplexer for everything the
//! reactor reports back.
//!
//! The context is strictly single-threaded. Interior state lives behind
//! one `RefCell`; every borrow is released before any user callback
//! runs, so handlers are free to submit new queries or cancel operations
//! without re-entering held state. Exactly one terminal callback fires
//! per query, always from a reactor turn, never from inside [`query`] or
//! [`cancel`].
//!
//! [`query`]: Context::query
//! [`cancel`]: Operation::cancel

use crate::bits::Bits;
use crate::config::ResolvConf;
use crate::id::{IdGenerator, MAX_COLLISION_RETRIES};
use crate::ip::Ip;
use crate::lookup::{Lookup, LookupState, Terminal};
use crate::pool::{self, UdpPool};
use crate::reactor::{EventToken, Reactor, ReactorSink, TimerToken};
use crate::search;
use crate::sockets::{SocketFactory, SystemSockets};
use crate::tcp::{TcpExchange, TcpProgress};
use crate::types::RecordType;
use crate::wire::{Query, Response};
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::debug;

/// Longest name accepted by [`Context::query`], in presentation form.
const MAX_QUERY_NAME: usize = 253;

// Reactor token tags; the socket pool owns tag 1 (see `pool`).
const TAG_RETRY: u64 = 2;
const TAG_TCP: u64 = 3;
const TAG_FINALIZE: u64 = 4;
const TAG_BACKLOG: u64 = 5;
const SEQ_MASK: u64 = (1 << 60) - 1;

fn token(tag: u64, seq: u64) -> EventToken {
    EventToken(tag << 60 | (seq & SEQ_MASK))
}

fn split_token(token: EventToken) -> (u64, u64) {
    (token.0 >> 60, token.0 & SEQ_MASK)
}

/// Receiver of query outcomes
///
/// Exactly one of these methods is called per submitted query. All have
/// empty default bodies so a handler only spells out the outcomes it
/// cares about; a handler that subscribes to nothing silently discards
/// its results.
#[allow(unused_variables)]
pub trait Handler {
    /// A matching response arrived (any rcode: SERVFAIL and NXDOMAIN
    /// land here too, inspect [`Response::rcode`])
    fn on_received(&self, op: &Operation, response: &Response<'_>) {}

    /// Every attempt on every nameserver went unanswered
    fn on_timeout(&self, op: &Operation) {}

    /// The query could not be encoded or sent anywhere
    fn on_failure(&self, op: &Operation) {}

    /// The operation was cancelled by the caller
    fn on_cancelled(&self, op: &Operation) {}
}

/// Handle to one submitted query
///
/// The handle does not own the lookup: it stays valid after the query
/// finished, and every method on a finished handle is a harmless no-op.
#[derive(Clone)]
pub struct Operation {
    inner: Weak<RefCell<Inner>>,
    seq: u64,
}

impl Operation {
    /// Cancel the operation
    ///
    /// Idempotent and always safe, including from inside a handler
    /// callback (where it is a no-op, the lookup being already
    /// finished). The handler will receive [`Handler::on_cancelled`] on
    /// the next reactor turn and nothing else.
    pub fn cancel(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.borrow_mut().cancel_lookup(self.seq);
    }

    /// The transaction id, while the query is still in flight
    pub fn id(&self) -> Option<u16> {
        let inner = self.inner.upgrade()?;
        let inner = inner.borrow();
        inner.lookups.get(&self.seq).map(|lookup| lookup.query.id())
    }
}

/// One terminal callback waiting to run once interior borrows drop.
struct PendingCallback {
    handler: Rc<dyn Handler>,
    seq: u64,
    terminal: Terminal,
}

/// The resolver core
///
/// See the crate-level docs for a usage example. Dropping the context
/// cancels every in-flight lookup (without callbacks) and closes all
/// sockets; reactor registrations are withdrawn before any fd is closed.
pub struct Context {
    inner: Rc<RefCell<Inner>>,
    // keeps the reactor's weak sink references alive
    _sink: Rc<SinkImpl>,
}

impl Context {
    /// Create a resolver on `reactor` with the given configuration,
    /// using real OS sockets
    pub fn new(reactor: Rc<dyn Reactor>, conf: ResolvConf) -> Self {
        Self::with_factory(reactor, conf, Rc::new(SystemSockets))
    }

    /// Create a resolver with a custom socket factory
    ///
    /// This is how tests substitute scripted sockets; applications
    /// normally use [`new`](Context::new).
    pub fn with_factory(
        reactor: Rc<dyn Reactor>,
        conf: ResolvConf,
        factory: Rc<dyn SocketFactory>,
    ) -> Self {
        let pool = UdpPool::new(factory.clone(), conf.socketcount, conf.buffersize);
        let placeholder: Weak<dyn ReactorSink> = Weak::<SinkImpl>::new();
        let inner = Rc::new(RefCell::new(Inner {
            conf,
            reactor,
            factory,
            pool,
            lookups: HashMap::new(),
            by_id: HashMap::new(),
            ids: IdGenerator::new(),
            next_seq: 1,
            rotate_counter: 0,
            backlog_timer: None,
            sink: placeholder,
        }));
        let sink = Rc::new(SinkImpl {
            inner: Rc::downgrade(&inner),
        });
        let sink_dyn: Rc<dyn ReactorSink> = sink.clone();
        let weak_sink: Weak<dyn ReactorSink> = Rc::downgrade(&sink_dyn);
        inner.borrow_mut().sink = weak_sink;
        Self { inner, _sink: sink }
    }

    /// Add a nameserver to the configured list
    ///
    /// Running lookups keep the snapshot they started with; the change
    /// applies to queries submitted afterwards.
    pub fn add_nameserver(&self, ip: Ip) {
        self.inner.borrow_mut().conf.nameservers.push(ip);
    }

    /// Drop all configured nameservers
    pub fn clear_nameservers(&self) {
        self.inner.borrow_mut().conf.nameservers.clear();
    }

    /// Submit a query
    ///
    /// Returns `None` only for malformed input (empty or oversized
    /// name); no lookup is created in that case. Every other failure is
    /// reported asynchronously through the handler: this method never
    /// invokes a callback, not even when the query cannot be encoded or
    /// no nameserver is configured.
    pub fn query(
        &self,
        name: &str,
        qtype: RecordType,
        bits: Bits,
        handler: Rc<dyn Handler>,
    ) -> Option<Operation> {
        if name.is_empty() || name.len() > MAX_QUERY_NAME {
            debug!("rejecting query for invalid name ({} bytes)", name.len());
            return None;
        }

        let mut inner = self.inner.borrow_mut();
        let seq = inner.start_lookup(name, qtype, bits, handler)?;
        drop(inner);

        Some(Operation {
            inner: Rc::downgrade(&self.inner),
            seq,
        })
    }

    /// Deliver up to `max_calls` buffered datagrams to their lookups
    ///
    /// This is the back-pressure valve: the context calls it internally
    /// with the configured budget whenever a socket becomes readable,
    /// and applications may call it directly to drain a backlog on
    /// their own schedule. Returns the number of datagrams processed.
    pub fn deliver(&self, max_calls: usize) -> usize {
        let mut callbacks = Vec::new();
        let count = {
            let mut inner = self.inner.borrow_mut();
            let count = inner.deliver_batch(max_calls, &mut callbacks);
            inner.ensure_backlog_timer();
            count
        };
        fire(&Rc::downgrade(&self.inner), callbacks);
        count
    }

    /// Number of lookups currently alive (in flight or awaiting
    /// reclamation)
    pub fn pending(&self) -> usize {
        self.inner.borrow().lookups.len()
    }
}

/// Reactor-facing half of the context.
struct SinkImpl {
    inner: Weak<RefCell<Inner>>,
}

impl ReactorSink for SinkImpl {
    fn on_fd_ready(&self, token: EventToken, readable: bool, writable: bool) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut callbacks = Vec::new();
        inner
            .borrow_mut()
            .handle_fd_ready(token, readable, writable, &mut callbacks);
        fire(&self.inner, callbacks);
    }

    fn on_timer(&self, token: EventToken) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut callbacks = Vec::new();
        inner.borrow_mut().handle_timer(token, &mut callbacks);
        fire(&self.inner, callbacks);
    }
}

/// Run pending callbacks with no interior borrow held
fn fire(inner: &Weak<RefCell<Inner>>, callbacks: Vec<PendingCallback>) {
    for callback in callbacks {
        let op = Operation {
            inner: inner.clone(),
            seq: callback.seq,
        };
        match callback.terminal {
            Terminal::Received(bytes) => match Response::parse(&bytes) {
                Ok(response) => callback.handler.on_received(&op, &response),
                Err(err) => debug!("dropping terminal response: {}", err),
            },
            Terminal::TimedOut => callback.handler.on_timeout(&op),
            Terminal::Failed => callback.handler.on_failure(&op),
            Terminal::Cancelled => callback.handler.on_cancelled(&op),
        }
    }
}

/// Pick a transaction id not currently in flight, giving up after a
/// bounded number of draws; a duplicate is tolerable because responses
/// are also matched on the question.
fn pick_id(ids: &mut IdGenerator, by_id: &HashMap<u16, Vec<u64>>) -> u16 {
    for _ in 0..MAX_COLLISION_RETRIES {
        let id = ids.generate();
        if !by_id.contains_key(&id) {
            return id;
        }
    }
    ids.generate()
}

struct Inner {
    conf: ResolvConf,
    reactor: Rc<dyn Reactor>,
    factory: Rc<dyn SocketFactory>,
    pool: UdpPool,
    /// Every live lookup, keyed by sequence number
    lookups: HashMap<u64, Lookup>,
    /// Transaction id to lookup sequence numbers; normally one entry,
    /// more after a tolerated id collision
    by_id: HashMap<u16, Vec<u64>>,
    ids: IdGenerator,
    next_seq: u64,
    rotate_counter: usize,
    backlog_timer: Option<TimerToken>,
    /// Weak self-reference handed to the reactor with registrations
    sink: Weak<dyn ReactorSink>,
}

impl Inner {
    /// Create a lookup for `name` and post its first send
    ///
    /// Returns the sequence number of the new lookup. Failures past
    /// input validation (encoding, no nameservers, send errors) leave
    /// the lookup in a finishing state with a zero-delay failure timer.
    fn start_lookup(
        &mut self,
        name: &str,
        qtype: RecordType,
        bits: Bits,
        handler: Rc<dyn Handler>,
    ) -> Option<u64> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let candidates = search::candidates(name, self.conf.options.ndots, &self.conf.searchpaths);
        let nameservers = self.conf.nameservers.clone();
        let rotation = if self.conf.options.rotate && !nameservers.is_empty() {
            let offset = self.rotate_counter % nameservers.len();
            self.rotate_counter = self.rotate_counter.wrapping_add(1);
            offset
        } else {
            0
        };

        let id = pick_id(&mut self.ids, &self.by_id);
        let mut doomed = nameservers.is_empty();
        let query = match Query::new(&candidates[0], qtype, &bits, id, self.conf.buffersize) {
            Ok(query) => query,
            Err(err) => {
                debug!("query for {:?} failed to encode: {}", name, err);
                doomed = true;
                // a throwaway root query; the lookup is born finished and
                // these bytes never reach the wire
                Query::new(".", qtype, &bits, id, self.conf.buffersize).ok()?
            }
        };

        let lookup = Lookup {
            seq,
            handler,
            bits,
            qtype,
            candidates,
            cand_index: 0,
            query,
            nameservers,
            rotation,
            position: 0,
            attempt: 0,
            attempts: self.conf.options.attempts,
            timeout: Duration::from_secs(u64::from(self.conf.options.timeout)),
            timer: None,
            finalize: None,
            tcp: None,
            state: LookupState::AwaitingUdp,
            terminal: None,
        };
        self.lookups.insert(seq, lookup);

        if doomed {
            self.defer_finish(seq, Terminal::Failed);
        } else {
            self.by_id.entry(id).or_default().push(seq);
            if !self.send_attempt(seq) {
                self.defer_finish(seq, Terminal::Failed);
            }
        }
        Some(seq)
    }

    /// Send the current candidate to nameservers until one send sticks
    ///
    /// Arms the retry timer and returns true on success; returns false
    /// with the lookup still in place when every nameserver failed every
    /// remaining pass. The caller decides how to report that.
    fn send_attempt(&mut self, seq: u64) -> bool {
        loop {
            let this = &mut *self;
            let Some(lookup) = this.lookups.get_mut(&seq) else {
                return true;
            };
            if let Some(mut tcp) = lookup.tcp.take() {
                tcp.close(this.reactor.as_ref());
            }
            lookup.state = LookupState::AwaitingUdp;

            let server = lookup.current_server();
            match this.pool.send(
                lookup.query.bytes(),
                server.socket_addr(),
                this.reactor.as_ref(),
                &this.sink,
            ) {
                Ok(()) => {
                    debug!(
                        "sent query {:#06x} for {} to {}",
                        lookup.query.id(),
                        lookup.question().qname(),
                        server
                    );
                    let timer = this.reactor.arm_timer(
                        lookup.timeout,
                        this.sink.clone(),
                        token(TAG_RETRY, seq),
                    );
                    lookup.timer = Some(timer);
                    return true;
                }
                Err(err) => {
                    debug!("send to {} failed: {}", server, err);
                    if !lookup.advance_server() {
                        return false;
                    }
                }
            }
        }
    }

    /// Remove `seq` from the id table
    fn detach_id(&mut self, id: u16, seq: u64) {
        let emptied = self
            .by_id
            .get_mut(&id)
            .map(|seqs| {
                seqs.retain(|&s| s != seq);
                seqs.is_empty()
            })
            .unwrap_or(false);
        if emptied {
            self.by_id.remove(&id);
        }
    }

    /// Finish a lookup now: remove it everywhere and queue its callback
    fn finish(&mut self, seq: u64, terminal: Terminal, out: &mut Vec<PendingCallback>) {
        let Some(mut lookup) = self.lookups.remove(&seq) else {
            return;
        };
        self.detach_id(lookup.query.id(), seq);
        if let Some(timer) = lookup.timer.take() {
            self.reactor.cancel_timer(timer);
        }
        if let Some(timer) = lookup.finalize.take() {
            self.reactor.cancel_timer(timer);
        }
        if let Some(mut tcp) = lookup.tcp.take() {
            tcp.close(self.reactor.as_ref());
        }
        out.push(PendingCallback {
            handler: lookup.handler,
            seq: lookup.seq,
            terminal,
        });
    }

    /// Finish a lookup on the next reactor turn
    ///
    /// Used where a synchronous callback would be observable: failures
    /// discovered inside `query` and user cancellation. The lookup is
    /// detached from the id table immediately (it can no longer match
    /// responses) and reclaimed when the zero-delay timer fires.
    fn defer_finish(&mut self, seq: u64, terminal: Terminal) {
        let this = &mut *self;
        let Some(lookup) = this.lookups.get_mut(&seq) else {
            return;
        };

        let id = lookup.query.id();
        let emptied = this
            .by_id
            .get_mut(&id)
            .map(|seqs| {
                seqs.retain(|&s| s != seq);
                seqs.is_empty()
            })
            .unwrap_or(false);
        if emptied {
            this.by_id.remove(&id);
        }

        if let Some(timer) = lookup.timer.take() {
            this.reactor.cancel_timer(timer);
        }
        if let Some(mut tcp) = lookup.tcp.take() {
            tcp.close(this.reactor.as_ref());
        }
        lookup.state = LookupState::Finishing;
        lookup.terminal = Some(terminal);
        if lookup.finalize.is_none() {
            lookup.finalize = Some(this.reactor.arm_timer(
                Duration::ZERO,
                this.sink.clone(),
                token(TAG_FINALIZE, seq),
            ));
        }
    }

    /// User-requested cancellation; see [`Operation::cancel`]
    fn cancel_lookup(&mut self, seq: u64) {
        if self.lookups.contains_key(&seq) {
            self.defer_finish(seq, Terminal::Cancelled);
        }
    }

    /// Route one reactor fd event
    fn handle_fd_ready(
        &mut self,
        event: EventToken,
        readable: bool,
        writable: bool,
        out: &mut Vec<PendingCallback>,
    ) {
        if let Some((family, index)) = pool::decode_udp_token(event) {
            if readable {
                self.pool.drain(family, index);
                let budget = self.conf.max_calls;
                self.deliver_batch(budget, out);
                self.ensure_backlog_timer();
            }
            return;
        }
        if let (TAG_TCP, seq) = split_token(event) {
            self.on_tcp_event(seq, readable, writable, out);
        }
    }

    /// Route one reactor timer event
    fn handle_timer(&mut self, event: EventToken, out: &mut Vec<PendingCallback>) {
        match split_token(event) {
            (TAG_RETRY, seq) => self.on_retry_timer(seq, out),
            (TAG_FINALIZE, seq) => self.on_finalize(seq, out),
            (TAG_BACKLOG, _) => {
                self.backlog_timer = None;
                let budget = self.conf.max_calls;
                self.deliver_batch(budget, out);
                self.ensure_backlog_timer();
            }
            _ => {}
        }
    }

    /// Keep draining buffered datagrams on later turns instead of
    /// starving the rest of the reactor now
    fn ensure_backlog_timer(&mut self) {
        if self.pool.buffered() && self.backlog_timer.is_none() {
            self.backlog_timer = Some(self.reactor.arm_timer(
                Duration::ZERO,
                self.sink.clone(),
                token(TAG_BACKLOG, 0),
            ));
        }
    }

    /// Pop up to `max_calls` buffered datagrams and dispatch each
    fn deliver_batch(&mut self, max_calls: usize, out: &mut Vec<PendingCallback>) -> usize {
        let mut processed = 0;
        while processed < max_calls {
            let Some((peer, bytes)) = self.pool.take() else {
                break;
            };
            processed += 1;
            self.route_datagram(peer, bytes, out);
        }
        processed
    }

    /// Match one datagram against the live lookups and feed the winner
    fn route_datagram(&mut self, peer: SocketAddr, bytes: Vec<u8>, out: &mut Vec<PendingCallback>) {
        let peer_ip = Ip::new(peer.ip());
        let seq = match Response::parse(&bytes) {
            Ok(response) => {
                let id = response.id();
                let matched = self.by_id.get(&id).and_then(|seqs| {
                    seqs.iter().copied().find(|seq| {
                        self.lookups.get(seq).is_some_and(|lookup| {
                            lookup.state == LookupState::AwaitingUdp
                                && lookup.accepts_peer(peer_ip)
                                && lookup.query.matches(&response)
                        })
                    })
                });
                if matched.is_none() {
                    debug!(
                        "dropping datagram id {:#06x} from {}: no matching query",
                        id, peer
                    );
                }
                matched
            }
            Err(err) => {
                debug!("dropping datagram from {}: {}", peer, err);
                None
            }
        };
        if let Some(seq) = seq {
            self.process_response(seq, peer_ip, bytes, false, out);
        }
    }

    /// Act on a response that already matched `seq`
    fn process_response(
        &mut self,
        seq: u64,
        server: Ip,
        bytes: Vec<u8>,
        via_tcp: bool,
        out: &mut Vec<PendingCallback>,
    ) {
        enum Verdict {
            Upgrade,
            NextCandidate,
            Deliver,
        }

        let verdict = {
            let Some(lookup) = self.lookups.get(&seq) else {
                return;
            };
            let Ok(response) = Response::parse(&bytes) else {
                return;
            };
            if !via_tcp && response.truncated() {
                Verdict::Upgrade
            } else if response.rcode() == crate::types::ResponseCode::NXDomain
                && lookup.cand_index + 1 < lookup.candidates.len()
            {
                Verdict::NextCandidate
            } else {
                Verdict::Deliver
            }
        };

        match verdict {
            Verdict::Deliver => self.finish(seq, Terminal::Received(bytes), out),
            Verdict::Upgrade => self.upgrade_to_tcp(seq, server, out),
            Verdict::NextCandidate => self.advance_candidate(seq, out),
        }
    }

    /// A truncated UDP answer: retry the same query over TCP
    fn upgrade_to_tcp(&mut self, seq: u64, server: Ip, out: &mut Vec<PendingCallback>) {
        let started = {
            let this = &mut *self;
            let Some(lookup) = this.lookups.get_mut(&seq) else {
                return;
            };
            match TcpExchange::start(
                this.factory.as_ref(),
                server,
                lookup.query.bytes(),
                this.reactor.as_ref(),
                &this.sink,
                token(TAG_TCP, seq),
            ) {
                Ok(exchange) => {
                    lookup.tcp = Some(exchange);
                    lookup.state = LookupState::AwaitingTcp;
                    true
                }
                Err(err) => {
                    debug!("tcp connect to {} failed: {}", server, err);
                    false
                }
            }
        };
        if !started {
            self.tcp_failed(seq, out);
        }
    }

    /// The search list says try the next spelling of the name
    fn advance_candidate(&mut self, seq: u64, out: &mut Vec<PendingCallback>) {
        let rebuilt = {
            let this = &mut *self;
            let Some(lookup) = this.lookups.get_mut(&seq) else {
                return;
            };
            if let Some(timer) = lookup.timer.take() {
                this.reactor.cancel_timer(timer);
            }
            if let Some(mut tcp) = lookup.tcp.take() {
                tcp.close(this.reactor.as_ref());
            }

            // the old id leaves the table, a fresh one comes in
            let old_id = lookup.query.id();
            let emptied = this
                .by_id
                .get_mut(&old_id)
                .map(|seqs| {
                    seqs.retain(|&s| s != seq);
                    seqs.is_empty()
                })
                .unwrap_or(false);
            if emptied {
                this.by_id.remove(&old_id);
            }

            let id = pick_id(&mut this.ids, &this.by_id);
            let name = lookup.candidates[lookup.cand_index + 1].clone();
            match Query::new(&name, lookup.qtype, &lookup.bits, id, this.conf.buffersize) {
                Ok(query) => {
                    debug!("advancing search list to {:?}", name);
                    lookup.reset_for_candidate(query);
                    this.by_id.entry(id).or_default().push(seq);
                    true
                }
                Err(err) => {
                    debug!("search candidate {:?} failed to encode: {}", name, err);
                    false
                }
            }
        };

        if !rebuilt {
            self.finish(seq, Terminal::Failed, out);
        } else if !self.send_attempt(seq) {
            self.finish(seq, Terminal::Failed, out);
        }
    }

    /// The per-attempt timer fired
    fn on_retry_timer(&mut self, seq: u64, out: &mut Vec<PendingCallback>) {
        let proceed = {
            let this = &mut *self;
            let Some(lookup) = this.lookups.get_mut(&seq) else {
                return;
            };
            if lookup.state == LookupState::Finishing {
                return;
            }
            lookup.timer = None;
            // a timer expiring mid-TCP counts as a failed TCP attempt
            if let Some(mut tcp) = lookup.tcp.take() {
                tcp.close(this.reactor.as_ref());
            }
            lookup.advance_server()
        };

        if !proceed {
            self.finish(seq, Terminal::TimedOut, out);
        } else if !self.send_attempt(seq) {
            self.finish(seq, Terminal::Failed, out);
        }
    }

    /// The zero-delay reclamation timer fired
    fn on_finalize(&mut self, seq: u64, out: &mut Vec<PendingCallback>) {
        if let Some(mut lookup) = self.lookups.remove(&seq) {
            lookup.finalize = None;
            if let Some(terminal) = lookup.terminal.take() {
                out.push(PendingCallback {
                    handler: lookup.handler,
                    seq,
                    terminal,
                });
            }
        }
    }

    /// Readiness on a lookup's TCP socket
    fn on_tcp_event(
        &mut self,
        seq: u64,
        readable: bool,
        writable: bool,
        out: &mut Vec<PendingCallback>,
    ) {
        enum Step {
            Pending,
            Response(Vec<u8>, Ip),
            Failed,
        }

        let step = {
            let this = &mut *self;
            let Some(lookup) = this.lookups.get_mut(&seq) else {
                return;
            };
            let Some(tcp) = lookup.tcp.as_mut() else {
                return;
            };
            let server = tcp.server();
            match tcp.on_ready(readable, writable, this.reactor.as_ref(), &this.sink) {
                TcpProgress::Pending => Step::Pending,
                TcpProgress::Response(bytes) => Step::Response(bytes, server),
                TcpProgress::Failed(_) => Step::Failed,
            }
        };

        match step {
            Step::Pending => {}
            Step::Failed => self.tcp_failed(seq, out),
            Step::Response(bytes, server) => {
                let matched = {
                    let Some(lookup) = self.lookups.get(&seq) else {
                        return;
                    };
                    Response::parse(&bytes)
                        .map(|response| lookup.query.matches(&response))
                        .unwrap_or(false)
                };
                if matched {
                    self.process_response(seq, server, bytes, true, out);
                } else {
                    debug!("tcp response from {} does not match, retrying", server);
                    self.tcp_failed(seq, out);
                }
            }
        }
    }

    /// A TCP exchange died; fall back to the next nameserver over UDP
    fn tcp_failed(&mut self, seq: u64, out: &mut Vec<PendingCallback>) {
        let proceed = {
            let this = &mut *self;
            let Some(lookup) = this.lookups.get_mut(&seq) else {
                return;
            };
            if let Some(mut tcp) = lookup.tcp.take() {
                tcp.close(this.reactor.as_ref());
            }
            if let Some(timer) = lookup.timer.take() {
                this.reactor.cancel_timer(timer);
            }
            lookup.advance_server()
        };

        if !proceed {
            self.finish(seq, Terminal::Failed, out);
        } else if !self.send_attempt(seq) {
            self.finish(seq, Terminal::Failed, out);
        }
    }
}

impl Drop for Inner {
    /// Cancel every surviving lookup before any socket is closed; no
    /// handler fires after destruction
    fn drop(&mut self) {
        let reactor = self.reactor.clone();
        for lookup in self.lookups.values_mut() {
            if let Some(timer) = lookup.timer.take() {
                reactor.cancel_timer(timer);
            }
            if let Some(timer) = lookup.finalize.take() {
                reactor.cancel_timer(timer);
            }
            if let Some(mut tcp) = lookup.tcp.take() {
                tcp.close(reactor.as_ref());
            }
        }
        self.lookups.clear();
        self.by_id.clear();
        if let Some(timer) = self.backlog_timer.take() {
            reactor.cancel_timer(timer);
        }
        self.pool.close(reactor.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::WatchToken;
    use std::io;

    struct NullReactor;

    impl Reactor for NullReactor {
        fn now(&self) -> Duration {
            Duration::ZERO
        }

        fn register_fd(
            &self,
            _fd: i32,
            _readable: bool,
            _writable: bool,
            _sink: Weak<dyn ReactorSink>,
            _token: EventToken,
        ) -> WatchToken {
            WatchToken(0)
        }

        fn arm_timer(
            &self,
            _delay: Duration,
            _sink: Weak<dyn ReactorSink>,
            _token: EventToken,
        ) -> TimerToken {
            TimerToken(0)
        }

        fn cancel_fd(&self, _token: WatchToken) {}

        fn cancel_timer(&self, _token: TimerToken) {}
    }

    /// A factory whose sockets cannot be opened at all.
    struct BrokenFactory;

    impl SocketFactory for BrokenFactory {
        fn open_udp(
            &self,
            _family: crate::sockets::Family,
        ) -> io::Result<Box<dyn crate::sockets::UdpChannel>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no sockets"))
        }

        fn connect_tcp(
            &self,
            _addr: SocketAddr,
        ) -> io::Result<Box<dyn crate::sockets::TcpChannel>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no sockets"))
        }
    }

    struct Quiet;
    impl Handler for Quiet {}

    fn context() -> Context {
        let mut conf = ResolvConf::new();
        conf.nameservers.push("192.0.2.1".parse().unwrap());
        Context::with_factory(Rc::new(NullReactor), conf, Rc::new(BrokenFactory))
    }

    #[test]
    fn test_empty_name_rejected_synchronously() {
        let context = context();
        assert!(context
            .query("", RecordType::A, Bits::default(), Rc::new(Quiet))
            .is_none());
        assert_eq!(context.pending(), 0);
    }

    #[test]
    fn test_oversized_name_rejected_synchronously() {
        let context = context();
        let long = "a.".repeat(200);
        assert!(context
            .query(&long, RecordType::A, Bits::default(), Rc::new(Quiet))
            .is_none());
        assert_eq!(context.pending(), 0);
    }

    #[test]
    fn test_unsendable_query_defers_failure() {
        // the broken factory makes every send fail; the lookup must be
        // created anyway and no callback may fire inside query()
        let context = context();
        let op = context
            .query("example.com", RecordType::A, Bits::default(), Rc::new(Quiet))
            .expect("operation handle");
        assert_eq!(context.pending(), 1);
        assert!(op.id().is_some());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let context = context();
        let op = context
            .query("example.com", RecordType::A, Bits::default(), Rc::new(Quiet))
            .unwrap();
        op.cancel();
        op.cancel();
        assert_eq!(context.pending(), 1); // reclaimed on next reactor turn
    }

    #[test]
    fn test_nameserver_management() {
        let context = context();
        context.clear_nameservers();
        context.add_nameserver("192.0.2.7".parse().unwrap());
        let op = context
            .query("example.com", RecordType::A, Bits::default(), Rc::new(Quiet))
            .expect("operation handle");
        assert_eq!(context.pending(), 1);
        let _ = op;
    }

    #[test]
    fn test_operations_outlive_context() {
        let op = {
            let context = context();
            context
                .query("example.com", RecordType::A, Bits::default(), Rc::new(Quiet))
                .unwrap()
        };
        // the context is gone; the handle degrades to a no-op
        assert!(op.id().is_none());
        op.cancel();
    }
}
