//! Per-query state
//!
//! One [`Lookup`] tracks one user request from submission to its single
//! terminal callback: which spelling of the name is being tried, which
//! nameserver is next, how many passes over the server list remain,
//! which timer is armed, and the TCP exchange if a truncated answer
//! forced an upgrade. The resolver core drives the transitions; this
//! module owns the bookkeeping they read and write.

use crate::bits::Bits;
use crate::context::Handler;
use crate::ip::Ip;
use crate::question::Question;
use crate::reactor::TimerToken;
use crate::tcp::TcpExchange;
use crate::types::RecordType;
use crate::wire::Query;
use std::rc::Rc;
use std::time::Duration;

/// The single outcome a lookup delivers to its handler.
pub(crate) enum Terminal {
    /// A matching response arrived; the raw bytes are handed over
    Received(Vec<u8>),
    /// Every attempt on every nameserver went unanswered
    TimedOut,
    /// The query could not be sent (or built) at all
    Failed,
    /// The user cancelled the operation
    Cancelled,
}

/// Where the lookup is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookupState {
    /// A datagram is out; waiting for a response or the retry timer
    AwaitingUdp,
    /// A truncated answer upgraded this lookup to TCP
    AwaitingTcp,
    /// Terminal reached; the lookup is detached and awaits reclamation
    Finishing,
}

/// One in-flight user query
pub(crate) struct Lookup {
    /// Process-unique sequence number; keys the core's tables and the
    /// reactor tokens
    pub seq: u64,

    /// The user's callback object
    pub handler: Rc<dyn Handler>,

    /// Flags the query was submitted with, reused when the search list
    /// forces a rebuild
    pub bits: Bits,

    /// Record type, reused on rebuilds
    pub qtype: RecordType,

    /// Name spellings to try, in order (search-list expansion)
    pub candidates: Vec<String>,

    /// Index of the spelling currently on the wire
    pub cand_index: usize,

    /// The encoded query for the current candidate
    pub query: Query,

    /// Snapshot of the nameserver list taken at submission
    pub nameservers: Vec<Ip>,

    /// Starting offset into the nameserver list (rotation)
    pub rotation: usize,

    /// Position within the current pass over the nameserver list
    pub position: usize,

    /// Completed passes over the nameserver list
    pub attempt: u32,

    /// Total passes allowed
    pub attempts: u32,

    /// Per-attempt timeout
    pub timeout: Duration,

    /// The armed retry timer, if any
    pub timer: Option<TimerToken>,

    /// The armed finalize timer, if any (deferred failure, cancel)
    pub finalize: Option<TimerToken>,

    /// The TCP exchange, while awaiting a framed response
    pub tcp: Option<TcpExchange>,

    /// Lifecycle state
    pub state: LookupState,

    /// The outcome, set when `state` is `Finishing`
    pub terminal: Option<Terminal>,
}

impl Lookup {
    /// The nameserver the next datagram goes to
    pub fn current_server(&self) -> Ip {
        self.nameservers[(self.rotation + self.position) % self.nameservers.len()]
    }

    /// Step to the next nameserver, rolling over into the next pass
    ///
    /// Returns false when every nameserver has been tried in every
    /// permitted pass.
    pub fn advance_server(&mut self) -> bool {
        self.position += 1;
        if self.position >= self.nameservers.len() {
            self.position = 0;
            self.attempt += 1;
            return self.attempt < self.attempts;
        }
        true
    }

    /// Does this lookup accept responses from `peer`?
    ///
    /// Any nameserver in the snapshot qualifies; a slow server's answer
    /// is still welcome after the lookup moved on to the next one.
    pub fn accepts_peer(&self, peer: Ip) -> bool {
        self.nameservers.contains(&peer)
    }

    /// The question currently on the wire
    pub fn question(&self) -> &Question {
        self.query.question()
    }

    /// Restart the retry schedule for the next search-list candidate
    pub fn reset_for_candidate(&mut self, query: Query) {
        self.query = query;
        self.cand_index += 1;
        self.position = 0;
        self.attempt = 0;
        self.state = LookupState::AwaitingUdp;
    }
}
