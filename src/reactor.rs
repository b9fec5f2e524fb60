//! The event loop interface
//!
//! The resolver never blocks and never spins up threads: everything it
//! waits for is expressed as a registration against an event loop the
//! application already runs. This module defines the small interface the
//! resolver consumes — a monotonic clock, fd read/write watches, and
//! one-shot timers — so that any loop (tokio, libev bindings, a test
//! harness with virtual time) can drive it.
//!
//! Watches stay active until cancelled; timers fire once. Callbacks are
//! delivered through a [`ReactorSink`] held weakly, so a reactor never
//! keeps a dropped resolver alive and events for a dead sink are simply
//! discarded.

use std::os::fd::RawFd;
use std::rc::Weak;
use std::time::Duration;

/// Opaque identifier for an fd watch, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchToken(pub u64);

/// Opaque identifier for an armed timer, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u64);

/// Caller-chosen value echoed back with every event.
///
/// The resolver encodes what the event is about (which pool socket,
/// which lookup) into this value; the reactor treats it as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventToken(pub u64);

/// Receiver of reactor events
///
/// Implemented by the resolver core. The reactor calls these on its own
/// thread — the same thread everything else in the resolver runs on.
pub trait ReactorSink {
    /// An fd registered with [`Reactor::register_fd`] became ready
    fn on_fd_ready(&self, token: EventToken, readable: bool, writable: bool);

    /// A timer armed with [`Reactor::arm_timer`] fired
    fn on_timer(&self, token: EventToken);
}

/// The event loop the resolver runs on
///
/// All methods are called from the reactor thread. Implementations must
/// deliver events on that same thread and must tolerate cancellation of
/// tokens that already fired.
pub trait Reactor {
    /// A monotonic clock reading; only differences are meaningful
    fn now(&self) -> Duration;

    /// Watch `fd` for readability and/or writability
    ///
    /// The watch persists until cancelled. Each readiness edge calls
    /// `sink.on_fd_ready(token, ..)`; the sink is held weakly and events
    /// for an expired sink are dropped.
    fn register_fd(
        &self,
        fd: RawFd,
        readable: bool,
        writable: bool,
        sink: Weak<dyn ReactorSink>,
        token: EventToken,
    ) -> WatchToken;

    /// Arm a one-shot timer that fires after `delay`
    ///
    /// A zero delay is valid and fires on the next reactor turn, never
    /// synchronously inside this call.
    fn arm_timer(&self, delay: Duration, sink: Weak<dyn ReactorSink>, token: EventToken)
        -> TimerToken;

    /// Cancel an fd watch; cancelling an already-dropped watch is a no-op
    fn cancel_fd(&self, token: WatchToken);

    /// Cancel a timer; cancelling a fired or unknown timer is a no-op
    fn cancel_timer(&self, token: TimerToken);
}
