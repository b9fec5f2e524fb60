//! Tokio-backed reactor
//!
//! The resolver engine only knows the [`Reactor`] trait; this module
//! supplies the implementation most applications will actually use. Fd
//! watches become `AsyncFd` readiness loops and timers become sleeping
//! tasks, all spawned as local (non-`Send`) tasks so the engine's
//! single-threaded discipline carries over unchanged.
//!
//! Everything here must run inside a [`tokio::task::LocalSet`] on a
//! current-thread runtime; [`TokioReactor::run_local`] wraps that
//! ceremony for the common case.

use crate::reactor::{EventToken, Reactor, ReactorSink, TimerToken, WatchToken};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::task::JoinHandle;
use tracing::warn;

/// Borrowed fd wrapper so `AsyncFd` can register it; the resolver keeps
/// ownership of the underlying socket and outlives the watch.
struct Fd(RawFd);

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// [`Reactor`] implementation on top of tokio
///
/// # Example
///
/// ```rust,no_run
/// use std::rc::Rc;
/// use lazyresolv::{Bits, Context, Handler, RecordType, ResolvConf};
/// use lazyresolv::runtime::TokioReactor;
///
/// struct Quiet;
/// impl Handler for Quiet {}
///
/// # async fn demo() {
/// TokioReactor::run_local(|reactor| async move {
///     let context = Context::new(reactor, ResolvConf::system());
///     let _op = context.query("example.com", RecordType::A, Bits::default(), Rc::new(Quiet));
///     // ... keep the future alive until the handler has fired
/// })
/// .await;
/// # }
/// ```
pub struct TokioReactor {
    start: tokio::time::Instant,
    next_token: Cell<u64>,
    watches: RefCell<HashMap<u64, JoinHandle<()>>>,
    timers: RefCell<HashMap<u64, JoinHandle<()>>>,
    weak: Weak<TokioReactor>,
}

impl TokioReactor {
    /// Create a reactor; all later calls must happen inside a `LocalSet`
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            start: tokio::time::Instant::now(),
            next_token: Cell::new(1),
            watches: RefCell::new(HashMap::new()),
            timers: RefCell::new(HashMap::new()),
            weak: weak.clone(),
        })
    }

    /// Run `body` on a fresh `LocalSet` with a new reactor
    ///
    /// This is the whole setup dance in one call: the returned future
    /// completes when `body`'s future does, and spawned watch and timer
    /// tasks are dropped with the `LocalSet`.
    pub async fn run_local<F, Fut>(body: F) -> Fut::Output
    where
        F: FnOnce(Rc<TokioReactor>) -> Fut,
        Fut: Future,
    {
        let local = tokio::task::LocalSet::new();
        let reactor = TokioReactor::new();
        local.run_until(body(reactor)).await
    }

    fn next(&self) -> u64 {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        token
    }
}

impl Reactor for TokioReactor {
    fn now(&self) -> Duration {
        tokio::time::Instant::now() - self.start
    }

    fn register_fd(
        &self,
        fd: RawFd,
        readable: bool,
        writable: bool,
        sink: Weak<dyn ReactorSink>,
        token: EventToken,
    ) -> WatchToken {
        let id = self.next();
        if !readable && !writable {
            return WatchToken(id);
        }
        let interest = match (readable, writable) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (true, false) => Interest::READABLE,
            _ => Interest::WRITABLE,
        };

        let handle = tokio::task::spawn_local(async move {
            let async_fd = match AsyncFd::with_interest(Fd(fd), interest) {
                Ok(async_fd) => async_fd,
                Err(err) => {
                    warn!("failed to register fd {} with tokio: {}", fd, err);
                    return;
                }
            };
            loop {
                let mut guard = match async_fd.ready(interest).await {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                let ready = guard.ready();
                let Some(sink) = sink.upgrade() else {
                    return;
                };
                sink.on_fd_ready(token, ready.is_readable(), ready.is_writable());
                guard.clear_ready();
            }
        });
        self.watches.borrow_mut().insert(id, handle);
        WatchToken(id)
    }

    fn arm_timer(
        &self,
        delay: Duration,
        sink: Weak<dyn ReactorSink>,
        token: EventToken,
    ) -> TimerToken {
        let id = self.next();
        let weak = self.weak.clone();
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(reactor) = weak.upgrade() {
                reactor.timers.borrow_mut().remove(&id);
            }
            if let Some(sink) = sink.upgrade() {
                sink.on_timer(token);
            }
        });
        self.timers.borrow_mut().insert(id, handle);
        TimerToken(id)
    }

    fn cancel_fd(&self, token: WatchToken) {
        if let Some(handle) = self.watches.borrow_mut().remove(&token.0) {
            handle.abort();
        }
    }

    fn cancel_timer(&self, token: TimerToken) {
        if let Some(handle) = self.timers.borrow_mut().remove(&token.0) {
            handle.abort();
        }
    }
}

impl Drop for TokioReactor {
    fn drop(&mut self) {
        for (_, handle) in self.watches.borrow_mut().drain() {
            handle.abort();
        }
        for (_, handle) in self.timers.borrow_mut().drain() {
            handle.abort();
        }
    }
}
