//! lazyresolv - an asynchronous DNS stub resolver library
//!
//! This crate implements the client half of DNS: it composes queries, sends
//! them to one or more recursive nameservers, correlates the answers that
//! come back, retries on packet loss, upgrades truncated answers to TCP, and
//! hands the final response to user code.
//!
//! # Architecture
//!
//! The crate is organized into several main modules:
//!
//! - `wire`: query assembly and response framing (RFC 1035, RFC 6891)
//! - `pool`: the shared UDP socket pool and its inbound buffering
//! - `lookup`: the per-query retry/truncation/search state machine
//! - `context`: the resolver core tying configuration, sockets and lookups
//!   together
//! - `config`: `resolv.conf` model and parser
//! - `reactor`: the event-loop interface the resolver runs on
//!
//! The resolver is single-threaded and never blocks: all waiting is
//! expressed through timers and fd watches on a user-supplied
//! [`Reactor`](reactor::Reactor). A tokio-backed reactor ships behind the
//! `rt-tokio` feature (on by default) for applications that do not bring
//! their own event loop.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use lazyresolv::{Bits, Context, Handler, Operation, RecordType, Response, ResolvConf};
//! # use lazyresolv::reactor::Reactor;
//!
//! struct Print;
//!
//! impl Handler for Print {
//!     fn on_received(&self, _op: &Operation, response: &Response<'_>) {
//!         println!("rcode {} with {} answers", response.rcode(), response.answer_count());
//!     }
//!     fn on_timeout(&self, _op: &Operation) {
//!         println!("timed out");
//!     }
//! }
//!
//! # fn demo(reactor: Rc<dyn Reactor>) -> Option<()> {
//! let conf = ResolvConf::system();
//! let context = Context::new(reactor, conf);
//! let op = context.query("example.com", RecordType::A, Bits::default(), Rc::new(Print))?;
//! # let _ = op; Some(())
//! # }
//! ```

pub mod bits;
pub mod config;
pub mod context;
pub mod id;
pub mod ip;
pub mod question;
pub mod reactor;
pub mod search;
pub mod sockets;
pub mod types;
pub mod wire;

mod lookup;
mod pool;
mod tcp;

/// Tokio-backed reactor adapter
///
/// Only compiled with the `rt-tokio` feature; the engine itself has no
/// runtime dependency.
#[cfg(feature = "rt-tokio")]
pub mod runtime;

/// Error types and handling
///
/// Provides unified error types for the entire crate.
pub mod error {

    use thiserror::Error;

    /// Main error type for lazyresolv
    #[derive(Error, Debug)]
    pub enum Error {
        /// A domain name that cannot be encoded into a query
        #[error("invalid domain name: {0}")]
        InvalidName(String),

        /// Query assembly failure
        #[error("message encoding error: {0}")]
        Encode(String),

        /// Configuration error, with file and line context when parsed
        /// from a resolv.conf file in strict mode
        #[error("configuration error at {file}:{line}: {reason}")]
        Config {
            /// Source file being parsed
            file: String,
            /// One-based line number
            line: usize,
            /// What was wrong with the line
            reason: String,
        },

        /// IO error
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
    }

    /// Result type for lazyresolv operations
    pub type Result<T> = std::result::Result<T, Error>;
}

// Re-export commonly used types
pub use bits::Bits;
pub use config::{ResolvConf, ResolvOptions};
pub use context::{Context, Handler, Operation};
pub use error::{Error, Result};
pub use ip::Ip;
pub use question::Question;
pub use types::{OpCode, RecordClass, RecordType, ResponseCode};
pub use wire::{Query, Record, Response};
