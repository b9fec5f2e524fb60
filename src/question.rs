//! DNS question representation
//!
//! The question triple (name, type, class) identifies what a query asks
//! for. Besides living in outbound queries, the question is half of the
//! key that correlates responses with in-flight lookups, so its equality
//! semantics matter: names compare case-insensitively per RFC 1035.

use crate::types::{RecordClass, RecordType};
use std::fmt;
use std::sync::Arc;

/// A single DNS question
///
/// # Example
///
/// ```
/// use lazyresolv::{Question, RecordType, RecordClass};
///
/// let question = Question::new("example.com", RecordType::A, RecordClass::IN);
/// assert_eq!(question.qname(), "example.com");
/// ```
#[derive(Debug, Clone)]
pub struct Question {
    /// The domain name being queried, without a trailing dot
    qname: Arc<str>,
    /// The type of record being requested
    qtype: RecordType,
    /// The class of record being requested
    qclass: RecordClass,
}

impl Question {
    /// Create a new DNS question
    ///
    /// A trailing root dot is stripped so that `"example.com."` and
    /// `"example.com"` describe the same question.
    pub fn new(qname: impl AsRef<str>, qtype: RecordType, qclass: RecordClass) -> Self {
        let name = qname.as_ref();
        let name = name.strip_suffix('.').unwrap_or(name);
        Self {
            qname: Arc::from(name),
            qtype,
            qclass,
        }
    }

    /// The domain name being queried
    pub fn qname(&self) -> &str {
        &self.qname
    }

    /// The query type
    pub fn qtype(&self) -> RecordType {
        self.qtype
    }

    /// The query class
    pub fn qclass(&self) -> RecordClass {
        self.qclass
    }
}

impl PartialEq for Question {
    /// Questions compare with case-insensitive names (RFC 1035 §2.3.3);
    /// this equality is the spoofing defense used when matching responses
    /// to queries, so it must not be stricter or looser than the wire.
    fn eq(&self, other: &Self) -> bool {
        self.qtype == other.qtype
            && self.qclass == other.qclass
            && self.qname.eq_ignore_ascii_case(&other.qname)
    }
}

impl Eq for Question {}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.qname, self.qclass, self.qtype)
    }
}
