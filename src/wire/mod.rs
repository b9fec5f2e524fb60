//! DNS wire format support
//!
//! This module implements exactly as much of RFC 1035 and RFC 6891 as a
//! stub resolver needs: assembling an outbound query (header, one
//! compressed question, an EDNS-OPT trailer) and framing an inbound
//! response far enough to read its header fields and walk its sections.
//! Decoding record *data* is left to the caller; [`Record`] exposes the
//! raw RDATA bytes.

pub mod name;
pub mod query;
pub mod response;

pub use query::Query;
pub use response::{Record, Response, Section};

/// Size of the fixed DNS message header in bytes.
pub const HEADER_SIZE: usize = 12;

/// Largest query this crate will put on the wire over UDP.
pub const MAX_UDP_QUERY: usize = 512;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::Bits;
    use crate::types::RecordType;

    #[test]
    fn test_query_response_matching() {
        let query = Query::new("example.com", RecordType::A, &Bits::default(), 0x1234, 1232)
            .expect("build query");

        // a response is its own query bytes with the QR bit flipped
        let mut bytes = query.bytes().to_vec();
        bytes[2] |= 0x80;
        let response = Response::parse(&bytes).expect("parse response");

        assert!(query.matches(&response));
        assert_eq!(response.id(), 0x1234);
        assert!(response.is_response());
    }

    #[test]
    fn test_id_mismatch_rejected() {
        let query = Query::new("example.com", RecordType::A, &Bits::default(), 1, 1232).unwrap();
        let other = Query::new("example.com", RecordType::A, &Bits::default(), 2, 1232).unwrap();

        let mut bytes = other.bytes().to_vec();
        bytes[2] |= 0x80;
        let response = Response::parse(&bytes).unwrap();

        assert!(!query.matches(&response));
    }
}
