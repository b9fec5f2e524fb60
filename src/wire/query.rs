//! Outbound query assembly
//!
//! A [`Query`] is an immutable wire buffer built once when a lookup is
//! created: 12-byte header, one compressed question, an optional NOTIFY
//! payload record, and an EDNS-OPT pseudo-record as the final additional
//! record. The same object also answers the question "is this inbound
//! message a response to me?", which is the resolver's only defense
//! against spoofed or stale datagrams.

use crate::bits::Bits;
use crate::error::{Error, Result};
use crate::question::Question;
use crate::types::{OpCode, RecordClass, RecordType};
use crate::wire::name::write_name;
use crate::wire::response::Response;
use crate::wire::MAX_UDP_QUERY;

/// EDNS flags word with only the DNSSEC-OK bit set (RFC 6891).
const EDNS_DO: u16 = 0x8000;

/// An immutable outbound DNS query
///
/// # Example
///
/// ```
/// use lazyresolv::{Bits, Query, RecordType};
///
/// let query = Query::new("example.com", RecordType::A, &Bits::default(), 0xabcd, 1232).unwrap();
/// assert_eq!(query.id(), 0xabcd);
/// assert_eq!(query.question().qname(), "example.com");
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    /// The finished wire bytes
    buffer: Vec<u8>,
    /// The question encoded into the buffer, kept for match checks
    question: Question,
    /// The opcode encoded into the buffer
    opcode: OpCode,
}

impl Query {
    /// Build a standard query for `name` with the given record type
    ///
    /// `buffersize` is the receive buffer size advertised through EDNS.
    /// Fails if the name cannot be encoded or the result would not fit in
    /// a UDP message.
    pub fn new(
        name: &str,
        qtype: RecordType,
        bits: &Bits,
        id: u16,
        buffersize: u16,
    ) -> Result<Self> {
        Self::build(OpCode::Query, name, qtype, bits, id, buffersize, None)
    }

    /// Build a NOTIFY message (RFC 1996)
    ///
    /// The question type is SOA by convention. `data` optionally names a
    /// completion domain carried as a NULL record in the additional
    /// section, ahead of the EDNS-OPT trailer.
    pub fn notify(
        name: &str,
        bits: &Bits,
        id: u16,
        buffersize: u16,
        data: Option<&str>,
    ) -> Result<Self> {
        Self::build(
            OpCode::Notify,
            name,
            RecordType::SOA,
            bits,
            id,
            buffersize,
            data,
        )
    }

    fn build(
        opcode: OpCode,
        name: &str,
        qtype: RecordType,
        bits: &Bits,
        id: u16,
        buffersize: u16,
        data: Option<&str>,
    ) -> Result<Self> {
        match opcode {
            OpCode::Query | OpCode::Notify => {}
            other => {
                return Err(Error::Encode(format!(
                    "cannot build a query with opcode {:?}",
                    other
                )))
            }
        }

        let mut buffer = Vec::with_capacity(MAX_UDP_QUERY);

        // header: id, flags, qdcount=1, ancount=0, nscount=0, arcount
        let mut flags: u16 = (opcode.to_u8() as u16) << 11;
        if bits.recursion_desired() {
            flags |= 1 << 8;
        }
        if bits.authentic() {
            flags |= 1 << 5;
        }
        if bits.checking_disabled() {
            flags |= 1 << 4;
        }
        buffer.extend_from_slice(&id.to_be_bytes());
        buffer.extend_from_slice(&flags.to_be_bytes());
        buffer.extend_from_slice(&1u16.to_be_bytes());
        buffer.extend_from_slice(&0u16.to_be_bytes());
        buffer.extend_from_slice(&0u16.to_be_bytes());
        buffer.extend_from_slice(&0u16.to_be_bytes());

        // question
        write_name(&mut buffer, name)?;
        buffer.extend_from_slice(&qtype.to_u16().to_be_bytes());
        buffer.extend_from_slice(&RecordClass::IN.to_u16().to_be_bytes());

        let mut arcount: u16 = 0;

        // NOTIFY completion payload, a NULL record naming the data
        if opcode == OpCode::Notify {
            if let Some(data) = data {
                write_name(&mut buffer, data)?;
                buffer.extend_from_slice(&RecordType::NULL.to_u16().to_be_bytes());
                buffer.extend_from_slice(&RecordClass::IN.to_u16().to_be_bytes());
                buffer.extend_from_slice(&0u32.to_be_bytes());
                buffer.extend_from_slice(&0u16.to_be_bytes());
                arcount += 1;
            }
        }

        // EDNS-OPT pseudo-record, always the last additional record:
        // root owner name, type OPT, class = advertised UDP size,
        // ttl = extended rcode 0 / version 0 / flags, empty option list
        buffer.push(0);
        buffer.extend_from_slice(&RecordType::OPT.to_u16().to_be_bytes());
        buffer.extend_from_slice(&buffersize.to_be_bytes());
        let edns_flags: u16 = if bits.dnssec() { EDNS_DO } else { 0 };
        buffer.push(0);
        buffer.push(0);
        buffer.extend_from_slice(&edns_flags.to_be_bytes());
        buffer.extend_from_slice(&0u16.to_be_bytes());
        arcount += 1;

        buffer[10..12].copy_from_slice(&arcount.to_be_bytes());

        if buffer.len() > MAX_UDP_QUERY {
            return Err(Error::Encode(format!(
                "query is {} bytes, limit {}",
                buffer.len(),
                MAX_UDP_QUERY
            )));
        }

        Ok(Self {
            buffer,
            question: Question::new(name, qtype, RecordClass::IN),
            opcode,
        })
    }

    /// The transaction id
    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    /// The opcode
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// The encoded question
    pub fn question(&self) -> &Question {
        &self.question
    }

    /// Number of questions in the message (always 1)
    pub fn question_count(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// The finished wire bytes
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Is `response` a response to this specific query?
    ///
    /// The transaction id must match, and every question in the response
    /// must equal this query's question (name case-insensitive). Update
    /// responses carry no question section, so two update messages match
    /// on id alone. Any parse failure counts as a mismatch.
    pub fn matches(&self, response: &Response<'_>) -> bool {
        if response.id() != self.id() {
            return false;
        }
        if response.opcode() == OpCode::Update && self.opcode == OpCode::Update {
            return true;
        }
        if response.question_count() != self.question_count() {
            return false;
        }
        for index in 0..response.question_count() {
            match response.question(index as usize) {
                Ok(question) if question == self.question => {}
                _ => return false,
            }
        }
        true
    }
}
