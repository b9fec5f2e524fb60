//! DNS protocol type definitions
//!
//! This module defines the core DNS types the resolver works with:
//! - Record types (A, AAAA, CNAME, etc.)
//! - Record classes (IN, CH, etc.)
//! - Operation codes
//! - Response codes

use std::fmt;

/// DNS record type
///
/// Represents the type of DNS record being asked for (A, AAAA, CNAME, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// IPv4 address record
    A,
    /// Name server record
    NS,
    /// Canonical name record
    CNAME,
    /// Start of authority record
    SOA,
    /// Null record, used in NOTIFY padding
    NULL,
    /// Pointer record
    PTR,
    /// Mail exchange record
    MX,
    /// Text record
    TXT,
    /// IPv6 address record
    AAAA,
    /// Service record
    SRV,
    /// OPT pseudo-record for EDNS(0) (RFC 6891)
    OPT,
    /// DNSSEC signature (RFC 4034)
    RRSIG,
    /// Certificate authority authorization
    CAA,
    /// Any other record type
    Unknown(u16),
}

impl RecordType {
    /// Create a RecordType from a u16 value
    ///
    /// # Example
    ///
    /// ```
    /// use lazyresolv::RecordType;
    ///
    /// assert_eq!(RecordType::from_u16(1), RecordType::A);
    /// assert_eq!(RecordType::from_u16(28), RecordType::AAAA);
    /// assert_eq!(RecordType::from_u16(9999), RecordType::Unknown(9999));
    /// ```
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            10 => RecordType::NULL,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            33 => RecordType::SRV,
            41 => RecordType::OPT,
            46 => RecordType::RRSIG,
            257 => RecordType::CAA,
            _ => RecordType::Unknown(value),
        }
    }

    /// Convert RecordType to its u16 wire value
    pub fn to_u16(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::NULL => 10,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::OPT => 41,
            RecordType::RRSIG => 46,
            RecordType::CAA => 257,
            RecordType::Unknown(v) => v,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::NULL => write!(f, "NULL"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::MX => write!(f, "MX"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::SRV => write!(f, "SRV"),
            RecordType::OPT => write!(f, "OPT"),
            RecordType::RRSIG => write!(f, "RRSIG"),
            RecordType::CAA => write!(f, "CAA"),
            RecordType::Unknown(v) => write!(f, "TYPE{}", v),
        }
    }
}

/// DNS record class
///
/// Represents the class of DNS record; queries built by this crate are
/// always class IN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordClass {
    /// Internet class
    IN,
    /// Chaos class
    CH,
    /// Hesiod class
    HS,
    /// Any other class
    Unknown(u16),
}

impl RecordClass {
    /// Create a RecordClass from a u16 value
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            3 => RecordClass::CH,
            4 => RecordClass::HS,
            _ => RecordClass::Unknown(value),
        }
    }

    /// Convert RecordClass to its u16 wire value
    pub fn to_u16(self) -> u16 {
        match self {
            RecordClass::IN => 1,
            RecordClass::CH => 3,
            RecordClass::HS => 4,
            RecordClass::Unknown(v) => v,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordClass::IN => write!(f, "IN"),
            RecordClass::CH => write!(f, "CH"),
            RecordClass::HS => write!(f, "HS"),
            RecordClass::Unknown(v) => write!(f, "CLASS{}", v),
        }
    }
}

/// DNS operation code
///
/// The kind of message in the header's opcode field. Outbound messages
/// built by this crate are `Query` or `Notify`; `Update` only matters when
/// matching responses, because update responses carry no question section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Standard query
    Query,
    /// Inverse query (obsolete)
    IQuery,
    /// Server status request
    Status,
    /// Zone change notification (RFC 1996)
    Notify,
    /// Dynamic update (RFC 2136)
    Update,
    /// Any other opcode
    Unknown(u8),
}

impl OpCode {
    /// Create an OpCode from the 4-bit header field value
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => OpCode::Query,
            1 => OpCode::IQuery,
            2 => OpCode::Status,
            4 => OpCode::Notify,
            5 => OpCode::Update,
            _ => OpCode::Unknown(value),
        }
    }

    /// Convert OpCode to its 4-bit header field value
    pub fn to_u8(self) -> u8 {
        match self {
            OpCode::Query => 0,
            OpCode::IQuery => 1,
            OpCode::Status => 2,
            OpCode::Notify => 4,
            OpCode::Update => 5,
            OpCode::Unknown(v) => v,
        }
    }
}

/// DNS response code
///
/// The rcode of a response is not an error as far as the resolver is
/// concerned: SERVFAIL and NXDOMAIN responses are delivered to the caller
/// like any other, and only search-list processing inspects NXDOMAIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// No error
    NoError,
    /// Format error, the server could not interpret the query
    FormErr,
    /// Server failure
    ServFail,
    /// The queried name does not exist
    NXDomain,
    /// The server does not implement the request kind
    NotImp,
    /// The server refused to answer
    Refused,
    /// Any other response code
    Unknown(u8),
}

impl ResponseCode {
    /// Create a ResponseCode from the 4-bit header field value
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ResponseCode::NoError,
            1 => ResponseCode::FormErr,
            2 => ResponseCode::ServFail,
            3 => ResponseCode::NXDomain,
            4 => ResponseCode::NotImp,
            5 => ResponseCode::Refused,
            _ => ResponseCode::Unknown(value),
        }
    }

    /// Convert ResponseCode to its 4-bit header field value
    pub fn to_u8(self) -> u8 {
        match self {
            ResponseCode::NoError => 0,
            ResponseCode::FormErr => 1,
            ResponseCode::ServFail => 2,
            ResponseCode::NXDomain => 3,
            ResponseCode::NotImp => 4,
            ResponseCode::Refused => 5,
            ResponseCode::Unknown(v) => v,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::NoError => write!(f, "NOERROR"),
            ResponseCode::FormErr => write!(f, "FORMERR"),
            ResponseCode::ServFail => write!(f, "SERVFAIL"),
            ResponseCode::NXDomain => write!(f, "NXDOMAIN"),
            ResponseCode::NotImp => write!(f, "NOTIMP"),
            ResponseCode::Refused => write!(f, "REFUSED"),
            ResponseCode::Unknown(v) => write!(f, "RCODE{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_roundtrip() {
        for value in [1u16, 2, 5, 6, 10, 12, 15, 16, 28, 33, 41, 46, 257, 4242] {
            assert_eq!(RecordType::from_u16(value).to_u16(), value);
        }
    }

    #[test]
    fn test_record_type_display() {
        assert_eq!(RecordType::A.to_string(), "A");
        assert_eq!(RecordType::AAAA.to_string(), "AAAA");
        assert_eq!(RecordType::Unknown(999).to_string(), "TYPE999");
    }

    #[test]
    fn test_record_class_roundtrip() {
        for value in [1u16, 3, 4, 250] {
            assert_eq!(RecordClass::from_u16(value).to_u16(), value);
        }
    }

    #[test]
    fn test_opcode_roundtrip() {
        for value in [0u8, 1, 2, 4, 5, 9] {
            assert_eq!(OpCode::from_u8(value).to_u8(), value);
        }
        assert_eq!(OpCode::from_u8(3), OpCode::Unknown(3));
    }

    #[test]
    fn test_response_code_display() {
        assert_eq!(ResponseCode::NoError.to_string(), "NOERROR");
        assert_eq!(ResponseCode::NXDomain.to_string(), "NXDOMAIN");
        assert_eq!(ResponseCode::Unknown(11).to_string(), "RCODE11");
    }
}
