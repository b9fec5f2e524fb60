//! Domain name label coding
//!
//! Encodes dotted names into RFC 1035 length-prefixed label sequences and
//! decodes them back, following compression pointers on the way in. A
//! query carries a single name so the encoder never emits pointers itself;
//! the decoder must still chase them because servers compress freely.

use crate::error::{Error, Result};

/// Longest wire form of a name, including length bytes and the root label.
pub const MAX_NAME: usize = 255;

/// Longest single label.
pub const MAX_LABEL: usize = 63;

/// Upper bound on pointer jumps while decompressing one name.
///
/// A legitimate name cannot need more jumps than it has labels; the bound
/// stops pointer loops in hostile messages.
const MAX_JUMPS: usize = 64;

/// Append the wire form of `name` to `buf`
///
/// Returns the number of bytes written. An empty name and `"."` both
/// encode as the bare root label. Fails on empty labels (`"a..b"`),
/// labels over 63 bytes, and names whose wire form would exceed 255
/// bytes.
pub fn write_name(buf: &mut Vec<u8>, name: &str) -> Result<usize> {
    let start = buf.len();
    let trimmed = name.strip_suffix('.').unwrap_or(name);

    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(Error::InvalidName(format!("empty label in {:?}", name)));
            }
            if label.len() > MAX_LABEL {
                return Err(Error::InvalidName(format!(
                    "label exceeds {} bytes in {:?}",
                    MAX_LABEL, name
                )));
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
    }
    buf.push(0);

    let written = buf.len() - start;
    if written > MAX_NAME {
        buf.truncate(start);
        return Err(Error::InvalidName(format!(
            "name exceeds {} bytes: {:?}",
            MAX_NAME, name
        )));
    }
    Ok(written)
}

/// Decode the name starting at `pos` inside the full message `msg`
///
/// Returns the dotted name (without trailing dot; the root name decodes
/// to an empty string) and the number of bytes the name occupies at
/// `pos`, i.e. up to and including the terminating zero label or the
/// first compression pointer.
pub fn read_name(msg: &[u8], pos: usize) -> Result<(String, usize)> {
    let mut name = String::new();
    let mut cursor = pos;
    let mut consumed = None;
    let mut jumps = 0;

    loop {
        let len = *msg
            .get(cursor)
            .ok_or_else(|| Error::Encode("name runs past end of message".into()))?
            as usize;

        if len & 0xc0 == 0xc0 {
            // compression pointer: the two low bits of this byte plus the
            // next byte form an offset from the start of the message
            let next = *msg
                .get(cursor + 1)
                .ok_or_else(|| Error::Encode("truncated compression pointer".into()))?
                as usize;
            if consumed.is_none() {
                consumed = Some(cursor + 2 - pos);
            }
            let target = ((len & 0x3f) << 8) | next;
            if target >= cursor {
                return Err(Error::Encode("forward compression pointer".into()));
            }
            jumps += 1;
            if jumps > MAX_JUMPS {
                return Err(Error::Encode("compression pointer loop".into()));
            }
            cursor = target;
            continue;
        }

        if len & 0xc0 != 0 {
            return Err(Error::Encode(format!("reserved label type {:#04x}", len)));
        }

        cursor += 1;
        if len == 0 {
            break;
        }

        let label = msg
            .get(cursor..cursor + len)
            .ok_or_else(|| Error::Encode("label runs past end of message".into()))?;
        if !name.is_empty() {
            name.push('.');
        }
        // label bytes are arbitrary; non-ASCII is carried through lossily
        name.push_str(&String::from_utf8_lossy(label));
        cursor += len;

        if name.len() > MAX_NAME {
            return Err(Error::Encode("decoded name too long".into()));
        }
    }

    let consumed = consumed.unwrap_or(cursor - pos);
    Ok((name, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_simple_name() {
        let mut buf = Vec::new();
        let n = write_name(&mut buf, "example.com").unwrap();
        assert_eq!(n, 13);
        assert_eq!(buf, b"\x07example\x03com\x00");
    }

    #[test]
    fn test_write_root() {
        let mut buf = Vec::new();
        assert_eq!(write_name(&mut buf, "").unwrap(), 1);
        assert_eq!(buf, b"\x00");

        let mut buf = Vec::new();
        assert_eq!(write_name(&mut buf, ".").unwrap(), 1);
        assert_eq!(buf, b"\x00");
    }

    #[test]
    fn test_write_trailing_dot() {
        let mut buf = Vec::new();
        write_name(&mut buf, "example.com.").unwrap();
        assert_eq!(buf, b"\x07example\x03com\x00");
    }

    #[test]
    fn test_write_rejects_bad_labels() {
        let mut buf = Vec::new();
        assert!(write_name(&mut buf, "a..b").is_err());

        let long_label = "x".repeat(64);
        assert!(write_name(&mut buf, &long_label).is_err());

        // 4 * 63-byte labels push the wire form over 255
        let long_name = [
            "y".repeat(63),
            "y".repeat(63),
            "y".repeat(63),
            "y".repeat(63),
        ]
        .join(".");
        assert!(write_name(&mut buf, &long_name).is_err());
    }

    #[test]
    fn test_read_roundtrip() {
        let mut buf = Vec::new();
        write_name(&mut buf, "www.Example.ORG").unwrap();
        let (name, consumed) = read_name(&buf, 0).unwrap();
        assert_eq!(name, "www.Example.ORG");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_read_with_pointer() {
        // "example.com" at offset 2, then "www" + pointer back to it
        let mut msg = vec![0u8, 0];
        write_name(&mut msg, "example.com").unwrap();
        let www = msg.len();
        msg.push(3);
        msg.extend_from_slice(b"www");
        msg.extend_from_slice(&[0xc0, 0x02]);

        let (name, consumed) = read_name(&msg, www).unwrap();
        assert_eq!(name, "www.example.com");
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_read_rejects_pointer_loop() {
        // two pointers chasing each other forever would spin without the
        // forward-pointer rule
        let msg = vec![0xc0, 0x00];
        assert!(read_name(&msg, 0).is_err());

        let msg = vec![0x01, b'a', 0xc0, 0x02];
        assert!(read_name(&msg, 2).is_err());
    }

    #[test]
    fn test_read_truncated() {
        let msg = b"\x07exam";
        assert!(read_name(msg, 0).is_err());
    }
}
