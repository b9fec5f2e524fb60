//! Resolver configuration
//!
//! The configuration mirrors what `/etc/resolv.conf` can express: the
//! nameservers to query, the search list for unqualified names, and the
//! classic options (`rotate`, `timeout`, `attempts`, `ndots`). A few
//! engine knobs that the file format has no words for (EDNS buffer size,
//! socket count, per-turn delivery budget) live alongside them.
//!
//! The parser is tolerant by default, like every other consumer of this
//! file format: unknown lines and options are skipped. In strict mode the
//! same conditions produce an error carrying file and line context.

use crate::error::{Error, Result};
use crate::ip::Ip;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Default and permitted ranges for the classic options.
const TIMEOUT_DEFAULT: u32 = 5;
const TIMEOUT_MAX: u32 = 30;
const ATTEMPTS_DEFAULT: u32 = 2;
const ATTEMPTS_MAX: u32 = 5;
const NDOTS_DEFAULT: u32 = 1;
const NDOTS_MAX: u32 = 15;

/// Options for the resolver, as found in `resolv.conf`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvOptions {
    /// Rotate the starting nameserver between queries
    pub rotate: bool,

    /// Seconds to wait for a response before moving on, 1..=30
    pub timeout: u32,

    /// Number of passes over the nameserver list, 1..=5
    pub attempts: u32,

    /// Number of dots a name needs before it is tried verbatim ahead of
    /// the search list, 0..=15
    pub ndots: u32,
}

impl Default for ResolvOptions {
    fn default() -> Self {
        Self {
            rotate: false,
            timeout: TIMEOUT_DEFAULT,
            attempts: ATTEMPTS_DEFAULT,
            ndots: NDOTS_DEFAULT,
        }
    }
}

/// Resolver configuration
///
/// # Example
///
/// ```
/// use lazyresolv::ResolvConf;
///
/// let mut conf = ResolvConf::new();
/// conf.nameservers.push("9.9.9.9".parse().unwrap());
/// conf.options.attempts = 3;
/// ```
#[derive(Debug, Clone)]
pub struct ResolvConf {
    /// Nameservers in the order they are tried
    pub nameservers: Vec<Ip>,

    /// Suffixes appended to unqualified names, in order
    pub searchpaths: Vec<String>,

    /// The classic resolv.conf options
    pub options: ResolvOptions,

    /// UDP buffer size advertised through EDNS
    pub buffersize: u16,

    /// Number of UDP sockets kept open per address family
    pub socketcount: usize,

    /// Max user callbacks delivered per reactor turn
    pub max_calls: usize,
}

impl ResolvConf {
    /// An empty configuration with default options and no nameservers
    pub fn new() -> Self {
        Self {
            nameservers: Vec::new(),
            searchpaths: Vec::new(),
            options: ResolvOptions::default(),
            // default payload advertisement per current operator practice;
            // large enough for most answers, small enough to avoid
            // fragmentation
            buffersize: 1232,
            socketcount: 1,
            max_calls: 8,
        }
    }

    /// The system configuration
    ///
    /// Parses `/etc/resolv.conf` leniently; a missing or unreadable file
    /// yields the defaults. When no nameserver was configured the local
    /// resolver at `127.0.0.1` is assumed, and when no search path was
    /// configured the machine's own domain is used if it has one.
    pub fn system() -> Self {
        let mut conf = Self::new();
        if let Err(err) = conf.parse_file("/etc/resolv.conf", false) {
            debug!("failed to read /etc/resolv.conf: {}", err);
        }
        if conf.nameservers.is_empty() {
            conf.nameservers.push(Ip::from(std::net::Ipv4Addr::LOCALHOST));
        }
        if conf.searchpaths.is_empty() {
            if let Some(domain) = local_domain() {
                conf.searchpaths.push(domain);
            }
        }
        conf
    }

    /// Parse a configuration file into this configuration
    ///
    /// In strict mode unrecognized lines and options are errors carrying
    /// `file:line` context; in lenient mode they are skipped.
    pub fn parse_file<P: AsRef<Path>>(&mut self, path: P, strict: bool) -> Result<()> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let name = path.display().to_string();
        self.parse(file, &name, strict)
    }

    /// Parse configuration from a reader
    ///
    /// `file` only labels error messages.
    pub fn parse<R: Read>(&mut self, reader: R, file: &str, strict: bool) -> Result<()> {
        for (index, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let line = line.trim_end();
            if let Err(reason) = self.parse_line(line, strict) {
                if strict {
                    return Err(Error::Config {
                        file: file.to_string(),
                        line: index + 1,
                        reason,
                    });
                }
                debug!("{}:{}: skipping: {}", file, index + 1, reason);
            }
        }
        Ok(())
    }

    /// Parse one trimmed line; the error is the human-readable reason
    fn parse_line(&mut self, line: &str, strict: bool) -> std::result::Result<(), String> {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            return Ok(());
        }

        let mut words = line.split_whitespace();
        let keyword = match words.next() {
            Some(word) => word.to_ascii_lowercase(),
            None => return Ok(()),
        };

        match keyword.as_str() {
            "nameserver" => {
                let value = words.next().ok_or("nameserver without an address")?;
                let ip: Ip = value
                    .parse()
                    .map_err(|_| format!("not an IP address: {}", value))?;
                self.nameservers.push(ip);
                Ok(())
            }
            "domain" => {
                // a plain domain behaves as a one-entry search list
                let value = words.next().ok_or("domain without a value")?;
                self.searchpaths = vec![value.to_string()];
                Ok(())
            }
            "search" => {
                // later search lines replace earlier ones entirely
                let paths: Vec<String> = words.map(str::to_string).collect();
                if paths.is_empty() {
                    return Err("search without any suffix".to_string());
                }
                self.searchpaths = paths;
                Ok(())
            }
            "options" => {
                // an unrecognized option skips just that option, not the
                // rest of the line
                for word in words {
                    if let Err(reason) = self.parse_option(word) {
                        if strict {
                            return Err(reason);
                        }
                        debug!("skipping option: {}", reason);
                    }
                }
                Ok(())
            }
            other => Err(format!("unrecognized: {}", other)),
        }
    }

    fn parse_option(&mut self, word: &str) -> std::result::Result<(), String> {
        match word.split_once(':') {
            None if word == "rotate" => {
                self.options.rotate = true;
                Ok(())
            }
            Some(("timeout", value)) => {
                self.options.timeout = parse_capped(value, 1, TIMEOUT_MAX)?;
                Ok(())
            }
            Some(("attempts", value)) => {
                self.options.attempts = parse_capped(value, 1, ATTEMPTS_MAX)?;
                Ok(())
            }
            Some(("ndots", value)) => {
                self.options.ndots = parse_capped(value, 0, NDOTS_MAX)?;
                Ok(())
            }
            _ => Err(format!("unrecognized option: {}", word)),
        }
    }
}

impl Default for ResolvConf {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a numeric option value and clamp it into its permitted range
fn parse_capped(value: &str, min: u32, max: u32) -> std::result::Result<u32, String> {
    let parsed: u32 = value
        .parse()
        .map_err(|_| format!("not a number: {}", value))?;
    Ok(parsed.clamp(min, max))
}

/// The machine's own domain: everything after the first dot of the
/// hostname, or nothing when the hostname is unqualified
fn local_domain() -> Option<String> {
    let mut buffer = [0u8; 256];
    // gethostname wants a raw byte buffer; it always terminates on success
    let rc = unsafe { libc::gethostname(buffer.as_mut_ptr() as *mut libc::c_char, buffer.len()) };
    if rc != 0 {
        return None;
    }
    let end = buffer.iter().position(|&b| b == 0)?;
    let hostname = std::str::from_utf8(&buffer[..end]).ok()?;
    let domain = hostname.split_once('.')?.1;
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_string())
    }
}
