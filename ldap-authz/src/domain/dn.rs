//! Distinguished names (RFC 4514)
//!
//! A [`Dn`] keeps the string it was parsed from for display and search
//! purposes, while equality, ordering and hashing use a normalized form:
//! attribute types are case-insensitive, values are compared unescaped and
//! case-insensitively, and the components of a multi-valued RDN are compared
//! regardless of their order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Malformed distinguished name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid DN '{input}': {reason}")]
pub struct DnParseError {
    pub input: String,
    pub reason: &'static str,
}

/// Parsed distinguished name
#[derive(Clone)]
pub struct Dn {
    raw: String,
    normalized: String,
    rdn_count: usize,
}

/// One `type=value` component of an RDN
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Ava {
    attr_type: String,
    value: String,
}

impl Dn {
    /// Parse a DN. The empty string is the (valid) root DN.
    pub fn parse(input: &str) -> Result<Self, DnParseError> {
        let raw = input.trim();
        let rdns = Parser::new(raw).parse().map_err(|reason| DnParseError {
            input: input.to_string(),
            reason,
        })?;

        let normalized = rdns
            .iter()
            .map(|avas| {
                avas.iter()
                    .map(|ava| format!("{}={}", ava.attr_type, escape_normalized(&ava.value)))
                    .collect::<Vec<_>>()
                    .join("+")
            })
            .collect::<Vec<_>>()
            .join(",");

        Ok(Self {
            raw: raw.to_string(),
            normalized,
            rdn_count: rdns.len(),
        })
    }

    /// True when `input` is a non-empty, structurally valid DN.
    pub fn is_valid(input: &str) -> bool {
        !input.trim().is_empty() && Self::parse(input).is_ok()
    }

    /// The DN as it was written (surrounding whitespace removed).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Number of RDNs; zero for the root DN.
    pub fn len(&self) -> usize {
        self.rdn_count
    }

    pub fn is_empty(&self) -> bool {
        self.rdn_count == 0
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dn({:?})", self.raw)
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl FromStr for Dn {
    type Err = DnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dn::parse(s)
    }
}

impl TryFrom<&str> for Dn {
    type Error = DnParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Dn::parse(value)
    }
}

impl Serialize for Dn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Dn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Dn::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn escape_normalized(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '+' | '=' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

type ParseResult<T> = std::result::Result<T, &'static str>;

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> ParseResult<Vec<Vec<Ava>>> {
        let mut rdns = Vec::new();
        self.skip_spaces();
        if self.peek().is_none() {
            return Ok(rdns);
        }

        loop {
            let mut avas = vec![self.parse_ava()?];
            while self.peek() == Some(b'+') {
                self.pos += 1;
                avas.push(self.parse_ava()?);
            }
            avas.sort();
            rdns.push(avas);

            match self.peek() {
                None => break,
                Some(b',') | Some(b';') => {
                    self.pos += 1;
                    self.skip_spaces();
                    if self.peek().is_none() {
                        return Err("trailing separator");
                    }
                }
                Some(_) => return Err("unexpected character after value"),
            }
        }

        Ok(rdns)
    }

    fn parse_ava(&mut self) -> ParseResult<Ava> {
        self.skip_spaces();
        let attr_type = self.parse_type()?;
        self.skip_spaces();
        if self.peek() != Some(b'=') {
            return Err("missing '=' after attribute type");
        }
        self.pos += 1;
        self.skip_spaces();
        let value = self.parse_value()?;
        Ok(Ava { attr_type, value })
    }

    fn parse_type(&mut self) -> ParseResult<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => {
                while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'-') {
                    self.pos += 1;
                }
            }
            Some(c) if c.is_ascii_digit() => self.parse_oid()?,
            _ => return Err("missing attribute type"),
        }

        let mut attr_type =
            String::from_utf8_lossy(&self.input[start..self.pos]).to_ascii_lowercase();
        // "oid.1.2.3" is an accepted legacy spelling of "1.2.3"
        if attr_type == "oid" && self.peek() == Some(b'.') {
            self.pos += 1;
            let oid_start = self.pos;
            self.parse_oid()?;
            attr_type = String::from_utf8_lossy(&self.input[oid_start..self.pos]).into_owned();
        }
        Ok(attr_type)
    }

    fn parse_oid(&mut self) -> ParseResult<()> {
        loop {
            let digits_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
            if self.pos == digits_start {
                return Err("malformed numeric OID");
            }
            if self.peek() == Some(b'.') {
                self.pos += 1;
            } else {
                return Ok(());
            }
        }
    }

    fn parse_value(&mut self) -> ParseResult<String> {
        match self.peek() {
            Some(b'#') => self.parse_hex_value(),
            Some(b'"') => self.parse_quoted_value(),
            _ => self.parse_string_value(),
        }
    }

    fn parse_hex_value(&mut self) -> ParseResult<String> {
        self.pos += 1;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        let len = self.pos - start;
        if len == 0 || len % 2 != 0 {
            return Err("malformed hex value");
        }
        let hex = String::from_utf8_lossy(&self.input[start..self.pos]).to_ascii_lowercase();
        self.skip_spaces();
        Ok(format!("#{hex}"))
    }

    fn parse_quoted_value(&mut self) -> ParseResult<String> {
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => return Err("unterminated quoted value"),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => bytes.push(self.parse_escape()?),
                Some(c) => {
                    bytes.push(c);
                    self.pos += 1;
                }
            }
        }
        self.skip_spaces();
        let value = String::from_utf8(bytes).map_err(|_| "value is not valid UTF-8")?;
        Ok(value.to_lowercase())
    }

    fn parse_string_value(&mut self) -> ParseResult<String> {
        let mut bytes = Vec::new();
        // Trailing unescaped spaces are insignificant.
        let mut significant_len = 0;
        while let Some(c) = self.peek() {
            match c {
                b',' | b';' | b'+' => break,
                b'\\' => {
                    bytes.push(self.parse_escape()?);
                    significant_len = bytes.len();
                }
                b'"' => return Err("unescaped quote in value"),
                _ => {
                    bytes.push(c);
                    self.pos += 1;
                    if c != b' ' {
                        significant_len = bytes.len();
                    }
                }
            }
        }
        bytes.truncate(significant_len);
        let value = String::from_utf8(bytes).map_err(|_| "value is not valid UTF-8")?;
        Ok(value.to_lowercase())
    }

    fn parse_escape(&mut self) -> ParseResult<u8> {
        self.pos += 1;
        match self.peek() {
            None => Err("dangling escape"),
            Some(c) if c.is_ascii_hexdigit() => {
                let hi = c;
                let lo = self
                    .input
                    .get(self.pos + 1)
                    .copied()
                    .filter(u8::is_ascii_hexdigit);
                match lo {
                    Some(lo) => {
                        self.pos += 2;
                        Ok(hex_digit(hi) << 4 | hex_digit(lo))
                    }
                    None => Err("malformed hex escape"),
                }
            }
            Some(c) if b",=+<>#;\\\" ".contains(&c) => {
                self.pos += 1;
                Ok(c)
            }
            Some(_) => Err("invalid escape sequence"),
        }
    }
}

fn hex_digit(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => c - b'A' + 10,
    }
}
