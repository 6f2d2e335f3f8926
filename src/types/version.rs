//! Normalized versions and CPE identifiers.

use std::fmt;
use std::str::FromStr;

use super::ParseError;

/// A package-manager independent version: a kind tag plus ten numeric
/// components, compared lexicographically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Version {
    pub kind: String,
    pub v: [i32; 10],
}

impl Version {
    pub fn new(kind: impl Into<String>, parts: &[i32]) -> Self {
        let mut v = [0; 10];
        for (slot, p) in v.iter_mut().zip(parts) {
            *slot = *p;
        }
        Self {
            kind: kind.into(),
            v,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.kind.is_empty()
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.kind != other.kind {
            return None;
        }
        Some(self.v.cmp(&other.v))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return Ok(());
        }
        write!(f, "{}:", self.kind)?;
        for (i, n) in self.v.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{n}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| ParseError::new("version", s, "missing kind"))?;
        if kind.is_empty() {
            return Err(ParseError::new("version", s, "empty kind"));
        }
        let mut v = [0; 10];
        let mut parts = rest.split('.');
        for slot in v.iter_mut() {
            match parts.next() {
                Some(p) => {
                    *slot = p
                        .parse()
                        .map_err(|_| ParseError::new("version", s, format!("bad component {p:?}")))?;
                }
                None => break,
            }
        }
        if parts.next().is_some() {
            return Err(ParseError::new("version", s, "more than 10 components"));
        }
        Ok(Self {
            kind: kind.to_string(),
            v,
        })
    }
}

/// A CPE name in either the 2.3 formatted-string binding or the older URI binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Cpe(String);

impl Cpe {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }
}

/// Splits on `:` that is not escaped with a backslash.
fn fs_components(s: &str) -> Vec<&str> {
    let mut out = Vec::with_capacity(13);
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ':' if !escaped => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => escaped = false,
        }
    }
    out.push(&s[start..]);
    out
}

impl FromStr for Cpe {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        if let Some(rest) = s.strip_prefix("cpe:2.3:") {
            let parts = fs_components(rest);
            if parts.len() != 11 {
                return Err(ParseError::new(
                    "cpe",
                    s,
                    format!("want 11 attributes, got {}", parts.len()),
                ));
            }
            if !matches!(parts[0], "a" | "o" | "h" | "*" | "-") {
                return Err(ParseError::new("cpe", s, "bad part attribute"));
            }
            return Ok(Self(s.to_string()));
        }
        if let Some(rest) = s.strip_prefix("cpe:/") {
            if !matches!(rest.chars().next(), Some('a' | 'o' | 'h') | None) {
                return Err(ParseError::new("cpe", s, "bad part attribute"));
            }
            return Ok(Self(s.to_string()));
        }
        Err(ParseError::new("cpe", s, "unknown binding"))
    }
}

impl fmt::Display for Cpe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
