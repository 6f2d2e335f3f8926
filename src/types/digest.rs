//! Content-addressed digests (`algorithm:hex`).

use std::fmt;
use std::str::FromStr;

use super::ParseError;

/// A content digest such as `sha256:9f86d0...`.
///
/// The zero value renders as the empty string and parses back from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    checksum: Vec<u8>,
}

impl Digest {
    /// Build a digest, checking the checksum length against the algorithm.
    pub fn new(algorithm: &str, checksum: Vec<u8>) -> Result<Self, ParseError> {
        let want = checksum_len(algorithm)
            .ok_or_else(|| ParseError::new("digest", algorithm, "unknown algorithm"))?;
        if checksum.len() != want {
            return Err(ParseError::new(
                "digest",
                algorithm,
                format!("checksum is {} bytes, want {}", checksum.len(), want),
            ));
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            checksum,
        })
    }

    pub fn sha256(checksum: [u8; 32]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            checksum: checksum.to_vec(),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn checksum(&self) -> &[u8] {
        &self.checksum
    }

    pub fn is_zero(&self) -> bool {
        self.algorithm.is_empty()
    }
}

fn checksum_len(algorithm: &str) -> Option<usize> {
    match algorithm {
        "sha256" => Some(32),
        "sha384" => Some(48),
        "sha512" => Some(64),
        _ => None,
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return Ok(());
        }
        write!(f, "{}:{}", self.algorithm, hex::encode(&self.checksum))
    }
}

impl FromStr for Digest {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| ParseError::new("digest", s, "missing algorithm prefix"))?;
        let checksum =
            hex::decode(encoded).map_err(|e| ParseError::new("digest", s, e.to_string()))?;
        Digest::new(algorithm, checksum).map_err(|e| ParseError::new("digest", s, e.reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn parses_and_renders() {
        let d: Digest = HELLO.parse().unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.checksum().len(), 32);
        assert_eq!(d.to_string(), HELLO);
    }

    #[test]
    fn empty_is_zero() {
        let d: Digest = "".parse().unwrap();
        assert!(d.is_zero());
        assert_eq!(d.to_string(), "");
    }

    #[test]
    fn rejects_bad_input() {
        assert!("sha256".parse::<Digest>().is_err());
        assert!("md5:abcd".parse::<Digest>().is_err());
        assert!("sha256:zz".parse::<Digest>().is_err());
        assert!("sha256:abcd".parse::<Digest>().is_err());
    }
}
