//! Content URIs of the form `<algo>://<hash>`.

use crate::error::EfsError;
use std::fmt;
use std::str::FromStr;

/// Longest URI accepted anywhere in the system (meta-file target lines and
/// the pull stream both enforce it).
pub const URI_MAX: usize = 1024;

const ALGO_MAX: usize = 32;
const HASH_MAX: usize = 256;

/// A parsed `<algo>://<hash>` content address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentUri {
    pub algo: String,
    pub hash: String,
}

impl ContentUri {
    pub fn new(algo: &str, hash: &str) -> Result<Self, EfsError> {
        let uri = Self { algo: algo.to_string(), hash: hash.to_string() };
        uri.validate()?;
        Ok(uri)
    }

    fn validate(&self) -> Result<(), EfsError> {
        let ok_algo = !self.algo.is_empty()
            && self.algo.len() <= ALGO_MAX
            && self.algo.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
        let ok_hash = !self.hash.is_empty()
            && self.hash.len() <= HASH_MAX
            && self.hash.bytes().all(|b| b.is_ascii_alphanumeric());
        if ok_algo && ok_hash {
            Ok(())
        } else {
            Err(EfsError::InvalidUri(self.to_string()))
        }
    }
}

impl fmt::Display for ContentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.algo, self.hash)
    }
}

impl FromStr for ContentUri {
    type Err = EfsError;

    fn from_str(s: &str) -> Result<Self, EfsError> {
        if s.len() > URI_MAX {
            let head: String = s.chars().take(32).collect();
            return Err(EfsError::InvalidUri(format!("{head}...")));
        }
        let (algo, hash) = s
            .split_once("://")
            .ok_or_else(|| EfsError::InvalidUri(s.to_string()))?;
        ContentUri::new(algo, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_uris() {
        let uri: ContentUri = "sha256://00deadbeef".parse().unwrap();
        assert_eq!(uri.algo, "sha256");
        assert_eq!(uri.hash, "00deadbeef");
        assert_eq!(uri.to_string(), "sha256://00deadbeef");
    }

    #[test]
    fn rejects_malformed_uris() {
        for bad in [
            "",
            "sha256",
            "sha256://",
            "://deadbeef",
            "sha256://dead beef",
            "sha_256://deadbeef",
            "http://example.com/x",
        ] {
            assert!(bad.parse::<ContentUri>().is_err(), "{bad:?} should fail");
        }
    }
}
